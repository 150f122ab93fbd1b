//! Read-only object store boundary
//!
//! Configballs are published as `config-app=<app>,hash=<h>,version=<v>.tar.gz`
//! objects; consumers enumerate a bucket and fetch the most recently created
//! object matching a pattern.

use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use tracing::{info, warn};

use crate::errors::Error;

#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub name: String,
    pub created: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, bucket: &str) -> Result<Vec<ObjectMeta>, Error>;
    async fn fetch(&self, bucket: &str, name: &str) -> Result<Vec<u8>, Error>;
}

/// Object name pattern for a (app, version) configball.
pub fn configball_pattern(app: &str, version: &str) -> String {
    format!("config-app={app},hash=.*,version={version}.tar.gz")
}

/// Scan a bucket for objects matching `pattern` and fetch the most recently
/// created match.
pub async fn fetch_latest_matching(
    store: &dyn ObjectStore,
    bucket: &str,
    pattern: &str,
) -> Result<Vec<u8>, Error> {
    let matcher = Regex::new(pattern)
        .map_err(|e| Error::ObjectStore(format!("bad object pattern {pattern}: {e}")))?;
    let objects = store.list(bucket).await?;

    let mut most_recent: Option<ObjectMeta> = None;
    for object in objects {
        if !matcher.is_match(&object.name) {
            continue;
        }
        match &most_recent {
            Some(current) if current.created >= object.created => {}
            _ => most_recent = Some(object),
        }
    }

    let Some(object) = most_recent else {
        warn!("no object matching pattern={pattern} in bucket={bucket}");
        return Err(Error::ObjectStore(format!(
            "no match found for pattern: {pattern}"
        )));
    };
    let data = store.fetch(bucket, &object.name).await?;
    info!("got object name={} {} bytes", object.name, data.len());
    Ok(data)
}

/// Directory-backed object store: a bucket is a subdirectory, object
/// creation time is file mtime.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> FsObjectStore {
        FsObjectStore { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(&self, bucket: &str) -> Result<Vec<ObjectMeta>, Error> {
        let dir = self.root.join(bucket);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::ObjectStore(format!("cannot list bucket={bucket}: {e}")))?;
        let mut objects = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::ObjectStore(e.to_string()))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| Error::ObjectStore(e.to_string()))?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| {
                    Utc.timestamp_opt(d.as_secs() as i64, d.subsec_nanos())
                        .single()
                        .unwrap_or_default()
                })
                .unwrap_or_default();
            objects.push(ObjectMeta {
                name: entry.file_name().to_string_lossy().into_owned(),
                created: modified,
            });
        }
        Ok(objects)
    }

    async fn fetch(&self, bucket: &str, name: &str) -> Result<Vec<u8>, Error> {
        let path = self.root.join(bucket).join(name);
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::ObjectStore(format!("cannot fetch {bucket}/{name}: {e}")))
    }
}
