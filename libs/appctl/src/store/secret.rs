//! Secret store boundary
//!
//! Secrets are opaque byte payloads with an owning user and group. The
//! backing manager is an external collaborator; the filesystem
//! implementation keeps one JSON envelope per secret.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// A secret as surfaced to API clients. The value never appears here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretEntry {
    pub urn: String,
    #[serde(rename = "createdEpochNs")]
    pub created_epoch_ns: i64,
    #[serde(rename = "ownerGroup")]
    pub owner_group: String,
    #[serde(rename = "ownerUser")]
    pub owner_user: String,
}

pub fn secret_urn(id: &str) -> String {
    format!("urn:secret:{id}")
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the raw payload bytes for a secret id.
    async fn read(&self, id: &str) -> Result<Vec<u8>, Error>;

    /// Create a secret. Fails with an "already exists" error when the id is
    /// taken.
    async fn create(
        &self,
        id: &str,
        value: &[u8],
        owner_user: &str,
        owner_group: &str,
    ) -> Result<(), Error>;

    /// Replace a secret's payload. Fails with a "not found" error when
    /// absent.
    async fn update(&self, id: &str, value: &[u8]) -> Result<(), Error>;

    async fn delete(&self, id: &str) -> Result<(), Error>;

    /// Enumerate secrets, newest first.
    async fn list(&self) -> Result<Vec<SecretEntry>, Error>;

    /// Owner (user, group) for a secret id.
    async fn owners(&self, id: &str) -> Result<(String, String), Error>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "ownerUser")]
    owner_user: String,
    #[serde(rename = "ownerGroup")]
    owner_group: String,
    #[serde(rename = "createdEpochNs")]
    created_epoch_ns: i64,
    /// base64 payload; secret data can be binary
    value: String,
}

/// Directory-backed secret store.
pub struct FsSecretStore {
    root: PathBuf,
}

impl FsSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> FsSecretStore {
        FsSecretStore { root: root.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn load(&self, id: &str) -> Result<Envelope, Error> {
        let data = tokio::fs::read(self.path_for(id))
            .await
            .map_err(|_| Error::SecretStore(format!("secret not found: {id}")))?;
        serde_json::from_slice(&data)
            .map_err(|e| Error::SecretStore(format!("secret {id} unreadable: {e}")))
    }

    async fn save(&self, envelope: &Envelope) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::SecretStore(e.to_string()))?;
        let data = serde_json::to_vec(envelope).map_err(|e| Error::SecretStore(e.to_string()))?;
        tokio::fs::write(self.path_for(&envelope.id), data)
            .await
            .map_err(|e| Error::SecretStore(e.to_string()))
    }
}

#[async_trait]
impl SecretStore for FsSecretStore {
    async fn read(&self, id: &str) -> Result<Vec<u8>, Error> {
        let envelope = self.load(id).await?;
        base64::engine::general_purpose::STANDARD
            .decode(&envelope.value)
            .map_err(|e| Error::SecretStore(format!("secret {id} payload corrupt: {e}")))
    }

    async fn create(
        &self,
        id: &str,
        value: &[u8],
        owner_user: &str,
        owner_group: &str,
    ) -> Result<(), Error> {
        if self.path_for(id).exists() {
            return Err(Error::SecretStore(format!("secret already exists: {id}")));
        }
        let envelope = Envelope {
            id: id.to_string(),
            owner_user: owner_user.to_string(),
            owner_group: owner_group.to_string(),
            created_epoch_ns: Utc::now().timestamp_nanos_opt().unwrap_or(0),
            value: base64::engine::general_purpose::STANDARD.encode(value),
        };
        self.save(&envelope).await
    }

    async fn update(&self, id: &str, value: &[u8]) -> Result<(), Error> {
        let mut envelope = self.load(id).await?;
        envelope.value = base64::engine::general_purpose::STANDARD.encode(value);
        self.save(&envelope).await
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        tokio::fs::remove_file(self.path_for(id))
            .await
            .map_err(|_| Error::SecretStore(format!("secret not found: {id}")))
    }

    async fn list(&self) -> Result<Vec<SecretEntry>, Error> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(_) => return Ok(entries),
        };
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::SecretStore(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            let envelope = self.load(id).await?;
            entries.push(SecretEntry {
                urn: secret_urn(&envelope.id),
                created_epoch_ns: envelope.created_epoch_ns,
                owner_group: envelope.owner_group,
                owner_user: envelope.owner_user,
            });
        }
        entries.sort_by(|a, b| b.created_epoch_ns.cmp(&a.created_epoch_ns));
        Ok(entries)
    }

    async fn owners(&self, id: &str) -> Result<(String, String), Error> {
        let envelope = self.load(id).await?;
        Ok((envelope.owner_user, envelope.owner_group))
    }
}
