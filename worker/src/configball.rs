//! Configball handling on the worker side
//!
//! The worker expands configballs in-process into a scratch directory; the
//! layered config compile happens against the expanded tree.

use std::io::Read;

use appctl::errors::Error;
use appctl::model::ClusterId;
use appctl::store::{configball_pattern, fetch_latest_matching, ObjectStore};
use flate2::read::GzDecoder;
use tempfile::TempDir;
use tracing::{debug, info};

pub async fn fetch_configball(
    store: &dyn ObjectStore,
    bucket: &str,
    cluster_id: &ClusterId,
    version: &str,
) -> Result<Vec<u8>, Error> {
    let pattern = configball_pattern(&cluster_id.app, version);
    info!("looking for configball with pattern={pattern}");
    fetch_latest_matching(store, bucket, &pattern).await
}

pub fn unzip_gzip(gzipped: &[u8]) -> Result<Vec<u8>, Error> {
    let mut decoder = GzDecoder::new(gzipped);
    let mut unzipped = Vec::new();
    decoder
        .read_to_end(&mut unzipped)
        .map_err(|e| Error::FileSystem(format!("could not gunzip configball: {e}")))?;
    debug!("gunzipped configball {} bytes", unzipped.len());
    Ok(unzipped)
}

/// Expand a configball into a fresh scratch directory.
pub fn expand_configball(configball: &[u8]) -> Result<TempDir, Error> {
    let tar_stream = unzip_gzip(configball)?;
    let scratch = TempDir::new()
        .map_err(|e| Error::FileSystem(format!("could not create temp dir: {e}")))?;
    let mut archive = tar::Archive::new(tar_stream.as_slice());
    archive
        .unpack(scratch.path())
        .map_err(|e| Error::FileSystem(format!("could not expand tarball: {e}")))?;
    info!("expanded config into dir={}", scratch.path().display());
    Ok(scratch)
}
