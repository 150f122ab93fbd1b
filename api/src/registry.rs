//! Image registry boundary
//!
//! Cluster-api status reads resolve a `latest` image tag to the semantic
//! version tag pinned to the same digest, via the registry's HTTP API.

use appctl::errors::Error;
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Resolve the `:latest` tag of an image uri to its pinned semantic
    /// version tag. `unknown` means the registry had no answer.
    async fn resolve_latest(&self, image: &str) -> Result<String, Error>;
}

/// Docker registry v2 implementation: list tags, match manifest digests.
pub struct RestImageRegistry {
    client: reqwest::Client,
}

#[derive(Debug, serde::Deserialize)]
struct TagsList {
    #[serde(default)]
    tags: Vec<String>,
}

impl RestImageRegistry {
    pub fn new() -> Result<RestImageRegistry, Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(RestImageRegistry { client })
    }

    fn split_image(image: &str) -> Result<(String, String), Error> {
        let bare = image.split(':').next().unwrap_or(image);
        let (host, name) = bare
            .split_once('/')
            .ok_or_else(|| Error::Parse(format!("image uri {image} has no registry host")))?;
        Ok((host.to_string(), name.to_string()))
    }

    async fn digest_of(&self, host: &str, name: &str, tag: &str) -> Result<String, Error> {
        let url = format!("https://{host}/v2/{name}/manifests/{tag}");
        let response = self
            .client
            .head(&url)
            .header(
                "Accept",
                "application/vnd.docker.distribution.manifest.v2+json",
            )
            .send()
            .await
            .map_err(|e| Error::ClusterApi(format!("manifest head failed: {e}")))?;
        response
            .headers()
            .get("docker-content-digest")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::ClusterApi(format!("no digest for {name}:{tag}")))
    }
}

fn only_version_tags(tags: &[String]) -> Vec<String> {
    let tripartite = Regex::new(r"^\d+\.\d+\.\d+$").expect("static regex");
    tags.iter()
        .filter(|tag| tripartite.is_match(tag))
        .cloned()
        .collect()
}

#[async_trait]
impl ImageRegistry for RestImageRegistry {
    async fn resolve_latest(&self, image: &str) -> Result<String, Error> {
        let (host, name) = Self::split_image(image)?;

        let url = format!("https://{host}/v2/{name}/tags/list");
        let listed: TagsList = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::ClusterApi(format!("tag list failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::ClusterApi(format!("tag list invalid: {e}")))?;

        let latest_digest = match self.digest_of(&host, &name, "latest").await {
            Ok(digest) => digest,
            Err(_) => return Ok("unknown".to_string()),
        };

        let mut pinned = Vec::new();
        for tag in only_version_tags(&listed.tags) {
            if let Ok(digest) = self.digest_of(&host, &name, &tag).await {
                if digest == latest_digest {
                    pinned.push(tag);
                }
            }
        }
        debug!("latest for {image} pins tags {pinned:?}");

        match pinned.as_slice() {
            [] => Ok("unknown".to_string()),
            [tag] => Ok(tag.clone()),
            _ => Err(Error::ClusterApi(format!(
                "latest has multiple tripartite version tags {pinned:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_version_tags() {
        let tags = vec![
            "latest".to_string(),
            "1.2.3".to_string(),
            "v1.2.3".to_string(),
            "1.2".to_string(),
        ];
        assert_eq!(only_version_tags(&tags), vec!["1.2.3".to_string()]);
    }

    #[test]
    fn test_split_image() {
        let (host, name) = RestImageRegistry::split_image(
            "us-central1-docker.pkg.dev/arryved-tools/product-docker/poserp-app:latest",
        )
        .unwrap();
        assert_eq!(host, "us-central1-docker.pkg.dev");
        assert_eq!(name, "arryved-tools/product-docker/poserp-app");
        assert!(RestImageRegistry::split_image("bare-image").is_err());
    }
}
