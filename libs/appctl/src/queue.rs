//! Durable work queue boundary
//!
//! The control API publishes jobs and the worker pool consumes them one at a
//! time with an explicit ack once the body decodes. The queue service itself
//! is an external collaborator reached over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::errors::Error;
use crate::jobs::Job;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
const PULL_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(rename = "baseUrl", default)]
    pub base_url: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub subscription: String,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Publish a job; returns the queue's publish id.
    async fn enqueue(&self, job: &Job) -> Result<String, Error>;

    /// Pull at most one job, waiting up to the queue's long-poll bound.
    /// `Ok(None)` means the wait elapsed with nothing to do.
    async fn dequeue(&self) -> Result<Option<Job>, Error>;
}

pub struct HttpQueue {
    client: reqwest::Client,
    cfg: QueueConfig,
}

#[derive(Debug, Serialize)]
struct AckRequest<'a> {
    #[serde(rename = "ackId")]
    ack_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PulledMessage {
    #[serde(rename = "ackId")]
    ack_id: String,
    message: serde_json::Value,
}

impl HttpQueue {
    pub fn new(cfg: QueueConfig) -> Result<HttpQueue, Error> {
        let client = reqwest::Client::builder()
            .timeout(PULL_WAIT + Duration::from_secs(5))
            .build()?;
        Ok(HttpQueue { client, cfg })
    }
}

#[async_trait]
impl JobQueue for HttpQueue {
    async fn enqueue(&self, job: &Job) -> Result<String, Error> {
        let url = format!("{}/topics/{}/publish", self.cfg.base_url, self.cfg.topic);
        let response = self
            .client
            .post(&url)
            .timeout(PUBLISH_TIMEOUT)
            .json(job)
            .send()
            .await
            .map_err(|e| Error::Queue(format!("publish failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Queue(format!(
                "publish failed with status {}",
                response.status()
            )));
        }
        let body: PublishResponse = response
            .json()
            .await
            .map_err(|e| Error::Queue(format!("publish response invalid: {e}")))?;
        debug!("enqueued job jobid={} pubid={}", job.id, body.id);
        Ok(body.id)
    }

    async fn dequeue(&self) -> Result<Option<Job>, Error> {
        let url = format!(
            "{}/subscriptions/{}/pull?waitS={}",
            self.cfg.base_url,
            self.cfg.subscription,
            PULL_WAIT.as_secs()
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Queue(format!("pull failed: {e}")))?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Queue(format!(
                "pull failed with status {}",
                response.status()
            )));
        }
        let pulled: PulledMessage = response
            .json()
            .await
            .map_err(|e| Error::Queue(format!("pull response invalid: {e}")))?;

        // ack only once the job body decodes; a poison message surfaces as
        // an error and stays on the queue
        let job: Job = serde_json::from_value(pulled.message)
            .map_err(|e| Error::Queue(format!("job decode failed: {e}")))?;

        let ack_url = format!(
            "{}/subscriptions/{}/ack",
            self.cfg.base_url, self.cfg.subscription
        );
        if let Err(e) = self
            .client
            .post(&ack_url)
            .json(&AckRequest {
                ack_id: &pulled.ack_id,
            })
            .send()
            .await
        {
            error!("ack failed for jobid={}: {e}", job.id);
        }
        debug!("dequeued job jobid={}", job.id);
        Ok(Some(job))
    }
}
