//! Queue job wire format
//!
//! Jobs are self-describing JSON: the top-level `action` tag selects the
//! `request` payload variant, and an unknown tag is a hard parse error.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::cluster::{Cluster, ClusterId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub principal: String,
    #[serde(flatten)]
    pub request: JobRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", content = "request")]
pub enum JobRequest {
    #[serde(rename = "DEPLOY")]
    Deploy(DeployJobRequest),
    #[serde(rename = "RESTART")]
    Restart(RestartJobRequest),
}

impl JobRequest {
    pub fn action(&self) -> &'static str {
        match self {
            JobRequest::Deploy(_) => "DEPLOY",
            JobRequest::Restart(_) => "RESTART",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployJobRequest {
    pub cluster: Cluster,
    pub concurrency: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartJobRequest {
    pub cluster: ClusterId,
    pub concurrency: String,
    pub version: String,
}

impl Job {
    /// Build a job with a fresh v4 id.
    pub fn new(principal: &str, request: JobRequest) -> Job {
        Job {
            id: Uuid::new_v4().to_string(),
            principal: principal.to_string(),
            request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cluster::{ClusterId, RuntimeKind};

    fn deploy_job() -> Job {
        Job::new(
            "urn:user:dev@arryved.com",
            JobRequest::Deploy(DeployJobRequest {
                cluster: Cluster {
                    id: ClusterId {
                        app: "arryved-api".into(),
                        region: "central".into(),
                        variant: "default".into(),
                    },
                    runtime: RuntimeKind::HostPackage,
                    kind: "online".into(),
                    hosts: Default::default(),
                    repo: "apt".into(),
                },
                concurrency: "2".into(),
                version: "1.2.3".into(),
            }),
        )
    }

    #[test]
    fn test_job_json_round_trip() {
        let job = deploy_job();
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"action\":\"DEPLOY\""));
        assert!(json.contains("\"request\""));
        let parsed: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, job.id);
        match parsed.request {
            JobRequest::Deploy(request) => assert_eq!(request.version, "1.2.3"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_unknown_action_rejected() {
        let body = r#"{"id":"x","principal":"p","action":"ROLLBACK","request":{}}"#;
        assert!(serde_json::from_str::<Job>(body).is_err());
    }

    #[test]
    fn test_job_ids_are_uuids() {
        let job = deploy_job();
        assert_eq!(Uuid::parse_str(&job.id).unwrap().get_version_num(), 4);
    }
}
