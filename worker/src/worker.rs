//! Worker pool
//!
//! Long-lived loops dequeue jobs one at a time and dispatch on the
//! (action, runtime) pair. Unsupported combinations fail the job with a
//! descriptive error rather than crashing the loop.

use std::sync::Arc;
use std::time::Duration;

use appctl::errors::Error;
use appctl::jobs::{DeployJobRequest, Job, JobRequest};
use appctl::model::RuntimeKind;
use appctl::queue::JobQueue;
use appctl::store::ObjectStore;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::configball::{expand_configball, fetch_configball};
use crate::hosts::deploy_to_hosts;
use crate::kube::apply::{
    apply_deployment, decode_deployment, load_deploy_yamls, set_image_version, wait_for_settle,
};
use crate::kube::create_kube_client;
use crate::kube::generate::{derive_workload_identity, generate_from_template, preshared_cert_name};

const IDLE_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub action_status: String,
    pub cluster_status: String,
    pub detail: String,
}

impl JobResult {
    fn complete(detail: String) -> JobResult {
        JobResult {
            action_status: "COMPLETE".to_string(),
            cluster_status: "HEALTHY".to_string(),
            detail,
        }
    }

    fn failed(detail: String) -> JobResult {
        JobResult {
            action_status: "FAILED".to_string(),
            cluster_status: "UNHEALTHY".to_string(),
            detail,
        }
    }
}

pub struct Worker {
    cfg: Arc<Config>,
    queue: Arc<dyn JobQueue>,
    object_store: Arc<dyn ObjectStore>,
    psk: String,
}

impl Worker {
    pub fn new(
        cfg: Arc<Config>,
        queue: Arc<dyn JobQueue>,
        object_store: Arc<dyn ObjectStore>,
        psk: String,
    ) -> Worker {
        Worker {
            cfg,
            queue,
            object_store,
            psk,
        }
    }

    /// Spin up the worker loops and run them forever.
    pub async fn start(self: Arc<Self>) {
        let mut handles = Vec::new();
        for index in 0..self.cfg.max_job_threads {
            info!("spin up thread {index}...");
            let worker = self.clone();
            handles.push(tokio::spawn(async move { worker.run_loop(index).await }));
        }
        join_all(handles).await;
    }

    async fn run_loop(&self, index: usize) {
        loop {
            debug!("thread {index} checking queue...");
            match self.queue.dequeue().await {
                Err(e) => {
                    error!("dequeue error={e}, sleeping...");
                }
                Ok(None) => {
                    debug!("dequeue timeout, sleeping...");
                }
                Ok(Some(job)) => {
                    info!("job dequeued jobid={}", job.id);
                    match self.process_job(&job).await {
                        Ok(result) => info!("job finished result={result:?}"),
                        Err(e) => error!("job error={e}"),
                    }
                }
            }
            tokio::time::sleep(IDLE_PAUSE).await;
        }
    }

    pub async fn process_job(&self, job: &Job) -> Result<JobResult, Error> {
        match &job.request {
            JobRequest::Deploy(request) => {
                info!("DEPLOY action detected for job id={}", job.id);
                match request.cluster.runtime {
                    RuntimeKind::HostPackage => self.process_deploy_hosts(job, request).await,
                    RuntimeKind::ClusterApi => self.process_deploy_cluster(job, request).await,
                    other => Err(Error::Unsupported(format!(
                        "unsupported runtime={other} for job id={}",
                        job.id
                    ))),
                }
            }
            JobRequest::Restart(_) => Err(Error::Unsupported(format!(
                "unsupported action=RESTART for job id={}",
                job.id
            ))),
        }
    }

    /// Fan out to the cluster's hosts; the job result is the worst per-host
    /// outcome, with every host's detail retained.
    async fn process_deploy_hosts(
        &self,
        job: &Job,
        request: &DeployJobRequest,
    ) -> Result<JobResult, Error> {
        info!("processing job id={} as host-package deploy", job.id);
        let outcomes = deploy_to_hosts(&self.cfg, &self.psk, request).await?;

        let failures: Vec<String> = outcomes
            .iter()
            .filter(|outcome| outcome.result.code != 200)
            .map(|outcome| format!("host={} err={}", outcome.host, outcome.result.err))
            .collect();
        let summary = format!(
            "{} succeeded, {} failed",
            outcomes.len() - failures.len(),
            failures.len()
        );

        if failures.is_empty() {
            Ok(JobResult::complete(summary))
        } else {
            Ok(JobResult::failed(format!(
                "{summary}: {}",
                failures.join("; ")
            )))
        }
    }

    /// Expand + compile the configball, make sure descriptors exist for this
    /// env, apply the workload, and wait for the pods to settle.
    async fn process_deploy_cluster(
        &self,
        job: &Job,
        request: &DeployJobRequest,
    ) -> Result<JobResult, Error> {
        info!("processing job id={} as cluster-api deploy", job.id);
        let configball = fetch_configball(
            self.object_store.as_ref(),
            &self.cfg.config_bucket,
            &request.cluster.id,
            &request.version,
        )
        .await?;

        let scratch = expand_configball(&configball)?;
        let arryved_dir = scratch.path().join(".arryved");
        let compiled_path =
            appctl::appconfig::compile(&arryved_dir, &self.cfg.env, &request.cluster.id)?;

        let client = create_kube_client(&self.cfg.kube_config_path).await?;

        let resource_dir = arryved_dir.join("k8s").join(&self.cfg.env);
        if load_deploy_yamls(&resource_dir).map(|yamls| yamls.is_empty()).unwrap_or(true) {
            info!(
                "resourceDir={} has no descriptors, generating",
                resource_dir.display()
            );
            let identity = derive_workload_identity(&self.cfg.kube_config_path)?;
            let cert = preshared_cert_name(client.clone(), &request.cluster.id.app).await?;
            generate_from_template(
                &self.cfg.env,
                &arryved_dir,
                &compiled_path,
                &request.version,
                &identity,
                &cert,
            )?;
        }

        let yamls = load_deploy_yamls(&resource_dir)?;
        if yamls.len() != 1 {
            return Err(Error::ClusterApi(format!(
                "expected exactly 1 deployable object, got {}",
                yamls.len()
            )));
        }
        let mut deployment = decode_deployment(&yamls[0])?;
        set_image_version(&mut deployment, &request.version);
        let app_label = deployment
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| request.cluster.id.app.clone());

        if self.cfg.keep_temp_dir {
            let kept = scratch.into_path();
            warn!("keeping scratch dir {}", kept.display());
        }

        if let Err(e) = apply_deployment(client.clone(), deployment).await {
            warn!("error encountered during apply/redeploy: {e}");
            return Ok(JobResult::failed(e.to_string()));
        }
        if let Err(e) = wait_for_settle(client, &app_label).await {
            return Ok(JobResult::failed(e.to_string()));
        }
        Ok(JobResult::complete(String::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appctl::model::{Cluster, ClusterId, Host};
    use appctl::store::ObjectMeta;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct EmptyQueue;

    #[async_trait]
    impl JobQueue for EmptyQueue {
        async fn enqueue(&self, _job: &Job) -> Result<String, Error> {
            Ok("pub".into())
        }
        async fn dequeue(&self) -> Result<Option<Job>, Error> {
            Ok(None)
        }
    }

    struct EmptyStore;

    #[async_trait]
    impl ObjectStore for EmptyStore {
        async fn list(&self, _bucket: &str) -> Result<Vec<ObjectMeta>, Error> {
            Ok(Vec::new())
        }
        async fn fetch(&self, _bucket: &str, _name: &str) -> Result<Vec<u8>, Error> {
            Err(Error::ObjectStore("missing".into()))
        }
    }

    fn worker() -> Worker {
        Worker::new(
            Arc::new(Config {
                agent_scheme: "http".to_string(),
                host_deploy_timeout_s: 1,
                ..Config::default()
            }),
            Arc::new(EmptyQueue),
            Arc::new(EmptyStore),
            "psk".to_string(),
        )
    }

    fn cluster_with(runtime: RuntimeKind, hosts: HashMap<String, Host>) -> Cluster {
        Cluster {
            id: ClusterId {
                app: "arryved-api".into(),
                region: "central".into(),
                variant: "default".into(),
            },
            runtime,
            kind: "online".into(),
            hosts,
            repo: "apt".into(),
        }
    }

    fn deploy_job(runtime: RuntimeKind, hosts: HashMap<String, Host>, concurrency: &str) -> Job {
        Job::new(
            "p",
            JobRequest::Deploy(DeployJobRequest {
                cluster: cluster_with(runtime, hosts),
                concurrency: concurrency.to_string(),
                version: "1.2.3".to_string(),
            }),
        )
    }

    #[tokio::test]
    async fn test_restart_is_unsupported() {
        let job = Job::new(
            "p",
            JobRequest::Restart(appctl::jobs::RestartJobRequest {
                cluster: ClusterId {
                    app: "a".into(),
                    region: "r".into(),
                    variant: "default".into(),
                },
                concurrency: "1".into(),
                version: "1".into(),
            }),
        );
        let err = worker().process_job(&job).await.unwrap_err();
        assert!(err.to_string().contains("unsupported action=RESTART"));
    }

    #[tokio::test]
    async fn test_non_deployable_runtime_is_unsupported() {
        let job = deploy_job(RuntimeKind::Lib, HashMap::new(), "1");
        let err = worker().process_job(&job).await.unwrap_err();
        assert!(err.to_string().contains("unsupported runtime=lib"));
    }

    #[tokio::test]
    async fn test_zero_percent_concurrency_reports_zero_work() {
        let hosts = HashMap::from([
            ("h1".to_string(), Host::default()),
            ("h2".to_string(), Host::default()),
        ]);
        let job = deploy_job(RuntimeKind::HostPackage, hosts, "0%");
        let result = worker().process_job(&job).await.unwrap();
        assert_eq!(result.action_status, "COMPLETE");
        assert!(result.detail.contains("0 succeeded, 0 failed"));
    }

    #[tokio::test]
    async fn test_host_failures_fail_the_job_but_not_the_fan_out() {
        // both hosts unreachable; both outcomes retained
        let hosts = HashMap::from([
            ("127.0.0.1".to_string(), Host::default()),
            ("127.0.0.2".to_string(), Host::default()),
        ]);
        let mut w = worker();
        Arc::get_mut(&mut w.cfg).unwrap().agent_port = 1;
        let job = deploy_job(RuntimeKind::HostPackage, hosts, "2");
        let result = w.process_job(&job).await.unwrap();
        assert_eq!(result.action_status, "FAILED");
        assert!(result.detail.contains("0 succeeded, 2 failed"));
        assert!(result.detail.contains("127.0.0.1"));
        assert!(result.detail.contains("127.0.0.2"));
    }
}
