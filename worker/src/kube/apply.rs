//! Workload apply and readiness polling

use std::path::Path;
use std::time::Duration;

use appctl::errors::Error;
use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::Api;
use tracing::{debug, info};

/// Hysteresis before the first readiness observation, to avoid a false
/// positive on a brief initial Running state.
const SETTLE_DELAY: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const POLL_CEILING: Duration = Duration::from_secs(30);

/// Load deployable descriptors (Deployment/StatefulSet) from a rendered
/// resource dir.
pub fn load_deploy_yamls(resource_dir: &Path) -> Result<Vec<String>, Error> {
    let entries = std::fs::read_dir(resource_dir)
        .map_err(|e| Error::FileSystem(format!("cannot list {}: {e}", resource_dir.display())))?;

    let mut yamls = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::FileSystem(e.to_string()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".yaml") && !name.ends_with(".yml") {
            continue;
        }
        let contents = std::fs::read_to_string(entry.path())
            .map_err(|e| Error::FileSystem(format!("error reading yaml file={name}: {e}")))?;
        let value: serde_yaml::Value = serde_yaml::from_str(&contents)
            .map_err(|e| Error::Parse(format!("error decoding yaml file={name}: {e}")))?;
        let kind = value
            .get("kind")
            .and_then(|kind| kind.as_str())
            .unwrap_or_default();
        if kind == "Deployment" || kind == "StatefulSet" {
            yamls.push(contents);
        }
    }
    debug!("loaded {} kubernetes yamls", yamls.len());
    Ok(yamls)
}

pub fn decode_deployment(yaml: &str) -> Result<Deployment, Error> {
    serde_yaml::from_str(yaml).map_err(|e| Error::Parse(format!("error decoding deployment: {e}")))
}

/// Pin the (single, by convention) container image to the requested
/// version.
pub fn set_image_version(deployment: &mut Deployment, version: &str) {
    let container = deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .and_then(|pod| pod.containers.first_mut());
    if let Some(container) = container {
        if let Some(image) = &container.image {
            let base = image.split(':').next().unwrap_or(image);
            container.image = Some(format!("{base}:{version}"));
            info!("updated image in container spec image={:?}", container.image);
        }
    }
}

/// Create the deployment if absent, else update it and force a rolling
/// restart by patching a timestamped annotation.
pub async fn apply_deployment(client: kube::Client, deployment: Deployment) -> Result<(), Error> {
    let name = deployment
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::ClusterApi("deployment has no name".into()))?;
    let deployments: Api<Deployment> = Api::default_namespaced(client);

    match deployments.get(&name).await {
        Err(kube::Error::Api(response)) if response.code == 404 => {
            info!("deployment doesn't exist yet; creating deployment name={name}");
            deployments
                .create(&PostParams::default(), &deployment)
                .await
                .map_err(|e| {
                    Error::ClusterApi(format!("could not create deployment name={name}: {e}"))
                })?;
            info!("created deployment {name}");
        }
        Err(e) => {
            return Err(Error::ClusterApi(format!(
                "unhandled error getting deployment: {e}"
            )));
        }
        Ok(existing) => {
            info!("deployment already exists; updating and rolling restart name={name}");
            let mut updated = deployment;
            updated.metadata.resource_version = existing.metadata.resource_version;
            deployments
                .replace(&name, &PostParams::default(), &updated)
                .await
                .map_err(|e| {
                    Error::ClusterApi(format!("could not update deployment name={name}: {e}"))
                })?;

            // deploy implies at least one restart, whether or not the update
            // itself rolled the pods
            let timestamp = Utc::now().to_rfc3339();
            let patch = serde_json::json!({
                "spec": {"template": {"metadata": {"annotations": {
                    "kubectl.kubernetes.io/restartedAt": timestamp
                }}}}
            });
            deployments
                .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|e| {
                    Error::ClusterApi(format!(
                        "could not patch deployment for rolling restart name={name}: {e}"
                    ))
                })?;
            info!("deployment patch for rolling update succeeded name={name}");
        }
    }
    Ok(())
}

/// Wait for every pod carrying the app label to be ready and in a Running
/// or Succeeded phase.
pub async fn wait_for_settle(client: kube::Client, app_label: &str) -> Result<(), Error> {
    tokio::time::sleep(SETTLE_DELAY).await;

    let deadline = tokio::time::Instant::now() + POLL_CEILING;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return Err(Error::ConvergeTimeout(
                    "timeout expired waiting for cluster status".into(),
                ));
            }
            _ = ticker.tick() => {
                if cluster_settled(client.clone(), app_label).await? {
                    info!("cluster settled on good status; finished");
                    return Ok(());
                }
                info!("still waiting on good cluster status...");
            }
        }
    }
}

async fn cluster_settled(client: kube::Client, app_label: &str) -> Result<bool, Error> {
    let pods: Api<Pod> = Api::all(client);
    let params = ListParams::default().labels(&format!("app={app_label}"));
    let listed = pods
        .list(&params)
        .await
        .map_err(|e| Error::ClusterApi(format!("error getting cluster status: {e}")))?;
    debug!("{} pods found", listed.items.len());

    let mut settled = true;
    for pod in listed.items {
        let status = pod.status.unwrap_or_default();
        let ready = status
            .container_statuses
            .as_ref()
            .and_then(|statuses| statuses.first())
            .map(|container| container.ready)
            .unwrap_or(false);
        let phase = status.phase.unwrap_or_default();
        if !ready || (phase != "Succeeded" && phase != "Running") {
            settled = false;
        }
    }
    Ok(settled)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT_YAML: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: poserp-app
spec:
  selector:
    matchLabels:
      app: poserp-app
  template:
    metadata:
      labels:
        app: poserp-app
    spec:
      containers:
        - name: poserp-app
          image: reg.example.com/product/poserp-app:latest
"#;

    #[test]
    fn test_load_filters_to_deployables() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deployment.yaml"), DEPLOYMENT_YAML).unwrap();
        std::fs::write(
            dir.path().join("service.yaml"),
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: x\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not yaml").unwrap();

        let yamls = load_deploy_yamls(dir.path()).unwrap();
        assert_eq!(yamls.len(), 1);
    }

    #[test]
    fn test_image_version_pinned() {
        let mut deployment = decode_deployment(DEPLOYMENT_YAML).unwrap();
        set_image_version(&mut deployment, "2.0.1");
        let image = deployment
            .spec
            .unwrap()
            .template
            .spec
            .unwrap()
            .containers[0]
            .image
            .clone()
            .unwrap();
        assert_eq!(image, "reg.example.com/product/poserp-app:2.0.1");
    }
}
