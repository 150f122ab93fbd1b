//! Workload descriptor rendering
//!
//! When a configball ships no pre-rendered descriptors for the target env,
//! the worker renders them from a template bound to the app's kind. The
//! compiled config and control script are injected as escaped YAML scalars.

use std::path::Path;

use appctl::appconfig::parse_yaml;
use appctl::errors::Error;
use appctl::model::Kind;
use askama::Template;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ListParams;
use kube::Api;
use tracing::info;

#[derive(Template)]
#[template(path = "online.yaml", escape = "none")]
struct OnlineTemplate {
    app_name: String,
    image: String,
    version: String,
    port: u16,
    workload_identity: String,
    preshared_cert: String,
    compiled_config: String,
    control_script: String,
}

/// Render the descriptors for this env into `<arryved-dir>/k8s/<env>/`.
pub fn generate_from_template(
    env: &str,
    arryved_dir: &Path,
    compiled_config_path: &Path,
    version: &str,
    workload_identity: &str,
    preshared_cert: &str,
) -> Result<(), Error> {
    let compiled_config = std::fs::read_to_string(compiled_config_path)
        .map_err(|e| Error::FileSystem(format!("cannot read compiled config: {e}")))?;
    let app_config = parse_yaml(&compiled_config)?;
    let app_name = app_config.name.clone();

    let control_script_path = arryved_dir.join("control");
    let control_script = std::fs::read_to_string(&control_script_path)
        .map_err(|e| Error::FileSystem(format!("cannot read control script: {e}")))?;

    let rendered = match app_config.kind {
        Some(Kind::Online) => OnlineTemplate {
            app_name: app_name.clone(),
            image: app_config
                .repo_name
                .clone()
                .unwrap_or_else(|| app_name.clone()),
            version: version.to_string(),
            port: app_config.port.unwrap_or(8080),
            workload_identity: workload_identity.to_string(),
            preshared_cert: preshared_cert.to_string(),
            compiled_config: escape_yaml_string(&compiled_config),
            control_script: escape_yaml_string(&control_script),
        }
        .render()
        .map_err(|e| Error::ClusterApi(format!("template render failed: {e}")))?,
        kind => {
            return Err(Error::Unsupported(format!(
                "no template for appName={app_name} kind={kind:?}"
            )))
        }
    };

    let k8s_dir = arryved_dir.join("k8s").join(env);
    std::fs::create_dir_all(&k8s_dir)
        .map_err(|e| Error::FileSystem(format!("cannot create {}: {e}", k8s_dir.display())))?;
    let output_path = k8s_dir.join("deployment.yaml");
    std::fs::write(&output_path, rendered)
        .map_err(|e| Error::FileSystem(format!("cannot write descriptor: {e}")))?;
    info!(
        "generated workload descriptor appName={app_name} path={}",
        output_path.display()
    );
    Ok(())
}

/// Quote and escape a multi-line string for inline YAML embedding.
pub fn escape_yaml_string(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}

/// Derive the workload identity from the kubeconfig's current context; GKE
/// contexts are named project_location_cluster and the cluster name maps
/// onto a `<prefix>-workload-<rest>` service account.
pub fn derive_workload_identity(kube_config_path: &Path) -> Result<String, Error> {
    let contents = std::fs::read_to_string(kube_config_path)
        .map_err(|e| Error::ClusterApi(format!("cannot read kubeconfig: {e}")))?;
    let data: serde_yaml::Value = serde_yaml::from_str(&contents)
        .map_err(|e| Error::ClusterApi(format!("error parsing kubeconfig: {e}")))?;
    let current_context = data
        .get("current-context")
        .and_then(|value| value.as_str())
        .unwrap_or_default();
    let suffix = current_context.split('_').nth(3).unwrap_or_default();
    Ok(suffix.replacen('-', "-workload-", 1))
}

/// Newest TLS secret whose name matches the app: that is the pre-shared
/// certificate fronting the workload.
pub async fn preshared_cert_name(client: kube::Client, app_name: &str) -> Result<String, Error> {
    let secrets: Api<Secret> = Api::default_namespaced(client);
    let listed = secrets
        .list(&ListParams::default())
        .await
        .map_err(|e| Error::ClusterApi(format!("failed to fetch certificate: {e}")))?;

    let mut candidates: Vec<&Secret> = listed
        .items
        .iter()
        .filter(|secret| {
            secret.type_.as_deref() == Some("kubernetes.io/tls")
                && secret
                    .metadata
                    .name
                    .as_deref()
                    .map(|name| name.contains(app_name))
                    .unwrap_or(false)
        })
        .collect();
    candidates.sort_by(|a, b| {
        let created = |secret: &&Secret| {
            secret
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|time| time.0)
        };
        created(b).cmp(&created(a))
    });

    candidates
        .first()
        .and_then(|secret| secret.metadata.name.clone())
        .ok_or_else(|| {
            Error::ClusterApi(format!(
                "failed to fetch certificate, no matches found for appName={app_name}"
            ))
        })
}
