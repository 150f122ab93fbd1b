//! Cluster-api deploy path

pub mod apply;
pub mod generate;

use appctl::errors::Error;
use std::path::Path;

pub async fn create_kube_client(path: &Path) -> Result<kube::Client, Error> {
    let kubeconfig = kube::config::Kubeconfig::read_from(path)
        .map_err(|e| Error::ClusterApi(format!("kubeconfig read failed: {e}")))?;
    let config = kube::Config::from_custom_kubeconfig(
        kubeconfig,
        &kube::config::KubeConfigOptions::default(),
    )
    .await
    .map_err(|e| Error::ClusterApi(format!("kubeconfig build failed: {e}")))?;
    kube::Client::try_from(config).map_err(|e| Error::ClusterApi(format!("kube client: {e}")))
}
