//! Cluster provisioning: enable the backend APIs, create the demo cluster
//! with admission control on, and point kubectl at it.

use std::path::Path;
use std::process::Command;

use anyhow::Context;
use gcp_services::gke::GkeClient;
use log::info;

use crate::config::Target;

pub async fn create_cluster(gke: &GkeClient, target: &Target, cluster: &str) -> anyhow::Result<()> {
    gke.enable_required_services(&target.project)
        .await
        .context("Failed to enable the required APIs")?;

    let server_config = gke
        .server_config(&target.project, &target.zone)
        .await
        .context("Failed to fetch the zone's server config")?;
    info!(
        "Default cluster version in {}: {}",
        target.zone, server_config.default_cluster_version
    );

    let operation = gke
        .create_cluster(
            &target.project,
            &target.zone,
            cluster,
            &server_config.default_cluster_version,
        )
        .await
        .context("Failed to create the cluster")?;
    info!(
        "Cluster create accepted (operation {}); it completes in the background",
        operation.name
    );

    // The cluster may not be ready yet; get-credentials still records the
    // endpoint so kubectl is wired up once it is. A failure here is fatal:
    // the operator would otherwise believe kubectl points at the cluster.
    configure_kubectl(target, cluster).context("Failed to configure kubectl credentials")?;

    Ok(())
}

pub async fn delete_cluster(gke: &GkeClient, target: &Target, cluster: &str) -> anyhow::Result<()> {
    let operation = gke
        .delete_cluster(&target.project, &target.zone, cluster)
        .await
        .context("Failed to delete the cluster")?;
    info!(
        "Cluster delete accepted (operation {}); it completes in the background",
        operation.name
    );
    Ok(())
}

fn configure_kubectl(target: &Target, cluster: &str) -> anyhow::Result<()> {
    info!("Fetching kubectl credentials for {}", cluster);
    run_get_credentials(Path::new("gcloud"), target, cluster)?;
    info!("kubectl now points at {}", cluster);
    Ok(())
}

fn run_get_credentials(gcloud: &Path, target: &Target, cluster: &str) -> anyhow::Result<()> {
    let child = Command::new(gcloud)
        .args([
            "container",
            "clusters",
            "get-credentials",
            cluster,
            "--zone",
            &target.zone,
            "--project",
            &target.project,
        ])
        .output()
        .context(format!("Error executing {}", gcloud.display()))?;

    if !child.status.success() {
        return Err(anyhow::format_err!(
            "{}\n{} get-credentials did not exit with a successful exit status",
            String::from_utf8(child.stderr)?,
            gcloud.display()
        ));
    }
    Ok(())
}
