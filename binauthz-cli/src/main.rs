use std::path::PathBuf;

use anyhow::ensure;
use clap::{Parser, Subcommand};
use gcp_services::Auth;
use gcp_services::analysis::GrafeasClient;
use gcp_services::binauthz::BinAuthzClient;
use gcp_services::gke::GkeClient;
use gcp_services::registry::RegistryClient;
use pgp_signer::GpgSigner;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod attest;
mod checkpoint;
mod cluster;
mod config;
mod validate;

#[derive(Parser, Debug)]
#[command(version, about = "Binary Authorization demo orchestrator - cluster setup, validation and attestation issuance", long_about = None)]
struct Cli {
    /// Path to an optional YAML defaults file with `project:` and `zone:`
    #[arg(long, global = true, default_value = "binauthz.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a demo cluster with Binary Authorization enabled
    CreateCluster {
        /// Name of the cluster to create
        #[arg(short, long)]
        cluster: String,

        /// Compute zone, e.g. us-central1-a
        #[arg(short, long)]
        zone: Option<String>,

        /// Project id
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Delete a previously created demo cluster
    DeleteCluster {
        /// Name of the cluster to delete
        #[arg(short, long)]
        cluster: String,

        /// Compute zone, e.g. us-central1-a
        #[arg(short, long)]
        zone: Option<String>,

        /// Project id
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Probe the policy service, the metadata service and the cluster flag
    CheckSetup {
        /// Name of the cluster to inspect
        #[arg(short, long)]
        cluster: String,

        /// Compute zone, e.g. us-central1-a
        #[arg(short, long)]
        zone: Option<String>,

        /// Project id
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Sign an image digest and submit the attestation
    Attest {
        /// Image path, e.g. gcr.io/my-project/nginx
        #[arg(short, long)]
        image: String,

        /// Tag to resolve; the newest digest is used when omitted
        #[arg(short, long)]
        tag: Option<String>,

        /// Attestor id to register and attest under
        #[arg(short, long)]
        attestor: String,

        /// Note id the attestor's authority is bound to
        #[arg(short, long)]
        note: String,

        /// Identity (email) of the local GnuPG signing key
        #[arg(short = 's', long, default_value = "attestor@example.com")]
        signer_identity: String,

        /// Directory for the exported key, payload, signature and step ledger
        #[arg(long, default_value = ".")]
        workdir: PathBuf,

        /// Project id
        #[arg(short, long)]
        project: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "binauthz_cli=debug,gcp_services=debug,pgp_signer=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let defaults = config::Defaults::load(&cli.config)?;

    match cli.command {
        Commands::CreateCluster {
            cluster,
            zone,
            project,
        } => {
            let target = config::resolve_target(project, zone, &defaults)?;
            let auth = Auth::new().await?;
            cluster::create_cluster(&GkeClient::new(auth), &target, &cluster).await?;
        }

        Commands::DeleteCluster {
            cluster,
            zone,
            project,
        } => {
            let target = config::resolve_target(project, zone, &defaults)?;
            let auth = Auth::new().await?;
            cluster::delete_cluster(&GkeClient::new(auth), &target, &cluster).await?;
        }

        Commands::CheckSetup {
            cluster,
            zone,
            project,
        } => {
            let target = config::resolve_target(project, zone, &defaults)?;
            let auth = Auth::new().await?;
            let report = validate::check_setup(
                &BinAuthzClient::new(auth.clone()),
                &GrafeasClient::new(auth.clone()),
                &GkeClient::new(auth),
                &target,
                &cluster,
            )
            .await;
            validate::print_report(&report, &cluster);
            ensure!(report.passed(), "Setup validation failed");
        }

        Commands::Attest {
            image,
            tag,
            attestor,
            note,
            signer_identity,
            workdir,
            project,
        } => {
            let project = config::resolve_project(project, &defaults)?;
            let auth = Auth::new().await?;
            let grafeas = GrafeasClient::new(auth.clone());
            let params = attest::AttestParams {
                project,
                image,
                tag,
                attestor_id: attestor,
                note_id: note,
                signer_identity,
                workdir,
            };
            attest::issue_attestation(
                &grafeas,
                &BinAuthzClient::new(auth.clone()),
                &grafeas,
                &RegistryClient::new(auth),
                &GpgSigner::new(),
                &params,
            )
            .await?;
        }
    }

    Ok(())
}
