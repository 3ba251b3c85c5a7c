//! Client for the GKE control plane and the Service Usage API.
//!
//! Cluster calls use the zonal v1 REST surface:
//! `https://container.googleapis.com/v1/projects/{p}/zones/{z}/clusters`

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::auth::Auth;
use crate::error::Result;
use crate::http::{expect_json, expect_ok, send};

const GKE_ENDPOINT: &str = "https://container.googleapis.com/v1";
const SERVICE_USAGE_ENDPOINT: &str = "https://serviceusage.googleapis.com/v1";

/// APIs that must be enabled on the project before the demo cluster can be
/// created. Enabling an already-enabled service is a server-side no-op.
pub const REQUIRED_SERVICES: &[&str] = &[
    "container.googleapis.com",
    "containeranalysis.googleapis.com",
    "binaryauthorization.googleapis.com",
];

/// Fixed node shape of the demo cluster.
const DEMO_MACHINE_TYPE: &str = "n1-standard-1";
const DEMO_NODE_COUNT: i32 = 3;

/// Per-zone server configuration.
///
/// Response from `GET /projects/{p}/zones/{z}/serverconfig`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub default_cluster_version: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct BinaryAuthorization {
    pub enabled: bool,
}

/// The subset of the cluster resource this tool reads back.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub binary_authorization: Option<BinaryAuthorization>,
}

impl Cluster {
    /// Whether the cluster reports the admission-control feature as enabled.
    pub fn binary_authorization_enabled(&self) -> bool {
        self.binary_authorization.is_some_and(|b| b.enabled)
    }
}

/// A long-running server-side operation. Returned by create/delete calls;
/// this tool logs the name and does not poll it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub operation_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateClusterRequest<'a> {
    cluster: ClusterSpec<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterSpec<'a> {
    name: &'a str,
    initial_cluster_version: &'a str,
    initial_node_count: i32,
    node_config: NodeConfig<'a>,
    binary_authorization: BinaryAuthorization,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeConfig<'a> {
    machine_type: &'a str,
}

pub struct GkeClient {
    auth: Auth,
    http: reqwest::Client,
}

impl GkeClient {
    pub fn new(auth: Auth) -> Self {
        Self {
            auth,
            http: reqwest::Client::new(),
        }
    }

    /// Enable every API in [`REQUIRED_SERVICES`] on the project.
    pub async fn enable_required_services(&self, project: &str) -> Result<()> {
        for service in REQUIRED_SERVICES {
            let context = format!("enabling {}", service);
            let url = format!(
                "{}/projects/{}/services/{}:enable",
                SERVICE_USAGE_ENDPOINT, project, service
            );
            debug!("POST {}", url);
            let token = self.auth.bearer().await?;
            let response = send(
                self.http
                    .post(&url)
                    .bearer_auth(token.as_str())
                    .json(&serde_json::json!({})),
                &context,
            )
            .await?;
            expect_ok(response, &context).await?;
            info!("Enabled {}", service);
        }
        Ok(())
    }

    /// Fetch the zone's server config, including the default cluster version.
    pub async fn server_config(&self, project: &str, zone: &str) -> Result<ServerConfig> {
        let context = format!("fetching the server config for zone {}", zone);
        let url = format!(
            "{}/projects/{}/zones/{}/serverconfig",
            GKE_ENDPOINT, project, zone
        );
        debug!("GET {}", url);
        let token = self.auth.bearer().await?;
        let response = send(self.http.get(&url).bearer_auth(token.as_str()), &context).await?;
        expect_json(response, &context).await
    }

    /// Start an asynchronous cluster create with admission control enabled
    /// and the fixed demo node shape. Does not wait for the operation.
    pub async fn create_cluster(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        version: &str,
    ) -> Result<Operation> {
        let context = format!("creating cluster {}", name);
        let url = format!("{}/projects/{}/zones/{}/clusters", GKE_ENDPOINT, project, zone);
        let body = CreateClusterRequest {
            cluster: ClusterSpec {
                name,
                initial_cluster_version: version,
                initial_node_count: DEMO_NODE_COUNT,
                node_config: NodeConfig {
                    machine_type: DEMO_MACHINE_TYPE,
                },
                binary_authorization: BinaryAuthorization { enabled: true },
            },
        };
        debug!("POST {}", url);
        let token = self.auth.bearer().await?;
        let response = send(
            self.http.post(&url).bearer_auth(token.as_str()).json(&body),
            &context,
        )
        .await?;
        expect_json(response, &context).await
    }

    pub async fn get_cluster(&self, project: &str, zone: &str, name: &str) -> Result<Cluster> {
        let context = format!("fetching cluster {}", name);
        let url = format!(
            "{}/projects/{}/zones/{}/clusters/{}",
            GKE_ENDPOINT, project, zone, name
        );
        debug!("GET {}", url);
        let token = self.auth.bearer().await?;
        let response = send(self.http.get(&url).bearer_auth(token.as_str()), &context).await?;
        expect_json(response, &context).await
    }

    pub async fn delete_cluster(&self, project: &str, zone: &str, name: &str) -> Result<Operation> {
        let context = format!("deleting cluster {}", name);
        let url = format!(
            "{}/projects/{}/zones/{}/clusters/{}",
            GKE_ENDPOINT, project, zone, name
        );
        debug!("DELETE {}", url);
        let token = self.auth.bearer().await?;
        let response = send(self.http.delete(&url).bearer_auth(token.as_str()), &context).await?;
        expect_json(response, &context).await
    }
}
