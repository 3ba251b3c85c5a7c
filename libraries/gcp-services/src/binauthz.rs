//! Client for the Binary Authorization policy and attestor resources.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::auth::Auth;
use crate::error::Result;
use crate::http::{expect_created, expect_json, expect_ok, send};

const BINAUTHZ_ENDPOINT: &str = "https://binaryauthorization.googleapis.com/v1";

/// The project's admission policy document.
///
/// Only read by this tool; editing the rules is done in the console.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub default_admission_rule: Option<AdmissionRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRule {
    #[serde(default)]
    pub evaluation_mode: Option<String>,
    #[serde(default)]
    pub enforcement_mode: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AttestorPublicKey {
    pub ascii_armored_pgp_public_key: String,
    /// Key id assigned by the service (the PGP fingerprint); absent on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserOwnedGrafeasNote {
    pub note_reference: String,
    #[serde(default)]
    pub public_keys: Vec<AttestorPublicKey>,
}

/// A registered verifier bound to a Container Analysis note.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Attestor {
    pub name: String,
    pub user_owned_grafeas_note: UserOwnedGrafeasNote,
}

/// Registry of attestors, mockable for workflow tests.
#[allow(async_fn_in_trait)]
pub trait AttestorStore {
    /// Create an attestor bound to `note_name`. Returns
    /// [`crate::ApiError::AlreadyExists`] when the attestor is already
    /// registered.
    async fn create_attestor(&self, project: &str, attestor_id: &str, note_name: &str)
    -> Result<()>;

    /// Append an armored public key to the attestor unless the same key
    /// material is already registered. Returns whether the key was added.
    async fn add_public_key(
        &self,
        project: &str,
        attestor_id: &str,
        armored_key: &str,
    ) -> Result<bool>;
}

pub struct BinAuthzClient {
    auth: Auth,
    http: reqwest::Client,
}

impl BinAuthzClient {
    pub fn new(auth: Auth) -> Self {
        Self {
            auth,
            http: reqwest::Client::new(),
        }
    }

    /// Fetch the project's admission policy document.
    pub async fn get_policy(&self, project: &str) -> Result<Policy> {
        let context = format!("fetching the policy of project {}", project);
        let url = format!("{}/projects/{}/policy", BINAUTHZ_ENDPOINT, project);
        debug!("GET {}", url);
        let token = self.auth.bearer().await?;
        let response = send(self.http.get(&url).bearer_auth(token.as_str()), &context).await?;
        expect_json(response, &context).await
    }

    pub async fn get_attestor(&self, project: &str, attestor_id: &str) -> Result<Attestor> {
        let context = format!("fetching attestor {}", attestor_id);
        let url = format!(
            "{}/projects/{}/attestors/{}",
            BINAUTHZ_ENDPOINT, project, attestor_id
        );
        debug!("GET {}", url);
        let token = self.auth.bearer().await?;
        let response = send(self.http.get(&url).bearer_auth(token.as_str()), &context).await?;
        expect_json(response, &context).await
    }

    async fn update_attestor(&self, attestor: &Attestor) -> Result<()> {
        let context = format!("updating attestor {}", attestor.name);
        let url = format!("{}/{}", BINAUTHZ_ENDPOINT, attestor.name);
        debug!("PUT {}", url);
        let token = self.auth.bearer().await?;
        let response = send(
            self.http
                .put(&url)
                .bearer_auth(token.as_str())
                .json(attestor),
            &context,
        )
        .await?;
        expect_ok(response, &context).await?;
        Ok(())
    }
}

impl AttestorStore for BinAuthzClient {
    async fn create_attestor(
        &self,
        project: &str,
        attestor_id: &str,
        note_name: &str,
    ) -> Result<()> {
        let context = format!("attestor {}", attestor_id);
        let url = format!("{}/projects/{}/attestors", BINAUTHZ_ENDPOINT, project);
        let attestor = Attestor {
            name: format!("projects/{}/attestors/{}", project, attestor_id),
            user_owned_grafeas_note: UserOwnedGrafeasNote {
                note_reference: note_name.to_string(),
                public_keys: Vec::new(),
            },
        };
        debug!("POST {}", url);
        let token = self.auth.bearer().await?;
        let response = send(
            self.http
                .post(&url)
                .bearer_auth(token.as_str())
                .query(&[("attestorId", attestor_id)])
                .json(&attestor),
            &context,
        )
        .await?;
        expect_created(response, &context).await?;
        Ok(())
    }

    async fn add_public_key(
        &self,
        project: &str,
        attestor_id: &str,
        armored_key: &str,
    ) -> Result<bool> {
        let mut attestor = self.get_attestor(project, attestor_id).await?;

        let already_registered = attestor
            .user_owned_grafeas_note
            .public_keys
            .iter()
            .any(|key| key.ascii_armored_pgp_public_key.trim() == armored_key.trim());
        if already_registered {
            info!("Public key already registered on {}", attestor.name);
            return Ok(false);
        }

        attestor
            .user_owned_grafeas_note
            .public_keys
            .push(AttestorPublicKey {
                ascii_armored_pgp_public_key: armored_key.to_string(),
                id: None,
            });
        self.update_attestor(&attestor).await?;
        Ok(true)
    }
}
