//! Client for the Container Analysis (Grafeas) notes and occurrences.
//!
//! Notes are the attestation-authority placeholders an attestor is bound to;
//! occurrences carry the signed attestations for a specific artifact digest.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::auth::Auth;
use crate::error::Result;
use crate::http::{expect_created, expect_json, expect_ok, send};

const CONTAINER_ANALYSIS_ENDPOINT: &str = "https://containeranalysis.googleapis.com/v1";

/// Fully qualified note resource name.
pub fn note_name(project: &str, note_id: &str) -> String {
    format!("projects/{}/notes/{}", project, note_id)
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Base64 of the armored detached signature.
    pub signature: String,
    /// Fingerprint of the signing key.
    pub public_key_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AttestationBlob {
    /// Base64 of the exact payload bytes that were signed.
    pub serialized_payload: String,
    pub signatures: Vec<Signature>,
}

/// An attestation occurrence tying a signed claim to an artifact digest.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    /// Server-assigned resource name; absent on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The attested artifact as `path@digest`.
    pub resource_uri: String,
    pub note_name: String,
    pub kind: String,
    pub attestation: AttestationBlob,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListOccurrencesResponse {
    #[serde(default)]
    occurrences: Vec<Occurrence>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateNoteRequest<'a> {
    attestation: AttestationNote<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttestationNote<'a> {
    hint: Hint<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Hint<'a> {
    human_readable_name: &'a str,
}

/// Note lifecycle, mockable for workflow tests.
#[allow(async_fn_in_trait)]
pub trait NoteStore {
    /// Create an attestation-authority note. Returns
    /// [`crate::ApiError::AlreadyExists`] when the note id is taken.
    async fn create_note(&self, project: &str, note_id: &str, hint: &str) -> Result<()>;

    async fn delete_note(&self, project: &str, note_id: &str) -> Result<()>;
}

/// Attestation occurrence creation and lookup, mockable for workflow tests.
#[allow(async_fn_in_trait)]
pub trait OccurrenceStore {
    async fn create_occurrence(&self, project: &str, occurrence: &Occurrence)
    -> Result<Occurrence>;

    /// List the attestation occurrences recorded for an artifact + note pair.
    async fn list_attestations(
        &self,
        project: &str,
        resource_uri: &str,
        note_name: &str,
    ) -> Result<Vec<Occurrence>>;
}

pub struct GrafeasClient {
    auth: Auth,
    http: reqwest::Client,
}

impl GrafeasClient {
    pub fn new(auth: Auth) -> Self {
        Self {
            auth,
            http: reqwest::Client::new(),
        }
    }
}

impl NoteStore for GrafeasClient {
    async fn create_note(&self, project: &str, note_id: &str, hint: &str) -> Result<()> {
        let context = format!("note {}", note_name(project, note_id));
        let url = format!("{}/projects/{}/notes", CONTAINER_ANALYSIS_ENDPOINT, project);
        let body = CreateNoteRequest {
            attestation: AttestationNote {
                hint: Hint {
                    human_readable_name: hint,
                },
            },
        };
        debug!("POST {}", url);
        let token = self.auth.bearer().await?;
        let response = send(
            self.http
                .post(&url)
                .bearer_auth(token.as_str())
                .query(&[("noteId", note_id)])
                .json(&body),
            &context,
        )
        .await?;
        expect_created(response, &context).await?;
        Ok(())
    }

    async fn delete_note(&self, project: &str, note_id: &str) -> Result<()> {
        let context = format!("deleting note {}", note_name(project, note_id));
        let url = format!(
            "{}/{}",
            CONTAINER_ANALYSIS_ENDPOINT,
            note_name(project, note_id)
        );
        debug!("DELETE {}", url);
        let token = self.auth.bearer().await?;
        let response = send(self.http.delete(&url).bearer_auth(token.as_str()), &context).await?;
        expect_ok(response, &context).await?;
        Ok(())
    }
}

impl OccurrenceStore for GrafeasClient {
    async fn create_occurrence(
        &self,
        project: &str,
        occurrence: &Occurrence,
    ) -> Result<Occurrence> {
        let context = format!("submitting an attestation for {}", occurrence.resource_uri);
        let url = format!(
            "{}/projects/{}/occurrences",
            CONTAINER_ANALYSIS_ENDPOINT, project
        );
        debug!("POST {}", url);
        let token = self.auth.bearer().await?;
        let response = send(
            self.http
                .post(&url)
                .bearer_auth(token.as_str())
                .json(occurrence),
            &context,
        )
        .await?;
        expect_json(response, &context).await
    }

    async fn list_attestations(
        &self,
        project: &str,
        resource_uri: &str,
        note_name: &str,
    ) -> Result<Vec<Occurrence>> {
        let context = format!("listing attestations for {}", resource_uri);
        let url = format!(
            "{}/projects/{}/occurrences",
            CONTAINER_ANALYSIS_ENDPOINT, project
        );
        let filter = format!(
            r#"resourceUrl="{}" AND noteName="{}" AND kind="ATTESTATION""#,
            resource_uri, note_name
        );
        debug!("GET {} filter={}", url, filter);
        let token = self.auth.bearer().await?;
        let response = send(
            self.http
                .get(&url)
                .bearer_auth(token.as_str())
                .query(&[("filter", filter.as_str())]),
            &context,
        )
        .await?;
        let list: ListOccurrencesResponse = expect_json(response, &context).await?;
        Ok(list.occurrences)
    }
}
