//! Tag-to-digest resolution against a GCR-style container registry.

use std::collections::HashMap;

use log::debug;
use serde::Deserialize;

use crate::auth::Auth;
use crate::error::{ApiError, Result};
use crate::http::{expect_json, send};

/// Response of `GET https://{host}/v2/{repo}/tags/list`.
///
/// GCR extends the distribution spec with a `manifest` map from digest to
/// tag list and upload time.
#[derive(Debug, Deserialize)]
pub struct TagList {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub manifest: HashMap<String, ManifestSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSummary {
    #[serde(default)]
    pub tag: Vec<String>,
    #[serde(default)]
    pub time_uploaded_ms: Option<String>,
}

impl TagList {
    /// Resolve a tag to its digest, or pick the most recently uploaded
    /// digest when no tag is given. Returns `None` when the repository has
    /// no matching manifest.
    pub fn digest_for(&self, tag: Option<&str>) -> Option<String> {
        match tag {
            Some(tag) => self
                .manifest
                .iter()
                .find(|(_, summary)| summary.tag.iter().any(|t| t == tag))
                .map(|(digest, _)| digest.clone()),
            None => {
                let mut entries: Vec<_> = self.manifest.iter().collect();
                entries.sort_by_key(|(_, summary)| {
                    std::cmp::Reverse(
                        summary
                            .time_uploaded_ms
                            .as_deref()
                            .and_then(|ms| ms.parse::<u64>().ok())
                            .unwrap_or(0),
                    )
                });
                entries.first().map(|(digest, _)| (*digest).clone())
            }
        }
    }
}

/// Digest resolution, mockable for workflow tests.
#[allow(async_fn_in_trait)]
pub trait ImageRegistry {
    /// Resolve `image` (and optionally `tag`) to a content digest. `Ok(None)`
    /// means the registry answered but holds no matching manifest.
    async fn resolve_digest(&self, image: &str, tag: Option<&str>) -> Result<Option<String>>;
}

pub struct RegistryClient {
    auth: Auth,
    http: reqwest::Client,
}

impl RegistryClient {
    pub fn new(auth: Auth) -> Self {
        Self {
            auth,
            http: reqwest::Client::new(),
        }
    }
}

impl ImageRegistry for RegistryClient {
    async fn resolve_digest(&self, image: &str, tag: Option<&str>) -> Result<Option<String>> {
        // "gcr.io/project/name" splits into the registry host and the repo path.
        let (host, repo) = image
            .split_once('/')
            .filter(|(host, repo)| host.contains('.') && !repo.is_empty())
            .ok_or_else(|| ApiError::InvalidReference(image.to_string()))?;

        let context = format!("listing tags of {}", image);
        let url = format!("https://{}/v2/{}/tags/list", host, repo);
        debug!("GET {}", url);
        let token = self.auth.bearer().await?;
        let response = send(self.http.get(&url).bearer_auth(token.as_str()), &context).await?;
        let tags: TagList = expect_json(response, &context).await?;
        Ok(tags.digest_for(tag))
    }
}
