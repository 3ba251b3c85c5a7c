//! Bearer-token source shared by every client in this crate.

use std::sync::Arc;

use gcp_auth::{Token, TokenProvider};

use crate::error::{ApiError, Result};

/// The OAuth scope used for all API calls.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Application-default-credentials token source.
///
/// Cheap to clone; every client holds its own handle.
#[derive(Clone)]
pub struct Auth {
    provider: Arc<dyn TokenProvider>,
}

impl Auth {
    /// Build a token source from application default credentials.
    pub async fn new() -> Result<Self> {
        let provider = gcp_auth::provider().await.map_err(ApiError::Auth)?;
        Ok(Self { provider })
    }

    pub(crate) async fn bearer(&self) -> Result<Arc<Token>> {
        self.provider
            .token(&[CLOUD_PLATFORM_SCOPE])
            .await
            .map_err(ApiError::Auth)
    }
}
