//! Shared response handling for the REST clients.

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{ApiError, Result};

/// Send a request, mapping transport failures to [`ApiError::Network`].
pub(crate) async fn send(request: RequestBuilder, context: &str) -> Result<Response> {
    request.send().await.map_err(|source| ApiError::Network {
        context: context.to_string(),
        source,
    })
}

/// Surface a non-success status as an error, keeping the response body for
/// the message.
pub(crate) async fn expect_ok(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read the error body".to_string());
    Err(ApiError::Status {
        context: context.to_string(),
        status,
        body,
    })
}

/// Like [`expect_ok`], but for creation calls: a 409 CONFLICT means the
/// resource already exists and becomes the distinguishable
/// [`ApiError::AlreadyExists`]. A 409 on any other verb stays a plain
/// status error.
pub(crate) async fn expect_created(response: Response, resource: &str) -> Result<Response> {
    if response.status() == StatusCode::CONFLICT {
        return Err(ApiError::AlreadyExists {
            resource: resource.to_string(),
        });
    }
    expect_ok(response, resource).await
}

pub(crate) async fn expect_json<T: DeserializeOwned>(
    response: Response,
    context: &str,
) -> Result<T> {
    let response = expect_ok(response, context).await?;
    response.json().await.map_err(|source| ApiError::Decode {
        context: context.to_string(),
        source,
    })
}
