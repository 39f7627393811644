//! Error types shared by the Google API clients.

use reqwest::StatusCode;
use thiserror::Error;

/// Non-success response from a Google API endpoint.
///
/// The body is kept verbatim so permission problems (missing scope, API not
/// enabled for the project) surface with Google's own explanation.
#[derive(Error, Debug)]
#[error("{endpoint} returned {status}: {body}")]
pub struct ApiError {
    pub endpoint: &'static str,
    pub status: StatusCode,
    pub body: String,
}

/// Pass a response through unless its status is an error, in which case the
/// body is drained into an [`ApiError`].
pub(crate) async fn check_status(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError {
        endpoint,
        status,
        body,
    })
}
