//! Blocking JSON-over-HTTP plumbing shared by the game server and model clients.

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Failure of one JSON exchange. Callers map it into their own error enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportError {
    BuildClient { message: String },
    Http { message: String },
    HttpStatus { code: u16, message: String },
    DecodeResponse { message: String },
}

pub(crate) fn build_client(timeout_ms: u64) -> Result<Client, TransportError> {
    Client::builder()
        .timeout(Duration::from_millis(timeout_ms.max(1)))
        .build()
        .map_err(|err| TransportError::BuildClient {
            message: err.to_string(),
        })
}

/// Sends `body` as JSON and decodes a `200 OK` reply. Any other status is
/// reported with the response text.
pub(crate) fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
    request: RequestBuilder,
    body: &T,
) -> Result<R, TransportError> {
    let response = request
        .json(body)
        .send()
        .map_err(|err| TransportError::Http {
            message: err.to_string(),
        })?;

    let status = response.status();
    if status != StatusCode::OK {
        let message = response
            .text()
            .unwrap_or_else(|_| "<no body>".to_string());
        return Err(TransportError::HttpStatus {
            code: status.as_u16(),
            message,
        });
    }

    response
        .json()
        .map_err(|err| TransportError::DecodeResponse {
            message: err.to_string(),
        })
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
