//! HTTP and WebSocket clients for the Tagview APIs.
//!
//! Gated behind the `client` cargo feature so downstream crates that only
//! need the shared types do not pull in `reqwest`.

mod console;
mod push_socket;

pub use console::ConsoleClient;
pub use push_socket::{PushSocket, PushSocketError};

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::objects::ApiResponse;

/// Errors produced by the SDK HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, TLS, connection reset, …).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("api error: status {status}, body: {body}")]
    Api { status: StatusCode, body: String },

    /// The server answered 2xx but reported `success: false`.
    #[error("request rejected: {message}")]
    Rejected { message: String },

    /// Response body could not be deserialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The base URL could not be joined with the endpoint path.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl ClientError {
    /// The server's rejection message, when there is one.
    ///
    /// This is the text a screen attaches to the row or form that initiated
    /// the request.
    pub fn rejection_message(&self) -> Option<&str> {
        match self {
            ClientError::Rejected { message } => Some(message),
            _ => None,
        }
    }
}

/// Unwrap a response into the `data` payload of its [`ApiResponse`].
async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(ClientError::Api { status, body });
    }

    let envelope: ApiResponse<T> = serde_json::from_str(&body)?;
    match envelope {
        ApiResponse {
            success: true,
            data: Some(data),
            ..
        } => Ok(data),
        ApiResponse { message, .. } => Err(ClientError::Rejected {
            message: message.unwrap_or_else(|| "request rejected".to_owned()),
        }),
    }
}

/// Like [`parse_response`] for endpoints whose success carries no payload.
async fn parse_ack(resp: reqwest::Response) -> Result<(), ClientError> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(ClientError::Api { status, body });
    }

    let envelope: ApiResponse<serde_json::Value> = serde_json::from_str(&body)?;
    if envelope.success {
        Ok(())
    } else {
        Err(ClientError::Rejected {
            message: envelope
                .message
                .unwrap_or_else(|| "request rejected".to_owned()),
        })
    }
}
