//! Blocking HTTP clients for the external collaborators: Gmail, Google
//! Calendar, HubSpot, and OpenAI.
//!
//! Each client is a thin wrapper over one provider API. Authentication is a
//! bearer token supplied by the caller; token acquisition and refresh happen
//! upstream. Every client can be pointed at an alternate base URL so tests
//! exercise the request/response handling against a local mock server.

pub mod calendar;
pub mod gmail;
pub mod hubspot;
pub mod openai;

use thiserror::Error;

/// Error surface shared by all connector clients.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{provider} returned {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("could not parse {provider} response: {detail}")]
    Parse {
        provider: &'static str,
        detail: String,
    },
}

impl ConnectorError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            ConnectorError::Transport(_) => true,
            ConnectorError::Api { status, .. } => *status == 429 || *status >= 500,
            ConnectorError::Parse { .. } => false,
        }
    }
}

/// Pass a successful response through, turn anything else into an Api error
/// carrying the response body.
pub(crate) fn expect_success(
    provider: &'static str,
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, ConnectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(ConnectorError::Api {
        provider,
        status: status.as_u16(),
        body,
    })
}
