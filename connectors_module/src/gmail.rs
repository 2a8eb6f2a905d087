//! Gmail API client for sending plain-text email.
//!
//! The service only ever performs one Gmail operation: `users/me/messages/send`
//! with a base64url-encoded RFC 822 payload. Inbound mail is delivered by an
//! external poller and enters through the service webhook, so nothing here
//! reads mailboxes.

use base64::engine::general_purpose::URL_SAFE as BASE64_URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{expect_success, ConnectorError};

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com";

/// Client for the Gmail send endpoint.
#[derive(Debug, Clone)]
pub struct GmailClient {
    access_token: String,
    sender: String,
    api_base: String,
}

impl GmailClient {
    pub fn new(access_token: String, sender: String) -> Self {
        Self::with_api_base(access_token, sender, GMAIL_API_BASE.to_string())
    }

    /// Same as [`GmailClient::new`] but pointed at an alternate base URL.
    pub fn with_api_base(access_token: String, sender: String, api_base: String) -> Self {
        Self {
            access_token,
            sender,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Send a plain-text message and return the Gmail message id.
    pub fn send_message(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, ConnectorError> {
        let request = GmailSendRequest {
            raw: build_raw_message(&self.sender, to, subject, body),
        };
        let url = format!("{}/gmail/v1/users/me/messages/send", self.api_base);
        let client = reqwest::blocking::Client::new();
        let response = client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()?;
        let response = expect_success("gmail", response)?;
        let sent: GmailSendResponse = response.json().map_err(|err| ConnectorError::Parse {
            provider: "gmail",
            detail: err.to_string(),
        })?;
        Ok(sent.id)
    }
}

/// RFC 822 message with CRLF line endings, base64url-encoded as the Gmail
/// `raw` field expects.
fn build_raw_message(from: &str, to: &str, subject: &str, body: &str) -> String {
    let message = format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
        from, to, subject, body
    );
    BASE64_URL_SAFE.encode(message.as_bytes())
}

#[derive(Debug, Clone, Serialize)]
struct GmailSendRequest {
    raw: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailSendResponse {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_raw_message_and_returns_id() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/gmail/v1/users/me/messages/send")
            .match_header("authorization", "Bearer tok-123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"msg-1","threadId":"t-1"}"#)
            .create();

        let client = GmailClient::with_api_base(
            "tok-123".to_string(),
            "advisor@example.com".to_string(),
            server.url(),
        );
        let id = client
            .send_message("amy@example.com", "Scheduling", "See times below")
            .expect("send should succeed");

        assert_eq!(id, "msg-1");
        mock.assert();
    }

    #[test]
    fn raw_message_round_trips_headers_and_body() {
        let raw = build_raw_message("a@x.com", "b@y.com", "Hi there", "Body text");
        assert!(!raw.contains('+'));
        assert!(!raw.contains('/'));

        let decoded = BASE64_URL_SAFE.decode(raw.as_bytes()).expect("valid base64url");
        let text = String::from_utf8(decoded).expect("utf8");
        assert!(text.starts_with("From: a@x.com\r\nTo: b@y.com\r\nSubject: Hi there\r\n"));
        assert!(text.ends_with("\r\n\r\nBody text"));
    }

    #[test]
    fn surfaces_api_errors_with_status_and_body() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/gmail/v1/users/me/messages/send")
            .with_status(401)
            .with_body("invalid credentials")
            .create();

        let client = GmailClient::with_api_base(
            "expired".to_string(),
            "advisor@example.com".to_string(),
            server.url(),
        );
        let err = client
            .send_message("amy@example.com", "Scheduling", "body")
            .expect_err("401 should fail");

        match err {
            ConnectorError::Api {
                provider, status, ..
            } => {
                assert_eq!(provider, "gmail");
                assert_eq!(status, 401);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
