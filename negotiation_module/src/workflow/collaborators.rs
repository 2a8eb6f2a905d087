//! Trait seams for the external collaborators the engine talks to.
//!
//! The engine is constructed against these traits rather than the concrete
//! HTTP clients, so tests substitute in-memory fakes and the service layer
//! wires up the real connectors. All methods are blocking; callers off the
//! async runtime run them via `spawn_blocking` or dedicated threads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use connectors_module::openai::{ChatMessage, FunctionCall, ToolCall};
pub use connectors_module::ConnectorError;

/// A busy stretch on the owner's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A CRM contact as returned by search, before confidence scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactCandidate {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
}

impl ContactCandidate {
    /// "First Last" with whichever parts exist.
    pub fn full_name(&self) -> String {
        let mut parts = Vec::new();
        if let Some(first) = self.first_name.as_deref() {
            if !first.is_empty() {
                parts.push(first);
            }
        }
        if let Some(last) = self.last_name.as_deref() {
            if !last.is_empty() {
                parts.push(last);
            }
        }
        parts.join(" ")
    }
}

/// Read and write access to the owner's calendar.
pub trait CalendarService: Send + Sync {
    /// Busy intervals between `start` and `end`, ascending by start.
    fn list_busy(
        &self,
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, ConnectorError>;

    /// Create an event and return its id.
    fn create_event(
        &self,
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        attendees: &[String],
        title: &str,
    ) -> Result<String, ConnectorError>;
}

/// Outbound mail. Inbound mail arrives through the service webhook.
pub trait EmailService: Send + Sync {
    /// Send a plain-text message and return the provider message id.
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<String, ConnectorError>;
}

/// Contact lookup and note-keeping in the CRM.
pub trait CrmService: Send + Sync {
    fn find_contact(&self, query: &str) -> Result<Vec<ContactCandidate>, ConnectorError>;

    fn create_contact(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<String, ConnectorError>;

    /// Best-effort note attached to a contact.
    fn add_note(&self, contact_id: &str, text: &str) -> Result<String, ConnectorError>;
}

/// Language-model access, in the two shapes the service needs.
pub trait LlmService: Send + Sync {
    /// One-shot completion for constrained extraction prompts.
    fn complete(&self, prompt: &str) -> Result<String, ConnectorError>;

    /// One round of a tool-calling conversation.
    fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<serde_json::Value>>,
    ) -> Result<ChatMessage, ConnectorError>;
}
