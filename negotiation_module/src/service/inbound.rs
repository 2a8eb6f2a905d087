//! Inbound email dispatch.
//!
//! An external poller watches the advisor's mailbox and posts each new
//! message to the service webhook. The dispatcher routes the message to the
//! open negotiation for that sender when one exists; otherwise it runs the
//! new-lead flow: create the CRM contact, attach the message as a note, and
//! send a short acknowledgement.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::workflow::{compose, CrmService, EmailService, WorkflowEngine, WorkflowError};

/// Notes carry the message body; anything longer is truncated.
const NOTE_BODY_MAX_CHARS: usize = 1000;

/// One message as delivered by the mailbox poller.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEmail {
    /// Raw From header, either `addr@example.com` or `Name <addr@example.com>`.
    pub from_address: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

/// What the dispatcher did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Routed into an open negotiation as a reply.
    Reply { workflow_id: Uuid },
    /// Sender unknown; a CRM contact was created (or creation was attempted).
    NewSender { contact_id: Option<String> },
}

pub struct InboundDispatcher {
    engine: Arc<WorkflowEngine>,
    crm: Arc<dyn CrmService>,
    email: Arc<dyn EmailService>,
}

impl InboundDispatcher {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        crm: Arc<dyn CrmService>,
        email: Arc<dyn EmailService>,
    ) -> Self {
        Self { engine, crm, email }
    }

    pub fn dispatch(
        &self,
        message: &InboundEmail,
        now: DateTime<Utc>,
    ) -> Result<InboundOutcome, WorkflowError> {
        let (display_name, address) = parse_from_header(&message.from_address);

        if let Some(open) = self.engine.store().find_open_by_contact(&address)? {
            info!(
                workflow_id = %open.id,
                from = %address,
                "inbound email routed to open negotiation"
            );
            let workflow = self.engine.handle_reply(open.id, &message.body, now)?;
            return Ok(InboundOutcome::Reply {
                workflow_id: workflow.id,
            });
        }

        // Known contact with no open negotiation: nothing to do but log.
        match self.crm.find_contact(&address) {
            Ok(candidates) => {
                if let Some(existing) = candidates.into_iter().find(|candidate| {
                    candidate
                        .email
                        .as_deref()
                        .is_some_and(|email| email.eq_ignore_ascii_case(&address))
                }) {
                    info!(from = %address, contact_id = %existing.id, "inbound email from known contact with no open negotiation");
                    return Ok(InboundOutcome::NewSender {
                        contact_id: Some(existing.id),
                    });
                }
            }
            Err(err) => warn!(from = %address, "CRM lookup failed: {err}"),
        }

        // New-lead flow. Each step is best-effort: a CRM or mail hiccup
        // should not bounce the webhook, the poller will not redeliver.
        let (first_name, last_name) = split_display_name(&display_name, &address);
        let contact_id = match self.crm.create_contact(&address, &first_name, &last_name) {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(from = %address, "could not create CRM contact: {err}");
                None
            }
        };
        if let Some(contact_id) = contact_id.as_deref() {
            let note = format!(
                "Contact via email on {}. Subject: {}. Message: {}",
                message.received_at.format("%Y-%m-%d"),
                message.subject,
                truncate_chars(&message.body, NOTE_BODY_MAX_CHARS)
            );
            if let Err(err) = self.crm.add_note(contact_id, &note) {
                warn!(from = %address, "could not attach inbound note: {err}");
            }
        }
        let greeting_name = if first_name.is_empty() {
            address.clone()
        } else {
            first_name.clone()
        };
        let body = compose::compose_thank_you_message(&greeting_name);
        if let Err(err) = self.email.send(&address, "Thanks for reaching out", &body) {
            warn!(from = %address, "could not send acknowledgement: {err}");
        }
        info!(from = %address, contact_id = ?contact_id, "new sender processed");
        Ok(InboundOutcome::NewSender { contact_id })
    }
}

/// Split a From header into (display name, bare address). The display name
/// is empty when the header is a bare address.
pub(super) fn parse_from_header(raw: &str) -> (String, String) {
    let raw = raw.trim();
    if let (Some(open), Some(close)) = (raw.find('<'), raw.rfind('>')) {
        if open < close {
            let name = raw[..open].trim().trim_matches('"').to_string();
            let address = raw[open + 1..close].trim().to_string();
            return (name, address);
        }
    }
    (String::new(), raw.to_string())
}

/// Best-effort (first, last) from a display name, falling back to the
/// address local part for the first name.
fn split_display_name(display_name: &str, address: &str) -> (String, String) {
    let mut parts = display_name.split_whitespace();
    match parts.next() {
        Some(first) => {
            let last = parts.collect::<Vec<_>>().join(" ");
            (first.to_string(), last)
        }
        None => {
            let local = address.split('@').next().unwrap_or_default();
            (local.to_string(), String::new())
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
