//! Live adapters from the collaborator traits onto the HTTP connectors.
//!
//! The engine only ever sees one calendar (the advisor's primary), so the
//! `owner` parameter carries intent for logging but does not select a
//! different Google account; the access token already does that.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use connectors_module::calendar::{CalendarClient, CALENDAR_API_BASE};
use connectors_module::gmail::{GmailClient, GMAIL_API_BASE};
use connectors_module::hubspot::{HubspotClient, HubspotContact, HUBSPOT_API_BASE};
use connectors_module::openai::{ChatMessage, OpenAiClient, OPENAI_API_BASE};
use connectors_module::ConnectorError;

use crate::workflow::{
    BusyInterval, CalendarService, ContactCandidate, CrmService, EmailService, LlmService,
};

use super::config::ServiceConfig;

const CONTACT_SEARCH_LIMIT: u32 = 10;

pub struct LiveCalendar {
    client: CalendarClient,
}

impl CalendarService for LiveCalendar {
    fn list_busy(
        &self,
        _owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, ConnectorError> {
        let busy = self.client.list_busy(start, end)?;
        Ok(busy
            .into_iter()
            .map(|period| BusyInterval {
                start: period.start,
                end: period.end,
            })
            .collect())
    }

    fn create_event(
        &self,
        _owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        attendees: &[String],
        title: &str,
    ) -> Result<String, ConnectorError> {
        self.client.create_event(title, start, end, attendees)
    }
}

pub struct LiveEmail {
    client: GmailClient,
}

impl EmailService for LiveEmail {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<String, ConnectorError> {
        self.client.send_message(to, subject, body)
    }
}

pub struct LiveCrm {
    client: HubspotClient,
}

impl CrmService for LiveCrm {
    fn find_contact(&self, query: &str) -> Result<Vec<ContactCandidate>, ConnectorError> {
        let contacts = self.client.search_contacts(query, CONTACT_SEARCH_LIMIT)?;
        Ok(contacts.into_iter().map(to_candidate).collect())
    }

    fn create_contact(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<String, ConnectorError> {
        self.client.create_contact(email, first_name, last_name)
    }

    fn add_note(&self, contact_id: &str, text: &str) -> Result<String, ConnectorError> {
        self.client.add_note(contact_id, text)
    }
}

pub struct LiveLlm {
    client: OpenAiClient,
}

impl LlmService for LiveLlm {
    fn complete(&self, prompt: &str) -> Result<String, ConnectorError> {
        self.client.complete(prompt)
    }

    fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<serde_json::Value>>,
    ) -> Result<ChatMessage, ConnectorError> {
        self.client.chat(messages, tools)
    }
}

fn to_candidate(contact: HubspotContact) -> ContactCandidate {
    ContactCandidate {
        id: contact.id,
        email: contact.properties.email,
        first_name: contact.properties.firstname,
        last_name: contact.properties.lastname,
        company: contact.properties.company,
    }
}

/// The four live collaborators, built from config with any base-URL
/// overrides applied.
pub struct Collaborators {
    pub calendar: Arc<dyn CalendarService>,
    pub email: Arc<dyn EmailService>,
    pub crm: Arc<dyn CrmService>,
    pub llm: Arc<dyn LlmService>,
}

pub fn build_collaborators(config: &ServiceConfig) -> Collaborators {
    let calendar_base = config
        .calendar_api_base
        .clone()
        .unwrap_or_else(|| CALENDAR_API_BASE.to_string());
    let gmail_base = config
        .gmail_api_base
        .clone()
        .unwrap_or_else(|| GMAIL_API_BASE.to_string());
    let hubspot_base = config
        .hubspot_api_base
        .clone()
        .unwrap_or_else(|| HUBSPOT_API_BASE.to_string());
    let openai_base = config
        .openai_api_base
        .clone()
        .unwrap_or_else(|| OPENAI_API_BASE.to_string());

    Collaborators {
        calendar: Arc::new(LiveCalendar {
            client: CalendarClient::with_api_base(
                config.google_access_token.clone(),
                calendar_base,
            ),
        }),
        email: Arc::new(LiveEmail {
            client: GmailClient::with_api_base(
                config.google_access_token.clone(),
                config.advisor_email.clone(),
                gmail_base,
            ),
        }),
        crm: Arc::new(LiveCrm {
            client: HubspotClient::with_api_base(
                config.hubspot_access_token.clone(),
                hubspot_base,
            ),
        }),
        llm: Arc::new(LiveLlm {
            client: OpenAiClient::with_api_base(
                config.openai_api_key.clone(),
                config.openai_model.clone(),
                openai_base,
            ),
        }),
    }
}
