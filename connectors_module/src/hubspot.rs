//! HubSpot CRM client: contact search and creation plus engagement notes.
//!
//! Contacts go through the CRM v3 objects API; notes use the older
//! engagements endpoint, which is what the surrounding system has always
//! written to.

use serde::{Deserialize, Serialize};

use crate::{expect_success, ConnectorError};

pub const HUBSPOT_API_BASE: &str = "https://api.hubapi.com";

/// Client for HubSpot contact and engagement endpoints.
#[derive(Debug, Clone)]
pub struct HubspotClient {
    access_token: String,
    api_base: String,
}

/// A CRM contact as returned by search.
#[derive(Debug, Clone, Deserialize)]
pub struct HubspotContact {
    pub id: String,
    #[serde(default)]
    pub properties: ContactProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactProperties {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

impl HubspotClient {
    pub fn new(access_token: String) -> Self {
        Self::with_api_base(access_token, HUBSPOT_API_BASE.to_string())
    }

    /// Same as [`HubspotClient::new`] but pointed at an alternate base URL.
    pub fn with_api_base(access_token: String, api_base: String) -> Self {
        Self {
            access_token,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Full-text contact search, at most `limit` results.
    pub fn search_contacts(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<HubspotContact>, ConnectorError> {
        let request = ContactSearchRequest {
            query: query.to_string(),
            limit,
            properties: ["firstname", "lastname", "email", "company", "lifecyclestage"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
        };
        let url = format!("{}/crm/v3/objects/contacts/search", self.api_base);
        let client = reqwest::blocking::Client::new();
        let response = client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()?;
        let response = expect_success("hubspot", response)?;
        let parsed: ContactSearchResponse =
            response.json().map_err(|err| ConnectorError::Parse {
                provider: "hubspot",
                detail: err.to_string(),
            })?;
        Ok(parsed.results)
    }

    /// Create a contact with lifecycle stage "lead". Returns the contact id.
    pub fn create_contact(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<String, ConnectorError> {
        let request = ContactCreateRequest {
            properties: ContactCreateProperties {
                email: email.to_string(),
                firstname: first_name.to_string(),
                lastname: last_name.to_string(),
                lifecyclestage: "lead".to_string(),
            },
        };
        let url = format!("{}/crm/v3/objects/contacts", self.api_base);
        let client = reqwest::blocking::Client::new();
        let response = client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()?;
        let response = expect_success("hubspot", response)?;
        let created: ContactCreated = response.json().map_err(|err| ConnectorError::Parse {
            provider: "hubspot",
            detail: err.to_string(),
        })?;
        Ok(created.id)
    }

    /// Attach a note engagement to a contact. Returns the engagement id.
    pub fn add_note(&self, contact_id: &str, body: &str) -> Result<String, ConnectorError> {
        let request = EngagementRequest {
            engagement: EngagementInfo {
                engagement_type: "NOTE".to_string(),
            },
            metadata: EngagementMetadata {
                body: body.to_string(),
            },
            associations: EngagementAssociations {
                contact_ids: vec![contact_id.to_string()],
            },
        };
        let url = format!("{}/engagements/v1/engagements", self.api_base);
        let client = reqwest::blocking::Client::new();
        let response = client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()?;
        let response = expect_success("hubspot", response)?;
        let created: EngagementCreated = response.json().map_err(|err| ConnectorError::Parse {
            provider: "hubspot",
            detail: err.to_string(),
        })?;
        Ok(created.engagement.id.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ContactSearchRequest {
    query: String,
    limit: u32,
    properties: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContactSearchResponse {
    #[serde(default)]
    results: Vec<HubspotContact>,
}

#[derive(Debug, Clone, Serialize)]
struct ContactCreateRequest {
    properties: ContactCreateProperties,
}

#[derive(Debug, Clone, Serialize)]
struct ContactCreateProperties {
    email: String,
    firstname: String,
    lastname: String,
    lifecyclestage: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ContactCreated {
    id: String,
}

#[derive(Debug, Clone, Serialize)]
struct EngagementRequest {
    engagement: EngagementInfo,
    metadata: EngagementMetadata,
    associations: EngagementAssociations,
}

#[derive(Debug, Clone, Serialize)]
struct EngagementInfo {
    #[serde(rename = "type")]
    engagement_type: String,
}

#[derive(Debug, Clone, Serialize)]
struct EngagementMetadata {
    body: String,
}

#[derive(Debug, Clone, Serialize)]
struct EngagementAssociations {
    #[serde(rename = "contactIds")]
    contact_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EngagementCreated {
    engagement: EngagementId,
}

#[derive(Debug, Clone, Deserialize)]
struct EngagementId {
    id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_parses_contact_properties() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/crm/v3/objects/contacts/search")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "query": "Amy Chen",
                "limit": 10
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "total": 1,
                    "results": [
                        {
                            "id": "301",
                            "properties": {
                                "email": "amy.chen@example.com",
                                "firstname": "Amy",
                                "lastname": "Chen",
                                "company": "Acme Capital"
                            }
                        }
                    ]
                }"#,
            )
            .create();

        let client = HubspotClient::with_api_base("tok".to_string(), server.url());
        let contacts = client
            .search_contacts("Amy Chen", 10)
            .expect("search should succeed");

        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, "301");
        assert_eq!(
            contacts[0].properties.email.as_deref(),
            Some("amy.chen@example.com")
        );
        assert_eq!(contacts[0].properties.firstname.as_deref(), Some("Amy"));
        mock.assert();
    }

    #[test]
    fn create_contact_sets_lead_lifecycle_stage() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/crm/v3/objects/contacts")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "properties": {
                    "email": "new@example.com",
                    "lifecyclestage": "lead"
                }
            })))
            .with_status(201)
            .with_body(r#"{"id": "512"}"#)
            .create();

        let client = HubspotClient::with_api_base("tok".to_string(), server.url());
        let id = client
            .create_contact("new@example.com", "New", "Person")
            .expect("create should succeed");

        assert_eq!(id, "512");
        mock.assert();
    }

    #[test]
    fn add_note_posts_engagement_with_contact_association() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/engagements/v1/engagements")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "engagement": {"type": "NOTE"},
                "associations": {"contactIds": ["301"]}
            })))
            .with_status(200)
            .with_body(r#"{"engagement": {"id": 9001}}"#)
            .create();

        let client = HubspotClient::with_api_base("tok".to_string(), server.url());
        let note_id = client
            .add_note("301", "Scheduled appointment confirmed")
            .expect("note should succeed");

        assert_eq!(note_id, "9001");
        mock.assert();
    }
}
