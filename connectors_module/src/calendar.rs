//! Google Calendar client: free/busy lookup and event creation on the
//! advisor's primary calendar.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{expect_success, ConnectorError};

pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com";

/// Client for the Calendar v3 freeBusy and events endpoints.
#[derive(Debug, Clone)]
pub struct CalendarClient {
    access_token: String,
    api_base: String,
}

/// One busy interval as reported by the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CalendarClient {
    pub fn new(access_token: String) -> Self {
        Self::with_api_base(access_token, CALENDAR_API_BASE.to_string())
    }

    /// Same as [`CalendarClient::new`] but pointed at an alternate base URL.
    pub fn with_api_base(access_token: String, api_base: String) -> Self {
        Self {
            access_token,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Busy periods on the primary calendar between `start` and `end`,
    /// ascending by start time.
    pub fn list_busy(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyPeriod>, ConnectorError> {
        let request = FreeBusyRequest {
            time_min: start,
            time_max: end,
            items: vec![FreeBusyItem {
                id: "primary".to_string(),
            }],
        };
        let url = format!("{}/calendar/v3/freeBusy", self.api_base);
        let client = reqwest::blocking::Client::new();
        let response = client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()?;
        let response = expect_success("calendar", response)?;
        let parsed: FreeBusyResponse = response.json().map_err(|err| ConnectorError::Parse {
            provider: "calendar",
            detail: err.to_string(),
        })?;

        let mut busy: Vec<BusyPeriod> = parsed
            .calendars
            .into_values()
            .flat_map(|calendar| calendar.busy)
            .collect();
        busy.sort_by_key(|period| period.start);
        Ok(busy)
    }

    /// Create an event on the primary calendar. Returns the event id.
    pub fn create_event(
        &self,
        title: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        attendees: &[String],
    ) -> Result<String, ConnectorError> {
        let request = EventResource {
            summary: title.to_string(),
            start: EventTime { date_time: start },
            end: EventTime { date_time: end },
            attendees: attendees
                .iter()
                .map(|email| EventAttendee {
                    email: email.clone(),
                })
                .collect(),
        };
        let url = format!("{}/calendar/v3/calendars/primary/events", self.api_base);
        let client = reqwest::blocking::Client::new();
        let response = client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()?;
        let response = expect_success("calendar", response)?;
        let created: EventCreated = response.json().map_err(|err| ConnectorError::Parse {
            provider: "calendar",
            detail: err.to_string(),
        })?;
        Ok(created.id)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FreeBusyRequest {
    time_min: DateTime<Utc>,
    time_max: DateTime<Utc>,
    items: Vec<FreeBusyItem>,
}

#[derive(Debug, Clone, Serialize)]
struct FreeBusyItem {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: HashMap<String, FreeBusyCalendar>,
}

#[derive(Debug, Clone, Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<BusyPeriod>,
}

#[derive(Debug, Clone, Serialize)]
struct EventResource {
    summary: String,
    start: EventTime,
    end: EventTime,
    attendees: Vec<EventAttendee>,
}

#[derive(Debug, Clone, Serialize)]
struct EventTime {
    #[serde(rename = "dateTime")]
    date_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
struct EventAttendee {
    email: String,
}

#[derive(Debug, Clone, Deserialize)]
struct EventCreated {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).single().expect("valid time")
    }

    #[test]
    fn list_busy_flattens_and_sorts_periods() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/calendar/v3/freeBusy")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "items": [{"id": "primary"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "calendars": {
                        "primary": {
                            "busy": [
                                {"start": "2025-03-04T15:00:00Z", "end": "2025-03-04T16:00:00Z"},
                                {"start": "2025-03-04T10:00:00Z", "end": "2025-03-04T11:30:00Z"}
                            ]
                        }
                    }
                }"#,
            )
            .create();

        let client = CalendarClient::with_api_base("tok".to_string(), server.url());
        let busy = client
            .list_busy(utc(2025, 3, 4, 0, 0), utc(2025, 3, 5, 0, 0))
            .expect("freebusy should succeed");

        assert_eq!(busy.len(), 2);
        assert_eq!(busy[0].start, utc(2025, 3, 4, 10, 0));
        assert_eq!(busy[1].start, utc(2025, 3, 4, 15, 0));
        mock.assert();
    }

    #[test]
    fn list_busy_handles_empty_calendar() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/calendar/v3/freeBusy")
            .with_status(200)
            .with_body(r#"{"calendars": {"primary": {"busy": []}}}"#)
            .create();

        let client = CalendarClient::with_api_base("tok".to_string(), server.url());
        let busy = client
            .list_busy(utc(2025, 3, 4, 0, 0), utc(2025, 3, 5, 0, 0))
            .expect("freebusy should succeed");
        assert!(busy.is_empty());
    }

    #[test]
    fn create_event_posts_summary_and_attendees() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/calendar/v3/calendars/primary/events")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "summary": "Portfolio review",
                "attendees": [{"email": "amy@example.com"}]
            })))
            .with_status(200)
            .with_body(r#"{"id": "evt-42"}"#)
            .create();

        let client = CalendarClient::with_api_base("tok".to_string(), server.url());
        let event_id = client
            .create_event(
                "Portfolio review",
                utc(2025, 3, 4, 15, 0),
                utc(2025, 3, 4, 16, 0),
                &["amy@example.com".to_string()],
            )
            .expect("event creation should succeed");

        assert_eq!(event_id, "evt-42");
        mock.assert();
    }
}
