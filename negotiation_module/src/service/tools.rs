//! Tool-calling chat over the same collaborators the engine uses.
//!
//! The advisor types a free-form instruction; the model answers directly or
//! asks for tool executions, which run here and feed back into the
//! conversation. Tool failures and malformed arguments go back to the model
//! as error text so it can recover or apologize, never as a panic.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::workflow::availability::{compute_slots, AvailabilityRequest};
use crate::workflow::compose::format_slot;
use crate::workflow::types::{DEFAULT_SLOT_MINUTES, OFFER_LEAD_HOURS};
use crate::workflow::{
    CalendarService, ChatMessage, ConnectorError, CrmService, EmailService, LlmService, ToolCall,
};

/// Tool rounds per chat turn; past this the loop answers with whatever the
/// model last said.
const MAX_TOOL_ROUNDS: usize = 4;

const SYSTEM_PROMPT: &str = "You are a scheduling assistant for a financial advisor. \
You can send email, create calendar events, create CRM contacts, and look up \
the advisor's availability. Use the tools when the request calls for an \
action; otherwise answer directly and concisely.";

pub struct ChatTools {
    calendar: Arc<dyn CalendarService>,
    email: Arc<dyn EmailService>,
    crm: Arc<dyn CrmService>,
    llm: Arc<dyn LlmService>,
    owner: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SendEmailArgs {
    to: String,
    subject: String,
    body: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateEventArgs {
    title: String,
    /// RFC 3339 start time.
    start: String,
    #[serde(default = "default_duration")]
    duration_minutes: i64,
    #[serde(default)]
    attendees: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateContactArgs {
    email: String,
    first_name: String,
    last_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GetAvailabilityArgs {
    #[serde(default = "default_duration")]
    duration_minutes: i64,
}

fn default_duration() -> i64 {
    DEFAULT_SLOT_MINUTES
}

impl ChatTools {
    pub fn new(
        calendar: Arc<dyn CalendarService>,
        email: Arc<dyn EmailService>,
        crm: Arc<dyn CrmService>,
        llm: Arc<dyn LlmService>,
        owner: &str,
    ) -> Self {
        Self {
            calendar,
            email,
            crm,
            llm,
            owner: owner.to_string(),
        }
    }

    /// One advisor chat turn, running tool calls until the model produces a
    /// plain answer or the round limit is reached.
    pub fn respond(&self, user_message: &str, now: DateTime<Utc>) -> Result<String, ConnectorError> {
        let mut messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_message),
        ];

        for _round in 0..MAX_TOOL_ROUNDS {
            let turn = self.llm.chat(messages.clone(), Some(tool_definitions()))?;
            let Some(calls) = turn.tool_calls.clone().filter(|calls| !calls.is_empty()) else {
                return Ok(turn.content.unwrap_or_default());
            };
            messages.push(turn);
            for call in calls {
                let result = self.execute_tool(&call, now);
                info!(tool = %call.function.name, "chat tool executed");
                messages.push(ChatMessage::tool_result(&call.id, &result));
            }
        }

        // Ask once more without tools for a closing answer.
        let turn = self.llm.chat(messages, None)?;
        Ok(turn.content.unwrap_or_default())
    }

    /// Run one tool call. Errors become text for the model, not `Err`.
    fn execute_tool(&self, call: &ToolCall, now: DateTime<Utc>) -> String {
        let name = call.function.name.as_str();
        let arguments = call.function.arguments.as_str();
        let outcome = match name {
            "send_email" => self.run_send_email(arguments),
            "create_calendar_event" => self.run_create_event(arguments),
            "create_contact" => self.run_create_contact(arguments),
            "get_availability" => self.run_get_availability(arguments, now),
            other => Err(format!("unknown tool: {other}")),
        };
        match outcome {
            Ok(result) => result,
            Err(message) => {
                warn!(tool = name, "chat tool failed: {message}");
                format!("error: {message}")
            }
        }
    }

    fn run_send_email(&self, arguments: &str) -> Result<String, String> {
        let args: SendEmailArgs = parse_args(arguments)?;
        let message_id = self
            .email
            .send(&args.to, &args.subject, &args.body)
            .map_err(|err| err.to_string())?;
        Ok(format!("email sent to {} (id {})", args.to, message_id))
    }

    fn run_create_event(&self, arguments: &str) -> Result<String, String> {
        let args: CreateEventArgs = parse_args(arguments)?;
        let start = DateTime::parse_from_rfc3339(&args.start)
            .map_err(|err| format!("invalid start time '{}': {err}", args.start))?
            .with_timezone(&Utc);
        let end = start + Duration::minutes(args.duration_minutes);
        let event_id = self
            .calendar
            .create_event(&self.owner, start, end, &args.attendees, &args.title)
            .map_err(|err| err.to_string())?;
        Ok(format!("calendar event {event_id} created"))
    }

    fn run_create_contact(&self, arguments: &str) -> Result<String, String> {
        let args: CreateContactArgs = parse_args(arguments)?;
        let contact_id = self
            .crm
            .create_contact(&args.email, &args.first_name, &args.last_name)
            .map_err(|err| err.to_string())?;
        Ok(format!("contact {contact_id} created"))
    }

    fn run_get_availability(&self, arguments: &str, now: DateTime<Utc>) -> Result<String, String> {
        let args: GetAvailabilityArgs = parse_args(arguments)?;
        let horizon_start = now + Duration::hours(OFFER_LEAD_HOURS);
        let request =
            AvailabilityRequest::new(horizon_start).with_duration(args.duration_minutes);
        let horizon_end = horizon_start + Duration::hours(request.horizon_hours);
        let busy = self
            .calendar
            .list_busy(&self.owner, horizon_start, horizon_end)
            .map_err(|err| err.to_string())?;
        let slots = compute_slots(&busy, &request);
        if slots.is_empty() {
            return Ok("no open slots within the scheduling horizon".to_string());
        }
        let lines: Vec<String> = slots
            .iter()
            .map(|slot| format!("- {}", format_slot(slot)))
            .collect();
        Ok(format!("open slots:\n{}", lines.join("\n")))
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(arguments: &str) -> Result<T, String> {
    serde_json::from_str(arguments).map_err(|err| format!("invalid arguments: {err}"))
}

/// Tool schemas in the OpenAI function-calling shape.
pub fn tool_definitions() -> Vec<serde_json::Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "send_email",
                "description": "Send a plain-text email from the advisor's mailbox.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "to": {"type": "string", "description": "Recipient email address"},
                        "subject": {"type": "string"},
                        "body": {"type": "string"}
                    },
                    "required": ["to", "subject", "body"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "create_calendar_event",
                "description": "Create an event on the advisor's calendar.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "start": {"type": "string", "description": "RFC 3339 start time"},
                        "duration_minutes": {"type": "integer", "default": 60},
                        "attendees": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Attendee email addresses"
                        }
                    },
                    "required": ["title", "start"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "create_contact",
                "description": "Create a CRM contact.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "email": {"type": "string"},
                        "first_name": {"type": "string"},
                        "last_name": {"type": "string"}
                    },
                    "required": ["email", "first_name", "last_name"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "get_availability",
                "description": "List the advisor's open slots over the next day.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "duration_minutes": {"type": "integer", "default": 60}
                    }
                }
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::tests::fakes::{FakeCalendar, FakeCrm, FakeEmail, FakeLlm};
    use crate::workflow::FunctionCall;
    use chrono::TimeZone;

    fn tool_call_turn(name: &str, arguments: &str) -> ChatMessage {
        ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: "call_1".to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            }]),
            tool_call_id: None,
        }
    }

    fn text_turn(text: &str) -> ChatMessage {
        ChatMessage {
            role: "assistant".to_string(),
            content: Some(text.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    struct Setup {
        tools: ChatTools,
        calendar: Arc<FakeCalendar>,
        email: Arc<FakeEmail>,
        crm: Arc<FakeCrm>,
    }

    fn setup(turns: Vec<ChatMessage>) -> Setup {
        let calendar = Arc::new(FakeCalendar::default());
        let email = Arc::new(FakeEmail::default());
        let crm = Arc::new(FakeCrm::default());
        let llm = Arc::new(FakeLlm::default());
        *llm.chat_turns.lock().expect("chat lock") = turns;
        let tools = ChatTools::new(
            calendar.clone(),
            email.clone(),
            crm.clone(),
            llm,
            "advisor@example.com",
        );
        Setup {
            tools,
            calendar,
            email,
            crm,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0)
            .single()
            .expect("valid time")
    }

    #[test]
    fn plain_answers_pass_through() {
        let setup = setup(vec![text_turn("You have no meetings today.")]);
        let answer = setup.tools.respond("what's on today?", now()).expect("respond");
        assert_eq!(answer, "You have no meetings today.");
    }

    #[test]
    fn send_email_tool_round_trips() {
        let setup = setup(vec![
            tool_call_turn(
                "send_email",
                r#"{"to": "amy@example.com", "subject": "Hello", "body": "Hi Amy"}"#,
            ),
            text_turn("Done, I emailed Amy."),
        ]);

        let answer = setup.tools.respond("email amy", now()).expect("respond");
        assert_eq!(answer, "Done, I emailed Amy.");

        let sent = setup.email.sent_mail();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "amy@example.com");
        assert_eq!(sent[0].subject, "Hello");
    }

    #[test]
    fn create_event_parses_rfc3339_start() {
        let setup = setup(vec![
            tool_call_turn(
                "create_calendar_event",
                r#"{"title": "Review", "start": "2025-03-05T15:00:00Z", "duration_minutes": 30, "attendees": ["amy@example.com"]}"#,
            ),
            text_turn("Scheduled."),
        ]);

        setup.tools.respond("book it", now()).expect("respond");

        let created = setup.calendar.created_events();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].title, "Review");
        assert_eq!(
            created[0].end - created[0].start,
            Duration::minutes(30)
        );
        assert_eq!(created[0].attendees, vec!["amy@example.com".to_string()]);
    }

    #[test]
    fn create_contact_tool_reaches_the_crm() {
        let setup = setup(vec![
            tool_call_turn(
                "create_contact",
                r#"{"email": "raj@example.com", "first_name": "Raj", "last_name": "Patel"}"#,
            ),
            text_turn("Contact created."),
        ]);

        setup.tools.respond("add raj", now()).expect("respond");

        let created = setup.crm.created_contacts.lock().expect("lock");
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, "raj@example.com");
    }

    #[test]
    fn get_availability_lists_open_slots() {
        let setup = setup(vec![
            tool_call_turn("get_availability", r#"{}"#),
            text_turn("Here are the open slots."),
        ]);
        setup.calendar.add_busy(
            Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).single().expect("time"),
            Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).single().expect("time"),
        );

        let answer = setup.tools.respond("when am I free?", now()).expect("respond");
        assert_eq!(answer, "Here are the open slots.");
    }

    #[test]
    fn malformed_arguments_become_error_text_not_failures() {
        let setup = setup(vec![
            tool_call_turn("send_email", r#"{"to": "amy@example.com"}"#),
            text_turn("Sorry, I could not send that."),
        ]);

        let answer = setup.tools.respond("email amy", now()).expect("respond");
        assert_eq!(answer, "Sorry, I could not send that.");
        assert!(setup.email.sent_mail().is_empty());
    }

    #[test]
    fn unknown_tools_become_error_text() {
        let setup = setup(vec![
            tool_call_turn("delete_everything", r#"{}"#),
            text_turn("I cannot do that."),
        ]);

        let answer = setup.tools.respond("wipe it", now()).expect("respond");
        assert_eq!(answer, "I cannot do that.");
    }

    #[test]
    fn tool_rounds_are_bounded() {
        // Four tool-call turns exhaust the round limit; the loop then asks
        // once more without tools and returns the closing answer.
        let mut turns: Vec<ChatMessage> = (0..4)
            .map(|_| tool_call_turn("get_availability", r#"{}"#))
            .collect();
        turns.push(text_turn("Enough looking."));
        let setup = setup(turns);

        let answer = setup.tools.respond("keep checking", now()).expect("respond");
        assert_eq!(answer, "Enough looking.");
    }
}
