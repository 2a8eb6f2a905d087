use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hours a contact has to answer an outreach email before the negotiation
/// expires. Each outreach round opens a fresh window.
pub const REPLY_WINDOW_HOURS: i64 = 72;

/// Hours before `expires_at` at which the single reminder email goes out.
/// With a 72-hour window this lands 48 hours after the outreach.
pub const REMINDER_LEAD_HOURS: i64 = 24;

/// Conflict rounds permitted before the negotiation is abandoned.
pub const CONFLICT_ROUND_LIMIT: u32 = 5;

/// Forward-looking window scanned for candidate slots.
pub const HORIZON_HOURS: i64 = 24;

/// Lead time before the first candidate slot, so a contact is never offered
/// a meeting that starts minutes after the email lands.
pub const OFFER_LEAD_HOURS: i64 = 1;

/// Default meeting length when the caller does not specify one.
pub const DEFAULT_SLOT_MINUTES: i64 = 60;

/// Most slots ever listed in one outreach email.
pub const MAX_OFFERED_SLOTS: usize = 6;

/// Seconds slept before each transient-failure retry. The initial attempt
/// plus one retry per entry.
pub const TRANSIENT_RETRY_DELAYS: [u64; 3] = [1, 2, 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    SearchingContact,
    AwaitingReply,
    Confirmed,
    ConflictRetry,
    Expired,
    Failed,
}

impl WorkflowStatus {
    /// Terminal workflows are never transitioned again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Confirmed | WorkflowStatus::Expired | WorkflowStatus::Failed
        )
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::SearchingContact => "searching_contact",
            WorkflowStatus::AwaitingReply => "awaiting_reply",
            WorkflowStatus::Confirmed => "confirmed",
            WorkflowStatus::ConflictRetry => "conflict_retry",
            WorkflowStatus::Expired => "expired",
            WorkflowStatus::Failed => "failed",
        }
    }

    pub(crate) fn parse(raw: &str) -> Result<Self, WorkflowError> {
        match raw {
            "searching_contact" => Ok(WorkflowStatus::SearchingContact),
            "awaiting_reply" => Ok(WorkflowStatus::AwaitingReply),
            "confirmed" => Ok(WorkflowStatus::Confirmed),
            "conflict_retry" => Ok(WorkflowStatus::ConflictRetry),
            "expired" => Ok(WorkflowStatus::Expired),
            "failed" => Ok(WorkflowStatus::Failed),
            other => Err(WorkflowError::Storage(format!(
                "unknown workflow status {other}"
            ))),
        }
    }
}

/// A candidate meeting start time with its duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
}

impl Slot {
    pub fn new(start: DateTime<Utc>, duration_minutes: i64) -> Self {
        Self {
            start,
            duration_minutes,
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(self.duration_minutes)
    }
}

/// One append-only audit record. The history doubles as the idempotency
/// guard: a step that already has a record is never performed again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub step_name: String,
    pub recorded_at: DateTime<Utc>,
    pub outcome: String,
}

impl HistoryRecord {
    pub fn new(step_name: &str, recorded_at: DateTime<Utc>, outcome: impl Into<String>) -> Self {
        Self {
            step_name: step_name.to_string(),
            recorded_at,
            outcome: outcome.into(),
        }
    }
}

/// One instance of the multi-round appointment negotiation for a single
/// contact. Never deleted; terminal workflows remain as an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationWorkflow {
    pub id: Uuid,
    pub owner: String,
    pub contact_email: Option<String>,
    pub contact_name: Option<String>,
    pub contact_id: Option<String>,
    pub meeting_title: String,
    pub status: WorkflowStatus,
    /// The slots presented in the most recent outreach email, in the order
    /// they were listed.
    pub offered_slots: Vec<Slot>,
    pub confirmed_slot: Option<Slot>,
    pub failure_reason: Option<String>,
    pub conflict_rounds: u32,
    pub reminder_sent: bool,
    pub history: Vec<HistoryRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NegotiationWorkflow {
    /// Fresh workflow in `searching_contact`, before any collaborator call.
    pub(crate) fn create(owner: &str, meeting_title: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            contact_email: None,
            contact_name: None,
            contact_id: None,
            meeting_title: meeting_title.to_string(),
            status: WorkflowStatus::SearchingContact,
            offered_slots: Vec::new(),
            confirmed_slot: None,
            failure_reason: None,
            conflict_rounds: 0,
            reminder_sent: false,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Idempotency check against the audit history.
    pub fn has_step(&self, step_name: &str) -> bool {
        self.history
            .iter()
            .any(|record| record.step_name == step_name)
    }

    pub(crate) fn record(&mut self, step_name: &str, now: DateTime<Utc>, outcome: impl Into<String>) {
        self.history.push(HistoryRecord::new(step_name, now, outcome));
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("uuid parse error: {0}")]
    UuidParse(#[from] uuid::Error),
    #[error("slot encoding error: {0}")]
    SlotEncoding(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("workflow {0} not found")]
    NotFound(Uuid),
    /// Another trigger advanced the history past the state this writer
    /// observed; the write was discarded.
    #[error("stale write: workflow history advanced concurrently")]
    StaleWrite,
    /// No CRM candidate scored above the confidence threshold.
    #[error("no confident contact match")]
    ContactNotFound,
    /// The calculator found zero open slots in the horizon.
    #[error("no availability within the scheduling horizon")]
    NoAvailability,
    /// A collaborator kept failing after every retry.
    #[error("transient collaborator failure: {0}")]
    Transient(String),
    /// A selected slot was taken between offer and confirmation.
    #[error("selected slot is no longer free")]
    SlotConflict,
    #[error("unrecoverable error: {0}")]
    Unrecoverable(String),
}
