//! SQLite persistence for negotiation workflows.
//!
//! One row per workflow plus an append-only `workflow_history` table keyed
//! by `(workflow_id, seq)`. The history length doubles as the concurrency
//! guard: [`WorkflowStore::commit`] states the length the writer observed
//! and the store rejects the write if a competing trigger appended past it.
//! Workflows are never deleted; terminal records stay as the audit trail.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use uuid::Uuid;

use super::types::{HistoryRecord, NegotiationWorkflow, Slot, WorkflowError, WorkflowStatus};

mod schema;

use schema::WORKFLOW_SCHEMA;

#[derive(Debug)]
pub struct WorkflowStore {
    path: PathBuf,
}

impl WorkflowStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, WorkflowError> {
        let store = Self { path: path.into() };
        let _ = store.open()?;
        Ok(store)
    }

    /// Persist a freshly created workflow, history included.
    pub fn insert(&self, workflow: &NegotiationWorkflow) -> Result<(), WorkflowError> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO workflows (id, owner, contact_email, contact_name, contact_id,
                                    meeting_title, status, offered_slots, confirmed_slot,
                                    failure_reason, conflict_rounds, reminder_sent,
                                    created_at, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                workflow.id.to_string(),
                workflow.owner,
                workflow.contact_email,
                workflow.contact_name,
                workflow.contact_id,
                workflow.meeting_title,
                workflow.status.as_str(),
                serde_json::to_string(&workflow.offered_slots)?,
                encode_optional_slot(workflow.confirmed_slot.as_ref())?,
                workflow.failure_reason,
                workflow.conflict_rounds,
                workflow.reminder_sent as i64,
                workflow.created_at.to_rfc3339(),
                workflow.updated_at.to_rfc3339(),
                workflow.expires_at.map(|value| value.to_rfc3339()),
            ],
        )?;
        insert_history_from(&tx, workflow, 0)?;
        tx.commit()?;
        Ok(())
    }

    pub fn load(&self, id: Uuid) -> Result<NegotiationWorkflow, WorkflowError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} FROM workflows WHERE id = ?1"
        ))?;
        let mut workflows = collect_workflows(&conn, &mut stmt, params![id.to_string()])?;
        workflows.pop().ok_or(WorkflowError::NotFound(id))
    }

    /// Every workflow, most recently updated first.
    pub fn list(&self) -> Result<Vec<NegotiationWorkflow>, WorkflowError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} FROM workflows ORDER BY updated_at DESC"
        ))?;
        collect_workflows(&conn, &mut stmt, params![])
    }

    /// Non-terminal workflows, for the sweeper.
    pub fn list_open(&self) -> Result<Vec<NegotiationWorkflow>, WorkflowError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} FROM workflows
             WHERE status NOT IN ('confirmed', 'expired', 'failed')
             ORDER BY updated_at DESC"
        ))?;
        collect_workflows(&conn, &mut stmt, params![])
    }

    /// The open workflow awaiting a reply from this address, if any. When
    /// several are open the most recently updated one wins.
    pub fn find_open_by_contact(
        &self,
        contact_email: &str,
    ) -> Result<Option<NegotiationWorkflow>, WorkflowError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} FROM workflows
             WHERE contact_email = ?1 COLLATE NOCASE
               AND status IN ('awaiting_reply', 'conflict_retry')
             ORDER BY updated_at DESC
             LIMIT 1"
        ))?;
        let mut workflows = collect_workflows(&conn, &mut stmt, params![contact_email])?;
        Ok(workflows.pop())
    }

    /// Compare-and-swap write. `expected_history_len` is the history length
    /// the caller observed when it loaded the workflow; if another trigger
    /// has appended past it the write is rejected with
    /// [`WorkflowError::StaleWrite`] and the record is left untouched.
    pub fn commit(
        &self,
        workflow: &NegotiationWorkflow,
        expected_history_len: usize,
    ) -> Result<(), WorkflowError> {
        if workflow.history.len() < expected_history_len {
            return Err(WorkflowError::Storage(format!(
                "history shrank for workflow {}",
                workflow.id
            )));
        }
        let mut conn = self.open()?;
        // Immediate transaction so the length check and the append are one
        // atomic writer section.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current_len: i64 = tx.query_row(
            "SELECT COUNT(*) FROM workflow_history WHERE workflow_id = ?1",
            params![workflow.id.to_string()],
            |row| row.get(0),
        )?;
        if current_len as usize != expected_history_len {
            return Err(WorkflowError::StaleWrite);
        }
        let updated = tx.execute(
            "UPDATE workflows
             SET contact_email = ?1,
                 contact_name = ?2,
                 contact_id = ?3,
                 status = ?4,
                 offered_slots = ?5,
                 confirmed_slot = ?6,
                 failure_reason = ?7,
                 conflict_rounds = ?8,
                 reminder_sent = ?9,
                 updated_at = ?10,
                 expires_at = ?11
             WHERE id = ?12",
            params![
                workflow.contact_email,
                workflow.contact_name,
                workflow.contact_id,
                workflow.status.as_str(),
                serde_json::to_string(&workflow.offered_slots)?,
                encode_optional_slot(workflow.confirmed_slot.as_ref())?,
                workflow.failure_reason,
                workflow.conflict_rounds,
                workflow.reminder_sent as i64,
                workflow.updated_at.to_rfc3339(),
                workflow.expires_at.map(|value| value.to_rfc3339()),
                workflow.id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(WorkflowError::NotFound(workflow.id));
        }
        insert_history_from(&tx, workflow, expected_history_len)?;
        tx.commit()?;
        Ok(())
    }

    fn open(&self) -> Result<Connection, WorkflowError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(WORKFLOW_SCHEMA)?;
        Ok(conn)
    }
}

const SELECT_COLUMNS: &str = "SELECT id, owner, contact_email, contact_name, contact_id,
                                     meeting_title, status, offered_slots, confirmed_slot,
                                     failure_reason, conflict_rounds, reminder_sent,
                                     created_at, updated_at, expires_at";

fn insert_history_from(
    tx: &Transaction<'_>,
    workflow: &NegotiationWorkflow,
    from_seq: usize,
) -> Result<(), WorkflowError> {
    for (seq, record) in workflow.history.iter().enumerate().skip(from_seq) {
        tx.execute(
            "INSERT INTO workflow_history (workflow_id, seq, step_name, recorded_at, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                workflow.id.to_string(),
                seq as i64,
                record.step_name,
                record.recorded_at.to_rfc3339(),
                record.outcome,
            ],
        )?;
    }
    Ok(())
}

fn collect_workflows(
    conn: &Connection,
    stmt: &mut rusqlite::Statement<'_>,
    query_params: impl rusqlite::Params,
) -> Result<Vec<NegotiationWorkflow>, WorkflowError> {
    let rows = stmt.query_map(query_params, |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, Option<String>>(8)?,
            row.get::<_, Option<String>>(9)?,
            row.get::<_, i64>(10)?,
            row.get::<_, i64>(11)?,
            row.get::<_, String>(12)?,
            row.get::<_, String>(13)?,
            row.get::<_, Option<String>>(14)?,
        ))
    })?;

    let mut workflows = Vec::new();
    for row in rows {
        let (
            id_raw,
            owner,
            contact_email,
            contact_name,
            contact_id,
            meeting_title,
            status_raw,
            offered_raw,
            confirmed_raw,
            failure_reason,
            conflict_rounds,
            reminder_sent,
            created_at_raw,
            updated_at_raw,
            expires_at_raw,
        ) = row?;
        let id = Uuid::parse_str(&id_raw)?;
        workflows.push(NegotiationWorkflow {
            id,
            owner,
            contact_email,
            contact_name,
            contact_id,
            meeting_title,
            status: WorkflowStatus::parse(&status_raw)?,
            offered_slots: serde_json::from_str(&offered_raw)?,
            confirmed_slot: decode_optional_slot(confirmed_raw.as_deref())?,
            failure_reason,
            conflict_rounds: conflict_rounds as u32,
            reminder_sent: reminder_sent != 0,
            history: load_history(conn, id)?,
            created_at: parse_datetime(&created_at_raw)?,
            updated_at: parse_datetime(&updated_at_raw)?,
            expires_at: expires_at_raw.as_deref().map(parse_datetime).transpose()?,
        });
    }
    Ok(workflows)
}

fn load_history(conn: &Connection, workflow_id: Uuid) -> Result<Vec<HistoryRecord>, WorkflowError> {
    let mut stmt = conn.prepare(
        "SELECT step_name, recorded_at, outcome
         FROM workflow_history
         WHERE workflow_id = ?1
         ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![workflow_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut history = Vec::new();
    for row in rows {
        let (step_name, recorded_at_raw, outcome) = row?;
        history.push(HistoryRecord {
            step_name,
            recorded_at: parse_datetime(&recorded_at_raw)?,
            outcome,
        });
    }
    Ok(history)
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, WorkflowError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn encode_optional_slot(slot: Option<&Slot>) -> Result<Option<String>, WorkflowError> {
    slot.map(|value| serde_json::to_string(value))
        .transpose()
        .map_err(WorkflowError::from)
}

fn decode_optional_slot(raw: Option<&str>) -> Result<Option<Slot>, WorkflowError> {
    raw.map(serde_json::from_str).transpose().map_err(WorkflowError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::TempDir;

    fn utc(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, h, 0, 0)
            .single()
            .expect("valid time")
    }

    fn sample_workflow() -> NegotiationWorkflow {
        let mut workflow = NegotiationWorkflow::create("advisor@example.com", "Review", utc(8));
        workflow.contact_email = Some("amy@example.com".to_string());
        workflow.contact_name = Some("Amy Chen".to_string());
        workflow.record("search_contact", utc(8), "matched Amy Chen");
        workflow
    }

    #[test]
    fn insert_and_load_round_trip() {
        let temp = TempDir::new().expect("tempdir");
        let store = WorkflowStore::new(temp.path().join("negotiations.db")).expect("store");

        let mut workflow = sample_workflow();
        workflow.offered_slots = vec![Slot::new(utc(11), 60)];
        workflow.status = WorkflowStatus::AwaitingReply;
        workflow.expires_at = Some(utc(8) + ChronoDuration::hours(72));
        store.insert(&workflow).expect("insert");

        let loaded = store.load(workflow.id).expect("load");
        assert_eq!(loaded.owner, "advisor@example.com");
        assert_eq!(loaded.status, WorkflowStatus::AwaitingReply);
        assert_eq!(loaded.offered_slots, vec![Slot::new(utc(11), 60)]);
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.history[0].step_name, "search_contact");
        assert_eq!(loaded.expires_at, workflow.expires_at);
    }

    #[test]
    fn commit_appends_only_new_history_records() {
        let temp = TempDir::new().expect("tempdir");
        let store = WorkflowStore::new(temp.path().join("negotiations.db")).expect("store");

        let mut workflow = sample_workflow();
        store.insert(&workflow).expect("insert");

        let observed = workflow.history.len();
        workflow.record("send_outreach", utc(9), "offered 3 slots");
        workflow.status = WorkflowStatus::AwaitingReply;
        workflow.offered_slots = vec![Slot::new(utc(11), 60)];
        store.commit(&workflow, observed).expect("commit");

        let loaded = store.load(workflow.id).expect("load");
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(loaded.history[1].step_name, "send_outreach");
    }

    #[test]
    fn stale_commit_is_rejected_and_leaves_the_record_unchanged() {
        let temp = TempDir::new().expect("tempdir");
        let store = WorkflowStore::new(temp.path().join("negotiations.db")).expect("store");

        let workflow = sample_workflow();
        store.insert(&workflow).expect("insert");

        // Trigger A and trigger B both observe history length 1.
        let mut trigger_a = store.load(workflow.id).expect("load a");
        let mut trigger_b = store.load(workflow.id).expect("load b");

        trigger_a.record("send_outreach", utc(9), "offered slots");
        store.commit(&trigger_a, 1).expect("first commit wins");

        trigger_b.record("send_outreach", utc(9), "offered slots again");
        trigger_b.status = WorkflowStatus::Failed;
        let err = store.commit(&trigger_b, 1).expect_err("stale commit");
        assert!(matches!(err, WorkflowError::StaleWrite));

        let loaded = store.load(workflow.id).expect("load");
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(loaded.status, WorkflowStatus::SearchingContact);
    }

    #[test]
    fn find_open_by_contact_prefers_most_recent_and_skips_terminal() {
        let temp = TempDir::new().expect("tempdir");
        let store = WorkflowStore::new(temp.path().join("negotiations.db")).expect("store");

        let mut older = sample_workflow();
        older.status = WorkflowStatus::AwaitingReply;
        older.offered_slots = vec![Slot::new(utc(9), 60)];
        older.updated_at = utc(9);
        store.insert(&older).expect("insert older");

        let mut newer = sample_workflow();
        newer.status = WorkflowStatus::ConflictRetry;
        newer.offered_slots = vec![Slot::new(utc(11), 60)];
        newer.updated_at = utc(12);
        store.insert(&newer).expect("insert newer");

        let mut terminal = sample_workflow();
        terminal.status = WorkflowStatus::Confirmed;
        terminal.updated_at = utc(15);
        store.insert(&terminal).expect("insert terminal");

        let found = store
            .find_open_by_contact("AMY@example.com")
            .expect("query")
            .expect("open workflow exists");
        assert_eq!(found.id, newer.id);

        assert!(store
            .find_open_by_contact("nobody@example.com")
            .expect("query")
            .is_none());
    }

    #[test]
    fn list_open_excludes_terminal_workflows() {
        let temp = TempDir::new().expect("tempdir");
        let store = WorkflowStore::new(temp.path().join("negotiations.db")).expect("store");

        let mut open = sample_workflow();
        open.status = WorkflowStatus::AwaitingReply;
        open.offered_slots = vec![Slot::new(utc(9), 60)];
        store.insert(&open).expect("insert open");

        let mut done = sample_workflow();
        done.status = WorkflowStatus::Expired;
        store.insert(&done).expect("insert done");

        let listed = store.list_open().expect("list open");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, open.id);

        assert_eq!(store.list().expect("list all").len(), 2);
    }

    #[test]
    fn missing_workflow_is_not_found() {
        let temp = TempDir::new().expect("tempdir");
        let store = WorkflowStore::new(temp.path().join("negotiations.db")).expect("store");
        let err = store.load(Uuid::new_v4()).expect_err("missing");
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }
}
