pub(super) const WORKFLOW_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS workflows (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    contact_email TEXT,
    contact_name TEXT,
    contact_id TEXT,
    meeting_title TEXT NOT NULL,
    status TEXT NOT NULL,
    offered_slots TEXT NOT NULL,
    confirmed_slot TEXT,
    failure_reason TEXT,
    conflict_rounds INTEGER NOT NULL DEFAULT 0,
    reminder_sent INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    expires_at TEXT
);

CREATE TABLE IF NOT EXISTS workflow_history (
    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    step_name TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    outcome TEXT NOT NULL,
    PRIMARY KEY (workflow_id, seq)
);

CREATE INDEX IF NOT EXISTS idx_workflows_status ON workflows(status);
CREATE INDEX IF NOT EXISTS idx_workflows_contact_email ON workflows(contact_email);
"#;
