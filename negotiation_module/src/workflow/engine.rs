//! The negotiation state machine.
//!
//! The engine runs as discrete, externally triggered steps: workflow
//! creation, one inbound reply, one sweep tick, one cancellation. Between
//! steps nothing runs; "waiting for a reply" is an absence of further action
//! until the next trigger. Each step loads the workflow, does its work, and
//! commits through the store's history-length compare-and-swap, so a
//! competing trigger that advanced the workflow first wins and this one is
//! discarded.
//!
//! History records are committed before the side effect they describe, so a
//! crash between commit and send is re-derived as "already sent" on the
//! next trigger rather than sent twice.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::availability::{compute_slots, AvailabilityRequest};
use super::collaborators::{
    CalendarService, ConnectorError, CrmService, EmailService, LlmService,
};
use super::compose;
use super::contact_match::best_match;
use super::interpret::{interpret_reply, ReplyInterpretation};
use super::store::WorkflowStore;
use super::types::{
    NegotiationWorkflow, Slot, WorkflowError, WorkflowStatus, CONFLICT_ROUND_LIMIT,
    DEFAULT_SLOT_MINUTES, OFFER_LEAD_HOURS, REMINDER_LEAD_HOURS, REPLY_WINDOW_HOURS,
    TRANSIENT_RETRY_DELAYS,
};

/// Parameters for starting a negotiation.
#[derive(Debug, Clone)]
pub struct CreateWorkflowRequest {
    pub owner: String,
    /// Free-text contact identifier, matched against the CRM.
    pub contact_query: String,
    pub meeting_title: String,
    pub duration_minutes: i64,
}

impl CreateWorkflowRequest {
    pub fn new(owner: &str, contact_query: &str) -> Self {
        Self {
            owner: owner.to_string(),
            contact_query: contact_query.to_string(),
            meeting_title: "Meeting".to_string(),
            duration_minutes: DEFAULT_SLOT_MINUTES,
        }
    }
}

pub struct WorkflowEngine {
    store: WorkflowStore,
    calendar: Arc<dyn CalendarService>,
    email: Arc<dyn EmailService>,
    crm: Arc<dyn CrmService>,
    llm: Arc<dyn LlmService>,
    /// Seconds slept before each transient retry; empty disables retries.
    retry_delays: Vec<u64>,
}

impl WorkflowEngine {
    pub fn new(
        store: WorkflowStore,
        calendar: Arc<dyn CalendarService>,
        email: Arc<dyn EmailService>,
        crm: Arc<dyn CrmService>,
        llm: Arc<dyn LlmService>,
    ) -> Self {
        Self {
            store,
            calendar,
            email,
            crm,
            llm,
            retry_delays: TRANSIENT_RETRY_DELAYS.to_vec(),
        }
    }

    /// Replace the backoff schedule, chiefly so tests run without sleeping.
    pub fn with_retry_delays(mut self, delays: &[u64]) -> Self {
        self.retry_delays = delays.to_vec();
        self
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    /// Start a negotiation: resolve the contact, compute availability, send
    /// the outreach email. Returns the workflow in whatever state the
    /// opening steps reached (`awaiting_reply` on the happy path, `failed`
    /// when the contact or the calendar cannot support one).
    pub fn create_workflow(
        &self,
        request: &CreateWorkflowRequest,
        now: DateTime<Utc>,
    ) -> Result<NegotiationWorkflow, WorkflowError> {
        let mut workflow =
            NegotiationWorkflow::create(&request.owner, &request.meeting_title, now);
        self.store.insert(&workflow)?;
        info!(
            workflow_id = %workflow.id,
            contact = %request.contact_query,
            "negotiation created"
        );

        // searching_contact -> generating_availability.
        // Nothing has been committed past the insert, so every commit in
        // the opening steps states an observed history length of zero.
        let observed = 0usize;
        let candidates = match self.with_retries("search_contact", || {
            self.crm.find_contact(&request.contact_query)
        }) {
            Ok(candidates) => candidates,
            Err(err) => {
                return self.fail(workflow, observed, "search_contact", now, &err.to_string())
            }
        };
        let matched = match best_match(&request.contact_query, &candidates) {
            Some(matched) => matched,
            None => {
                return self.fail(
                    workflow,
                    observed,
                    "search_contact",
                    now,
                    &format!(
                        "clarification needed: no confident match for '{}'",
                        request.contact_query
                    ),
                )
            }
        };
        let contact_email = match matched.candidate.email.clone() {
            Some(email) => email,
            None => {
                return self.fail(
                    workflow,
                    observed,
                    "search_contact",
                    now,
                    &format!(
                        "clarification needed: contact '{}' has no email address",
                        matched.candidate.full_name()
                    ),
                )
            }
        };
        let contact_name = matched.candidate.full_name();
        workflow.contact_email = Some(contact_email);
        workflow.contact_name = Some(contact_name.clone());
        workflow.contact_id = Some(matched.candidate.id.clone());
        workflow.record(
            "search_contact",
            now,
            format!("matched {} with score {:.2}", contact_name, matched.score),
        );

        // generating_availability -> awaiting_reply, or fail on an empty
        // calendar scan. No widen-the-horizon retry here.
        let slots = match self.scan_availability(&workflow.owner, now, request.duration_minutes) {
            Ok(slots) => slots,
            Err(err) => {
                return self.fail(
                    workflow,
                    observed,
                    "generate_availability",
                    now,
                    &err.to_string(),
                )
            }
        };
        if slots.is_empty() {
            return self.fail(
                workflow,
                observed,
                "generate_availability",
                now,
                "no availability within the scheduling horizon",
            );
        }
        workflow.record(
            "generate_availability",
            now,
            format!("found {} open slots", slots.len()),
        );

        self.send_outreach(workflow, observed, slots, now)
    }

    /// Advance an open negotiation with one inbound reply. Replaying a
    /// trigger against a workflow that already moved past `awaiting_reply`
    /// is a no-op.
    pub fn handle_reply(
        &self,
        id: Uuid,
        reply_body: &str,
        now: DateTime<Utc>,
    ) -> Result<NegotiationWorkflow, WorkflowError> {
        let mut workflow = self.store.load(id)?;
        if !matches!(
            workflow.status,
            WorkflowStatus::AwaitingReply | WorkflowStatus::ConflictRetry
        ) {
            info!(
                workflow_id = %workflow.id,
                status = workflow.status.as_str(),
                "reply trigger ignored; workflow is not awaiting one"
            );
            return Ok(workflow);
        }
        let observed = workflow.history.len();

        match interpret_reply(self.llm.as_ref(), reply_body, &workflow.offered_slots) {
            ReplyInterpretation::Unclear => {
                // Recoverable: record it and keep waiting. Status, slots and
                // the expiry window are untouched.
                workflow.record("interpret_reply", now, "reply was unclear; still waiting");
                workflow.updated_at = now;
                self.store.commit(&workflow, observed)?;
                Ok(workflow)
            }
            ReplyInterpretation::Decline => {
                self.finalize(
                    workflow,
                    observed,
                    "interpret_reply",
                    now,
                    WorkflowStatus::Failed,
                    Some("contact declined the offered times"),
                )
            }
            ReplyInterpretation::SelectedSlot(index) => {
                let Some(slot) = workflow.offered_slots.get(index).copied() else {
                    return Err(WorkflowError::Unrecoverable(format!(
                        "interpreter selected slot {} of {}",
                        index,
                        workflow.offered_slots.len()
                    )));
                };
                self.try_confirm(workflow, observed, slot, now)
            }
        }
    }

    /// One pass over all open workflows: expire those past their reply
    /// window and send the single mid-window reminder. Idempotent; a second
    /// pass over an already-expired workflow does nothing.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let open = match self.store.list_open() {
            Ok(open) => open,
            Err(err) => {
                warn!("sweep could not list open workflows: {err}");
                return;
            }
        };
        for workflow in open {
            if let Err(err) = self.sweep_one(workflow, now) {
                match err {
                    WorkflowError::StaleWrite => {}
                    other => warn!("sweep step failed: {other}"),
                }
            }
        }
    }

    fn sweep_one(
        &self,
        mut workflow: NegotiationWorkflow,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let Some(expires_at) = workflow.expires_at else {
            return Ok(());
        };
        let observed = workflow.history.len();

        if now > expires_at {
            self.finalize(
                workflow,
                observed,
                "expiry_check",
                now,
                WorkflowStatus::Expired,
                None,
            )?;
            return Ok(());
        }

        let reminder_due = expires_at - Duration::hours(REMINDER_LEAD_HOURS);
        // Conflict rounds reset `reminder_sent`, so each reply window gets
        // its own single reminder.
        if matches!(
            workflow.status,
            WorkflowStatus::AwaitingReply | WorkflowStatus::ConflictRetry
        ) && !workflow.reminder_sent
            && now >= reminder_due
        {
            workflow.reminder_sent = true;
            workflow.record("send_reminder", now, "reply-window reminder");
            workflow.updated_at = now;
            // Commit first so a racing sweeper cannot send a second one.
            self.store.commit(&workflow, observed)?;

            let to = workflow.contact_email.clone().unwrap_or_default();
            let name = workflow.contact_name.clone().unwrap_or_default();
            let subject = compose::availability_subject(&workflow.meeting_title);
            let body = compose::compose_reminder_message(&name, &workflow.offered_slots);
            if let Err(err) = self.with_retries("send_reminder", || {
                self.email.send(&to, &subject, &body)
            }) {
                warn!(workflow_id = %workflow.id, "reminder email failed: {err}");
            }
        }
        Ok(())
    }

    /// Cancel through the same compare-and-swap guard, so an in-flight
    /// trigger cannot complete a stale transition afterwards. A no-op on
    /// terminal workflows.
    pub fn cancel(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<NegotiationWorkflow, WorkflowError> {
        let workflow = self.store.load(id)?;
        if workflow.is_terminal() {
            return Ok(workflow);
        }
        let observed = workflow.history.len();
        self.finalize(
            workflow,
            observed,
            "cancel",
            now,
            WorkflowStatus::Failed,
            Some("cancelled"),
        )
    }

    fn try_confirm(
        &self,
        mut workflow: NegotiationWorkflow,
        observed: usize,
        slot: Slot,
        now: DateTime<Utc>,
    ) -> Result<NegotiationWorkflow, WorkflowError> {
        // A committed create_event record means a previous trigger got as
        // far as creating the event before the confirmed commit landed. The
        // busy recheck would see that event as a conflict with itself, so
        // finish the confirmation instead of re-deriving one.
        if workflow.has_step("create_event") {
            info!(
                workflow_id = %workflow.id,
                "create_event already recorded; completing confirmation"
            );
            return self.complete_confirmation(
                workflow,
                observed,
                slot,
                now,
                "calendar event already created".to_string(),
            );
        }

        // Re-validate against the live calendar; the availability snapshot
        // the offer was built from may be minutes or days old.
        let busy = match self.with_retries("recheck_slot", || {
            self.calendar.list_busy(&workflow.owner, slot.start, slot.end())
        }) {
            Ok(busy) => busy,
            Err(err) => {
                return self.finalize(
                    workflow,
                    observed,
                    "recheck_slot",
                    now,
                    WorkflowStatus::Failed,
                    Some(&err.to_string()),
                )
            }
        };
        let conflicted = busy
            .iter()
            .any(|interval| slot.start < interval.end && slot.end() > interval.start);
        if conflicted {
            return self.retry_after_conflict(workflow, observed, slot, now);
        }

        let to = workflow.contact_email.clone().unwrap_or_default();

        // History before the side effect: commit the intent to create the
        // event, then create it.
        workflow.record(
            "create_event",
            now,
            format!("creating calendar event for {}", compose::format_slot(&slot)),
        );
        workflow.updated_at = now;
        self.store.commit(&workflow, observed)?;
        let observed = workflow.history.len();

        let attendees = vec![to.clone()];
        let event_id = match self.with_retries("create_event", || {
            self.calendar.create_event(
                &workflow.owner,
                slot.start,
                slot.end(),
                &attendees,
                &workflow.meeting_title,
            )
        }) {
            Ok(event_id) => event_id,
            Err(err) => {
                // Event creation is the critical path of the confirmation.
                return self.finalize(
                    workflow,
                    observed,
                    "create_event",
                    now,
                    WorkflowStatus::Failed,
                    Some(&err.to_string()),
                );
            }
        };

        self.complete_confirmation(
            workflow,
            observed,
            slot,
            now,
            format!("calendar event {event_id} created"),
        )
    }

    /// Commit the terminal `confirmed` transition, then the follow-up side
    /// effects (confirmation email, CRM note), both best-effort.
    fn complete_confirmation(
        &self,
        mut workflow: NegotiationWorkflow,
        observed: usize,
        slot: Slot,
        now: DateTime<Utc>,
        outcome: String,
    ) -> Result<NegotiationWorkflow, WorkflowError> {
        let to = workflow.contact_email.clone().unwrap_or_default();
        let name = workflow.contact_name.clone().unwrap_or_default();

        workflow.status = WorkflowStatus::Confirmed;
        workflow.confirmed_slot = Some(slot);
        workflow.record("confirmed", now, outcome);
        workflow.record("add_crm_note", now, "attaching confirmation note");
        workflow.updated_at = now;
        self.store.commit(&workflow, observed)?;
        info!(workflow_id = %workflow.id, "negotiation confirmed");

        let subject = compose::confirmation_subject(&workflow.meeting_title);
        let body = compose::compose_confirmation_message(&name, &slot);
        if let Err(err) = self.with_retries("send_confirmation", || {
            self.email.send(&to, &subject, &body)
        }) {
            warn!(workflow_id = %workflow.id, "confirmation email failed: {err}");
        }

        // The calendar event is the durable commitment; a lost note is
        // logged, not fatal.
        if let Some(contact_id) = workflow.contact_id.clone() {
            let note = format!(
                "Appointment confirmed for {} ({} minutes).",
                compose::format_slot(&slot),
                slot.duration_minutes
            );
            if let Err(err) =
                self.with_retries("add_crm_note", || self.crm.add_note(&contact_id, &note))
            {
                warn!(workflow_id = %workflow.id, "CRM note failed: {err}");
            }
        }

        Ok(workflow)
    }

    fn retry_after_conflict(
        &self,
        mut workflow: NegotiationWorkflow,
        observed: usize,
        requested: Slot,
        now: DateTime<Utc>,
    ) -> Result<NegotiationWorkflow, WorkflowError> {
        workflow.conflict_rounds += 1;
        workflow.record(
            "conflict_detected",
            now,
            format!(
                "{} was booked in the meantime (round {})",
                compose::format_slot(&requested),
                workflow.conflict_rounds
            ),
        );
        if workflow.conflict_rounds > CONFLICT_ROUND_LIMIT {
            return self.finalize_recorded(
                workflow,
                observed,
                now,
                WorkflowStatus::Failed,
                Some("negotiation exhausted"),
            );
        }

        // Recompute, never reuse: the calendar has changed under us.
        let slots = match self.scan_availability(&workflow.owner, now, requested.duration_minutes)
        {
            Ok(slots) => slots,
            Err(err) => {
                return self.finalize_recorded(
                    workflow,
                    observed,
                    now,
                    WorkflowStatus::Failed,
                    Some(&err.to_string()),
                )
            }
        };
        if slots.is_empty() {
            return self.finalize_recorded(
                workflow,
                observed,
                now,
                WorkflowStatus::Failed,
                Some("no availability within the scheduling horizon"),
            );
        }

        workflow.status = WorkflowStatus::ConflictRetry;
        self.send_conflict_outreach(workflow, observed, requested, slots, now)
    }

    fn scan_availability(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Vec<Slot>, WorkflowError> {
        let horizon_start = now + Duration::hours(OFFER_LEAD_HOURS);
        let request = AvailabilityRequest::new(horizon_start).with_duration(duration_minutes);
        let horizon_end = horizon_start + Duration::hours(request.horizon_hours);
        let busy = self.with_retries("list_busy", || {
            self.calendar.list_busy(owner, horizon_start, horizon_end)
        })?;
        Ok(compute_slots(&busy, &request))
    }

    /// Commit the offer (history before side effect), then send the email.
    /// Used for the initial outreach; `send_conflict_outreach` is the
    /// conflict-round variant with different copy.
    fn send_outreach(
        &self,
        mut workflow: NegotiationWorkflow,
        observed: usize,
        slots: Vec<Slot>,
        now: DateTime<Utc>,
    ) -> Result<NegotiationWorkflow, WorkflowError> {
        let to = workflow.contact_email.clone().unwrap_or_default();
        let name = workflow.contact_name.clone().unwrap_or_default();

        workflow.status = WorkflowStatus::AwaitingReply;
        workflow.offered_slots = slots;
        workflow.expires_at = Some(now + Duration::hours(REPLY_WINDOW_HOURS));
        workflow.record(
            "send_outreach",
            now,
            format!("offering {} slots", workflow.offered_slots.len()),
        );
        workflow.updated_at = now;
        self.store.commit(&workflow, observed)?;
        let observed = workflow.history.len();

        let subject = compose::availability_subject(&workflow.meeting_title);
        let body = compose::compose_availability_message(&name, &workflow.offered_slots);
        if let Err(err) =
            self.with_retries("send_outreach", || self.email.send(&to, &subject, &body))
        {
            // The outreach is the critical path; without it nobody replies.
            return self.finalize(
                workflow,
                observed,
                "send_outreach",
                now,
                WorkflowStatus::Failed,
                Some(&err.to_string()),
            );
        }
        info!(workflow_id = %workflow.id, to = %to, "outreach sent");
        Ok(workflow)
    }

    fn send_conflict_outreach(
        &self,
        mut workflow: NegotiationWorkflow,
        observed: usize,
        requested: Slot,
        slots: Vec<Slot>,
        now: DateTime<Utc>,
    ) -> Result<NegotiationWorkflow, WorkflowError> {
        let to = workflow.contact_email.clone().unwrap_or_default();
        let name = workflow.contact_name.clone().unwrap_or_default();

        workflow.offered_slots = slots;
        workflow.expires_at = Some(now + Duration::hours(REPLY_WINDOW_HOURS));
        workflow.reminder_sent = false;
        workflow.record(
            "send_conflict_outreach",
            now,
            format!("offering {} replacement slots", workflow.offered_slots.len()),
        );
        workflow.updated_at = now;
        self.store.commit(&workflow, observed)?;
        let observed = workflow.history.len();

        let subject = compose::availability_subject(&workflow.meeting_title);
        let body =
            compose::compose_conflict_message(&name, &requested, &workflow.offered_slots);
        if let Err(err) = self.with_retries("send_conflict_outreach", || {
            self.email.send(&to, &subject, &body)
        }) {
            return self.finalize(
                workflow,
                observed,
                "send_conflict_outreach",
                now,
                WorkflowStatus::Failed,
                Some(&err.to_string()),
            );
        }
        info!(workflow_id = %workflow.id, to = %to, "conflict outreach sent");
        Ok(workflow)
    }

    fn fail(
        &self,
        workflow: NegotiationWorkflow,
        observed: usize,
        step: &str,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<NegotiationWorkflow, WorkflowError> {
        self.finalize(
            workflow,
            observed,
            step,
            now,
            WorkflowStatus::Failed,
            Some(reason),
        )
    }

    /// Append one terminal record and commit the transition.
    fn finalize(
        &self,
        mut workflow: NegotiationWorkflow,
        observed: usize,
        step: &str,
        now: DateTime<Utc>,
        status: WorkflowStatus,
        reason: Option<&str>,
    ) -> Result<NegotiationWorkflow, WorkflowError> {
        let outcome = match reason {
            Some(reason) => format!("{}: {}", status.as_str(), reason),
            None => status.as_str().to_string(),
        };
        workflow.record(step, now, outcome);
        self.finalize_recorded(workflow, observed, now, status, reason)
    }

    /// Commit an already-recorded terminal transition.
    fn finalize_recorded(
        &self,
        mut workflow: NegotiationWorkflow,
        observed: usize,
        now: DateTime<Utc>,
        status: WorkflowStatus,
        reason: Option<&str>,
    ) -> Result<NegotiationWorkflow, WorkflowError> {
        workflow.status = status;
        if status == WorkflowStatus::Failed {
            workflow.failure_reason = reason.map(|value| value.to_string());
        }
        workflow.updated_at = now;
        self.store.commit(&workflow, observed)?;
        if let Some(reason) = reason {
            info!(
                workflow_id = %workflow.id,
                status = status.as_str(),
                reason,
                "negotiation finalized"
            );
        }
        Ok(workflow)
    }

    /// Run a collaborator call, sleeping through the backoff schedule on
    /// transient failures. Non-transient failures and exhausted schedules
    /// surface as workflow errors.
    fn with_retries<T>(
        &self,
        step: &str,
        mut operation: impl FnMut() -> Result<T, ConnectorError>,
    ) -> Result<T, WorkflowError> {
        let mut attempt = 0usize;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retry_delays.len() => {
                    let delay = self.retry_delays[attempt];
                    attempt += 1;
                    warn!(
                        step,
                        attempt,
                        delay_secs = delay,
                        "transient collaborator failure, retrying: {err}"
                    );
                    if delay > 0 {
                        std::thread::sleep(StdDuration::from_secs(delay));
                    }
                }
                Err(err) if err.is_transient() => {
                    return Err(WorkflowError::Transient(err.to_string()))
                }
                Err(err) => return Err(WorkflowError::Unrecoverable(err.to_string())),
            }
        }
    }
}
