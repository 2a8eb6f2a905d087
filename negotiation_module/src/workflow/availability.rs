//! Open-slot computation over a set of busy calendar intervals.
//!
//! Pure and deterministic: the same busy set and request always yield the
//! same slots. An empty result is a valid answer for a packed calendar; the
//! engine decides what to do with it.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};

use super::collaborators::BusyInterval;
use super::types::{Slot, DEFAULT_SLOT_MINUTES, HORIZON_HOURS, MAX_OFFERED_SLOTS};

/// Candidate starts are aligned to this boundary.
const SLOT_STEP_MINUTES: i64 = 30;

/// Inputs for one availability scan.
#[derive(Debug, Clone, Copy)]
pub struct AvailabilityRequest {
    pub horizon_start: DateTime<Utc>,
    pub horizon_hours: i64,
    /// Half-open hour window, evaluated in UTC; callers whose owners sit far
    /// from UTC should shift it to cover their local working day. Only the
    /// slot start is constrained, so a late slot may run past the nominal
    /// close.
    pub business_hours: (u32, u32),
    pub slot_count: usize,
    pub slot_duration_minutes: i64,
}

impl AvailabilityRequest {
    pub fn new(horizon_start: DateTime<Utc>) -> Self {
        Self {
            horizon_start,
            horizon_hours: HORIZON_HOURS,
            business_hours: (9, 17),
            slot_count: MAX_OFFERED_SLOTS,
            slot_duration_minutes: DEFAULT_SLOT_MINUTES,
        }
    }

    pub fn with_duration(mut self, slot_duration_minutes: i64) -> Self {
        self.slot_duration_minutes = slot_duration_minutes;
        self
    }
}

/// Scan the horizon in half-hour steps and collect open weekday slots whose
/// start hour falls inside business hours. Stops at `slot_count` slots or the
/// end of the horizon, whichever comes first.
pub fn compute_slots(busy: &[BusyInterval], request: &AvailabilityRequest) -> Vec<Slot> {
    let horizon_end = request.horizon_start + Duration::hours(request.horizon_hours);
    let step = Duration::minutes(SLOT_STEP_MINUTES);
    let (open_hour, close_hour) = request.business_hours;

    let mut slots = Vec::new();
    let mut cursor = round_up_to_step(request.horizon_start);
    while cursor < horizon_end && slots.len() < request.slot_count {
        let candidate = Slot::new(cursor, request.slot_duration_minutes);
        cursor += step;

        if is_weekend(candidate.start) {
            continue;
        }
        let hour = candidate.start.hour();
        if hour < open_hour || hour >= close_hour {
            continue;
        }
        if busy.iter().any(|interval| overlaps(&candidate, interval)) {
            continue;
        }
        slots.push(candidate);
    }
    slots
}

fn overlaps(slot: &Slot, busy: &BusyInterval) -> bool {
    slot.start < busy.end && slot.end() > busy.start
}

fn is_weekend(start: DateTime<Utc>) -> bool {
    matches!(start.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Round up to the next half-hour boundary; a timestamp already on the
/// boundary is kept.
fn round_up_to_step(value: DateTime<Utc>) -> DateTime<Utc> {
    let step_secs = SLOT_STEP_MINUTES * 60;
    let secs = value.timestamp();
    let remainder = secs.rem_euclid(step_secs);
    if remainder == 0 && value.timestamp_subsec_nanos() == 0 {
        return value;
    }
    DateTime::from_timestamp(secs + step_secs - remainder, 0).unwrap_or(value)
}
