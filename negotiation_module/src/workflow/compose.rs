//! Email text for each stage of a negotiation. Pure functions: data in,
//! formatted text out.

use super::types::Slot;

/// Human-readable slot rendering: weekday, month name, 12-hour clock.
/// The reply interpreter matches against this exact format, so the two must
/// move together.
pub fn format_slot(slot: &Slot) -> String {
    slot.start.format("%A, %B %d at %I:%M %p").to_string()
}

pub fn availability_subject(meeting_title: &str) -> String {
    format!("Scheduling: {meeting_title}")
}

pub fn confirmation_subject(meeting_title: &str) -> String {
    format!("Confirmed: {meeting_title}")
}

/// Outreach email listing the offered slots as a numbered list.
pub fn compose_availability_message(contact_name: &str, slots: &[Slot]) -> String {
    let mut body = format!(
        "Hi {contact_name},\n\n\
         I'd like to find a time for us to meet. Here are some options that \
         work on my end:\n\n"
    );
    push_numbered_slots(&mut body, slots);
    body.push_str(
        "\nJust reply with the option number (or the time itself) and I'll \
         send over a calendar invitation.\n\nBest regards\n",
    );
    body
}

pub fn compose_confirmation_message(contact_name: &str, slot: &Slot) -> String {
    format!(
        "Hi {contact_name},\n\n\
         Great news - you're confirmed for {}. A calendar invitation is on \
         its way to you.\n\n\
         Looking forward to it!\n\nBest regards\n",
        format_slot(slot)
    )
}

/// Sent when the selected time was booked in the meantime.
pub fn compose_conflict_message(
    contact_name: &str,
    requested_slot: &Slot,
    alternative_slots: &[Slot],
) -> String {
    let mut body = format!(
        "Hi {contact_name},\n\n\
         Unfortunately {} is no longer available on my calendar - apologies \
         for the back and forth. Here are some fresh options:\n\n",
        format_slot(requested_slot)
    );
    push_numbered_slots(&mut body, alternative_slots);
    body.push_str("\nWould any of these work instead?\n\nBest regards\n");
    body
}

/// One-time nudge partway through the reply window.
pub fn compose_reminder_message(contact_name: &str, slots: &[Slot]) -> String {
    let mut body = format!(
        "Hi {contact_name},\n\n\
         Just a quick follow-up on the meeting times I sent over - the \
         options are still open:\n\n"
    );
    push_numbered_slots(&mut body, slots);
    body.push_str("\nLet me know if any of these work for you.\n\nBest regards\n");
    body
}

/// Welcome note for a first-time email contact.
pub fn compose_thank_you_message(contact_name: &str) -> String {
    format!(
        "Hi {contact_name},\n\n\
         Thank you for reaching out! I've received your email and will get \
         back to you shortly.\n\nBest regards\n"
    )
}

fn push_numbered_slots(body: &mut String, slots: &[Slot]) {
    for (index, slot) in slots.iter().enumerate() {
        body.push_str(&format!("{}. {}\n", index + 1, format_slot(slot)));
    }
}
