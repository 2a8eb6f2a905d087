//! Turns an inbound reply into a decision about the offered slots.
//!
//! Two passes: a deterministic matcher handles ordinals, echoed slot text
//! and plain declines without any model call; everything else goes to the
//! LLM with a prompt constrained to a slot number or a sentinel. The
//! interpreter fails closed: any answer that does not parse strictly is
//! [`ReplyInterpretation::Unclear`], never a guessed slot.

use regex::Regex;
use tracing::warn;

use super::collaborators::LlmService;
use super::compose::format_slot;
use super::types::Slot;

/// Outcome of interpreting one reply. No workflow state changes here; that
/// is the engine's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyInterpretation {
    /// Index into the offered slot list.
    SelectedSlot(usize),
    Decline,
    Unclear,
}

pub fn interpret_reply(
    llm: &dyn LlmService,
    reply_text: &str,
    offered_slots: &[Slot],
) -> ReplyInterpretation {
    if offered_slots.is_empty() {
        return ReplyInterpretation::Unclear;
    }
    if let Some(interpretation) = match_reply(reply_text, offered_slots) {
        return interpretation;
    }
    interpret_with_llm(llm, reply_text, offered_slots)
}

/// Deterministic pass. Returns `None` when nothing matched unambiguously.
pub fn match_reply(reply_text: &str, offered_slots: &[Slot]) -> Option<ReplyInterpretation> {
    let normalized = normalize(reply_text);
    if normalized.is_empty() {
        return None;
    }

    // Verbatim echo of a rendered slot.
    let mut echoed = Vec::new();
    for (index, slot) in offered_slots.iter().enumerate() {
        if normalized.contains(&normalize(&format_slot(slot))) {
            echoed.push(index);
        }
    }
    if let [index] = echoed[..] {
        return Some(ReplyInterpretation::SelectedSlot(index));
    }
    if echoed.len() > 1 {
        return None;
    }

    // Weekday plus clock time, e.g. "Tuesday at 11:00 AM works".
    let mut partial = Vec::new();
    for (index, slot) in offered_slots.iter().enumerate() {
        let weekday = normalize(&slot.start.format("%A").to_string());
        let time = normalize(&slot.start.format("%I:%M %p").to_string());
        if normalized.contains(&weekday) && normalized.contains(&time) {
            partial.push(index);
        }
    }
    if let [index] = partial[..] {
        return Some(ReplyInterpretation::SelectedSlot(index));
    }

    // Ordinal references: a bare number, "option 2", "#3".
    if let Some(index) = match_ordinal(&normalized, offered_slots.len()) {
        return Some(ReplyInterpretation::SelectedSlot(index));
    }

    // Unambiguous decline phrasing only; a casual "no" somewhere in the
    // text is not enough to finalize a negotiation.
    let decline = Regex::new(
        r"(?x)
        none\ of\ (these|those)(\ times)?\ works? |
        \bnot\ interested\b |
        \bno\ longer\ (need|interested) |
        \bplease\ cancel\b |
        \bi\ (must\ |have\ to\ )?decline\b |
        ^no\ thanks?\b",
    )
    .ok()?;
    if decline.is_match(&normalized) {
        return Some(ReplyInterpretation::Decline);
    }

    None
}

fn match_ordinal(normalized: &str, slot_count: usize) -> Option<usize> {
    let bare = Regex::new(r"^([1-9])\s*[.!]?$").ok()?;
    let labeled = Regex::new(r"\b(?:option|slot|number|choice)\s*#?\s*([1-9])\b|#([1-9])\b").ok()?;

    let digit = if let Some(captures) = bare.captures(normalized) {
        captures.get(1)
    } else if let Some(captures) = labeled.captures(normalized) {
        captures.get(1).or_else(|| captures.get(2))
    } else {
        None
    };
    let number: usize = digit?.as_str().parse().ok()?;
    (number >= 1 && number <= slot_count).then(|| number - 1)
}

/// Lowercase with whitespace collapsed to single spaces.
fn normalize(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn interpret_with_llm(
    llm: &dyn LlmService,
    reply_text: &str,
    offered_slots: &[Slot],
) -> ReplyInterpretation {
    let mut prompt = String::from(
        "A contact was offered these meeting times:\n",
    );
    for (index, slot) in offered_slots.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", index + 1, format_slot(slot)));
    }
    prompt.push_str(&format!(
        "\nTheir reply was:\n\"{}\"\n\n\
         Which option did they pick? Answer with the option number alone. \
         If they declined all options answer DECLINE. If the reply does not \
         clearly pick an option answer UNCLEAR.",
        reply_text.trim()
    ));

    let answer = match llm.complete(&prompt) {
        Ok(answer) => answer,
        Err(err) => {
            warn!("reply interpretation LLM call failed: {err}");
            return ReplyInterpretation::Unclear;
        }
    };
    parse_llm_answer(&answer, offered_slots.len())
}

/// Strict parse of the model answer; anything unexpected is `Unclear`.
fn parse_llm_answer(answer: &str, slot_count: usize) -> ReplyInterpretation {
    let trimmed = answer.trim().trim_end_matches('.');
    if trimmed.eq_ignore_ascii_case("decline") {
        return ReplyInterpretation::Decline;
    }
    if trimmed.eq_ignore_ascii_case("unclear") {
        return ReplyInterpretation::Unclear;
    }
    match trimmed.parse::<usize>() {
        Ok(number) if number >= 1 && number <= slot_count => {
            ReplyInterpretation::SelectedSlot(number - 1)
        }
        _ => ReplyInterpretation::Unclear,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::collaborators::{ChatMessage, ConnectorError};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedLlm {
        answer: Option<String>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn answering(answer: &str) -> Self {
            Self {
                answer: Some(answer.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                answer: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl LlmService for ScriptedLlm {
        fn complete(&self, _prompt: &str) -> Result<String, ConnectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone().ok_or(ConnectorError::Api {
                provider: "openai",
                status: 500,
                body: "scripted failure".to_string(),
            })
        }

        fn chat(
            &self,
            _messages: Vec<ChatMessage>,
            _tools: Option<Vec<serde_json::Value>>,
        ) -> Result<ChatMessage, ConnectorError> {
            unreachable!("interpreter never uses the chat shape")
        }
    }

    fn offered() -> Vec<Slot> {
        // Tuesday 2025-03-04.
        [9, 11, 14]
            .iter()
            .map(|hour| {
                Slot::new(
                    Utc.with_ymd_and_hms(2025, 3, 4, *hour, 0, 0)
                        .single()
                        .expect("valid time"),
                    60,
                )
            })
            .collect()
    }

    #[test]
    fn exact_rendered_echo_resolves_without_the_llm() {
        let llm = ScriptedLlm::failing();
        let slots = offered();
        let reply = format!("{} works for me!", format_slot(&slots[1]));
        let result = interpret_reply(&llm, &reply, &slots);
        assert_eq!(result, ReplyInterpretation::SelectedSlot(1));
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn weekday_and_time_resolve_deterministically() {
        let llm = ScriptedLlm::failing();
        let result = interpret_reply(&llm, "Tuesday at 11:00 AM works", &offered());
        assert_eq!(result, ReplyInterpretation::SelectedSlot(1));
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn ordinal_references_resolve_deterministically() {
        let llm = ScriptedLlm::failing();
        let slots = offered();
        assert_eq!(
            interpret_reply(&llm, "2", &slots),
            ReplyInterpretation::SelectedSlot(1)
        );
        assert_eq!(
            interpret_reply(&llm, "Let's do option 3 please", &slots),
            ReplyInterpretation::SelectedSlot(2)
        );
        assert_eq!(
            interpret_reply(&llm, "#1 suits me", &slots),
            ReplyInterpretation::SelectedSlot(0)
        );
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn out_of_range_ordinal_falls_through_to_the_llm() {
        let llm = ScriptedLlm::answering("UNCLEAR");
        assert_eq!(
            interpret_reply(&llm, "7", &offered()),
            ReplyInterpretation::Unclear
        );
        assert_eq!(llm.call_count(), 1);
    }

    #[test]
    fn plain_decline_is_detected_without_the_llm() {
        let llm = ScriptedLlm::failing();
        assert_eq!(
            interpret_reply(&llm, "Sorry, none of these work for me", &offered()),
            ReplyInterpretation::Decline
        );
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn unrelated_text_is_unclear_never_a_guess() {
        let llm = ScriptedLlm::answering("UNCLEAR");
        assert_eq!(
            interpret_reply(&llm, "lol no", &offered()),
            ReplyInterpretation::Unclear
        );
    }

    #[test]
    fn llm_answer_is_parsed_strictly() {
        assert_eq!(parse_llm_answer("2", 3), ReplyInterpretation::SelectedSlot(1));
        assert_eq!(parse_llm_answer(" 3.", 3), ReplyInterpretation::SelectedSlot(2));
        assert_eq!(parse_llm_answer("DECLINE", 3), ReplyInterpretation::Decline);
        assert_eq!(parse_llm_answer("decline", 3), ReplyInterpretation::Decline);
        assert_eq!(parse_llm_answer("UNCLEAR", 3), ReplyInterpretation::Unclear);
        // Out of range, prose, or chatty answers all fail closed.
        assert_eq!(parse_llm_answer("9", 3), ReplyInterpretation::Unclear);
        assert_eq!(parse_llm_answer("0", 3), ReplyInterpretation::Unclear);
        assert_eq!(
            parse_llm_answer("They picked option 2", 3),
            ReplyInterpretation::Unclear
        );
    }

    #[test]
    fn llm_transport_failure_is_unclear() {
        let llm = ScriptedLlm::failing();
        assert_eq!(
            interpret_reply(&llm, "maybe later in the week?", &offered()),
            ReplyInterpretation::Unclear
        );
        assert_eq!(llm.call_count(), 1);
    }

    #[test]
    fn empty_offer_list_is_unclear() {
        let llm = ScriptedLlm::failing();
        assert_eq!(
            interpret_reply(&llm, "1", &[]),
            ReplyInterpretation::Unclear
        );
        assert_eq!(llm.call_count(), 0);
    }
}
