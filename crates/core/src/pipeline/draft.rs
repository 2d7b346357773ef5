//! Deterministic reply templating
//!
//! Dates and times in a reply come from here, never from model output. The
//! model writes prose around a placeholder that is replaced with the slot
//! list rendered in the requester's timezone.

use chrono_tz::Tz;
use mailpilot_domain::constants::SLOT_PLACEHOLDER;
use mailpilot_domain::{normalize_address, AvailabilityResult, RawMessage, ReplyKind, TimeWindow};
use once_cell::sync::Lazy;
use regex::Regex;

/// Weekdays, clock times, month-day dates and numeric dates.
#[allow(clippy::expect_used)]
static TIME_MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday|tomorrow|noon|midnight)\b
        | \b\d{1,2}(?::[0-5]\d)?\s*[ap]\.?m\b
        | \b(?:[01]?\d|2[0-3]):[0-5]\d\b
        | \b(?:january|february|march|april|june|july|august|september|october|november|december
              |jan|feb|mar|apr|jun|jul|aug|sep|sept|oct|nov|dec)\.?\s+\d{1,2}(?:st|nd|rd|th)?\b
        | \b\d{1,2}/\d{1,2}(?:/\d{2,4})?\b",
    )
    .expect("TIME_MENTION pattern is valid")
});

/// "Tuesday, March 4 from 10:00 AM to 10:30 AM (America/New_York)"
pub fn format_slot(slot: &TimeWindow, tz: Tz) -> String {
    let start = slot.start.with_timezone(&tz);
    let end = slot.end.with_timezone(&tz);
    format!(
        "{} from {} to {} ({})",
        start.format("%A, %B %-d"),
        start.format("%-I:%M %p"),
        end.format("%-I:%M %p"),
        tz.name()
    )
}

/// Chosen slot first, then alternatives.
pub fn slot_lines(result: &AvailabilityResult, tz: Tz) -> Vec<String> {
    result.chosen.iter().chain(result.alternatives.iter()).map(|slot| format_slot(slot, tz)).collect()
}

/// Whether the prose names a day, date or clock time of its own. Only the
/// rendered slot list may carry those.
pub fn mentions_times(prose: &str) -> bool {
    TIME_MENTION.is_match(&prose.replace(SLOT_PLACEHOLDER, " "))
}

/// Fixed prose used when the model's draft cannot be trusted.
pub fn fallback_prose(kind: ReplyKind) -> String {
    match kind {
        ReplyKind::ConfirmSlot => format!(
            "Hi,\n\nThank you for your message. The following time works:\n\n{SLOT_PLACEHOLDER}\n\nPlease confirm and an invitation will follow.\n\nBest regards"
        ),
        ReplyKind::ProposeAlternatives => format!(
            "Hi,\n\nThank you for your message. The requested times are not available, but these would work:\n\n{SLOT_PLACEHOLDER}\n\nPlease let me know which suits you.\n\nBest regards"
        ),
        ReplyKind::RequestMoreOptions => "Hi,\n\nThank you for your message. None of the requested times are available. Could you suggest a few other options?\n\nBest regards".to_string(),
    }
}

/// Substitute the slot list into the model's prose, appending it when the
/// placeholder is missing. Extra placeholders are removed.
pub fn render_body(prose: &str, slot_lines: &[String]) -> String {
    let block = slot_lines.iter().map(|line| format!("- {line}")).collect::<Vec<_>>().join("\n");
    if prose.contains(SLOT_PLACEHOLDER) {
        return prose.replacen(SLOT_PLACEHOLDER, &block, 1).replace(SLOT_PLACEHOLDER, "").trim_end().to_string();
    }
    let prose = prose.trim_end();
    if block.is_empty() {
        prose.to_string()
    } else {
        format!("{prose}\n\n{block}")
    }
}

/// Reply subject with a single `Re:` prefix.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.get(..3).is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else if trimmed.is_empty() {
        "Re: scheduling".to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// `References` header for the reply: the original chain plus its id.
pub fn references(message: &RawMessage) -> Option<String> {
    match (&message.references, &message.rfc822_message_id) {
        (Some(chain), Some(id)) => Some(format!("{chain} {id}")),
        (None, Some(id)) => Some(id.clone()),
        (Some(chain), None) => Some(chain.clone()),
        (None, None) => None,
    }
}

/// Reply recipients as `(to, cc)`.
///
/// The mailbox owner sends the reply, so the owner and the assistant are left
/// out. When the owner wrote the original, everyone else goes in To;
/// otherwise the sender is in To and the rest in Cc. With nobody left the
/// reply goes back to the owner.
pub fn recipients(message: &RawMessage, owner: &str, assistant: &str) -> (Vec<String>, Vec<String>) {
    let owner = normalize_address(owner);
    let assistant = normalize_address(assistant);
    let sender = normalize_address(&message.from);
    let others: Vec<String> = message
        .participants()
        .into_iter()
        .filter(|address| Some(address) != owner.as_ref() && Some(address) != assistant.as_ref())
        .collect();

    let (to, cc) = match sender {
        Some(sender) if Some(&sender) != owner.as_ref() && Some(&sender) != assistant.as_ref() => {
            let cc = others.into_iter().filter(|address| *address != sender).collect();
            (vec![sender], cc)
        }
        _ => (others, Vec::new()),
    };

    if to.is_empty() {
        return (owner.into_iter().collect(), cc);
    }
    (to, cc)
}
