//! Raw RFC 5322 message → [`NormalizedMessage`].
//!
//! Never fails: anything that cannot be parsed falls back to an empty
//! string, or the current time for the date.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use mail_parser::{Message, MessageParser};
use tracing::debug;

use super::types::{NormalizedMessage, StoreRef};

/// Normalize one raw message. `store_ref` supplies the sequence hint when known.
pub fn normalize(raw: &[u8], store_ref: Option<StoreRef>) -> NormalizedMessage {
    let now = Utc::now();
    let sequence_hint = store_ref.map(|r| r.uid);

    let Some(parsed) = MessageParser::default().parse(raw) else {
        debug!(uid = ?sequence_hint, "Unparsable message, using default fields");
        return NormalizedMessage {
            id: None,
            from_address: String::new(),
            subject: String::new(),
            body: String::new(),
            received_at: now,
            sequence_hint,
        };
    };

    let received_at = parsed
        .date()
        .and_then(checked_date)
        .unwrap_or_else(|| {
            debug!(uid = ?sequence_hint, "Missing or invalid Date header");
            now
        });

    NormalizedMessage {
        id: extract_message_id(&parsed),
        from_address: extract_from(&parsed),
        subject: parsed.subject().unwrap_or_default().to_string(),
        body: extract_text(&parsed),
        received_at,
        sequence_hint,
    }
}

/// Rebuild the header date through chrono so out-of-range fields
/// (`31 Feb`, `25:61:00`) are rejected instead of rolled forward.
fn checked_date(d: &mail_parser::DateTime) -> Option<DateTime<Utc>> {
    let local = NaiveDate::from_ymd_opt(i32::from(d.year), u32::from(d.month), u32::from(d.day))?
        .and_hms_opt(u32::from(d.hour), u32::from(d.minute), u32::from(d.second))?;
    let offset_secs = i32::from(d.tz_hour) * 3600 + i32::from(d.tz_minute) * 60;
    let offset = FixedOffset::east_opt(if d.tz_before_gmt { -offset_secs } else { offset_secs })?;
    offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Message-ID in header form (`<...>`), which is what `In-Reply-To` carries.
fn extract_message_id(parsed: &Message) -> Option<String> {
    parsed
        .message_id()
        .map(|id| id.trim().trim_matches(['<', '>']))
        .filter(|id| !id.is_empty())
        .map(|id| format!("<{id}>"))
}

/// `Name <address>` for the first From mailbox, best effort.
fn extract_from(parsed: &Message) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return String::new();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) if !name.trim().is_empty() => format!("{name} <{address}>"),
        (_, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => String::new(),
    }
}

/// Plain text body, falling back to tag-stripped HTML.
fn extract_text(parsed: &Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.into_owned();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Readable text for an HTML-only body: tags dropped, whitespace collapsed.
fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut inside_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => inside_tag = true,
            '>' if inside_tag => inside_tag = false,
            _ if !inside_tag => text.push(ch),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
