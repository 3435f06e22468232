//! Field extraction from alert bodies
//!
//! Alert emails quote the original message's headers somewhere in a
//! free-form body, with formatting that varies between senders and
//! over time. Each field is resolved by an ordered list of patterns;
//! the first one that matches wins. A field that no pattern matches,
//! or whose text cannot be decoded, falls back to the placeholder
//! without affecting the others.
//!
//! Only a message with no usable body at all is rejected as a whole.

use crate::config::Config;
use crate::decode::{self, strip_soft_breaks};
use crate::error::{Error, Result};
use crate::record::{Field, NotificationRecord};
use crate::transport::RawMessage;
use chrono::DateTime;
use chrono_tz::Tz;
use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::debug;

/// Inbox patterns, most specific first.
const INBOX_PATTERNS: &[&str] = &[
    // "New message received at <alerts@example.com>." with an address-shaped token
    r"(?m)New message received at[ \t]*<?([^\s<>]+@[^\s<>]+?)>?\.?(?:[ \t\r]|$)",
    // anything up to the last period on the line
    r"(?m)^[ \t]*New message received at *(.*)\.",
];

/// How a sender pattern's captures map onto name and address.
#[derive(Debug, Clone, Copy)]
enum SenderShape {
    NameAndAddress,
    AddressOnly,
    Verbatim,
}

const SENDER_PATTERNS: &[(SenderShape, &str)] = &[
    (
        SenderShape::NameAndAddress,
        r"(?m)Sender:[ \t]*([^<\s][^<\r\n]*?)[ \t]*<([^<>\s]+)>",
    ),
    (SenderShape::AddressOnly, r"(?m)Sender:[ \t]*<([^<>\s]+)>"),
    (
        SenderShape::Verbatim,
        r"(?m)Sender:[ \t]*(.+?)[ \t]*(?:Subject:|Date:|To:|Cc:|$)",
    ),
];

const SUBJECT_PATTERNS: &[&str] = &[
    // own line, continued by soft breaks or folded lines
    r"(?m)^[ \t]*Subject:[ \t]*((?:[^\r\n]*=\r?\n|[^\r\n]*\r?\n[ \t]+)*[^\r\n]*)",
    // run together with the other labels
    r"(?m)Subject:[ \t]*(.+?)[ \t]*(?:Sender:|Date:|To:|Cc:|$)",
];

fn compiled(cell: &'static OnceLock<Vec<Regex>>, sources: &[&str]) -> &'static [Regex] {
    cell.get_or_init(|| {
        sources
            .iter()
            .map(|src| Regex::new(src).expect("valid field pattern"))
            .collect()
    })
}

fn inbox_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    compiled(&PATTERNS, INBOX_PATTERNS)
}

fn subject_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    compiled(&PATTERNS, SUBJECT_PATTERNS)
}

fn sender_patterns() -> &'static [(SenderShape, Regex)] {
    static PATTERNS: OnceLock<Vec<(SenderShape, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        SENDER_PATTERNS
            .iter()
            .map(|(shape, src)| (*shape, Regex::new(src).expect("valid sender pattern")))
            .collect()
    })
}

fn offset_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"[+-]\d{4}").expect("valid offset regex"))
}

/// A continuation line that starts the next quoted header.
fn next_label_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)\r?\n[ \t]*(?:Sender|Date|From|To|Cc|Subject):")
            .expect("valid label regex")
    })
}

fn fold_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\r?\n[ \t]+").expect("valid fold regex"))
}

fn first_match<'a>(patterns: &[Regex], body: &'a str) -> Option<Captures<'a>> {
    patterns.iter().find_map(|re| re.captures(body))
}

/// Builds [`NotificationRecord`]s from raw messages.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    timezone: Tz,
    placeholder: String,
}

impl FieldExtractor {
    #[must_use]
    pub fn new(timezone: Tz, placeholder: impl Into<String>) -> Self {
        Self {
            timezone,
            placeholder: placeholder.into(),
        }
    }

    /// Extractor for the configured timezone and placeholder.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.tz()?, config.placeholder.clone()))
    }

    /// Parse a raw mailbox message into a record.
    ///
    /// # Errors
    ///
    /// [`Error::Parse`] if the message has no plain-text or HTML body,
    /// or if `required_inbox` is set and the body does not mention it.
    /// Unmatched or undecodable fields are not errors.
    pub fn parse(&self, raw: &RawMessage, required_inbox: Option<&str>) -> Result<NotificationRecord> {
        debug!("Parsing message #{}", raw.id);
        let bytes = raw.to_bytes();
        let message = MessageParser::default()
            .parse(&bytes)
            .ok_or_else(|| Error::Parse(format!("Message #{} is not a MIME message", raw.id)))?;

        let body = select_body(&message)
            .ok_or_else(|| Error::Parse(format!("No body found in message #{}", raw.id)))?;

        if let Some(inbox) = required_inbox
            && !body.contains(inbox)
        {
            return Err(Error::Parse(format!(
                "Inbox «{inbox}» not found in body of message #{}",
                raw.id
            )));
        }

        Ok(self.extract(raw.id, &body, raw.header("Date").as_deref()))
    }

    /// Extract every field from an alert body and the message's raw
    /// `Date` header value.
    #[must_use]
    pub fn extract(&self, id: u32, body: &str, raw_date: Option<&str>) -> NotificationRecord {
        let mut unparsed = BTreeSet::new();

        let inbox = Self::extract_inbox(body);
        if inbox.is_none() {
            unparsed.insert(Field::Inbox);
        }

        let (sender_name, sender_email) = match extract_sender(body) {
            Some(SenderMatch { name: Ok(name), email }) => (name, Some(email)),
            Some(SenderMatch { name: Err(()), email }) => {
                unparsed.insert(Field::Sender);
                (Some(self.placeholder.clone()), Some(email))
            }
            None => {
                unparsed.insert(Field::Sender);
                (None, None)
            }
        };

        let subject = extract_subject(body);
        if subject.is_none() {
            unparsed.insert(Field::Subject);
        }

        let timestamp = raw_date.and_then(|raw| self.parse_date(raw));
        if timestamp.is_none() {
            unparsed.insert(Field::Date);
        }

        if !unparsed.is_empty() {
            debug!("Message #{} has unparsed fields: {:?}", id, unparsed);
        }

        NotificationRecord {
            id,
            inbox,
            sender_name,
            sender_email,
            subject,
            timestamp,
            unparsed,
            placeholder: self.placeholder.clone(),
        }
    }

    fn extract_inbox(body: &str) -> Option<String> {
        let caps = first_match(inbox_patterns(), body)?;
        decoded(Field::Inbox, &caps[1])
    }

    /// Resolve the `Date` header into the target timezone.
    ///
    /// Only the text up to the first numeric UTC offset is parsed, so
    /// trailing comments such as `(UTC)` are ignored.
    #[must_use]
    pub fn parse_date(&self, raw: &str) -> Option<DateTime<Tz>> {
        let offset = offset_regex().find(raw)?;
        let candidate = raw[..offset.end()].trim();

        DateTime::parse_from_rfc2822(candidate)
            .or_else(|_| DateTime::parse_from_str(candidate, "%a, %d %b %Y %H:%M:%S %z"))
            .or_else(|_| DateTime::parse_from_str(candidate, "%d %b %Y %H:%M:%S %z"))
            .ok()
            .map(|dt| dt.with_timezone(&self.timezone))
    }
}

/// A matched sender line. `name` is `Err` when the display name was
/// present but could not be decoded.
struct SenderMatch {
    name: std::result::Result<Option<String>, ()>,
    email: String,
}

fn extract_sender(body: &str) -> Option<SenderMatch> {
    sender_patterns().iter().find_map(|(shape, re)| {
        let caps = re.captures(body)?;
        match shape {
            SenderShape::NameAndAddress => {
                let raw_name = caps[1].trim().trim_matches('"').trim();
                let name = decode::decode(raw_name)
                    .map(|name| Some(name.trim().to_string()).filter(|n| !n.is_empty()))
                    .map_err(|e| debug!("Undecodable sender name {:?}: {}", raw_name, e));
                Some(SenderMatch {
                    name,
                    email: caps[2].to_string(),
                })
            }
            SenderShape::AddressOnly => Some(SenderMatch {
                name: Ok(None),
                email: caps[1].to_string(),
            }),
            SenderShape::Verbatim => {
                let text = caps[1].trim();
                (!text.is_empty()).then(|| SenderMatch {
                    name: Ok(None),
                    email: text.to_string(),
                })
            }
        }
    })
}

fn extract_subject(body: &str) -> Option<String> {
    let caps = first_match(subject_patterns(), body)?;
    let subject = &caps[1];
    let subject = next_label_regex()
        .find(subject)
        .map_or(subject, |label| &subject[..label.start()]);
    let unfolded = strip_soft_breaks(subject);
    let unfolded = fold_regex().replace_all(&unfolded, " ");
    decoded(Field::Subject, unfolded.trim())
}

/// Decode a captured fragment; empty or undecodable text is unparsed.
fn decoded(field: Field, fragment: &str) -> Option<String> {
    match decode::decode(fragment.trim()) {
        Ok(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        Err(e) => {
            debug!("Undecodable {} {:?}: {}", field, fragment, e);
            None
        }
    }
}

fn is_attachment(part: &MessagePart<'_>) -> bool {
    part.content_disposition()
        .is_some_and(|cd| cd.c_type.eq_ignore_ascii_case("attachment"))
}

/// The first inline plain-text part, else the first inline HTML part
/// converted to text.
fn select_body(message: &Message<'_>) -> Option<String> {
    let inline = || message.parts.iter().filter(|part| !is_attachment(part));

    let plain = inline().find_map(|part| match &part.body {
        PartType::Text(text) if !text.trim().is_empty() => Some(text.to_string()),
        _ => None,
    });

    plain.or_else(|| {
        inline().find_map(|part| match &part.body {
            PartType::Html(html) => {
                let text = html_to_text(html);
                (!text.is_empty()).then_some(text)
            }
            _ => None,
        })
    })
}

fn html_break_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</(?:p|div|tr|li|h[1-6])\s*>").expect("valid HTML break regex")
    })
}

fn html_tag_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("valid HTML tag regex"))
}

/// Convert an HTML alert body to plain text, one block per line.
fn html_to_text(html: &str) -> String {
    let text = html_break_regex().replace_all(html, "\n");
    let text = html_tag_regex().replace_all(&text, "");
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}
