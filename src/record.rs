//! Parsed alert messages
//!
//! A [`NotificationRecord`] is what the dispatcher filters on and what
//! gets rendered for the chat destination. Records are built once by
//! the extractor and never modified afterwards.

use chrono::DateTime;
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::fmt;

/// The fields recovered from an alert body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Inbox,
    Sender,
    Subject,
    Date,
}

impl Field {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Sender => "sender",
            Self::Subject => "subject",
            Self::Date => "date",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One alert, as extracted from a mailbox message.
///
/// `id` is the sequence id the message had when it was listed and is
/// the id used to delete it. Fields that could not be extracted read
/// back as the configured placeholder and are listed in
/// [`unparsed`](Self::unparsed).
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRecord {
    pub(crate) id: u32,
    pub(crate) inbox: Option<String>,
    pub(crate) sender_name: Option<String>,
    pub(crate) sender_email: Option<String>,
    pub(crate) subject: Option<String>,
    pub(crate) timestamp: Option<DateTime<Tz>>,
    pub(crate) unparsed: BTreeSet<Field>,
    pub(crate) placeholder: String,
}

impl NotificationRecord {
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// The inbox the alert was received at, or the placeholder.
    #[must_use]
    pub fn inbox(&self) -> &str {
        self.inbox.as_deref().unwrap_or(&self.placeholder)
    }

    /// Display name of the original sender. `None` when the alert only
    /// carried an address.
    #[must_use]
    pub fn sender_name(&self) -> Option<&str> {
        self.sender_name.as_deref()
    }

    /// Address of the original sender, or the placeholder.
    #[must_use]
    pub fn sender_email(&self) -> &str {
        self.sender_email.as_deref().unwrap_or(&self.placeholder)
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or(&self.placeholder)
    }

    /// When the alerted message was sent, in the target timezone.
    #[must_use]
    pub const fn timestamp(&self) -> Option<&DateTime<Tz>> {
        self.timestamp.as_ref()
    }

    /// Fields that fell back to the placeholder.
    #[must_use]
    pub const fn unparsed(&self) -> &BTreeSet<Field> {
        &self.unparsed
    }

    #[must_use]
    pub fn is_parsed(&self, field: Field) -> bool {
        !self.unparsed.contains(&field)
    }

    /// Whether the alert was received at exactly `target`.
    ///
    /// An unresolved inbox never matches, even if `target` happens to
    /// equal the placeholder.
    #[must_use]
    pub fn received_at(&self, target: &str) -> bool {
        self.inbox.as_deref() == Some(target)
    }

    /// Sender as `Name <address>`, or the bare address.
    #[must_use]
    pub fn from(&self) -> String {
        match self.sender_name() {
            Some(name) => format!("{name} <{}>", self.sender_email()),
            None => self.sender_email().to_string(),
        }
    }

    /// Date in the target timezone as a locale-style timestamp.
    #[must_use]
    pub fn date(&self) -> String {
        self.timestamp.as_ref().map_or_else(
            || self.placeholder.clone(),
            |ts| ts.format("%c").to_string(),
        )
    }

    /// Render the labeled text block sent to the chat destination.
    ///
    /// Values are escaped for Telegram's legacy Markdown.
    #[must_use]
    pub fn render(&self, include_inbox: bool) -> String {
        let mut text = format!(
            "*From*: {}\n*Subject*: {}\n*Date*: {}",
            escape_markdown(&self.from()),
            escape_markdown(self.subject()),
            escape_markdown(&self.date()),
        );
        if include_inbox {
            text.push_str("\n*Inbox*: ");
            text.push_str(&escape_markdown(self.inbox()));
        }
        text
    }
}

impl fmt::Display for NotificationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} ({})", self.id, self.subject(), self.sender_email())
    }
}

/// Escape the characters Telegram's legacy Markdown treats as markup.
#[must_use]
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
