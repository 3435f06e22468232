//! Poll-cycle dispatcher
//!
//! For every configured mailbox, in order, one session is opened and
//! each message is taken through
//!
//! ```text
//! FETCHED -> PARSED -> FILTERED -> NOTIFIED -> DELETED
//!              |          |           |
//!        PARSE_FAILED FILTERED_OUT NOTIFY_FAILED
//! ```
//!
//! in ascending sequence-id order. A message is deleted only when it
//! parsed, passed the inbox filter, and was either delivered or not
//! meant to be delivered. Everything else stays in the mailbox for the
//! next run or for a human.
//!
//! Parse and delivery failures are local to one message. Any other
//! error ends the mailbox's cycle; the session is still closed before
//! the error is reported.

use crate::config::{Config, MailboxConfig};
use crate::error::Result;
use crate::extract::FieldExtractor;
use crate::notifier::Notifier;
use crate::transport::{Connector, RawMessage, Transport};
use std::fmt;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Where one message's trip through the pipeline ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Already marked deleted by another client; left alone.
    Skipped,
    /// No usable body; retained.
    ParseFailed,
    /// Received at a different inbox than the mailbox's target; retained.
    FilteredOut,
    /// The destination did not accept the alert; retained.
    NotifyFailed,
    /// Handled, but deletion is disabled.
    Retained { notified: bool },
    /// Handled and marked for deletion.
    Deleted { notified: bool },
}

impl Outcome {
    #[must_use]
    pub const fn is_notified(self) -> bool {
        matches!(
            self,
            Self::Retained { notified: true } | Self::Deleted { notified: true }
        )
    }
}

/// Tally of one mailbox cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub listed: u32,
    pub skipped: u32,
    pub parse_failed: u32,
    pub filtered_out: u32,
    pub notify_failed: u32,
    pub notified: u32,
    pub retained: u32,
    pub deleted: u32,
}

impl CycleReport {
    fn record(&mut self, outcome: Outcome) {
        if outcome.is_notified() {
            self.notified += 1;
        }
        match outcome {
            Outcome::Skipped => self.skipped += 1,
            Outcome::ParseFailed => self.parse_failed += 1,
            Outcome::FilteredOut => self.filtered_out += 1,
            Outcome::NotifyFailed => self.notify_failed += 1,
            Outcome::Retained { .. } => self.retained += 1,
            Outcome::Deleted { .. } => self.deleted += 1,
        }
    }

    /// Messages left in the mailbox after this cycle.
    #[must_use]
    pub const fn kept(&self) -> u32 {
        self.listed - self.deleted
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} listed, {} skipped, {} notified, {} deleted, {} parse failed, {} filtered out, {} notify failed",
            self.listed,
            self.skipped,
            self.notified,
            self.deleted,
            self.parse_failed,
            self.filtered_out,
            self.notify_failed
        )
    }
}

/// Results of a full run, one entry per mailbox in configuration order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub mailboxes: Vec<(String, Result<CycleReport>)>,
}

impl RunReport {
    /// Whether any mailbox cycle was abandoned.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.mailboxes.iter().any(|(_, result)| result.is_err())
    }

    /// Sum of all completed cycles.
    #[must_use]
    pub fn total(&self) -> CycleReport {
        self.mailboxes
            .iter()
            .filter_map(|(_, result)| result.as_ref().ok())
            .fold(CycleReport::default(), |mut acc, r| {
                acc.listed += r.listed;
                acc.skipped += r.skipped;
                acc.parse_failed += r.parse_failed;
                acc.filtered_out += r.filtered_out;
                acc.notify_failed += r.notify_failed;
                acc.notified += r.notified;
                acc.retained += r.retained;
                acc.deleted += r.deleted;
                acc
            })
    }
}

/// Runs poll cycles over configured mailboxes.
pub struct Dispatcher<C, N> {
    connector: C,
    notifier: N,
    extractor: FieldExtractor,
    notify: bool,
    delete: bool,
    include_inbox: bool,
}

impl<C: Connector, N: Notifier> Dispatcher<C, N> {
    /// Build a dispatcher from the run configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Config`](crate::Error::Config) if the timezone is unknown.
    pub fn new(connector: C, notifier: N, config: &Config) -> Result<Self> {
        Ok(Self {
            connector,
            notifier,
            extractor: FieldExtractor::from_config(config)?,
            notify: config.notify,
            delete: config.delete,
            include_inbox: config.include_inbox,
        })
    }

    /// Run one cycle per mailbox, sequentially.
    ///
    /// A failed mailbox does not stop the others.
    pub async fn dispatch(&self, mailboxes: &[MailboxConfig]) -> RunReport {
        let mut report = RunReport::default();
        for mailbox in mailboxes {
            let label = mailbox.label();
            let result = self
                .dispatch_mailbox(mailbox)
                .instrument(info_span!("mailbox", name = %label))
                .await;
            match &result {
                Ok(cycle) => info!("Mailbox {}: {}", label, cycle),
                Err(e) => error!("Mailbox {} abandoned: {}", label, e),
            }
            report.mailboxes.push((label, result));
        }
        report
    }

    /// Run one cycle over a single mailbox.
    ///
    /// The session is closed on every path once it has been opened.
    ///
    /// # Errors
    ///
    /// Connection failures and any failing mailbox command.
    pub async fn dispatch_mailbox(&self, mailbox: &MailboxConfig) -> Result<CycleReport> {
        let mut session = self.connector.open(mailbox).await?;

        let drained = self.drain(&mut session, mailbox).await;
        let closed = session.close().await;

        let report = drained?;
        closed?;
        Ok(report)
    }

    async fn drain(&self, session: &mut C::Session, mailbox: &MailboxConfig) -> Result<CycleReport> {
        let mut report = CycleReport {
            listed: session.count().await?,
            ..CycleReport::default()
        };
        info!("{} message(s) to process", report.listed);

        // Ids are fixed by the listing; deletions do not renumber within a session.
        for id in 1..=report.listed {
            let outcome = match session.retrieve(id).await? {
                Some(raw) => self.process(session, mailbox, &raw).await?,
                None => Outcome::Skipped,
            };
            debug!("Message #{} -> {:?}", id, outcome);
            report.record(outcome);
        }
        Ok(report)
    }

    async fn process(
        &self,
        session: &mut C::Session,
        mailbox: &MailboxConfig,
        raw: &RawMessage,
    ) -> Result<Outcome> {
        let record = match self.extractor.parse(raw, mailbox.required_inbox()) {
            Ok(record) => record,
            Err(e) => {
                warn!("Message #{} kept, cannot be parsed: {}", raw.id, e);
                return Ok(Outcome::ParseFailed);
            }
        };

        if let Some(target) = mailbox.inbox.as_deref()
            && !record.received_at(target)
        {
            warn!(
                "Message #{} kept, received at {} instead of {}",
                record.id(),
                record.inbox(),
                target
            );
            return Ok(Outcome::FilteredOut);
        }

        let notified = if self.notify {
            let text = record.render(self.include_inbox);
            if let Err(e) = self.notifier.send(&mailbox.chat_id, &text).await {
                error!("Message #{} kept, notification failed: {}", record.id(), e);
                return Ok(Outcome::NotifyFailed);
            }
            true
        } else {
            false
        };

        if !self.delete {
            info!("Message {} handled, deletion disabled", record);
            return Ok(Outcome::Retained { notified });
        }

        session.delete(record.id()).await?;
        info!("Message {} deleted", record);
        Ok(Outcome::Deleted { notified })
    }
}
