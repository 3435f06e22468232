//! Monitoring alert relay
//!
//! Polls IMAP mailboxes for forwarded monitoring alerts, recovers the
//! original inbox, sender, subject and date from the free-form alert
//! body, and posts a short summary to a Telegram chat. A message is
//! removed from the mailbox only once it has been handled; anything
//! that cannot be parsed, belongs to another inbox or could not be
//! delivered stays put for the next run.
//!
//! ```no_run
//! # async fn run() -> alertmail::Result<()> {
//! use alertmail::{Config, Dispatcher, ImapConnector, TelegramNotifier};
//!
//! let config = Config::load(None)?;
//! let notifier = TelegramNotifier::new(&config.telegram)?;
//! let dispatcher = Dispatcher::new(ImapConnector, notifier, &config)?;
//! let report = dispatcher.dispatch(&config.mailboxes).await;
//! assert!(!report.has_failures());
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
pub mod decode;
mod dispatch;
mod error;
mod extract;
mod notifier;
mod record;
mod transport;

pub use config::{Config, LogRotation, MailboxConfig, TelegramConfig, TlsMode};
pub use decode::DecodeError;
pub use dispatch::{CycleReport, Dispatcher, Outcome, RunReport};
pub use error::{Error, Result};
pub use extract::FieldExtractor;
pub use notifier::{ConsoleNotifier, Notifier, TelegramNotifier};
pub use record::{Field, NotificationRecord, escape_markdown};
pub use transport::{Connector, ImapConnector, ImapTransport, RawMessage, Transport};
