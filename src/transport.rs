//! Mailbox sessions
//!
//! The dispatcher only needs a handful of operations from a mailbox:
//! how many messages it holds, the raw lines of one message, marking
//! one for deletion, and closing the session. [`Connector`] opens such
//! a session for a configured mailbox, [`Transport`] is the session.
//!
//! Sequence ids are 1-based positions in the listing taken when the
//! session was opened and stay valid until [`Transport::close`], even
//! after deletions.

use crate::config::MailboxConfig;
use crate::connection::{self, ImapSession};
use crate::error::{Error, Result};
use async_imap::types::Flag;
use futures::{StreamExt, TryStreamExt};
use std::future::Future;
use tracing::{debug, info, warn};

/// A message as returned by the mailbox, before any parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: u32,
    pub lines: Vec<Vec<u8>>,
}

impl RawMessage {
    /// Split a raw RFC 5322 message into lines, dropping line endings.
    #[must_use]
    pub fn from_bytes(id: u32, raw: &[u8]) -> Self {
        let mut lines: Vec<Vec<u8>> = raw
            .split(|b| *b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
            .collect();
        if raw.ends_with(b"\n") {
            lines.pop();
        }
        Self { id, lines }
    }

    /// Re-join the lines with CRLF.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.lines.join(&b"\r\n"[..])
    }

    /// Unfolded value of the first header named `name`
    /// (case-insensitive), looking only at the header block.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        let mut value: Option<String> = None;
        for line in &self.lines {
            if line.is_empty() {
                break;
            }
            let text = String::from_utf8_lossy(line);
            if let Some(current) = value.as_mut() {
                if text.starts_with([' ', '\t']) {
                    current.push(' ');
                    current.push_str(text.trim());
                    continue;
                }
                break;
            }
            if let Some((key, rest)) = text.split_once(':')
                && key.trim().eq_ignore_ascii_case(name)
            {
                value = Some(rest.trim().to_string());
            }
        }
        value
    }
}

/// An open mailbox session.
pub trait Transport: Send {
    /// Number of messages in the session's listing.
    fn count(&mut self) -> impl Future<Output = Result<u32>> + Send;

    /// Raw lines of message `id`, or `None` if the message already
    /// carries a deletion mark from elsewhere.
    fn retrieve(&mut self, id: u32) -> impl Future<Output = Result<Option<RawMessage>>> + Send;

    /// Mark message `id` for deletion.
    fn delete(&mut self, id: u32) -> impl Future<Output = Result<()>> + Send;

    /// End the session, committing the deletions made through it.
    fn close(self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens [`Transport`] sessions for configured mailboxes.
pub trait Connector: Sync {
    type Session: Transport;

    /// # Errors
    ///
    /// [`Error::Connection`] if the mailbox cannot be reached, the
    /// login is refused, or the folder cannot be selected.
    fn open(&self, mailbox: &MailboxConfig) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// Connects to mailboxes over IMAP.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImapConnector;

impl Connector for ImapConnector {
    type Session = ImapTransport;

    async fn open(&self, mailbox: &MailboxConfig) -> Result<ImapTransport> {
        let mut session = connection::connect(mailbox).await?;
        let exists = match connection::select(&mut session, &mailbox.folder).await {
            Ok(exists) => exists,
            Err(e) => {
                session.logout().await.ok();
                return Err(e);
            }
        };
        info!("Selected {} ({} messages)", mailbox.folder, exists);
        Ok(ImapTransport {
            session,
            exists,
            flagged: false,
        })
    }
}

/// An IMAP session over one selected folder.
///
/// Deletion sets `\Deleted`; nothing is removed until [`close`]
/// expunges, so sequence ids hold for the whole session. A session
/// that flagged nothing never expunges.
///
/// [`close`]: Transport::close
pub struct ImapTransport {
    session: ImapSession,
    exists: u32,
    flagged: bool,
}

impl Transport for ImapTransport {
    async fn count(&mut self) -> Result<u32> {
        Ok(self.exists)
    }

    async fn retrieve(&mut self, id: u32) -> Result<Option<RawMessage>> {
        debug!("Retrieving message #{}", id);
        let mut messages = self
            .session
            .fetch(id.to_string(), "(FLAGS BODY.PEEK[])")
            .await
            .map_err(|e| Error::Imap(format!("Fetch #{id} failed: {e}")))?;

        let mut body = None;
        let mut deleted = false;
        while let Some(item) = messages.next().await {
            let fetch = item.map_err(|e| Error::Imap(format!("Fetch #{id} error: {e}")))?;
            deleted |= fetch.flags().any(|flag| matches!(flag, Flag::Deleted));
            if body.is_none() {
                body = fetch.body().map(<[u8]>::to_vec);
            }
        }
        drop(messages);

        if deleted {
            debug!("Message #{} is already marked deleted", id);
            return Ok(None);
        }
        body.map(|raw| Some(RawMessage::from_bytes(id, &raw)))
            .ok_or_else(|| Error::Imap(format!("No body found for message #{id}")))
    }

    async fn delete(&mut self, id: u32) -> Result<()> {
        debug!("Marking message #{} as deleted", id);
        let mut updates = self
            .session
            .store(id.to_string(), "+FLAGS.SILENT (\\Deleted)")
            .await
            .map_err(|e| Error::Imap(format!("Store #{id} failed: {e}")))?;
        while let Some(update) = updates.next().await {
            update.map_err(|e| Error::Imap(format!("Store #{id} error: {e}")))?;
        }
        self.flagged = true;
        Ok(())
    }

    async fn close(mut self) -> Result<()> {
        let expunged = if self.flagged {
            self.expunge().await
        } else {
            Ok(0)
        };

        if let Err(e) = self.session.logout().await {
            warn!("Logout failed: {}", e);
        }

        let expunged = expunged?;
        debug!("Session closed, {} message(s) expunged", expunged);
        Ok(())
    }
}

impl ImapTransport {
    async fn expunge(&mut self) -> Result<usize> {
        let expunged: Vec<_> = self
            .session
            .expunge()
            .await
            .map_err(|e| Error::Imap(format!("Expunge failed: {e}")))?
            .try_collect()
            .await
            .map_err(|e| Error::Imap(format!("Expunge error: {e}")))?;
        Ok(expunged.len())
    }
}
