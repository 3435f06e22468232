//! Error types for alertmail

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The mailbox session could not be opened (TCP, TLS, LOGIN or
    /// SELECT). Fatal for that mailbox's cycle.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A command failed inside an open session.
    #[error("IMAP error: {0}")]
    Imap(String),

    /// The message has no usable textual payload.
    #[error("Structural parse error: {0}")]
    Parse(String),

    /// The chat destination rejected or never received the message.
    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),
}

pub type Result<T> = std::result::Result<T, Error>;
