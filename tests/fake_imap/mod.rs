//! Fake IMAP server for integration testing
//!
//! An in-process IMAP server that speaks enough of the protocol for
//! the relay's mailbox sessions:
//!
//! TCP -> greeting -> STARTTLS -> TLS handshake -> LOGIN -> SELECT ->
//! FETCH / STORE -> EXPUNGE -> LOGOUT
//!
//! or, for implicit TLS, the handshake first and the greeting after.
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and connection dispatch
//! - `handlers/` -- one file per IMAP command
//! - `mailbox` -- test data model (folders, messages, builder)
//! - `io` -- shared write helpers

mod handlers;
mod server;

pub use mailbox::MailboxBuilder;
pub use server::FakeImapServer;
