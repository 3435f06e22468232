//! In-process fake IMAP server for integration testing
//!
//! ## Connection lifecycle
//!
//! ```text
//!   STARTTLS mode                      implicit TLS mode
//!   -------------                      -----------------
//!   TCP connect                        TCP connect
//!   "* OK ... ready"                   TLS handshake
//!   A0001 STARTTLS                     "* OK ... ready"
//!   TLS handshake
//!                 \                   /
//!                  LOGIN -> SELECT -> FETCH / STORE -> EXPUNGE -> LOGOUT
//! ```
//!
//! ## Sequence numbers
//!
//! The relay addresses messages by sequence number, the 1-based
//! position in the selected folder. `STORE n +FLAGS.SILENT (\Deleted)`
//! only flags a message, so numbers stay put until EXPUNGE:
//!
//! ```text
//!   Client:  A0004 STORE 1 +FLAGS.SILENT (\Deleted)
//!   Server:  A0004 OK STORE completed
//!   Client:  A0005 FETCH 2 (FLAGS BODY.PEEK[])
//!   Server:  * 2 FETCH (FLAGS () BODY[] {1234}
//!            <exactly 1234 bytes of raw RFC 5322 message>
//!            )
//!   Server:  A0005 OK FETCH completed
//!   Client:  A0006 EXPUNGE
//!   Server:  * 1 EXPUNGE
//!   Server:  A0006 OK EXPUNGE completed
//! ```

use super::handlers::{
    StoreArgs, handle_expunge, handle_fetch, handle_login, handle_logout, handle_select,
    handle_store,
};
use super::io::write_line;
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

const GREETING: &str = "* OK IMAP4rev1 Fake server ready\r\n";

/// How clients are expected to secure the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Security {
    StartTls,
    Implicit,
}

/// A fake IMAP server that runs on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup using
/// `rcgen`, so clients must be configured to accept invalid
/// certificates.
pub struct FakeImapServer {
    port: u16,
    mailbox: Arc<Mutex<Mailbox>>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a server that expects STARTTLS on the plain connection.
    pub async fn start(mailbox: Mailbox) -> Self {
        Self::spawn(mailbox, Security::StartTls).await
    }

    /// Start a server that speaks TLS from the first byte.
    pub async fn start_implicit(mailbox: Mailbox) -> Self {
        Self::spawn(mailbox, Security::Implicit).await
    }

    async fn spawn(mailbox: Mailbox, security: Security) -> Self {
        // Multiple tests may race to install the provider; the error
        // just means it is already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let mailbox = Arc::new(Mutex::new(mailbox));
        let shared = mailbox.clone();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let mailbox = shared.clone();
                tokio::spawn(async move {
                    handle_connection(stream, acceptor, security, &mailbox).await;
                });
            }
        });

        Self {
            port,
            mailbox,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Snapshot of the server-side mailbox state.
    pub fn mailbox(&self) -> Mailbox {
        self.mailbox.lock().unwrap().clone()
    }
}

/// Handle a single IMAP client connection up to the authenticated
/// command loop.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    acceptor: TlsAcceptor,
    security: Security,
    mailbox: &Mutex<Mailbox>,
) {
    let tcp = match security {
        Security::Implicit => stream,
        Security::StartTls => {
            let mut reader = BufReader::new(stream);
            if write_line(&mut reader, GREETING).await.is_err() {
                return;
            }

            let mut line = String::new();
            if reader.read_line(&mut line).await.is_err() {
                return;
            }
            let parts: Vec<&str> = line.trim().splitn(2, ' ').collect();
            if parts.len() < 2 {
                return;
            }
            let tag = parts[0];
            if !parts[1].eq_ignore_ascii_case("STARTTLS") {
                let resp = format!("{tag} BAD Expected STARTTLS\r\n");
                let _ = write_line(&mut reader, &resp).await;
                return;
            }
            let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                return;
            }
            reader.into_inner()
        }
    };

    let Ok(tls_stream) = acceptor.accept(tcp).await else {
        return;
    };

    let mut reader = BufReader::new(tls_stream);
    if security == Security::Implicit && write_line(&mut reader, GREETING).await.is_err() {
        return;
    }

    handle_imap_session(reader, mailbox).await;
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Run the authenticated IMAP command loop.
///
/// Read handlers receive a snapshot (`Mailbox` clone) taken under
/// lock. Write handlers receive `&Mutex<Mailbox>` and lock briefly
/// to mutate state.
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    mut reader: BufReader<S>,
    mailbox: &Mutex<Mailbox>,
) {
    let mut selected_folder: Option<String> = None;
    let codec = CommandCodec::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Ok((_, command)) = codec.decode(line.as_bytes()) else {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            let resp = format!("{tag} BAD Parse error\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };

        let tag = command.tag.inner();
        let snap = mailbox.lock().unwrap().clone();

        match command.body {
            CommandBody::Login { .. } => {
                if !handle_login(tag, snap.accept_login, &mut reader).await {
                    break;
                }
            }
            CommandBody::Select { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                selected_folder = handle_select(tag, &name, &snap, &mut reader).await;
            }
            CommandBody::Fetch {
                sequence_set,
                uid: false,
                ..
            } => {
                handle_fetch(
                    tag,
                    &sequence_set,
                    &snap,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Store {
                ref sequence_set,
                uid: false,
                ref kind,
                ref response,
                ref flags,
                ..
            } => {
                let args = StoreArgs {
                    sequence_set,
                    kind,
                    response,
                    flags,
                };
                handle_store(
                    tag,
                    &args,
                    mailbox,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Expunge => {
                handle_expunge(tag, mailbox, selected_folder.as_deref(), &mut reader).await;
            }
            CommandBody::Logout => {
                handle_logout(tag, &mut reader).await;
                break;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}
