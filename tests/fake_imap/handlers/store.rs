//! STORE command handler.
//!
//! Only the `\Deleted` flag is tracked. Supports `+FLAGS`, `-FLAGS`
//! and `FLAGS`; the `.SILENT` forms suppress the untagged
//! `* N FETCH (FLAGS (...))` replies.

use super::sequence_numbers;
use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::flag::{Flag, StoreResponse, StoreType};
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Parsed STORE command arguments.
pub struct StoreArgs<'a> {
    pub sequence_set: &'a SequenceSet,
    pub kind: &'a StoreType,
    pub response: &'a StoreResponse,
    pub flags: &'a [Flag<'a>],
}

/// Handle the STORE command by sequence number.
pub async fn handle_store<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &StoreArgs<'_>,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let wants_deleted = args.flags.iter().any(|f| matches!(f, Flag::Deleted));

    // Check folder exists (quick lock, no await).
    let folder_exists = {
        let mb = mailbox.lock().unwrap();
        mb.get_folder(folder_name).is_some()
    };
    if !folder_exists {
        let resp = format!("{tag} BAD Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    // Mutate flags under lock (no await inside).
    let results = {
        let mut mb = mailbox.lock().unwrap();
        let folder = mb.get_folder_mut(folder_name).unwrap();

        let max = u32::try_from(folder.emails.len()).unwrap_or(u32::MAX);
        let mut results: Vec<(u32, bool)> = Vec::new();

        for seq in sequence_numbers(args.sequence_set, max) {
            let Some(email) = seq
                .checked_sub(1)
                .and_then(|idx| folder.emails.get_mut(idx as usize))
            else {
                continue;
            };
            match args.kind {
                StoreType::Add => email.deleted |= wants_deleted,
                StoreType::Remove => email.deleted &= !wants_deleted,
                StoreType::Replace => email.deleted = wants_deleted,
            }
            results.push((seq, email.deleted));
        }
        drop(mb);
        results
    };

    if !matches!(args.response, StoreResponse::Silent) {
        for (seq, deleted) in &results {
            let flags = if *deleted { "\\Deleted" } else { "" };
            let line = format!("* {seq} FETCH (FLAGS ({flags}))\r\n");
            if write_line(stream, &line).await.is_err() {
                return;
            }
        }
    }

    let resp = format!("{tag} OK STORE completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::single;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    async fn run_store(
        tag: &str,
        seq: &SequenceSet,
        kind: &StoreType,
        response: &StoreResponse,
        mailbox: &Mutex<Mailbox>,
        selected: Option<&str>,
    ) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        let args = StoreArgs {
            sequence_set: seq,
            kind,
            response,
            flags: &[Flag::Deleted],
        };
        handle_store(tag, &args, mailbox, selected, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn two_messages() -> Mutex<Mailbox> {
        Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(b"Subject: one\r\n\r\n1")
                .email(b"Subject: two\r\n\r\n2")
                .build(),
        )
    }

    #[tokio::test]
    #[allow(clippy::significant_drop_tightening)]
    async fn silent_add_flags_without_untagged_reply() {
        let mb = two_messages();

        let output = run_store(
            "A1",
            &single(2),
            &StoreType::Add,
            &StoreResponse::Silent,
            &mb,
            Some("INBOX"),
        )
        .await;

        assert_eq!(output, "A1 OK STORE completed\r\n");
        let locked = mb.lock().unwrap();
        let inbox = locked.get_folder("INBOX").unwrap();
        assert!(!inbox.emails[0].deleted);
        assert!(inbox.emails[1].deleted);
    }

    #[tokio::test]
    async fn answer_reports_flags() {
        let mb = two_messages();

        let output = run_store(
            "A1",
            &single(1),
            &StoreType::Add,
            &StoreResponse::Answer,
            &mb,
            Some("INBOX"),
        )
        .await;

        assert!(output.contains("* 1 FETCH (FLAGS (\\Deleted))"));
    }

    #[tokio::test]
    async fn remove_clears_flag() {
        let mb = two_messages();
        mb.lock().unwrap().get_folder_mut("INBOX").unwrap().emails[0].deleted = true;

        run_store(
            "A1",
            &single(1),
            &StoreType::Remove,
            &StoreResponse::Silent,
            &mb,
            Some("INBOX"),
        )
        .await;

        assert!(!mb.lock().unwrap().get_folder("INBOX").unwrap().emails[0].deleted);
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mb = two_messages();

        let output = run_store(
            "A1",
            &single(1),
            &StoreType::Add,
            &StoreResponse::Silent,
            &mb,
            None,
        )
        .await;

        assert!(output.contains("A1 BAD No folder selected"));
    }
}
