//! IMAP command handlers for the fake server.
//!
//! Each handler lives in its own module and processes a single IMAP
//! command (LOGIN, SELECT, FETCH, STORE, EXPUNGE, LOGOUT).

mod login;
mod store;

pub use expunge::handle_expunge;
pub use fetch::handle_fetch;
pub use login::handle_login;
pub use logout::handle_logout;
pub use select::handle_select;
pub use store::{StoreArgs, handle_store};

use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};

/// Expand a sequence set into sequence numbers.
///
/// `*` stands for `max`, the highest sequence number in the folder.
fn sequence_numbers(seq_set: &SequenceSet, max: u32) -> Vec<u32> {
    let resolve = |s: &SeqOrUid| match s {
        SeqOrUid::Value(v) => v.get(),
        SeqOrUid::Asterisk => max,
    };

    let mut seqs = Vec::new();
    for seq in seq_set.0.as_ref() {
        match seq {
            Sequence::Single(s) => seqs.push(resolve(s)),
            Sequence::Range(a, b) => {
                let (lo, hi) = (resolve(a), resolve(b));
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                seqs.extend(lo..=hi);
            }
        }
    }
    seqs
}

#[cfg(test)]
pub(crate) fn single(seq: u32) -> SequenceSet {
    SequenceSet(
        vec![Sequence::Single(SeqOrUid::Value(
            std::num::NonZeroU32::new(seq).unwrap(),
        ))]
        .try_into()
        .unwrap(),
    )
}
