//! Merge of the previously cached entries with a fresh fetch.
//!
//! The result keeps entries that disappeared from the feed for one more render
//! (flagged `to_remove`) and puts entries that just appeared at the top
//! (flagged `is_new`), so the template can animate both without tracking any
//! history itself.

use std::collections::HashSet;

use crate::entry::{entry_identity, Entry, RenderEntry};

/// Output of [`reconcile`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Snapshot to store for the next cycle: `fresh[..max_count]`, unflagged.
    pub to_cache: Vec<Entry>,
    /// New entries first, then every previous entry in its cached order.
    pub to_render: Vec<RenderEntry>,
}

/// Compare `fresh` against `previous` and build the render sequence.
///
/// `fresh` is truncated to `max_count` before anything is compared, so entries
/// past the limit are neither cached nor flagged. A new identity that occurs
/// several times in `fresh` is rendered once, at its first position.
pub fn reconcile(previous: &[Entry], fresh: &[Entry], max_count: usize) -> Reconciliation {
    let fresh = &fresh[..fresh.len().min(max_count)];

    let previous_set: HashSet<String> = previous.iter().map(entry_identity).collect();
    let fresh_set: HashSet<String> = fresh.iter().map(entry_identity).collect();

    let mut to_render = Vec::with_capacity(previous.len() + fresh.len());

    let mut inserted = HashSet::new();
    for e in fresh {
        let id = entry_identity(e);
        if !previous_set.contains(&id) && inserted.insert(id) {
            to_render.push(RenderEntry::new_arrival(e.clone()));
        }
    }

    to_render.extend(previous.iter().map(|e| {
        let gone = !fresh_set.contains(&entry_identity(e));
        RenderEntry::known(e.clone(), gone)
    }));

    Reconciliation {
        to_cache: fresh.to_vec(),
        to_render,
    }
}
