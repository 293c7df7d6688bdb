//! # log
//!
//! why: manage the append-only log of commands that raft replicates
//! relations: used by node.rs for replication and vote checks, carried inside message.rs
//! what: LogEntry struct, 1-indexed lookups, up-to-date check, conflict-aware merge

use serde::{Deserialize, Serialize};

use crate::{Index, Term};

/// A single entry in the replicated log
///
/// Entries do not carry their own index: position in the log is the index,
/// starting at 1. Index 0 means "before the first entry" and has term 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The command to be applied to the state machine
    pub data: String,
    /// The term when this entry was created by a leader
    pub term: Term,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(data: impl Into<String>, term: Term) -> Self {
        Self {
            data: data.into(),
            term,
        }
    }
}

/// index of the last entry, 0 for an empty log
pub fn last_index(log: &[LogEntry]) -> Index {
    log.len() as Index
}

/// term of the last entry, 0 for an empty log
pub fn last_term(log: &[LogEntry]) -> Term {
    log.last().map(|e| e.term).unwrap_or(0)
}

/// Term stored at `index`, or 0 when the index is outside the log.
pub fn term_at(log: &[LogEntry], index: Index) -> Term {
    entry_at(log, index).map(|e| e.term).unwrap_or(0)
}

pub fn entry_at(log: &[LogEntry], index: Index) -> Option<&LogEntry> {
    if index == 0 {
        return None;
    }
    log.get((index - 1) as usize)
}

/// Entries in the index range `(after, up_to]`, clamped to the log bounds.
pub fn slice(log: &[LogEntry], after: Index, up_to: Index) -> Vec<LogEntry> {
    let start = (after as usize).min(log.len());
    let end = (up_to as usize).min(log.len());
    if start >= end {
        return Vec::new();
    }
    log[start..end].to_vec()
}

/// Whether a candidate whose log ends at (`last_log_index`, `last_log_term`)
/// is at least as up to date as `log`.
pub fn is_up_to_date(log: &[LogEntry], last_log_index: Index, last_log_term: Term) -> bool {
    let our_term = last_term(log);
    last_log_term > our_term || (last_log_term == our_term && last_log_index >= last_index(log))
}

/// Whether `log` holds an entry at `prev_log_index` with `prev_log_term`.
/// Index 0 always matches.
pub fn matches(log: &[LogEntry], prev_log_index: Index, prev_log_term: Term) -> bool {
    prev_log_index == 0
        || (prev_log_index <= last_index(log) && term_at(log, prev_log_index) == prev_log_term)
}

/// Merge `entries` into `log` starting right after `prev_log_index`.
///
/// Entries already present with the same term are kept. At the first index
/// whose term differs, the log is truncated from there on and the rest of
/// `entries` is appended. Returns the conflicting index and the term that was
/// discarded there, if any.
pub fn merge(
    log: &mut Vec<LogEntry>,
    prev_log_index: Index,
    entries: Vec<LogEntry>,
) -> Option<(Index, Term)> {
    let mut conflict = None;

    for (offset, entry) in entries.into_iter().enumerate() {
        let index = prev_log_index + offset as Index + 1;

        if index <= last_index(log) {
            let existing = term_at(log, index);
            if existing == entry.term {
                continue;
            }
            conflict = Some((index, existing));
            log.truncate((index - 1) as usize);
        }
        log.push(entry);
    }

    conflict
}
