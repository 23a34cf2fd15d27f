//! Conflict partitioning
//!
//! Compares the pre-edit snapshot against the rows currently stored, by
//! identifier. Kept free of I/O so it can be tested and benchmarked on its own.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Outcome of comparing a snapshot against current storage
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictReport<R> {
    /// Current rows inserted or modified since the snapshot
    pub conflicting: Vec<R>,
    /// Snapshot rows that vanished but are still in the working set
    pub deleted: Vec<R>,
}

impl<R> ConflictReport<R> {
    /// Whether neither kind of conflict was found
    pub fn is_clean(&self) -> bool {
        self.conflicting.is_empty() && self.deleted.is_empty()
    }
}

/// Partition `current` rows against the `pre_edit` snapshot
///
/// * a current row whose identifier is not in the snapshot was inserted
///   concurrently and conflicts;
/// * a matched row conflicts when both sides carry a last-update time and the
///   current one is strictly newer;
/// * a snapshot row missing from `current` conflicts as deleted only when its
///   identifier is still present in `working`.
pub fn partition_conflicts<R, I, T>(
    pre_edit: &[R],
    current: &[R],
    working: &[R],
    identifier: I,
    last_update_time: T,
) -> ConflictReport<R>
where
    R: Clone,
    I: Fn(&R) -> String,
    T: Fn(&R) -> Option<DateTime<Utc>>,
{
    let snapshot: HashMap<String, &R> = pre_edit.iter().map(|r| (identifier(r), r)).collect();

    let mut conflicting = Vec::new();
    let mut current_ids = HashSet::with_capacity(current.len());
    for row in current {
        let id = identifier(row);
        match snapshot.get(&id) {
            None => conflicting.push(row.clone()),
            Some(&before) => {
                if let (Some(then), Some(now)) = (last_update_time(before), last_update_time(row)) {
                    if now > then {
                        conflicting.push(row.clone());
                    }
                }
            }
        }
        current_ids.insert(id);
    }

    let working_ids: HashSet<String> = working.iter().map(&identifier).collect();
    let deleted = pre_edit
        .iter()
        .filter(|r| {
            let id = identifier(*r);
            !current_ids.contains(&id) && working_ids.contains(&id)
        })
        .cloned()
        .collect();

    ConflictReport {
        conflicting,
        deleted,
    }
}
