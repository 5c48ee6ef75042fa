//! Incremental sync planning.
//!
//! Compares freshly chunked records of one source against the store's
//! `filename → fingerprint` pairs and works out the minimal change set.
//! Executing the plan (embedding in batches, deleting, upserting) is the
//! app crate's job.
//!
//! A record is unchanged when a stored record with the same filename has
//! an equal fingerprint. Every stored record that is not part of the fresh
//! set is stale: if its parent document was scanned it is deleted by key,
//! and if the parent document disappeared entirely the whole family is
//! removed by prefix (when pruning is enabled).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::models::{family_root, CandidateRecord};

/// What one sync run has to do for a single source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// New or changed records, in scan order.
    pub upserts: Vec<CandidateRecord>,
    /// Stale records of documents that are still present.
    pub deletes: Vec<String>,
    /// Documents no longer present in the scan.
    pub removed_parents: Vec<String>,
    /// Records whose fingerprint matched.
    pub unchanged: usize,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty() && self.removed_parents.is_empty()
    }
}

impl fmt::Display for SyncPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to write, {} unchanged, {} stale, {} removed documents",
            self.upserts.len(),
            self.unchanged,
            self.deletes.len(),
            self.removed_parents.len()
        )
    }
}

/// Diff `fresh` against `existing`.
///
/// Applying the returned plan and planning again with the same input
/// yields an empty plan.
pub fn plan(
    fresh: Vec<CandidateRecord>,
    existing: &HashMap<String, String>,
    prune_missing: bool,
) -> SyncPlan {
    let fresh_names: HashSet<&str> = fresh.iter().map(|r| r.filename.as_str()).collect();
    let fresh_roots: HashSet<&str> = fresh.iter().map(|r| r.family_root()).collect();

    let mut deletes = BTreeSet::new();
    let mut removed = BTreeSet::new();
    for filename in existing.keys() {
        if fresh_names.contains(filename.as_str()) {
            continue;
        }
        let root = family_root(filename);
        if fresh_roots.contains(root) {
            deletes.insert(filename.clone());
        } else if prune_missing {
            removed.insert(root.to_string());
        }
    }

    let mut plan = SyncPlan {
        deletes: deletes.into_iter().collect(),
        removed_parents: removed.into_iter().collect(),
        ..Default::default()
    };
    for record in fresh {
        match existing.get(&record.filename) {
            Some(fp) if *fp == record.fingerprint => plan.unchanged += 1,
            _ => plan.upserts.push(record),
        }
    }
    plan
}
