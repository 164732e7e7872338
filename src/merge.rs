// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Merge coordinator: timestamp-based reconciliation of replicated records.
//!
//! The coordinator is type-agnostic. It orchestrates the ordered rules below
//! and delegates the "adopt remote" step to [`Record::merge_favor_other`],
//! which each entity implements for its own fields.
//!
//! ```text
//! remote absent ─────────────────────────────► Unchanged(RemoteAbsent)
//! kinds differ (AnyRecord only) ─────────────► Err(TypeMismatch)
//! local == remote ───────────────────────────► Unchanged(Identical)
//! local.ts == remote.ts, content differs ────► Err(MergeConflict)
//! local.ts absent ───────────────────────────► Adopted
//! remote.ts absent ──────────────────────────► Unchanged(RemoteUnstamped)
//! remote.ts <  local.ts ─────────────────────► Unchanged(LocalNewer)
//! remote.ts >  local.ts ─────────────────────► Adopted
//! ```
//!
//! A typed `&mut R` and `&R` can never alias, so the reference-identity
//! short-circuit is guaranteed by the borrow checker rather than tested at
//! runtime.
//!
//! This is last-writer-wins on wall-clock time. Two updates within the same
//! millisecond that disagree are reported, never arbitrated.

use crate::error::{BrokerError, Result};
use crate::record::{AnyRecord, Record};
use std::fmt;

/// Why a merge left the local record untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnchangedReason {
    /// No remote record was supplied.
    RemoteAbsent,
    /// Local and remote are fully equal.
    Identical,
    /// Remote carries no timestamp, so no freshness information.
    RemoteUnstamped,
    /// Local is strictly newer.
    LocalNewer,
    /// The identity was removed locally at or after the record's timestamp.
    Removed,
}

/// Result of merging a remote record into local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Local state kept as-is.
    Unchanged(UnchangedReason),
    /// Local record overwritten with every attribute of the remote.
    Adopted,
    /// No local counterpart existed; the remote was inserted.
    Inserted,
}

impl MergeOutcome {
    /// True if local state changed.
    pub fn changed(&self) -> bool {
        matches!(self, MergeOutcome::Adopted | MergeOutcome::Inserted)
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            MergeOutcome::Unchanged(UnchangedReason::RemoteAbsent) => "remote_absent",
            MergeOutcome::Unchanged(UnchangedReason::Identical) => "identical",
            MergeOutcome::Unchanged(UnchangedReason::RemoteUnstamped) => "remote_unstamped",
            MergeOutcome::Unchanged(UnchangedReason::LocalNewer) => "local_newer",
            MergeOutcome::Unchanged(UnchangedReason::Removed) => "removed",
            MergeOutcome::Adopted => "adopted",
            MergeOutcome::Inserted => "inserted",
        }
    }
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Merge `remote` into `local` in place.
pub fn merge<R: Record>(local: &mut R, remote: Option<&R>) -> Result<MergeOutcome> {
    let Some(remote) = remote else {
        return Ok(MergeOutcome::Unchanged(UnchangedReason::RemoteAbsent));
    };

    if local.equals(remote) {
        return Ok(MergeOutcome::Unchanged(UnchangedReason::Identical));
    }

    let (local_ts, remote_ts) = (local.last_change(), remote.last_change());

    if local_ts == remote_ts {
        return Err(BrokerError::MergeConflict {
            kind: R::KIND,
            identity: local.key().to_string(),
            timestamp: local_ts,
        });
    }

    match (local_ts, remote_ts) {
        (None, _) => {
            local.merge_favor_other(remote);
            Ok(MergeOutcome::Adopted)
        }
        (_, None) => Ok(MergeOutcome::Unchanged(UnchangedReason::RemoteUnstamped)),
        (Some(l), Some(r)) if r < l => Ok(MergeOutcome::Unchanged(UnchangedReason::LocalNewer)),
        (Some(_), Some(_)) => {
            local.merge_favor_other(remote);
            Ok(MergeOutcome::Adopted)
        }
    }
}

/// Merge across the tagged form. Different kinds fail with `TypeMismatch`.
pub fn merge_any(local: &mut AnyRecord, remote: Option<&AnyRecord>) -> Result<MergeOutcome> {
    let Some(remote) = remote else {
        return Ok(MergeOutcome::Unchanged(UnchangedReason::RemoteAbsent));
    };

    match (local, remote) {
        (AnyRecord::Topic(l), AnyRecord::Topic(r)) => merge(l, Some(r)),
        (AnyRecord::Subscription(l), AnyRecord::Subscription(r)) => merge(l, Some(r)),
        (AnyRecord::User(l), AnyRecord::User(r)) => merge(l, Some(r)),
        (AnyRecord::Node(l), AnyRecord::Node(r)) => merge(l, Some(r)),
        (AnyRecord::Delivery(l), AnyRecord::Delivery(r)) => merge(l, Some(r)),
        (l, r) => Err(BrokerError::TypeMismatch {
            expected: l.kind(),
            found: r.kind(),
        }),
    }
}

/// Summary of a collection reconciliation.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub adopted: usize,
    pub inserted: usize,
    pub unchanged: usize,
    /// Merges that failed. The local record involved is left untouched.
    pub conflicts: Vec<BrokerError>,
}

impl ReconcileReport {
    pub fn changed(&self) -> usize {
        self.adopted + self.inserted
    }
}

/// Reconcile a local collection against a remote one.
///
/// Each remote record is paired with its local counterpart via `matches`
/// and merged. Remote records without a counterpart are appended. A
/// conflict on one identity does not stop the others.
pub fn reconcile<R: Record>(local: &mut Vec<R>, remote: &[R]) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for incoming in remote {
        match local.iter_mut().find(|existing| existing.matches(incoming)) {
            Some(existing) => match merge(existing, Some(incoming)) {
                Ok(MergeOutcome::Adopted) => report.adopted += 1,
                Ok(_) => report.unchanged += 1,
                Err(e) => report.conflicts.push(e),
            },
            None => {
                local.push(incoming.clone());
                report.inserted += 1;
            }
        }
    }

    report
}
