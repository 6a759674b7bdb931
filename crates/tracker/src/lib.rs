//! Per-resource operation tracking.
//!
//! Every managed resource gets one [`OperationTracker`], created lazily on
//! first reconcile and dropped from the [`TrackerRegistry`] only when its
//! deletion finalizer is processed. The tracker is the single piece of state
//! shared between the synchronous Observe path and background mutations: it
//! gates mutating operations and caches the provider's last known state.

#![forbid(unsafe_code)]

mod finalizer;
mod operation;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::debug;

use skyjet_core::{format_uid, Condition, Error, OperationType, Uid};
use skyjet_value::ProviderState;

pub use finalizer::{Finalizer, NopFinalizer, TrackerFinalizer};
pub use operation::{Operation, OperationRecord};

pub const CONDITION_LAST_ASYNC_OPERATION: &str = "LastAsyncOperation";
pub const REASON_SUCCESS: &str = "Success";
pub const REASON_ONGOING: &str = "AsyncOperationOngoing";
pub const REASON_APPLY_FAILURE: &str = "ApplyFailure";
pub const REASON_DESTROY_FAILURE: &str = "DestroyFailure";

/// User-visible state of the last mutating operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Idle,
    Ongoing { op: OperationType, started: DateTime<Utc> },
    Failed { op: OperationType, reason: String },
}

#[derive(Debug)]
pub struct OperationTracker {
    uid: Uid,
    operation: Operation,
    state: ArcSwapOption<ProviderState>,
    deleted: AtomicBool,
    gate: AsyncMutex<()>,
}

impl OperationTracker {
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            operation: Operation::new(),
            state: ArcSwapOption::empty(),
            deleted: AtomicBool::new(false),
            gate: AsyncMutex::new(()),
        }
    }

    pub fn uid(&self) -> Uid { self.uid }

    pub fn mark_start(&self, op: OperationType) -> bool {
        let ok = self.operation.mark_start(op);
        if ok {
            debug!(uid = %format_uid(&self.uid), op = %op, "operation started");
        }
        ok
    }

    /// Held by an asynchronous observe for its whole read, and around
    /// [`OperationTracker::mark_start`], so no operation starts mid-read.
    pub async fn gate(&self) -> AsyncMutexGuard<'_, ()> { self.gate.lock().await }

    pub fn mark_end(&self) { self.operation.mark_end(); }
    pub fn set_error(&self, err: Option<Arc<Error>>) { self.operation.set_error(err); }
    pub fn clear(&self, reset_type: bool) { self.operation.clear(reset_type); }
    pub fn is_running(&self) -> bool { self.operation.is_running() }
    pub fn last_operation(&self) -> OperationRecord { self.operation.record() }

    /// Cached provider state, if any has been recorded or reconstructed.
    pub fn state(&self) -> Option<Arc<ProviderState>> { self.state.load_full() }

    pub fn has_state(&self) -> bool { self.state.load().is_some() }

    pub fn set_state(&self, state: ProviderState) { self.state.store(Some(Arc::new(state))); }

    /// Record that the provider no longer knows the resource.
    pub fn reset_state(&self) { self.set_state(ProviderState::null()); }

    /// Drop the cached state entirely; the next connect reconstructs it.
    pub fn forget_state(&self) { self.state.store(None); }

    pub fn is_deleted(&self) -> bool { self.deleted.load(Ordering::Acquire) }

    pub fn set_deleted(&self, deleted: bool) { self.deleted.store(deleted, Ordering::Release); }

    pub fn status(&self) -> OperationStatus {
        let rec = self.operation.record();
        match (rec.op, rec.running, rec.error) {
            (Some(op), true, _) => OperationStatus::Ongoing { op, started: rec.started.unwrap_or_else(Utc::now) },
            (Some(op), false, Some(err)) => OperationStatus::Failed { op, reason: err.to_string() },
            _ => OperationStatus::Idle,
        }
    }

    /// The `LastAsyncOperation` condition, once any operation has been recorded.
    pub fn last_async_operation(&self) -> Option<Condition> {
        let rec = self.operation.record();
        let op = rec.op?;
        let cond = |status: &str, reason: &str, message: String| Condition {
            type_: CONDITION_LAST_ASYNC_OPERATION.into(),
            status: status.into(),
            reason: reason.into(),
            message,
        };
        Some(match self.status() {
            OperationStatus::Ongoing { .. } => cond("Unknown", REASON_ONGOING, String::new()),
            OperationStatus::Failed { reason, .. } => {
                let r = if op == OperationType::Delete { REASON_DESTROY_FAILURE } else { REASON_APPLY_FAILURE };
                cond("False", r, reason)
            }
            OperationStatus::Idle => cond("True", REASON_SUCCESS, String::new()),
        })
    }
}

/// Trackers keyed by resource UID.
#[derive(Debug, Default)]
pub struct TrackerRegistry {
    trackers: Mutex<FxHashMap<Uid, Arc<OperationTracker>>>,
}

impl TrackerRegistry {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<Uid, Arc<OperationTracker>>> {
        self.trackers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tracker for `uid`, created on first use.
    pub fn tracker(&self, uid: Uid) -> Arc<OperationTracker> {
        let mut g = self.lock();
        let t = g.entry(uid).or_insert_with(|| {
            metrics::counter!("skyjet_trackers_created_total", 1u64);
            Arc::new(OperationTracker::new(uid))
        });
        Arc::clone(t)
    }

    pub fn get(&self, uid: &Uid) -> Option<Arc<OperationTracker>> { self.lock().get(uid).cloned() }

    pub fn len(&self) -> usize { self.lock().len() }
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }

    /// Holders of the removed tracker keep their instance; only new lookups
    /// are affected. Reserved for finalizer processing.
    pub(crate) fn remove(&self, uid: &Uid) -> Option<Arc<OperationTracker>> {
        let removed = self.lock().remove(uid);
        if removed.is_some() {
            debug!(uid = %format_uid(uid), "tracker removed");
        }
        removed
    }
}
