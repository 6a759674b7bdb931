use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use skyjet_core::{Error, OperationType};

/// Snapshot of the last mutating operation of a resource.
#[derive(Debug, Clone, Default)]
pub struct OperationRecord {
    pub op: Option<OperationType>,
    pub running: bool,
    pub error: Option<Arc<Error>>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
}

impl OperationRecord {
    /// Error reported to callers that find this operation still running.
    pub fn running_error(&self) -> Option<Error> {
        if !self.running { return None; }
        Some(Error::OperationRunning {
            op: self.op?,
            started: self.started.unwrap_or_else(Utc::now),
            last_error: self.error.as_ref().map(|e| e.to_string()),
        })
    }
}

/// State machine `Idle -> Running(op) -> Idle`, with the outcome of the last
/// attempt kept until the next one starts.
#[derive(Debug, Default)]
pub struct Operation {
    inner: Mutex<OperationRecord>,
}

impl Operation {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, OperationRecord> { self.inner.lock().unwrap_or_else(|e| e.into_inner()) }

    /// Start `op` unless another operation is running. Returns false, without
    /// touching any state, when one is.
    pub fn mark_start(&self, op: OperationType) -> bool {
        let mut g = self.lock();
        if g.running { return false; }
        *g = OperationRecord { op: Some(op), running: true, error: None, started: Some(Utc::now()), ended: None };
        true
    }

    pub fn mark_end(&self) {
        let mut g = self.lock();
        g.running = false;
        g.ended = Some(Utc::now());
    }

    /// Record the outcome of the current attempt; `None` records success.
    pub fn set_error(&self, err: Option<Arc<Error>>) { self.lock().error = err; }

    /// Forget the last attempt. Used once a refresh confirms nothing is
    /// outstanding; a running operation is left alone.
    pub fn clear(&self, reset_type: bool) {
        let mut g = self.lock();
        if g.running { return; }
        g.error = None;
        g.started = None;
        g.ended = None;
        if reset_type { g.op = None; }
    }

    pub fn is_running(&self) -> bool { self.lock().running }

    pub fn error(&self) -> Option<Arc<Error>> { self.lock().error.clone() }

    pub fn record(&self) -> OperationRecord { self.lock().clone() }
}
