//! Transaction phase tracking.
//!
//! An overlay on the session machine: it watches the BEGIN/COMMIT/ROLLBACK
//! brackets and drives the dual-queue scheme that defers submissions not
//! belonging to the open transaction.

/// Opaque identity of an active transaction.
///
/// Submissions tagged with the matching handle run inside the transaction;
/// everything else waits until it ends. Handles are process-unique, so one
/// minted for a different connection never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHandle(u64);

impl TxHandle {
    pub(crate) fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TxHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Transaction phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxStatus {
    /// No transaction open
    #[default]
    None,
    /// BEGIN sent, not yet confirmed
    StartPending,
    /// BEGIN confirmed; the transaction block is running
    Active,
    /// COMMIT sent, not yet confirmed
    CommitPending,
    /// ROLLBACK sent, not yet confirmed
    RollbackPending,
}

/// Transaction machine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    /// BEGIN submitted
    Start,
    /// COMMIT submitted
    Commit,
    /// ROLLBACK submitted
    Rollback,
    /// CommandComplete observed for the bracket statement itself
    CommandComplete,
}

/// Apply an event; `None` means the event is ignored in this phase.
pub fn apply(status: TxStatus, event: TxEvent) -> Option<TxStatus> {
    use TxEvent::*;
    use TxStatus::*;

    match (status, event) {
        (None, Start) => Some(StartPending),
        (StartPending, CommandComplete) => Some(Active),
        (Active, Commit) => Some(CommitPending),
        (Active, Rollback) => Some(RollbackPending),
        (CommitPending, CommandComplete) => Some(None),
        (RollbackPending, CommandComplete) => Some(None),
        _ => Option::None,
    }
}
