//! Pure protocol state machines.
//!
//! These hold no I/O and no side effects: each is a transition function over
//! `(state, event)` pairs. The [`crate::engine::Engine`] owns the current
//! states, derives events from decoded messages and sent commands, and runs
//! the side effects (send a message, fail a waiter, finish the previous
//! operation, drain the queue) that entering a state requires.

pub mod session;
pub mod transaction;

pub use session::{SessionEvent, SessionState};
pub use transaction::{TxEvent, TxHandle, TxStatus};
