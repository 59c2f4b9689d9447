pub mod pool;

pub use pool::{PoolConfig, PoolStats, Ticket, TicketState, WorkerPool};

use std::any::Any;

/// Human-readable reason from a panic payload.
pub(crate) fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
