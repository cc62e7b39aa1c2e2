//! Per-call context: request identity, cancellation, and deadline.
//!
//! A `CallContext` is threaded through every facade operation and into
//! every gateway invocation. Cancellation is a flag shared by every clone
//! of the context; gateway implementations poll [`CallContext::check`] at
//! their suspension points, so cancelling makes each in-flight shard call
//! return promptly with a `Cancelled` error. A deadline turns caller
//! timeouts into the same signal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{GateError, GateResult};

/// Global monotonic request ID counter.
static GLOBAL_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a new unique request ID.
pub fn next_request_id() -> u64 {
    GLOBAL_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Context carried by one logical gateway call.
#[derive(Clone)]
pub struct CallContext {
    /// Unique per facade call (monotonic across the process).
    pub request_id: u64,
    /// The client session this call belongs to (0 for none).
    pub session_id: u64,
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
    started_at: Instant,
}

impl CallContext {
    /// Create a fresh context for a client session.
    pub fn new(session_id: u64) -> Self {
        Self {
            request_id: next_request_id(),
            session_id,
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
            started_at: Instant::now(),
        }
    }

    /// Context not tied to any client session (background work).
    pub fn background() -> Self {
        Self::new(0)
    }

    /// Attach a deadline `timeout` from now. Expressed as cancellation:
    /// `check()` starts failing with `DeadlineExceeded` once it passes.
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Request cancellation. Every clone of this context observes it.
    pub fn cancel(&self) {
        tracing::debug!(
            request_id = self.request_id,
            session_id = self.session_id,
            "cancelling in-flight shard calls"
        );
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// True once the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Error-typed variant of `is_done()`, for `?` propagation at
    /// suspension points.
    pub fn check(&self) -> GateResult<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(GateError::Cancelled(format!(
                "request {} cancelled",
                self.request_id
            )));
        }
        if let Some(d) = self.deadline {
            if Instant::now() >= d {
                return Err(GateError::DeadlineExceeded(format!(
                    "request {} past deadline",
                    self.request_id
                )));
            }
        }
        Ok(())
    }

    /// Elapsed time since the context was created, in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
