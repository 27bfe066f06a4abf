//! Resilience patterns for trustgate-runtime.
//!
//! Collaborator calls are the only suspension points. Each one runs inside
//! a bounded retry with fixed backoff and an optional per-call timeout.

mod retry;

pub use retry::{RetryExhausted, RetryPolicy};
