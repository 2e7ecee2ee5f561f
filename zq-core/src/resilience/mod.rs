//! Failure-handling building blocks: backoff and cooperative shutdown.

pub mod backoff;
pub mod shutdown;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use shutdown::ShutdownToken;
