//! Policy abstractions for dispatch operations.
//!
//! - [`RetryPolicy`]: Determines retry behavior and timing

pub mod retry;

pub use retry::RetryPolicy;
