//! Test support utilities for engine-level testing
//!
//! Provides a scripted transport and a harness that runs a complete engine
//! (workers and quota monitor) inside a paused-clock tokio runtime.

pub mod harness;
pub mod mock_transport;

pub use harness::EngineHarness;
pub use mock_transport::{MockTransport, Outcome};
