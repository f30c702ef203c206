pub mod audit;
pub mod domain;
pub mod logging;

pub use domain::Domain;
pub use tracing;

/// Process-wide control signal broadcast to long-running services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
