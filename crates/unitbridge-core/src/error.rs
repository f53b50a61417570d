//! Error type for the core crate.

use thiserror::Error;

pub use crate::consumption::ConsumptionError;
pub use crate::discovery::DiscoveryError;
pub use crate::envelope::EnvelopeError;
pub use crate::publish::PublishError;
pub use crate::scheduler::SampleError;
pub use crate::session::QueryError;
pub use crate::settings::SettingsError;
pub use crate::transport::TransportError;
pub use crate::writer::WriteError;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Any failure surfaced by the bridge.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Consumption(#[from] ConsumptionError),

    #[error(transparent)]
    Sample(#[from] SampleError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}
