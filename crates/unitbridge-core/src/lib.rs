//! Appliance gateway bridge core.
//!
//! The gateway speaks request/response JSON envelopes over a WebSocket. This
//! crate discovers what a connected appliance exposes, turns it into a flat
//! set of typed properties and polls them on tiered schedules.
//!
//! ## Architecture
//!
//! - **Session**: one correlated request in flight over a [`Transport`]
//! - **DiscoveryEngine**: walks numbered groups and their profile documents
//! - **Inference**: data type, format and unit from a sample plus profile node
//! - **PollingScheduler**: per-tier deadlines, sampling and batch lines
//! - **ConsumptionDecoder**: expands cumulative energy histories
//! - **PropertyWriter**: write-then-verify for settable properties
//!
//! Values leave the crate through the [`Publisher`] trait.

pub mod consumption;
pub mod discovery;
pub mod envelope;
pub mod error;
pub mod inference;
pub mod property;
pub mod publish;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod transport;
pub mod writer;

pub use consumption::{ConsumptionDecoder, ConsumptionState};
pub use discovery::{DiscoveryEngine, DEFAULT_ENDPOINTS};
pub use envelope::{DeviceInformation, Request, Response};
pub use error::{Error, Result};
pub use inference::{infer, Inference};
pub use property::{DataType, PollInterval, PostProcessing, Property, PropertySet};
pub use publish::{Channel, LogPublisher, Publisher};
pub use scheduler::{Deadlines, PollingScheduler};
pub use session::{Session, SharedSession};
pub use settings::{BatchSettings, BrokerSettings, Settings};
pub use transport::{Endpoint, Transport, WsTransport};
pub use writer::PropertyWriter;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
