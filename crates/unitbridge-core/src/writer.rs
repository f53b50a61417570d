//! On-demand writes to settable properties.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::envelope::CODE_CREATED;
use crate::property::Property;
use crate::publish::Publisher;
use crate::scheduler::{sample, PolledProperty};
use crate::session::{QueryError, SharedSession};
use crate::transport::{Transport, TransportError};

/// Write error types.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Property {0} is not settable")]
    NotSettable(String),

    #[error("Could not connect: {0}")]
    Connect(#[source] TransportError),

    #[error("Write query failed: {0}")]
    Query(#[from] QueryError),

    #[error("Write to {id} rejected with code {code}")]
    Rejected { id: String, code: u32 },
}

/// Writes values to the gateway, serialized with polling through the shared
/// session lock.
pub struct PropertyWriter<T> {
    session: SharedSession<T>,
    properties: HashMap<String, Property>,
    publisher: Arc<dyn Publisher>,
}

impl<T: Transport> PropertyWriter<T> {
    pub fn new(
        session: SharedSession<T>,
        properties: impl IntoIterator<Item = Property>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            session,
            properties: properties.into_iter().map(|p| (p.id(), p)).collect(),
            publisher,
        }
    }

    /// Ids of all settable properties.
    pub fn settable_ids(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|(_, p)| p.settable)
            .map(|(id, _)| id.as_str())
    }

    /// Write `value` to the property with id `id`, then re-read and publish
    /// it. Returns the value read back, or the written value when the re-read
    /// failed. The gateway must acknowledge the write with 2001.
    pub async fn write(&self, id: &str, value: &str) -> Result<String, WriteError> {
        let property = self
            .properties
            .get(id)
            .ok_or_else(|| WriteError::UnknownProperty(id.to_string()))?;
        if !property.settable {
            return Err(WriteError::NotSettable(id.to_string()));
        }

        let mut session = self.session.lock().await;
        session.connect().await.map_err(WriteError::Connect)?;
        info!(id, value, "Writing");
        let response = match session.write(property.path(), value).await {
            Ok(response) => response,
            Err(e) => {
                session.disconnect().await;
                return Err(e.into());
            }
        };

        let mut polled = PolledProperty::from(property.clone());
        let verified = match sample(&mut *session, &mut polled, self.publisher.as_ref()).await {
            Ok(_) => polled.property.value,
            Err(e) => {
                warn!(id, "Re-read after write failed: {}", e);
                value.to_string()
            }
        };
        session.disconnect().await;

        if response.code != CODE_CREATED {
            warn!(id, code = response.code, "Write not acknowledged");
            return Err(WriteError::Rejected {
                id: id.to_string(),
                code: response.code,
            });
        }
        Ok(verified)
    }
}
