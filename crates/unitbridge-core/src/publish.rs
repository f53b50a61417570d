//! Publishing seam between the bridge and whatever consumes its values.
//!
//! The core never talks to a broker itself. Discovered properties are
//! announced as [`Channel`]s, sampled values go out one by one, and each
//! polling tick may emit one batch line for a time-series sink.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::consumption::CONSUMPTION_UNIT;
use crate::property::{DataType, Property};

/// Publisher error types.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Publish to {topic} failed: {reason}")]
    Failed { topic: String, reason: String },

    #[error("Publisher closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Description of one published value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub group: String,
    pub name: String,
    pub data_type: DataType,
    pub format: String,
    pub unit: String,
    pub settable: bool,
    pub retained: bool,
}

impl Channel {
    /// A sub-property of a cumulative energy history.
    pub fn consumption(
        id: impl Into<String>,
        group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            group: group.into(),
            name: name.into(),
            data_type: DataType::Integer,
            format: String::new(),
            unit: CONSUMPTION_UNIT.to_string(),
            settable: false,
            retained: true,
        }
    }
}

impl From<&Property> for Channel {
    fn from(property: &Property) -> Self {
        Self {
            id: property.id(),
            group: property.group_name().to_string(),
            name: property.name.clone(),
            data_type: property.data_type,
            format: property.format.clone(),
            unit: property.unit.clone(),
            settable: property.settable,
            retained: property.retained,
        }
    }
}

/// Sink for announcements, values and batch lines.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Declare channels before any value is published for them.
    async fn announce(&self, channels: &[Channel]) -> Result<(), PublishError>;

    /// Publish one value. `None` is an explicit "no value".
    async fn publish_value(&self, id: &str, value: Option<&str>) -> Result<(), PublishError>;

    /// Publish one rendered batch line.
    async fn publish_batch(&self, line: &str) -> Result<(), PublishError>;
}

/// Publisher that only writes to the log.
#[derive(Debug, Clone, Default)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn announce(&self, channels: &[Channel]) -> Result<(), PublishError> {
        for channel in channels {
            info!(
                id = %channel.id,
                name = %channel.name,
                data_type = %channel.data_type,
                unit = %channel.unit,
                "Channel"
            );
        }
        Ok(())
    }

    async fn publish_value(&self, id: &str, value: Option<&str>) -> Result<(), PublishError> {
        info!(id, value = value.unwrap_or("<none>"), "Value");
        Ok(())
    }

    async fn publish_batch(&self, line: &str) -> Result<(), PublishError> {
        info!(line, "Batch");
        Ok(())
    }
}
