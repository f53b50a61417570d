//! Publisher that keeps everything it receives.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use unitbridge_core::publish::{Channel, PublishError, Publisher};

#[derive(Debug, Default)]
struct Recorded {
    channels: Vec<Channel>,
    values: Vec<(String, Option<String>)>,
    batches: Vec<String>,
}

/// Records announcements, values and batch lines for assertions.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    recorded: Mutex<Recorded>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.lock().channels.clone()
    }

    /// Published values in order, `None` for explicit "no value".
    pub fn values(&self) -> Vec<(String, Option<String>)> {
        self.lock().values.clone()
    }

    /// Most recent value published for `id`.
    pub fn last_value(&self, id: &str) -> Option<Option<String>> {
        self.lock()
            .values
            .iter()
            .rev()
            .find(|(key, _)| key == id)
            .map(|(_, value)| value.clone())
    }

    pub fn batches(&self) -> Vec<String> {
        self.lock().batches.clone()
    }

    pub fn clear(&self) {
        *self.lock() = Recorded::default();
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn announce(&self, channels: &[Channel]) -> Result<(), PublishError> {
        self.lock().channels.extend_from_slice(channels);
        Ok(())
    }

    async fn publish_value(&self, id: &str, value: Option<&str>) -> Result<(), PublishError> {
        self.lock()
            .values
            .push((id.to_string(), value.map(str::to_string)));
        Ok(())
    }

    async fn publish_batch(&self, line: &str) -> Result<(), PublishError> {
        self.lock().batches.push(line.to_string());
        Ok(())
    }
}
