//! Settings snapshot.
//!
//! Discovery writes the snapshot, a user edits it (poll intervals, settable
//! flags, post-processing), and the scheduler is started from it. The file is
//! pretty-printed JSON with camelCase keys.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::property::{Property, PropertySet};
use crate::transport::Endpoint;

/// Settings error types.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Cannot access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSettings {
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Topic root of all published values.
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

fn default_broker_url() -> String {
    "tcp://127.0.0.1:1883".to_string()
}

fn default_device_name() -> String {
    "heating-unit".to_string()
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            user: None,
            password: None,
            device_name: default_device_name(),
        }
    }
}

/// Batch line settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSettings {
    /// Topic batch lines are published to. No topic, no batch publishing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_tag_key")]
    pub tag_key: String,
    #[serde(default = "default_tag_value")]
    pub tag_value: String,
}

fn default_table() -> String {
    "appliance".to_string()
}

fn default_tag_key() -> String {
    "qfn".to_string()
}

fn default_tag_value() -> String {
    "appliance.heating".to_string()
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            topic: None,
            table: default_table(),
            tag_key: default_tag_key(),
            tag_value: default_tag_value(),
        }
    }
}

/// Everything needed to run the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub broker: BrokerSettings,
    pub device: Endpoint,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl Settings {
    /// Settings for a freshly discovered device.
    pub fn new(device: Endpoint, properties: PropertySet) -> Self {
        Self {
            broker: BrokerSettings::default(),
            device,
            batch: BatchSettings::default(),
            properties: properties.into_vec(),
        }
    }

    /// Parse a snapshot document.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render the snapshot, optionally leaving out the sampled values.
    pub fn to_json(&self, include_values: bool) -> Result<String, SettingsError> {
        let mut document = serde_json::to_value(self)?;
        if !include_values {
            if let Some(Value::Array(properties)) = document.get_mut("properties") {
                for property in properties.iter_mut().filter_map(Value::as_object_mut) {
                    property.remove("value");
                }
            }
        }
        Ok(serde_json::to_string_pretty(&document)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn save(&self, path: impl AsRef<Path>, include_values: bool) -> Result<(), SettingsError> {
        let path = path.as_ref();
        let json = self.to_json(include_values)?;
        std::fs::write(path, json).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{DataType, PollInterval, PostProcessing};

    fn sample_settings() -> Settings {
        let properties: PropertySet = [
            Property::new("1/Sensor/IndoorTemperature", "SpaceHeating")
                .with_value("21.5")
                .with_data_type(DataType::Float)
                .with_poll_interval(PollInterval::Minutely),
            Property::new("1/Consumption", "SpaceHeating")
                .with_post_processing(PostProcessing::Consumption)
                .with_poll_interval(PollInterval::Daily),
            Property::new("0/Version", "Adapter").with_poll_interval(PollInterval::Never),
        ]
        .into_iter()
        .collect();
        Settings::new(Endpoint::new("192.168.1.20", 80), properties)
    }

    #[test]
    fn test_round_trip_through_file() {
        let settings = sample_settings();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        settings.save(&path, true).unwrap();
        let loaded = Settings::load(&path).unwrap();

        assert_eq!(loaded, settings);
        for (a, b) in loaded.properties.iter().zip(&settings.properties) {
            assert_eq!(a.path(), b.path());
            assert_eq!(a.data_type, b.data_type);
            assert_eq!(a.poll_interval, b.poll_interval);
        }
    }

    #[test]
    fn test_values_can_be_excluded() {
        let json = sample_settings().to_json(false).unwrap();
        assert!(!json.contains("\"value\""));
        assert!(json.contains("\"pollInterval\": \"MINUTELY\""));

        let loaded = Settings::from_json(&json).unwrap();
        assert!(loaded.properties.iter().all(|p| p.value.is_empty()));
    }

    #[test]
    fn test_defaults_and_unknown_enums() {
        let loaded = Settings::from_json(
            r#"{
                "device": {"host": "unit.local"},
                "properties": [{
                    "path": "1/Power",
                    "groupName": "SpaceHeating",
                    "name": "SpaceHeating/Power",
                    "pollInterval": "EVERY_FORTNIGHT",
                    "postProcessing": "SMOOTHING"
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(loaded.broker, BrokerSettings::default());
        assert_eq!(loaded.batch.table, "appliance");
        assert_eq!(loaded.batch.tag_key, "qfn");
        assert_eq!(loaded.device.port, 80);
        let property = &loaded.properties[0];
        assert_eq!(property.poll_interval, PollInterval::Never);
        assert_eq!(property.post_processing, PostProcessing::None);
        assert!(property.retained);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Settings::load("/nonexistent/unitbridge/settings.json"),
            Err(SettingsError::Io { .. })
        ));
    }
}
