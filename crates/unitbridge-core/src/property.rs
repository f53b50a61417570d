//! Discovered device properties.
//!
//! A [`Property`] is one independently pollable leaf on the appliance. Its
//! `path` is the identity: two properties with the same path are the same
//! entity, whatever their labels say.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '/';

/// Polling cadence of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollInterval {
    /// Sampled once during setup.
    Once,
    Daily,
    BiHourly,
    #[default]
    Hourly,
    Minutely,
    /// Never polled, kept in the snapshot only.
    #[serde(other)]
    Never,
}

impl PollInterval {
    /// Whether the steady-state scheduler samples this property.
    pub fn is_scheduled(self) -> bool {
        !matches!(self, Self::Never | Self::Once)
    }
}

/// Semantic data type inferred at discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Integer,
    Float,
    Boolean,
    #[default]
    String,
    Enum,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::Boolean => write!(f, "boolean"),
            Self::String => write!(f, "string"),
            Self::Enum => write!(f, "enum"),
        }
    }
}

/// Post-processing applied to a sampled value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostProcessing {
    /// Expand a cumulative energy history into numbered sub-properties.
    Consumption,
    #[default]
    #[serde(other)]
    None,
}

/// One discovered, pollable leaf value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    path: String,
    group_name: String,
    /// Display name: group plus the path below the group, unless overridden.
    pub name: String,
    /// Most recent raw value.
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub settable: bool,
    #[serde(default = "default_retained")]
    pub retained: bool,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub poll_interval: PollInterval,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub post_processing: PostProcessing,
}

fn default_retained() -> bool {
    true
}

impl Property {
    /// Create a property for `path` below the group labelled `group_name`.
    pub fn new(path: impl Into<String>, group_name: impl Into<String>) -> Self {
        let path = path.into();
        let group_name = group_name.into();
        let name = match path.find(PATH_SEPARATOR) {
            Some(index) => format!("{}{}", group_name, &path[index..]),
            None => group_name.clone(),
        };
        Self {
            path,
            group_name,
            name,
            value: String::new(),
            settable: false,
            retained: true,
            unit: String::new(),
            format: String::new(),
            poll_interval: PollInterval::default(),
            data_type: DataType::default(),
            post_processing: PostProcessing::default(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    /// Number of path segments.
    pub fn depth(&self) -> usize {
        path_depth(&self.path)
    }

    /// External registry key derived from the path.
    pub fn id(&self) -> String {
        property_id(&self.path)
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: PollInterval) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_post_processing(mut self, post_processing: PostProcessing) -> Self {
        self.post_processing = post_processing;
        self
    }

    pub fn with_settable(mut self, settable: bool) -> Self {
        self.settable = settable;
        self
    }
}

impl std::fmt::Display for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Property [path={}, name={}, id={}, value={}, type={}, format={}, unit={}, interval={:?}]",
            self.path,
            self.name,
            self.id(),
            self.value,
            self.data_type,
            self.format,
            self.unit,
            self.poll_interval
        )
    }
}

/// Slug used as the external key of a path.
pub fn property_id(path: &str) -> String {
    path.replace(PATH_SEPARATOR, "-").to_lowercase()
}

/// Number of non-empty segments in a path.
pub fn path_depth(path: &str) -> usize {
    path.split(PATH_SEPARATOR).filter(|s| !s.is_empty()).count()
}

/// Path-keyed collection with add-or-replace insertion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySet {
    entries: BTreeMap<String, Property>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a property, replacing any entry with the same path. Returns the
    /// replaced entry.
    pub fn upsert(&mut self, property: Property) -> Option<Property> {
        self.entries.insert(property.path.clone(), property)
    }

    pub fn get(&self, path: &str) -> Option<&Property> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Properties in path order.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.entries.values()
    }

    pub fn into_vec(self) -> Vec<Property> {
        self.entries.into_values().collect()
    }
}

impl FromIterator<Property> for PropertySet {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        let mut set = Self::new();
        for property in iter {
            set.upsert(property);
        }
        set
    }
}

impl IntoIterator for PropertySet {
    type Item = Property;
    type IntoIter = std::collections::btree_map::IntoValues<String, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_naming() {
        let property = Property::new("1/Sensor/IndoorTemperature", "SpaceHeating");
        assert_eq!(property.name, "SpaceHeating/Sensor/IndoorTemperature");
        assert_eq!(property.id(), "1-sensor-indoortemperature");
        assert_eq!(property.group_name(), "SpaceHeating");
        assert_eq!(property.depth(), 3);
    }

    #[test]
    fn test_property_defaults() {
        let property = Property::new("0/Version", "0");
        assert_eq!(property.poll_interval, PollInterval::Hourly);
        assert_eq!(property.data_type, DataType::String);
        assert_eq!(property.post_processing, PostProcessing::None);
        assert!(property.retained);
        assert!(!property.settable);
    }

    #[test]
    fn test_upsert_replaces_same_path() {
        let mut set = PropertySet::new();
        assert!(set.upsert(Property::new("1/Power", "a").with_value("on")).is_none());
        let previous = set.upsert(Property::new("1/Power", "b").with_value("off"));

        assert_eq!(previous.map(|p| p.value), Some("on".to_string()));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("1/Power").unwrap().value, "off");
        assert_eq!(set.get("1/Power").unwrap().group_name(), "b");
    }

    #[test]
    fn test_set_orders_by_path() {
        let set: PropertySet = ["2/B", "1/Z", "1/A"]
            .into_iter()
            .map(|p| Property::new(p, "g"))
            .collect();
        let paths: Vec<_> = set.iter().map(Property::path).collect();
        assert_eq!(paths, vec!["1/A", "1/Z", "2/B"]);
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&PollInterval::BiHourly).unwrap(),
            "\"BI_HOURLY\""
        );
        assert_eq!(
            serde_json::from_str::<PollInterval>("\"WEEKLY\"").unwrap(),
            PollInterval::Never
        );
        assert_eq!(
            serde_json::from_str::<PostProcessing>("\"SMOOTHING\"").unwrap(),
            PostProcessing::None
        );
    }

    #[test]
    fn test_is_scheduled() {
        assert!(PollInterval::Minutely.is_scheduled());
        assert!(PollInterval::Daily.is_scheduled());
        assert!(!PollInterval::Once.is_scheduled());
        assert!(!PollInterval::Never.is_scheduled());
    }
}
