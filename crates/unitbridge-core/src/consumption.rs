//! Cumulative energy history decoding.
//!
//! A consumption property carries a JSON document of the shape
//! `energyCategory → purpose → fieldCode → [count | null, …]`, for example
//!
//! ```text
//! {"Electrical":{"Heating":{"D":[0,0,2,…],"W":[2,3,…],"M":[90,54,…]}}}
//! ```
//!
//! Each series is expanded into one integer sub-property per index plus a
//! `-last` slot carrying the most recent non-null entry. The only state kept
//! between polls is that last non-null value per series, held in a
//! [`ConsumptionState`] the caller threads through [`ConsumptionDecoder::decode`].

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::publish::Channel;

/// Unit reported for every consumption sub-property.
pub const CONSUMPTION_UNIT: &str = "kWh";

const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Consumption decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumptionError {
    #[error("Consumption payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Consumption payload has unexpected shape at '{0}'")]
    UnexpectedShape(String),
}

/// One leaf sequence of the history document.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub category: String,
    pub purpose: String,
    pub field: String,
    pub samples: Vec<Option<i64>>,
}

impl Series {
    /// Common prefix of the sub-property ids of this series.
    pub fn base_id(&self, base_name: &str) -> String {
        format!(
            "{}-{}-{}-{}",
            base_name,
            self.category.to_lowercase(),
            self.purpose.to_lowercase(),
            self.field.to_lowercase()
        )
    }

    fn label_prefix(&self) -> String {
        format!("{}/{}/{}", self.category, self.purpose, self.field)
    }
}

/// Parse a history document into its series, in document order.
pub fn parse_series(payload: &str) -> Result<Vec<Series>, ConsumptionError> {
    let root: Value = serde_json::from_str(payload.trim())
        .map_err(|e| ConsumptionError::InvalidJson(e.to_string()))?;
    let categories = as_object(&root, "<root>")?;

    let mut series = Vec::new();
    for (category, purposes) in categories {
        for (purpose, fields) in as_object(purposes, category)? {
            for (field, values) in as_object(fields, purpose)? {
                let Value::Array(values) = values else {
                    return Err(ConsumptionError::UnexpectedShape(field.clone()));
                };
                series.push(Series {
                    category: category.trim().to_string(),
                    purpose: purpose.trim().to_string(),
                    field: field.trim().to_string(),
                    samples: values.iter().map(sample_value).collect(),
                });
            }
        }
    }
    Ok(series)
}

fn as_object<'a>(value: &'a Value, at: &str) -> Result<&'a Map<String, Value>, ConsumptionError> {
    value
        .as_object()
        .ok_or_else(|| ConsumptionError::UnexpectedShape(at.to_string()))
}

fn sample_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        _ => None,
    }
}

/// Label of bucket `index` in a series of `len` entries with `field` code.
///
/// Only the documented layouts get a label: `D`×24 (two-hour buckets of
/// yesterday and today), `W`×14 (days of last and this week), `M`×24
/// (months of last and this year).
pub fn bucket_label(field: &str, index: usize, len: usize) -> String {
    match (field, len) {
        ("D", 24) if index >= 12 => {
            let slot = index - 12;
            format!("Today {:02}:00-{:02}:00", slot * 2, (slot + 1) * 2)
        }
        ("D", 24) => format!("Yesterday {:02}:00-{:02}:00", index * 2, (index + 1) * 2),
        ("W", 14) if index >= 7 => format!("this week {}", DAYS[index - 7]),
        ("W", 14) => format!("last week {}", DAYS[index]),
        ("M", 24) if index >= 12 => format!("this year {}", MONTHS[index - 12]),
        ("M", 24) => format!("last year {}", MONTHS[index]),
        _ => String::new(),
    }
}

/// Last non-null value per series, carried from one poll to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumptionState {
    last_seen: BTreeMap<String, i64>,
}

impl ConsumptionState {
    /// Last non-null value recorded for a series base id.
    pub fn last(&self, series_id: &str) -> Option<i64> {
        self.last_seen.get(series_id).copied()
    }
}

/// One decoded sub-property value. `value == None` is an explicit "no value".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub id: String,
    pub value: Option<i64>,
}

/// Result of decoding one poll.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedBatch {
    /// Every sub-property publication, in series order, `-last` after each series.
    pub readings: Vec<Reading>,
    /// State to thread into the next poll.
    pub state: ConsumptionState,
}

impl DecodedBatch {
    /// Readings that carry a value, as `(id, text)` pairs for a batch line.
    pub fn recorded(&self) -> impl Iterator<Item = (&str, String)> {
        self.readings
            .iter()
            .filter_map(|r| r.value.map(|v| (r.id.as_str(), v.to_string())))
    }
}

/// Expands one consumption property into its sub-properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionDecoder {
    base_name: String,
}

impl ConsumptionDecoder {
    /// Create a decoder naming its sub-properties after `base_name`
    /// (the owning property's id).
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
        }
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Describe the sub-properties present in the current snapshot. No
    /// values are produced.
    pub fn setup(&self, group: &str, payload: &str) -> Result<Vec<Channel>, ConsumptionError> {
        let mut channels = Vec::new();
        for series in parse_series(payload)? {
            let base_id = series.base_id(&self.base_name);
            let prefix = series.label_prefix();
            let len = series.samples.len();
            for index in 0..len {
                let label = format!(
                    "{}[{}] {}",
                    prefix,
                    index,
                    bucket_label(&series.field, index, len)
                );
                channels.push(Channel::consumption(
                    format!("{}-{}", base_id, index),
                    group,
                    label.trim_end(),
                ));
            }
            channels.push(Channel::consumption(
                format!("{}-last", base_id),
                group,
                format!("{} last non-null value", prefix),
            ));
        }
        Ok(channels)
    }

    /// Decode one poll. Null entries yield explicit "no value" readings;
    /// the `-last` slot takes the last non-null entry of this poll, or the
    /// one remembered in `state` when every entry is null.
    pub fn decode(
        &self,
        state: &ConsumptionState,
        payload: &str,
    ) -> Result<DecodedBatch, ConsumptionError> {
        let mut batch = DecodedBatch {
            readings: Vec::new(),
            state: state.clone(),
        };
        for series in parse_series(payload)? {
            let base_id = series.base_id(&self.base_name);
            let mut last_non_null = state.last(&base_id);
            for (index, sample) in series.samples.iter().enumerate() {
                if let Some(value) = sample {
                    last_non_null = Some(*value);
                }
                batch.readings.push(Reading {
                    id: format!("{}-{}", base_id, index),
                    value: *sample,
                });
            }
            batch.readings.push(Reading {
                id: format!("{}-last", base_id),
                value: last_non_null,
            });
            if let Some(value) = last_non_null {
                batch.state.last_seen.insert(base_id, value);
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_with_nulls() {
        let decoder = ConsumptionDecoder::new("energy");
        let batch = decoder
            .decode(
                &ConsumptionState::default(),
                r#"{"Electrical":{"Heating":{"D":[0,null,5]}}}"#,
            )
            .unwrap();

        assert_eq!(
            batch.readings,
            vec![
                Reading { id: "energy-electrical-heating-d-0".into(), value: Some(0) },
                Reading { id: "energy-electrical-heating-d-1".into(), value: None },
                Reading { id: "energy-electrical-heating-d-2".into(), value: Some(5) },
                Reading { id: "energy-electrical-heating-d-last".into(), value: Some(5) },
            ]
        );
        let recorded: Vec<_> = batch.recorded().collect();
        assert_eq!(recorded.len(), 3);
        assert_eq!(batch.state.last("energy-electrical-heating-d"), Some(5));
    }

    #[test]
    fn test_all_null_uses_previous_state() {
        let decoder = ConsumptionDecoder::new("energy");
        let first = decoder
            .decode(&ConsumptionState::default(), r#"{"E":{"H":{"D":[3,7,null]}}}"#)
            .unwrap();
        let second = decoder
            .decode(&first.state, r#"{"E":{"H":{"D":[null,null,null]}}}"#)
            .unwrap();

        let last = second.readings.last().unwrap();
        assert_eq!(last.id, "energy-e-h-d-last");
        assert_eq!(last.value, Some(7));
    }

    #[test]
    fn test_all_null_without_history() {
        let decoder = ConsumptionDecoder::new("energy");
        let batch = decoder
            .decode(&ConsumptionState::default(), r#"{"E":{"H":{"W":[null,null]}}}"#)
            .unwrap();

        assert!(batch.readings.iter().all(|r| r.value.is_none()));
        assert_eq!(batch.recorded().count(), 0);
    }

    #[test]
    fn test_setup_describes_channels() {
        let decoder = ConsumptionDecoder::new("1-consumption");
        let payload = format!(
            r#"{{"Electrical":{{"Heating":{{"D":[{}]}}}}}}"#,
            vec!["0"; 24].join(",")
        );
        let channels = decoder.setup("SpaceHeating", &payload).unwrap();

        assert_eq!(channels.len(), 25);
        assert_eq!(channels[0].id, "1-consumption-electrical-heating-d-0");
        assert_eq!(channels[0].name, "Electrical/Heating/D[0] Yesterday 00:00-02:00");
        assert_eq!(channels[13].name, "Electrical/Heating/D[13] Today 02:00-04:00");
        assert_eq!(channels[24].id, "1-consumption-electrical-heating-d-last");
        assert_eq!(channels[24].name, "Electrical/Heating/D last non-null value");
        assert_eq!(channels[24].unit, CONSUMPTION_UNIT);
        assert!(channels.iter().all(|c| c.retained));
    }

    #[test]
    fn test_bucket_labels() {
        assert_eq!(bucket_label("D", 0, 24), "Yesterday 00:00-02:00");
        assert_eq!(bucket_label("D", 23, 24), "Today 22:00-24:00");
        assert_eq!(bucket_label("W", 0, 14), "last week Mon");
        assert_eq!(bucket_label("W", 13, 14), "this week Sun");
        assert_eq!(bucket_label("M", 11, 24), "last year Dec");
        assert_eq!(bucket_label("M", 12, 24), "this year Jan");
    }

    #[test]
    fn test_bucket_labels_undocumented_layouts() {
        assert_eq!(bucket_label("D", 0, 3), "");
        assert_eq!(bucket_label("W", 0, 24), "");
        assert_eq!(bucket_label("M", 0, 14), "");
        assert_eq!(bucket_label("Y", 0, 24), "");
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let decoder = ConsumptionDecoder::new("energy");
        assert!(matches!(
            decoder.decode(&ConsumptionState::default(), r#"{"E":{"H":{"D":5}}}"#),
            Err(ConsumptionError::UnexpectedShape(_))
        ));
        assert!(matches!(
            decoder.decode(&ConsumptionState::default(), "not json"),
            Err(ConsumptionError::InvalidJson(_))
        ));
    }
}
