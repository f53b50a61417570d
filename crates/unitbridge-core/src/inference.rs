//! Best-effort data type inference.
//!
//! Combines a live sample with the profile node describing it. The profile
//! is irregular: ranges may sit on the node itself or one level below it
//! under arbitrary keys, enumerations are plain arrays, and many leaves carry
//! no metadata at all. Whatever cannot be read from the profile falls back
//! to guessing from the sampled text.

use serde_json::Value;
use tracing::trace;

use crate::property::{DataType, Property};

/// Outcome of inference for one property.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Inference {
    pub data_type: DataType,
    pub format: String,
    pub unit: String,
}

impl Inference {
    fn of(data_type: DataType) -> Self {
        Self {
            data_type,
            ..Default::default()
        }
    }

    /// Copy the inferred metadata onto a property.
    pub fn apply_to(self, property: &mut Property) {
        property.data_type = self.data_type;
        property.format = self.format;
        property.unit = self.unit;
    }
}

/// Infer type, format and unit from a sample and an optional profile node.
pub fn infer(sample: &str, profile: Option<&Value>) -> Inference {
    match profile {
        Some(Value::Object(node)) => infer_from_object(sample, node),
        Some(Value::Array(items)) => infer_from_array(items),
        _ => {
            trace!(sample, "No profile metadata, guessing from value");
            Inference::of(guess_from_value(sample))
        }
    }
}

/// Integer, then decimal, then free text.
pub fn guess_from_value(sample: &str) -> DataType {
    if sample.parse::<i64>().is_ok() {
        DataType::Integer
    } else if parse_decimal(sample).is_some() {
        DataType::Float
    } else {
        DataType::String
    }
}

/// Parse a finite decimal number.
pub fn parse_decimal(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Default)]
struct RangeMetadata {
    min: Option<f64>,
    max: Option<f64>,
    step: Option<f64>,
    unit: Option<String>,
}

impl RangeMetadata {
    fn collect(&mut self, node: &serde_json::Map<String, Value>) {
        if let Some(v) = node.get("minValue").and_then(as_number) {
            self.min = Some(v);
        }
        if let Some(v) = node.get("maxValue").and_then(as_number) {
            self.max = Some(v);
        }
        if let Some(v) = node.get("stepValue").and_then(as_number) {
            self.step = Some(v);
        }
        if let Some(Value::String(unit)) = node.get("unit") {
            self.unit = Some(unit.clone());
        }
    }
}

fn infer_from_object(sample: &str, node: &serde_json::Map<String, Value>) -> Inference {
    let mut meta = RangeMetadata::default();
    meta.collect(node);
    for child in node.values() {
        if let Value::Object(child) = child {
            meta.collect(child);
        }
    }

    let unit = meta.unit.unwrap_or_default();
    match (meta.min, meta.max) {
        (Some(min), Some(max)) => {
            let data_type = match meta.step {
                Some(step) if step.fract() == 0.0 => DataType::Integer,
                _ => DataType::Float,
            };
            Inference {
                data_type,
                format: format!("{}:{}", plain_number(min), plain_number(max)),
                unit,
            }
        }
        _ => Inference {
            data_type: guess_from_value(sample),
            format: String::new(),
            unit,
        },
    }
}

fn infer_from_array(items: &[Value]) -> Inference {
    let mut choices = Vec::with_capacity(items.len());
    for item in items {
        match scalar_text(item) {
            Some(text) => choices.push(text),
            None => return Inference::default(),
        }
    }
    Inference {
        data_type: DataType::Enum,
        format: choices.join(","),
        unit: String::new(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }
}

/// Text of a scalar JSON value; `None` for objects, arrays and null.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Render a number without trailing zeros or exponent.
pub fn plain_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_only_guessing() {
        assert_eq!(infer("42", None).data_type, DataType::Integer);
        assert_eq!(infer("-7", None).data_type, DataType::Integer);
        assert_eq!(infer("3.14", None).data_type, DataType::Float);
        assert_eq!(infer("on", None).data_type, DataType::String);
        assert_eq!(infer("", None).data_type, DataType::String);
        assert_eq!(infer("NaN", None).data_type, DataType::String);
        assert_eq!(infer("inf", None).data_type, DataType::String);
    }

    #[test]
    fn test_primitive_profile_falls_back() {
        let profile = json!("IndoorTemperature");
        assert_eq!(infer("21.5", Some(&profile)).data_type, DataType::Float);
    }

    #[test]
    fn test_integer_range() {
        let profile = json!({"minValue": 0, "maxValue": 100, "stepValue": 1});
        let inference = infer("50", Some(&profile));
        assert_eq!(inference.data_type, DataType::Integer);
        assert_eq!(inference.format, "0:100");
    }

    #[test]
    fn test_float_range() {
        let profile = json!({"minValue": 0, "maxValue": 1.5, "stepValue": 0.1});
        let inference = infer("0.3", Some(&profile));
        assert_eq!(inference.data_type, DataType::Float);
        assert_eq!(inference.format, "0:1.5");
    }

    #[test]
    fn test_range_without_step_is_float() {
        let profile = json!({"minValue": 10.0, "maxValue": 30.0});
        let inference = infer("20", Some(&profile));
        assert_eq!(inference.data_type, DataType::Float);
        assert_eq!(inference.format, "10:30");
    }

    #[test]
    fn test_nested_range_and_unit() {
        let profile = json!({
            "heating": {"minValue": 12, "maxValue": 30, "stepValue": 0.5},
            "settable": true,
            "display": {"unit": "°C"}
        });
        let inference = infer("21", Some(&profile));
        assert_eq!(inference.data_type, DataType::Float);
        assert_eq!(inference.format, "12:30");
        assert_eq!(inference.unit, "°C");
    }

    #[test]
    fn test_object_without_range() {
        let profile = json!({"settable": false, "meta": {"unit": "bar"}});
        let inference = infer("1.7", Some(&profile));
        assert_eq!(inference.data_type, DataType::Float);
        assert_eq!(inference.format, "");
        assert_eq!(inference.unit, "bar");
    }

    #[test]
    fn test_enum_profile() {
        let profile = json!(["LOW", "MED", "HIGH"]);
        let inference = infer("MED", Some(&profile));
        assert_eq!(inference.data_type, DataType::Enum);
        assert_eq!(inference.format, "LOW,MED,HIGH");
    }

    #[test]
    fn test_mixed_array_leaves_default() {
        let profile = json!(["on", {"mode": "x"}]);
        let inference = infer("on", Some(&profile));
        assert_eq!(inference, Inference::default());
        assert_eq!(inference.data_type, DataType::String);
    }

    #[test]
    fn test_plain_number() {
        assert_eq!(plain_number(100.0), "100");
        assert_eq!(plain_number(1.5), "1.5");
        assert_eq!(plain_number(-0.25), "-0.25");
    }
}
