//! Canned gateway contents.

use serde_json::{json, Value};

use crate::gateway::SimulatedGateway;

/// A two-group heating unit: an adapter group and a space heating group with
/// sensors, settable operation values and an energy history.
pub fn heating_unit() -> SimulatedGateway {
    SimulatedGateway::new()
        .with_device_info(device_info())
        .with_group(0, Some("function/Adapter"))
        .with_profile(0, json!({ "UnitInfo": ["Version"] }))
        .with_value("0/UnitInfo/Version", "v1.2.3")
        .with_group(1, Some("function/SpaceHeating"))
        .with_profile(1, space_heating_profile())
        .with_value("1/Sensor/IndoorTemperature", "21.5")
        .with_value("1/Sensor/OutdoorTemperature", "-3")
        .with_value("1/Operation/Power", "on")
        .with_value("1/Operation/TargetTemperature", "21")
        .with_value("1/UnitStatus/ErrorState", "0")
        .with_value("1/Consumption", consumption_history().to_string())
}

/// Profile of the space heating group.
pub fn space_heating_profile() -> Value {
    json!({
        "Sensor": ["IndoorTemperature", "OutdoorTemperature"],
        "Operation": {
            "Power": ["on", "standby"],
            "TargetTemperature": {
                "heating": { "minValue": 12, "maxValue": 30, "stepValue": 0.5 },
                "settable": true,
                "display": { "unit": "°C" }
            }
        },
        "UnitStatus": ["ErrorState"],
        "Consumption": {}
    })
}

/// `deviceInfo` description of the unit.
pub fn device_info() -> Value {
    json!({
        "dlb": "HeatingUnit",
        "mod": "HU-200",
        "dty": "heating",
        "fwv": "1.2.3",
        "swv": "4.5.6",
        "hwv": "2"
    })
}

/// Energy history with documented layouts and a trailing run of nulls.
pub fn consumption_history() -> Value {
    let daily: Vec<Value> = (0..24)
        .map(|i| if i < 16 { json!(i % 3) } else { Value::Null })
        .collect();
    let weekly: Vec<Value> = (0..14)
        .map(|i| if i < 9 { json!(10 + i) } else { Value::Null })
        .collect();
    let monthly: Vec<Value> = (0..24)
        .map(|i| if i < 13 { json!(300 - i * 10) } else { Value::Null })
        .collect();
    json!({ "Electrical": { "Heating": { "D": daily, "W": weekly, "M": monthly } } })
}
