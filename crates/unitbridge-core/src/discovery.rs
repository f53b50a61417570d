//! Capability discovery.
//!
//! The gateway exposes numbered groups (`0`, `1`, …) until a query fails. For
//! each group the engine probes a list of well-known endpoints and walks the
//! group's `UnitProfile` document, sampling every candidate path and turning
//! each one that answers into a typed [`Property`].

use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::inference::{infer, scalar_text};
use crate::property::{path_depth, Property, PropertySet, PATH_SEPARATOR};
use crate::session::{QueryError, Session};
use crate::transport::{Transport, TransportError};

/// Endpoints probed below every group in addition to its profile.
pub const DEFAULT_ENDPOINTS: &[&str] = &[
    "/Sensor/IndoorTemperature",
    "/Sensor/OutdoorTemperature",
    "/Sensor/LeavingWaterTemperatureCurrent",
    "/Sensor/TankTemperature",
    "/Operation/Power",
    "/Operation/OperationMode",
    "/Operation/TargetTemperature",
    "/Operation/DomesticHotWaterTankSetpoint",
    "/UnitStatus/ErrorState",
    "/UnitStatus/WarningState",
    "/UnitStatus/EmergencyState",
    "/UnitStatus/InstallerState",
    "/Consumption",
    "/UnitInfo/Version/IndoorSoftware",
    "/UnitInfo/Version/OutdoorSoftware",
    "/UnitInfo/ModelNumber",
];

const UNIT_PROFILE: &str = "UnitProfile";

/// Discovery error types.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The session could not be opened.
    #[error("Discovery could not connect: {0}")]
    Connect(#[source] TransportError),

    /// Enumerating groups failed before a terminating reply was seen.
    #[error("Group enumeration failed at index {index}: {source}")]
    Enumeration {
        index: u32,
        #[source]
        source: QueryError,
    },
}

/// Parse an endpoint list, one suffix per line. Blank lines and `#` comments
/// are ignored; a missing leading separator is added.
pub fn parse_endpoint_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(normalize_suffix)
        .collect()
}

fn normalize_suffix(suffix: &str) -> String {
    if suffix.starts_with(PATH_SEPARATOR) {
        suffix.to_string()
    } else {
        format!("{}{}", PATH_SEPARATOR, suffix)
    }
}

/// Human label of a group: the container label after its last separator,
/// falling back to the group index.
fn group_label(label: Option<String>, index: u32) -> String {
    label
        .and_then(|label| {
            let tail = label.rsplit(PATH_SEPARATOR).next().unwrap_or_default().trim();
            (!tail.is_empty()).then(|| tail.to_string())
        })
        .unwrap_or_else(|| index.to_string())
}

/// Walks the gateway and builds the property set.
#[derive(Debug, Clone)]
pub struct DiscoveryEngine {
    endpoints: Vec<String>,
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINTS.iter().copied())
    }
}

impl DiscoveryEngine {
    /// Create an engine probing the given endpoint suffixes.
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            endpoints: endpoints
                .into_iter()
                .map(|s| normalize_suffix(s.as_ref().trim()))
                .collect(),
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Discover all properties. The session is connected on entry and always
    /// disconnected on exit.
    pub async fn discover<T: Transport>(
        &self,
        session: &mut Session<T>,
    ) -> Result<PropertySet, DiscoveryError> {
        info!(endpoint = %session.endpoint(), "Starting discovery");
        session.connect().await.map_err(DiscoveryError::Connect)?;
        let result = self.enumerate_groups(session).await;
        session.disconnect().await;

        if let Ok(properties) = &result {
            info!(count = properties.len(), "Discovery finished");
        }
        result
    }

    async fn enumerate_groups<T: Transport>(
        &self,
        session: &mut Session<T>,
    ) -> Result<PropertySet, DiscoveryError> {
        let mut properties = PropertySet::new();

        for index in 0u32.. {
            let response = session
                .query(&index.to_string())
                .await
                .map_err(|source| DiscoveryError::Enumeration { index, source })?;
            if !response.is_success() {
                debug!(index, code = response.code, "No further groups");
                break;
            }

            let group = group_label(response.label(), index);
            debug!(index, group = %group, "Found group");

            for suffix in &self.endpoints {
                let path = format!("{}{}", index, suffix);
                probe_endpoint(session, &path, &group, &mut properties).await;
            }

            match fetch_profile(session, index).await {
                Some(profile) => {
                    walk_profile(session, &index.to_string(), &profile, &group, &mut properties)
                        .await
                }
                None => warn!(index, group = %group, "Skipping profile walk"),
            }
        }

        Ok(properties)
    }
}

/// Sample one well-known endpoint and record it when it answers.
async fn probe_endpoint<T: Transport>(
    session: &mut Session<T>,
    path: &str,
    group: &str,
    properties: &mut PropertySet,
) {
    let response = match session.query_latest(path).await {
        Ok(response) => response,
        Err(e) => {
            debug!(path, "Endpoint probe failed: {}", e);
            reopen_after(session, &e).await;
            return;
        }
    };
    if !response.is_success() {
        trace!(path, code = response.code, "Endpoint not present");
        return;
    }
    let Some(value) = response.content() else {
        debug!(path, "Endpoint answered without content");
        return;
    };

    debug!(path, value = %value, "Found endpoint");
    let mut property = Property::new(path, group).with_value(value);
    infer(&property.value, None).apply_to(&mut property);
    properties.upsert(property);
}

/// Fetch and parse a group's profile document.
async fn fetch_profile<T: Transport>(session: &mut Session<T>, index: u32) -> Option<Value> {
    let path = format!("{}{}{}", index, PATH_SEPARATOR, UNIT_PROFILE);
    let response = match session.query_latest(&path).await {
        Ok(response) if response.is_success() => response,
        Ok(response) => {
            debug!(path = %path, code = response.code, "Profile not available");
            return None;
        }
        Err(e) => {
            warn!(path = %path, "Profile query failed: {}", e);
            reopen_after(session, &e).await;
            return None;
        }
    };
    let content = response.content()?;
    trace!(path = %path, profile = %content, "Profile");
    match serde_json::from_str(&content) {
        Ok(profile) => Some(profile),
        Err(e) => {
            warn!(path = %path, "Profile is not valid JSON: {}", e);
            None
        }
    }
}

/// Depth-first walk of a profile document, sampling each candidate path.
///
/// A primitive node names one more path segment. Objects add one segment per
/// key; array elements stay at the path of the array. A branch whose sample
/// query fails is not descended into.
async fn walk_profile<T: Transport>(
    session: &mut Session<T>,
    root_path: &str,
    profile: &Value,
    group: &str,
    properties: &mut PropertySet,
) {
    let mut worklist: Vec<(String, &Value)> = vec![(root_path.to_string(), profile)];

    while let Some((mut path, node)) = worklist.pop() {
        if let Some(segment) = primitive_segment(node) {
            path = format!("{}{}{}", path, PATH_SEPARATOR, segment);
        }

        let response = match session.query_latest(&path).await {
            Ok(response) => response,
            Err(e) => {
                debug!(path = %path, "Sample failed, skipping branch: {}", e);
                reopen_after(session, &e).await;
                continue;
            }
        };

        if response.is_success() && path_depth(&path) > 1 {
            let Some(value) = response.content() else {
                debug!(path = %path, "Sample carries no content, skipping branch");
                continue;
            };
            let mut property = Property::new(path.as_str(), group).with_value(value);
            infer(&property.value, Some(node)).apply_to(&mut property);
            debug!(path = %path, data_type = %property.data_type, "Found property");
            if properties.upsert(property).is_some() {
                trace!(path = %path, "Replaced earlier property");
            }
        }

        match node {
            Value::Object(children) => {
                for (key, child) in children.iter().rev() {
                    worklist.push((format!("{}{}{}", path, PATH_SEPARATOR, key), child));
                }
            }
            Value::Array(items) => {
                for item in items.iter().rev() {
                    worklist.push((path.clone(), item));
                }
            }
            _ => {}
        }
    }
}

/// Reopen the socket after a candidate query broke it, so the remaining
/// candidates and groups are still queried.
async fn reopen_after<T: Transport>(session: &mut Session<T>, error: &QueryError) {
    if !matches!(error, QueryError::Transport(_)) || session.is_connected() {
        return;
    }
    if let Err(e) = session.connect().await {
        warn!(endpoint = %session.endpoint(), "Reconnect after failed query failed: {}", e);
    }
}

fn primitive_segment(node: &Value) -> Option<String> {
    match node {
        Value::Object(_) | Value::Array(_) | Value::Null => None,
        scalar => scalar_text(scalar),
    }
}
