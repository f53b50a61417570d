//! Simulated appliance gateway.
//!
//! Implements [`Transport`] by answering request envelopes from an in-memory
//! resource table. Unknown targets answer `4004`, writes update the stored
//! value and are recorded for inspection through a [`GatewayHandle`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::trace;

use unitbridge_core::envelope::{
    CODE_CREATED, CODE_OK, DEVICE_INFO_TARGET, DEVICE_ROOT, LATEST, REQUEST_KEY, RESPONSE_KEY,
};
use unitbridge_core::transport::{Endpoint, Transport, TransportError};

/// Result code for a missing resource.
pub const CODE_NOT_FOUND: u32 = 4004;

#[derive(Debug, Clone)]
enum Resource {
    Container { label: Option<String> },
    Content(String),
    Sequence(VecDeque<String>),
    DeviceInfo(Value),
}

#[derive(Debug)]
struct GatewayState {
    resources: HashMap<String, Resource>,
    silent: HashSet<String>,
    failing: HashSet<String>,
    refuse_connect: bool,
    write_code: u32,
    writes: Vec<(String, String)>,
    queries: Vec<String>,
    connects: usize,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self {
            resources: HashMap::new(),
            silent: HashSet::new(),
            failing: HashSet::new(),
            refuse_connect: false,
            write_code: CODE_CREATED,
            writes: Vec::new(),
            queries: Vec::new(),
            connects: 0,
        }
    }
}

enum Inbound {
    Text(String),
    Failure,
}

/// In-memory gateway speaking the envelope protocol.
pub struct SimulatedGateway {
    state: Arc<Mutex<GatewayState>>,
    inbox: VecDeque<Inbound>,
    open: bool,
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedGateway {
    /// An empty gateway: every query answers `4004`.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GatewayState::default())),
            inbox: VecDeque::new(),
            open: false,
        }
    }

    /// Handle for inspecting and changing the gateway after it was moved
    /// into a session.
    pub fn handle(&self) -> GatewayHandle {
        GatewayHandle {
            state: self.state.clone(),
        }
    }

    fn with_state(self, f: impl FnOnce(&mut GatewayState)) -> Self {
        f(&mut lock(&self.state));
        self
    }

    /// Register group `index`, answering its container with `label`.
    pub fn with_group(self, index: u32, label: Option<&str>) -> Self {
        let label = label.map(str::to_string);
        self.with_state(|s| {
            s.resources
                .insert(index.to_string(), Resource::Container { label });
        })
    }

    /// Register the profile document of group `index`.
    pub fn with_profile(self, index: u32, profile: Value) -> Self {
        self.with_value(&format!("{}/UnitProfile", index), profile.to_string())
    }

    /// Register the latest value of `path`.
    pub fn with_value(self, path: &str, value: impl Into<String>) -> Self {
        let key = format!("{}{}", path, LATEST);
        let value = value.into();
        self.with_state(|s| {
            s.resources.insert(key, Resource::Content(value));
        })
    }

    /// Register successive values of `path`. Each query consumes one value;
    /// the last one keeps being answered.
    pub fn with_values<I, S>(self, path: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = format!("{}{}", path, LATEST);
        let values: VecDeque<String> = values.into_iter().map(Into::into).collect();
        self.with_state(|s| {
            s.resources.insert(key, Resource::Sequence(values));
        })
    }

    /// Register the `deviceInfo` description.
    pub fn with_device_info(self, info: Value) -> Self {
        self.with_state(|s| {
            s.resources
                .insert(DEVICE_INFO_TARGET.to_string(), Resource::DeviceInfo(info));
        })
    }

    /// Never answer queries for `target` (device-relative, including `/la`).
    pub fn with_silent(self, target: &str) -> Self {
        let target = target.to_string();
        self.with_state(|s| {
            s.silent.insert(target);
        })
    }

    /// Fail the socket when `target` is queried.
    pub fn with_failure(self, target: &str) -> Self {
        let target = target.to_string();
        self.with_state(|s| {
            s.failing.insert(target);
        })
    }

    /// Result code for write requests.
    pub fn with_write_code(self, code: u32) -> Self {
        self.with_state(|s| s.write_code = code)
    }

    fn answer(&mut self, text: &str) {
        let request: Value = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(_) => return,
        };
        let Some(body) = request.get(REQUEST_KEY) else {
            return;
        };
        let token = body.get("rqi").and_then(Value::as_str).unwrap_or_default();
        let to = body.get("to").and_then(Value::as_str).unwrap_or_default();
        let target = to
            .strip_prefix(DEVICE_ROOT)
            .map(|t| t.trim_start_matches('/'))
            .unwrap_or(to)
            .to_string();
        let is_write = body.get("op").and_then(Value::as_u64) == Some(1);

        let mut state = lock(&self.state);
        state.queries.push(target.clone());
        trace!(target = %target, write = is_write, "Simulated request");

        if state.failing.contains(&target) {
            self.inbox.push_back(Inbound::Failure);
            return;
        }
        if state.silent.contains(&target) {
            return;
        }

        let reply = if is_write {
            let value = body
                .pointer("/pc/m2m:cin/con")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            state.writes.push((target.clone(), value.clone()));
            state
                .resources
                .insert(format!("{}{}", target, LATEST), Resource::Content(value));
            json!({ "rsc": state.write_code, "rqi": token })
        } else {
            match state.resources.get_mut(&target) {
                Some(Resource::Container { label }) => {
                    let mut cnt = json!({ "rn": target });
                    if let Some(label) = label {
                        cnt["lbl"] = json!(label);
                    }
                    json!({ "rsc": CODE_OK, "rqi": token, "pc": { "m2m:cnt": cnt } })
                }
                Some(Resource::Content(con)) => content_reply(token, con),
                Some(Resource::Sequence(values)) => {
                    let con = if values.len() > 1 {
                        values.pop_front().unwrap_or_default()
                    } else {
                        values.front().cloned().unwrap_or_default()
                    };
                    content_reply(token, &con)
                }
                Some(Resource::DeviceInfo(info)) => json!({
                    "rsc": CODE_OK,
                    "rqi": token,
                    "pc": { "m2m:dvi": info }
                }),
                None => json!({ "rsc": CODE_NOT_FOUND, "rqi": token }),
            }
        };
        self.inbox
            .push_back(Inbound::Text(json!({ RESPONSE_KEY: reply }).to_string()));
    }
}

#[async_trait]
impl Transport for SimulatedGateway {
    async fn open(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.refuse_connect {
            return Err(TransportError::ConnectionFailed {
                url: endpoint.url(),
                reason: "connection refused".to_string(),
            });
        }
        state.connects += 1;
        self.open = true;
        self.inbox.clear();
        Ok(())
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        self.answer(&text);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        match self.inbox.pop_front() {
            Some(Inbound::Text(text)) => Ok(Some(text)),
            Some(Inbound::Failure) => {
                self.open = false;
                Err(TransportError::ReceiveFailed("connection reset".to_string()))
            }
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.open = false;
        self.inbox.clear();
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Shared view of a [`SimulatedGateway`].
#[derive(Clone)]
pub struct GatewayHandle {
    state: Arc<Mutex<GatewayState>>,
}

impl GatewayHandle {
    /// Writes received so far as `(path, value)`.
    pub fn writes(&self) -> Vec<(String, String)> {
        lock(&self.state).writes.clone()
    }

    /// Every device-relative target queried so far.
    pub fn queries(&self) -> Vec<String> {
        lock(&self.state).queries.clone()
    }

    /// Number of successful connects.
    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    pub fn set_refuse_connect(&self, refuse: bool) {
        lock(&self.state).refuse_connect = refuse;
    }

    /// Replace the latest value of `path`.
    pub fn set_value(&self, path: &str, value: impl Into<String>) {
        lock(&self.state).resources.insert(
            format!("{}{}", path, LATEST),
            Resource::Content(value.into()),
        );
    }

    /// Remove the latest value of `path`; it then answers `4004`.
    pub fn remove_value(&self, path: &str) {
        lock(&self.state)
            .resources
            .remove(&format!("{}{}", path, LATEST));
    }
}

fn content_reply(token: &str, con: &str) -> Value {
    json!({
        "rsc": CODE_OK,
        "rqi": token,
        "pc": { "m2m:cin": { "ty": 4, "con": con } }
    })
}

fn lock(state: &Mutex<GatewayState>) -> MutexGuard<'_, GatewayState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
