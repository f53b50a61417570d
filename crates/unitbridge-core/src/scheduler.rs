//! Tiered polling.
//!
//! Every property carries a poll interval. The scheduler keeps one deadline
//! per tier, wakes up every few seconds, samples the properties whose tier
//! deadline has passed and publishes their values. A tick that sampled
//! anything also renders one batch line for a time-series sink.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::consumption::{ConsumptionDecoder, ConsumptionState};
use crate::inference::parse_decimal;
use crate::property::{DataType, PollInterval, PostProcessing, Property};
use crate::publish::{Channel, Publisher};
use crate::session::{QueryError, Session, SharedSession};
use crate::settings::BatchSettings;
use crate::transport::{Transport, TransportError};

/// Pause between ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Pause after the gateway refused a connection.
pub const CONNECT_BACKOFF: Duration = Duration::from_secs(30);

const TIERS: [PollInterval; 4] = [
    PollInterval::Minutely,
    PollInterval::Hourly,
    PollInterval::BiHourly,
    PollInterval::Daily,
];

/// Sampling error types.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("Query failed: {0}")]
    Query(#[from] QueryError),

    #[error("Gateway answered {code} for {path}")]
    Rejected { path: String, code: u32 },

    #[error("Reply for {0} carries no content")]
    MissingContent(String),

    #[error("Value '{value}' of {path} is not a valid {data_type}")]
    InvalidValue {
        path: String,
        data_type: DataType,
        value: String,
    },
}

/// Length of one tier period. `None` for intervals that are never scheduled.
pub fn period(interval: PollInterval) -> Option<chrono::Duration> {
    match interval {
        PollInterval::Minutely => Some(chrono::Duration::seconds(60)),
        PollInterval::Hourly => Some(chrono::Duration::seconds(3_600)),
        PollInterval::BiHourly => Some(chrono::Duration::seconds(7_200)),
        PollInterval::Daily => Some(chrono::Duration::seconds(86_400)),
        PollInterval::Never | PollInterval::Once => None,
    }
}

/// Next due time of each tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deadlines {
    next: [DateTime<Utc>; 4],
}

impl Deadlines {
    /// Every tier becomes due one period after `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            next: TIERS.map(|tier| start + period(tier).unwrap_or_else(chrono::Duration::zero)),
        }
    }

    fn slot(interval: PollInterval) -> Option<usize> {
        TIERS.iter().position(|tier| *tier == interval)
    }

    pub fn deadline(&self, interval: PollInterval) -> Option<DateTime<Utc>> {
        Self::slot(interval).map(|slot| self.next[slot])
    }

    /// Whether the tier's deadline has passed at `now`.
    pub fn is_due(&self, interval: PollInterval, now: DateTime<Utc>) -> bool {
        self.deadline(interval).is_some_and(|deadline| now > deadline)
    }

    /// Tiers due at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<PollInterval> {
        TIERS
            .into_iter()
            .filter(|tier| self.is_due(*tier, now))
            .collect()
    }

    /// Move every passed deadline forward by exactly one period. A tier that
    /// fell several periods behind catches up over as many passes.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        for (slot, tier) in TIERS.into_iter().enumerate() {
            if now > self.next[slot] {
                self.next[slot] += period(tier).unwrap_or_else(chrono::Duration::zero);
            }
        }
    }
}

/// Post-processing attached to a polled property.
#[derive(Debug, Clone)]
pub enum Decoder {
    Plain,
    Consumption {
        decoder: ConsumptionDecoder,
        state: ConsumptionState,
    },
}

impl Decoder {
    fn for_property(property: &Property) -> Self {
        match property.post_processing {
            PostProcessing::Consumption => Self::Consumption {
                decoder: ConsumptionDecoder::new(property.id()),
                state: ConsumptionState::default(),
            },
            PostProcessing::None => Self::Plain,
        }
    }
}

/// A property under the scheduler's control.
#[derive(Debug, Clone)]
pub struct PolledProperty {
    pub property: Property,
    pub decoder: Decoder,
}

impl From<Property> for PolledProperty {
    fn from(property: Property) -> Self {
        let decoder = Decoder::for_property(&property);
        Self { property, decoder }
    }
}

/// A value rendered for publication and for the batch line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedValue {
    /// Text for the per-value publisher; `None` when nothing is published.
    pub published: Option<String>,
    /// Field value in the batch line.
    pub recorded: String,
}

/// Render a raw sample according to its data type.
pub fn format_value(data_type: DataType, raw: &str) -> Option<FormattedValue> {
    match data_type {
        DataType::Float => {
            let value = parse_decimal(raw)?.to_string();
            Some(FormattedValue {
                published: Some(value.clone()),
                recorded: value,
            })
        }
        DataType::Boolean => {
            let off = raw == "0";
            Some(FormattedValue {
                published: Some(if off { "false" } else { "true" }.to_string()),
                recorded: if off { "0" } else { "1" }.to_string(),
            })
        }
        DataType::Integer => {
            let value = match raw.parse::<i64>() {
                Ok(value) => value,
                Err(_) => parse_decimal(raw)?.trunc() as i64,
            };
            Some(FormattedValue {
                published: Some(value.to_string()),
                recorded: value.to_string(),
            })
        }
        DataType::String | DataType::Enum => Some(FormattedValue {
            published: (!raw.is_empty()).then(|| raw.to_string()),
            recorded: quote(raw),
        }),
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Render `<table>,<tagKey>=<tagValue> k1=v1,k2=v2 <unixNanos>`. No fields,
/// no line.
pub fn render_batch_line(
    batch: &BatchSettings,
    fields: &[(String, String)],
    timestamp: DateTime<Utc>,
) -> Option<String> {
    if fields.is_empty() {
        return None;
    }
    let fields = fields
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",");
    let nanos = timestamp
        .timestamp_nanos_opt()
        .unwrap_or_else(|| timestamp.timestamp_millis().saturating_mul(1_000_000));
    Some(format!(
        "{},{}={} {} {}",
        batch.table, batch.tag_key, batch.tag_value, fields, nanos
    ))
}

/// Sample one property: publish its value(s) and return the batch fields.
pub async fn sample<T: Transport>(
    session: &mut Session<T>,
    polled: &mut PolledProperty,
    publisher: &dyn Publisher,
) -> Result<Vec<(String, String)>, SampleError> {
    let path = polled.property.path().to_string();
    let response = session.query_latest(&path).await?;
    if !response.is_success() {
        return Err(SampleError::Rejected {
            path,
            code: response.code,
        });
    }
    let raw = response
        .content()
        .ok_or_else(|| SampleError::MissingContent(path.clone()))?;
    let raw = raw.trim();
    debug!(path = %path, value = %raw, "Sampled");

    let mut fields = Vec::new();

    if let Decoder::Consumption { decoder, state } = &mut polled.decoder {
        match decoder.decode(state, raw) {
            Ok(batch) => {
                for reading in &batch.readings {
                    let value = reading.value.map(|v| v.to_string());
                    publish_value(publisher, &reading.id, value.as_deref()).await;
                }
                fields.extend(batch.recorded().map(|(id, v)| (id.to_string(), v)));
                *state = batch.state;
            }
            Err(e) => warn!(path = %path, "Cannot decode consumption: {}", e),
        }
    }

    let data_type = polled.property.data_type;
    let Some(formatted) = format_value(data_type, raw) else {
        let error = SampleError::InvalidValue {
            path: path.clone(),
            data_type,
            value: raw.to_string(),
        };
        if fields.is_empty() {
            return Err(error);
        }
        // The expanded sub-properties were already published.
        warn!(path = %path, "{}", error);
        return Ok(fields);
    };
    let id = polled.property.id();
    if let Some(published) = &formatted.published {
        publish_value(publisher, &id, Some(published)).await;
    }
    polled.property.value = raw.to_string();
    fields.push((id, formatted.recorded));

    Ok(fields)
}

async fn publish_value(publisher: &dyn Publisher, id: &str, value: Option<&str>) {
    if let Err(e) = publisher.publish_value(id, value).await {
        warn!(id, "Failed to publish value: {}", e);
    }
}

/// Drives the polling loop over a shared session.
pub struct PollingScheduler<T> {
    session: SharedSession<T>,
    properties: Vec<PolledProperty>,
    publisher: Arc<dyn Publisher>,
    batch: BatchSettings,
    deadlines: Deadlines,
    tick_interval: Duration,
    connect_backoff: Duration,
}

impl<T: Transport> PollingScheduler<T> {
    /// Take ownership of the property list. `NEVER` properties are dropped;
    /// tier deadlines start one period after `now`.
    pub fn new(
        session: SharedSession<T>,
        properties: impl IntoIterator<Item = Property>,
        publisher: Arc<dyn Publisher>,
        batch: BatchSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let properties = properties
            .into_iter()
            .filter(|p| p.poll_interval != PollInterval::Never)
            .map(PolledProperty::from)
            .collect();
        Self {
            session,
            properties,
            publisher,
            batch,
            deadlines: Deadlines::new(now),
            tick_interval: TICK_INTERVAL,
            connect_backoff: CONNECT_BACKOFF,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_connect_backoff(mut self, backoff: Duration) -> Self {
        self.connect_backoff = backoff;
        self
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().map(|p| &p.property)
    }

    pub fn deadlines(&self) -> &Deadlines {
        &self.deadlines
    }

    /// Announce all channels, then sample every property once. This is the
    /// only time `ONCE` properties are sampled. Tier deadlines restart from
    /// the moment setup finishes.
    pub async fn setup(&mut self) {
        let mut channels = Vec::new();
        for polled in &self.properties {
            channels.push(Channel::from(&polled.property));
            if let Decoder::Consumption { decoder, .. } = &polled.decoder {
                channels.extend(self.consumption_channels(&polled.property, decoder).await);
            }
        }
        if let Err(e) = self.publisher.announce(&channels).await {
            error!("Failed to announce channels: {}", e);
        }
        info!(channels = channels.len(), "Announced channels");

        let mut session = self.session.lock().await;
        match session.connect().await {
            Ok(()) => {
                for polled in self.properties.iter_mut() {
                    if let Err(e) = sample(&mut *session, polled, self.publisher.as_ref()).await {
                        warn!(path = %polled.property.path(), "Initial sample failed: {}", e);
                    }
                }
                session.disconnect().await;
            }
            Err(e) => {
                error!(endpoint = %session.endpoint(), "Could not connect for initial sampling: {}", e);
            }
        }
        drop(session);

        self.deadlines = Deadlines::new(Utc::now());
    }

    async fn consumption_channels(
        &self,
        property: &Property,
        decoder: &ConsumptionDecoder,
    ) -> Vec<Channel> {
        let mut session = self.session.lock().await;
        if let Err(e) = session.connect().await {
            error!(endpoint = %session.endpoint(), "Could not connect for consumption setup: {}", e);
            return Vec::new();
        }
        let result = session.query_latest(property.path()).await;
        session.disconnect().await;

        let content = match result {
            Ok(response) if response.is_success() => response.content(),
            Ok(response) => {
                warn!(path = %property.path(), code = response.code, "Consumption setup rejected");
                None
            }
            Err(e) => {
                warn!(path = %property.path(), "Consumption setup failed: {}", e);
                None
            }
        };
        let Some(content) = content else {
            return Vec::new();
        };
        decoder
            .setup(property.group_name(), content.trim())
            .unwrap_or_else(|e| {
                warn!(path = %property.path(), "Cannot describe consumption: {}", e);
                Vec::new()
            })
    }

    /// Run one pass at `now`. Returns the batch line, if any, after handing
    /// it to the publisher. A connect failure leaves the deadlines untouched.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<Option<String>, TransportError> {
        let due = self.deadlines.due(now);
        let mut fields = Vec::new();
        {
            let mut session = self.session.lock().await;
            session.connect().await?;
            for polled in self
                .properties
                .iter_mut()
                .filter(|p| due.contains(&p.property.poll_interval))
            {
                if polled.property.poll_interval != PollInterval::Minutely {
                    info!(property = %polled.property, "Checking");
                }
                match sample(&mut *session, polled, self.publisher.as_ref()).await {
                    Ok(values) => fields.extend(values),
                    Err(e) => warn!(path = %polled.property.path(), "Failed to read: {}", e),
                }
            }
            session.disconnect().await;
        }
        self.deadlines.advance(now);

        let line = render_batch_line(&self.batch, &fields, now);
        if let Some(line) = &line {
            debug!(line = %line, "Publishing batch");
            if let Err(e) = self.publisher.publish_batch(line).await {
                warn!("Failed to publish batch line: {}", e);
            }
        }
        Ok(line)
    }

    /// Set up, then tick forever.
    pub async fn run(mut self) {
        self.setup().await;
        loop {
            match self.tick(Utc::now()).await {
                Ok(_) => tokio::time::sleep(self.tick_interval).await,
                Err(e) => {
                    error!("Could not connect to gateway: {}", e);
                    tokio::time::sleep(self.connect_backoff).await;
                }
            }
        }
    }
}
