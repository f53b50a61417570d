//! Polling Tests
//!
//! Drives the scheduler against the simulated heating unit:
//! - Setup announcements and initial sampling
//! - Tier selection, batch lines and catch-up
//! - Consumption expansion across polls
//! - Connect failures

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use unitbridge_core::property::{DataType, PollInterval, PostProcessing, Property};
use unitbridge_core::scheduler::PollingScheduler;
use unitbridge_core::session::Session;
use unitbridge_core::settings::BatchSettings;
use unitbridge_core::transport::Endpoint;
use unitbridge_testing::{fixtures, GatewayHandle, RecordingPublisher, SimulatedGateway};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()
}

fn properties() -> Vec<Property> {
    vec![
        Property::new("1/Sensor/IndoorTemperature", "SpaceHeating")
            .with_data_type(DataType::Float)
            .with_poll_interval(PollInterval::Minutely),
        Property::new("1/Operation/TargetTemperature", "SpaceHeating")
            .with_data_type(DataType::Float)
            .with_poll_interval(PollInterval::Hourly),
        Property::new("1/Operation/Power", "SpaceHeating")
            .with_data_type(DataType::Enum)
            .with_poll_interval(PollInterval::Once),
        Property::new("1/UnitStatus/ErrorState", "SpaceHeating")
            .with_data_type(DataType::Boolean)
            .with_poll_interval(PollInterval::Never),
        Property::new("1/Consumption", "SpaceHeating")
            .with_post_processing(PostProcessing::Consumption)
            .with_poll_interval(PollInterval::Daily),
    ]
}

fn scheduler(
    gateway: SimulatedGateway,
) -> (
    PollingScheduler<SimulatedGateway>,
    GatewayHandle,
    Arc<RecordingPublisher>,
) {
    let handle = gateway.handle();
    let publisher = Arc::new(RecordingPublisher::new());
    let session = Session::new(gateway, Endpoint::new("127.0.0.1", 80))
        .with_reply_timeout(Duration::from_millis(50))
        .shared();
    let scheduler = PollingScheduler::new(
        session,
        properties(),
        publisher.clone(),
        BatchSettings::default(),
        start(),
    );
    (scheduler, handle, publisher)
}

fn sampled(handle: &GatewayHandle, path: &str) -> usize {
    let target = format!("{}/la", path);
    handle.queries().iter().filter(|q| **q == target).count()
}

#[tokio::test]
async fn test_never_properties_are_dropped() {
    let (scheduler, _, _) = scheduler(fixtures::heating_unit());
    assert_eq!(scheduler.properties().count(), 4);
    assert!(scheduler
        .properties()
        .all(|p| p.poll_interval != PollInterval::Never));
}

#[tokio::test]
async fn test_setup_announces_and_samples() {
    let (mut scheduler, handle, publisher) = scheduler(fixtures::heating_unit());
    scheduler.setup().await;

    // 4 properties plus D×24, W×14 and M×24 buckets with a last slot each.
    let channels = publisher.channels();
    assert_eq!(channels.len(), 4 + 25 + 15 + 25);
    assert!(channels
        .iter()
        .any(|c| c.id == "1-consumption-electrical-heating-w-13" && c.name.ends_with("this week Sun")));

    assert_eq!(publisher.last_value("1-operation-power"), Some(Some("on".to_string())));
    assert_eq!(
        publisher.last_value("1-sensor-indoortemperature"),
        Some(Some("21.5".to_string()))
    );
    assert_eq!(
        publisher.last_value("1-consumption-electrical-heating-w-last"),
        Some(Some("18".to_string()))
    );
    assert_eq!(
        publisher.last_value("1-consumption-electrical-heating-d-20"),
        Some(None)
    );
    assert_eq!(sampled(&handle, "1/UnitStatus/ErrorState"), 0);
    assert!(publisher.batches().is_empty());
}

#[tokio::test]
async fn test_setup_restarts_deadlines() {
    let (mut scheduler, handle, _) = scheduler(fixtures::heating_unit());
    scheduler.setup().await;
    let finished = Utc::now();

    let minutely = scheduler.deadlines().deadline(PollInterval::Minutely).unwrap();
    assert!(minutely > start() + chrono::Duration::seconds(60));
    assert!(minutely <= finished + chrono::Duration::seconds(60));
    assert!(minutely > finished);

    // Nothing is overdue right after setup.
    let queries = handle.queries().len();
    assert_eq!(scheduler.tick(finished).await.unwrap(), None);
    assert_eq!(handle.queries().len(), queries);
}

#[tokio::test]
async fn test_tick_samples_due_tiers_only() {
    let (mut scheduler, handle, publisher) = scheduler(fixtures::heating_unit());

    let line = scheduler.tick(start() + chrono::Duration::seconds(30)).await.unwrap();
    assert!(line.is_none());
    assert!(handle.queries().is_empty());

    let now = start() + chrono::Duration::seconds(61);
    let line = scheduler.tick(now).await.unwrap().unwrap();
    assert_eq!(
        line,
        format!(
            "appliance,qfn=appliance.heating 1-sensor-indoortemperature=21.5 {}",
            now.timestamp_nanos_opt().unwrap()
        )
    );
    assert_eq!(publisher.batches(), vec![line]);
    assert_eq!(sampled(&handle, "1/Sensor/IndoorTemperature"), 1);
    assert_eq!(sampled(&handle, "1/Operation/TargetTemperature"), 0);
    assert_eq!(sampled(&handle, "1/Operation/Power"), 0);
}

#[tokio::test]
async fn test_catch_up_after_long_pause() {
    let (mut scheduler, handle, _) = scheduler(fixtures::heating_unit());

    // Every tier is overdue; the minutely tier by many periods.
    let now = start() + chrono::Duration::days(1) + chrono::Duration::seconds(1);
    let line = scheduler.tick(now).await.unwrap().unwrap();
    assert!(line.contains("1-operation-targettemperature=21"));
    assert!(line.contains("1-consumption-electrical-heating-m-last=180"));
    assert!(line.contains("1-consumption=\"{"));
    assert!(!line.contains("1-consumption-electrical-heating-d-20="));

    assert_eq!(
        scheduler.deadlines().deadline(PollInterval::Minutely),
        Some(start() + chrono::Duration::seconds(120))
    );
    assert_eq!(
        scheduler.deadlines().deadline(PollInterval::Daily),
        Some(start() + chrono::Duration::days(2))
    );

    // The daily tier has caught up, the minutely tier has not.
    scheduler.tick(now).await.unwrap();
    assert_eq!(sampled(&handle, "1/Sensor/IndoorTemperature"), 2);
    assert_eq!(sampled(&handle, "1/Consumption"), 1);
}

#[tokio::test]
async fn test_consumption_last_survives_all_null_poll() {
    let (mut scheduler, handle, publisher) = scheduler(fixtures::heating_unit());
    scheduler.setup().await;

    handle.set_value(
        "1/Consumption",
        json!({ "Electrical": { "Heating": { "W": vec![serde_json::Value::Null; 14] } } })
            .to_string(),
    );
    // Setup restarted the tier clocks at the current time.
    let now = Utc::now() + chrono::Duration::days(1) + chrono::Duration::seconds(1);
    let line = scheduler.tick(now).await.unwrap().unwrap();

    assert_eq!(
        publisher.last_value("1-consumption-electrical-heating-w-last"),
        Some(Some("18".to_string()))
    );
    assert!(line.contains("1-consumption-electrical-heating-w-last=18"));
    assert!(!line.contains("1-consumption-electrical-heating-w-0="));
}

#[tokio::test]
async fn test_no_line_without_samples() {
    let (mut scheduler, handle, publisher) = scheduler(fixtures::heating_unit());
    handle.remove_value("1/Sensor/IndoorTemperature");

    let line = scheduler
        .tick(start() + chrono::Duration::seconds(61))
        .await
        .unwrap();
    assert!(line.is_none());
    assert!(publisher.batches().is_empty());
    assert_eq!(
        scheduler.deadlines().deadline(PollInterval::Minutely),
        Some(start() + chrono::Duration::seconds(120))
    );
}

#[tokio::test]
async fn test_connect_failure_keeps_deadlines() {
    let (mut scheduler, handle, publisher) = scheduler(fixtures::heating_unit());
    handle.set_refuse_connect(true);
    let before = scheduler.deadlines().clone();

    let result = scheduler.tick(start() + chrono::Duration::seconds(61)).await;
    assert!(result.is_err());
    assert_eq!(scheduler.deadlines(), &before);
    assert!(publisher.values().is_empty());

    handle.set_refuse_connect(false);
    let line = scheduler
        .tick(start() + chrono::Duration::seconds(66))
        .await
        .unwrap();
    assert!(line.is_some());
}

#[tokio::test]
async fn test_consumption_fields_survive_unformattable_parent() {
    let gateway = fixtures::heating_unit();
    let publisher = Arc::new(RecordingPublisher::new());
    let session = Session::new(gateway, Endpoint::new("127.0.0.1", 80))
        .with_reply_timeout(Duration::from_millis(50))
        .shared();
    let consumption = Property::new("1/Consumption", "SpaceHeating")
        .with_data_type(DataType::Integer)
        .with_post_processing(PostProcessing::Consumption)
        .with_poll_interval(PollInterval::Daily);
    let mut scheduler = PollingScheduler::new(
        session,
        [consumption],
        publisher.clone(),
        BatchSettings::default(),
        start(),
    );

    let now = start() + chrono::Duration::days(1) + chrono::Duration::seconds(1);
    let line = scheduler.tick(now).await.unwrap().unwrap();
    assert!(line.contains("1-consumption-electrical-heating-w-last=18"));
    assert!(!line.contains("1-consumption="));
    assert_eq!(publisher.last_value("1-consumption"), None);
}

#[tokio::test]
async fn test_unparseable_value_is_skipped() {
    let (mut scheduler, handle, _) = scheduler(fixtures::heating_unit());
    handle.set_value("1/Sensor/IndoorTemperature", "n/a");

    let line = scheduler
        .tick(start() + chrono::Duration::seconds(61))
        .await
        .unwrap();
    assert!(line.is_none());
}
