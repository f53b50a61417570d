//! Write and Device Information Tests

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use unitbridge_core::property::{DataType, PollInterval, Property};
use unitbridge_core::scheduler::PollingScheduler;
use unitbridge_core::session::{Session, SharedSession};
use unitbridge_core::settings::BatchSettings;
use unitbridge_core::transport::Endpoint;
use unitbridge_core::writer::{PropertyWriter, WriteError};
use unitbridge_testing::{fixtures, RecordingPublisher, SimulatedGateway};

fn shared(gateway: SimulatedGateway) -> SharedSession<SimulatedGateway> {
    Session::new(gateway, Endpoint::new("127.0.0.1", 80))
        .with_reply_timeout(Duration::from_millis(50))
        .shared()
}

fn writer(
    gateway: SimulatedGateway,
) -> (PropertyWriter<SimulatedGateway>, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::new());
    let properties = vec![
        Property::new("1/Operation/TargetTemperature", "SpaceHeating")
            .with_data_type(DataType::Float)
            .with_settable(true),
        Property::new("1/Operation/Power", "SpaceHeating").with_data_type(DataType::Enum),
    ];
    let writer = PropertyWriter::new(shared(gateway), properties, publisher.clone());
    (writer, publisher)
}

#[tokio::test]
async fn test_write_then_verify() {
    let gateway = fixtures::heating_unit();
    let handle = gateway.handle();
    let (writer, publisher) = writer(gateway);

    let value = writer
        .write("1-operation-targettemperature", "22.5")
        .await
        .unwrap();

    assert_eq!(value, "22.5");
    assert_eq!(
        handle.writes(),
        vec![("1/Operation/TargetTemperature".to_string(), "22.5".to_string())]
    );
    assert_eq!(
        publisher.last_value("1-operation-targettemperature"),
        Some(Some("22.5".to_string()))
    );
}

#[tokio::test]
async fn test_write_rejected() {
    let (writer, _) = writer(fixtures::heating_unit().with_write_code(4000));

    let result = writer.write("1-operation-targettemperature", "99").await;
    assert!(matches!(
        result,
        Err(WriteError::Rejected { code: 4000, .. })
    ));
}

#[tokio::test]
async fn test_write_plain_success_is_not_enough() {
    let (writer, _) = writer(fixtures::heating_unit().with_write_code(2000));

    let result = writer.write("1-operation-targettemperature", "22").await;
    assert!(matches!(
        result,
        Err(WriteError::Rejected { code: 2000, .. })
    ));
}

#[tokio::test]
async fn test_write_requires_settable_property() {
    let gateway = fixtures::heating_unit();
    let handle = gateway.handle();
    let (writer, _) = writer(gateway);

    assert!(matches!(
        writer.write("1-operation-power", "standby").await,
        Err(WriteError::NotSettable(_))
    ));
    assert!(matches!(
        writer.write("9-missing", "1").await,
        Err(WriteError::UnknownProperty(_))
    ));
    assert!(handle.writes().is_empty());
    assert_eq!(handle.connects(), 0);
    assert_eq!(
        writer.settable_ids().collect::<Vec<_>>(),
        vec!["1-operation-targettemperature"]
    );
}

#[tokio::test]
async fn test_write_connect_failure() {
    let gateway = fixtures::heating_unit();
    gateway.handle().set_refuse_connect(true);
    let (writer, _) = writer(gateway);

    assert!(matches!(
        writer.write("1-operation-targettemperature", "22").await,
        Err(WriteError::Connect(_))
    ));
}

#[tokio::test]
async fn test_write_and_tick_do_not_interleave() {
    let gateway = fixtures::heating_unit();
    let handle = gateway.handle();
    let session = shared(gateway);
    let publisher = Arc::new(RecordingPublisher::new());

    let properties = vec![
        Property::new("1/Sensor/IndoorTemperature", "SpaceHeating")
            .with_data_type(DataType::Float)
            .with_poll_interval(PollInterval::Minutely),
        Property::new("1/Sensor/OutdoorTemperature", "SpaceHeating")
            .with_data_type(DataType::Integer)
            .with_poll_interval(PollInterval::Minutely),
        Property::new("1/Operation/TargetTemperature", "SpaceHeating")
            .with_data_type(DataType::Float)
            .with_poll_interval(PollInterval::Hourly)
            .with_settable(true),
    ];
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
    let mut scheduler = PollingScheduler::new(
        session.clone(),
        properties.clone(),
        publisher.clone(),
        BatchSettings::default(),
        start,
    );
    let writer = PropertyWriter::new(session, properties, publisher);

    let (line, written) = tokio::join!(
        scheduler.tick(start + chrono::Duration::hours(2)),
        writer.write("1-operation-targettemperature", "23")
    );
    assert!(line.unwrap().is_some());
    assert_eq!(written.unwrap(), "23");

    let queries = handle.queries();
    assert_eq!(queries.len(), 5);
    let write_at = queries
        .iter()
        .position(|q| q == "1/Operation/TargetTemperature")
        .unwrap();
    assert_eq!(queries[write_at + 1], "1/Operation/TargetTemperature/la");
    // The sweep's three reads sit entirely before or after the write pair.
    assert!(write_at == 0 || write_at == 3);
    assert_eq!(handle.connects(), 2);
}

#[tokio::test]
async fn test_device_info() {
    let mut session = Session::new(fixtures::heating_unit(), Endpoint::new("127.0.0.1", 80));
    session.connect().await.unwrap();

    let info = session.device_info().await.unwrap().unwrap();
    assert_eq!(info.id, "HeatingUnit");
    assert_eq!(info.model, "HU-200");
    assert_eq!(info.firmware, "1.2.3");
    session.disconnect().await;
}

#[tokio::test]
async fn test_device_info_absent() {
    let mut session = Session::new(SimulatedGateway::new(), Endpoint::new("127.0.0.1", 80));
    session.connect().await.unwrap();

    assert!(session.device_info().await.unwrap().is_none());
}
