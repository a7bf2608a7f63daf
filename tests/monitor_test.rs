use std::sync::Arc;
use std::time::Duration;

use labrig::config::Settings;
use labrig::error::RigError;
use labrig::monitor::Monitor;
use labrig::station::Station;
use labrig::value::Value;
use tokio::time::timeout;

fn open_station() -> Arc<Station> {
    let settings: Settings = toml::from_str(
        r#"
        [devices.psu]
        driver = "mock_supply"
        "#,
    )
    .unwrap();
    Arc::new(Station::open(&settings).unwrap())
}

#[tokio::test]
async fn test_monitor_streams_station_variable() {
    let station = open_station();
    station
        .variable("psu.ch1.voltage")
        .unwrap()
        .write(Value::Float(2.0))
        .unwrap();

    let variable = station.variable("psu.ch1.voltage").unwrap();
    let mut monitor = Monitor::start(variable, Duration::from_millis(5)).unwrap();
    assert_eq!(monitor.address(), "psu.ch1.voltage");

    let mut rx = monitor.subscribe();
    for _ in 0..3 {
        let point = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("point in time")
            .expect("channel open");
        assert_eq!(point.value, 2.0);
    }

    assert!(monitor.history().len() >= 3);
    assert_eq!(monitor.error_count(), 0);
    monitor.stop().await;
    station.close().unwrap();
}

#[tokio::test]
async fn test_monitor_tracks_live_measurements() {
    let station = open_station();
    station
        .variable("psu.ch1.voltage")
        .unwrap()
        .write(Value::Float(5.0))
        .unwrap();
    station
        .variable("psu.ch1.output")
        .unwrap()
        .write(Value::Bool(true))
        .unwrap();
    station
        .variable("psu.output")
        .unwrap()
        .write(Value::Bool(true))
        .unwrap();

    let mut monitor = Monitor::start(
        station.variable("psu.ch1.measure").unwrap(),
        Duration::from_millis(5),
    )
    .unwrap();
    let mut rx = monitor.subscribe();
    for _ in 0..5 {
        let point = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("point in time")
            .expect("channel open");
        assert!(
            (point.value - 5.0).abs() <= 0.051,
            "measured {}",
            point.value
        );
    }

    monitor.stop().await;
    station.close().unwrap();
}

#[tokio::test]
async fn test_monitor_history_exported_as_csv() {
    let station = open_station();
    let mut monitor = Monitor::start(
        station.variable("psu.ch1.voltage").unwrap(),
        Duration::from_millis(5),
    )
    .unwrap();

    let mut rx = monitor.subscribe();
    for _ in 0..3 {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("point in time")
            .expect("channel open");
    }
    monitor.stop().await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("voltage.csv");
    monitor.save_csv(&path).unwrap();

    let mut reader = csv::Reader::from_path(&path).unwrap();
    assert_eq!(
        reader.headers().unwrap(),
        &csv::StringRecord::from(vec!["timestamp", "value"])
    );
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert!(rows.len() >= 3);
    assert!(rows.iter().all(|row| row[1].parse::<f64>().unwrap() == 0.0));

    station.close().unwrap();
}

#[tokio::test]
async fn test_monitor_refuses_non_numerical_variables() {
    let station = open_station();

    let err = Monitor::start(
        station.variable("psu.output").unwrap(),
        Duration::from_millis(5),
    )
    .unwrap_err();
    assert!(matches!(err, RigError::NotMonitorable(_)), "{err}");

    let err = Monitor::start(
        station.variable("psu.idn").unwrap(),
        Duration::from_millis(5),
    )
    .unwrap_err();
    assert!(matches!(err, RigError::NotMonitorable(_)), "{err}");

    station.close().unwrap();
}
