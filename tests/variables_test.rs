use std::sync::Arc;

use labrig::config::Settings;
use labrig::error::RigError;
use labrig::station::Station;
use labrig::value::Value;
use labrig::variables::{self, has_eval, VariableStore};

fn open_station() -> Arc<Station> {
    let settings: Settings = toml::from_str(
        r#"
        [devices.psu]
        driver = "mock_supply"

        [devices.laser]
        driver = "tunics"
        "#,
    )
    .unwrap();
    Arc::new(Station::open(&settings).unwrap())
}

#[test]
fn test_expressions_follow_live_instrument_state() {
    let station = open_station();
    let store = VariableStore::new();
    store.attach_station(Arc::clone(&station));

    store.set_text("span", "10").unwrap();
    store
        .set_text("start", "$eval: device(\"laser.wavelength\") - span / 2.0")
        .unwrap();
    assert_eq!(store.get("start").unwrap(), Value::Float(1545.0));

    // Expressions re-read the instrument on every evaluation.
    station
        .variable("laser.wavelength")
        .unwrap()
        .write(Value::Float(1300.0))
        .unwrap();
    assert_eq!(store.get("start").unwrap(), Value::Float(1295.0));

    station.close().unwrap();
}

#[test]
fn test_expression_chain_mixing_devices_and_variables() {
    let station = open_station();
    station
        .variable("psu.ch1.voltage")
        .unwrap()
        .write(Value::Float(3.0))
        .unwrap();

    let store = VariableStore::new();
    store.attach_station(Arc::clone(&station));
    store.set_text("gain", "2.5").unwrap();
    store
        .set_text("drive", "$eval: device(\"psu.ch1.voltage\") * gain")
        .unwrap();
    store.set_text("limit", "$eval: drive > 5.0").unwrap();

    assert_eq!(store.get("drive").unwrap(), Value::Float(7.5));
    assert_eq!(store.get("limit").unwrap(), Value::Bool(true));

    station.close().unwrap();
}

#[test]
fn test_reference_errors() {
    let store = VariableStore::new();

    assert!(matches!(
        store.set_text("x", "$eval: x * 2").unwrap_err(),
        RigError::SelfReference(_)
    ));

    store.set_text("a", "$eval: b").unwrap();
    store.set_text("b", "$eval: a").unwrap();
    assert!(matches!(
        store.get("b").unwrap_err(),
        RigError::CircularReference(_)
    ));

    assert!(matches!(
        store.get("missing").unwrap_err(),
        RigError::UnknownUserVariable(_)
    ));
}

#[test]
fn test_rename_keeps_raw_expression_text() {
    let store = VariableStore::new();
    store.set_text("base", "4").unwrap();
    store.set_text("doubled", "$eval: base * 2").unwrap();

    store.rename("doubled", "twice").unwrap();
    assert_eq!(store.raw("twice").unwrap().display_text(), "$eval: base * 2");
    assert_eq!(store.get("twice").unwrap(), Value::Int(8));
}

#[test]
fn test_eval_prefix_helpers() {
    assert!(has_eval("$eval: device(\"psu.ch1.voltage\")"));
    assert!(!has_eval("1550"));
}

#[test]
#[serial_test::serial]
fn test_global_store_with_station() {
    variables::clear_variables();
    let station = open_station();
    variables::VARIABLES.attach_station(Arc::clone(&station));

    variables::set_variable("offset", "0.5").unwrap();
    variables::set_variable("level", "$eval: device(\"psu.ch1.voltage\") + offset").unwrap();
    assert_eq!(
        variables::get_variable("level").unwrap(),
        Value::Float(0.5)
    );

    variables::VARIABLES.detach_station();
    assert!(variables::get_variable("level").is_err());

    variables::clear_variables();
    station.close().unwrap();
}
