use labrig::config::Settings;
use labrig::element::ElementKind;
use labrig::error::RigError;
use labrig::station::Station;
use labrig::value::Value;

const STATION_TOML: &str = r#"
    log_level = "warn"

    [station]
    name = "integration"

    [devices.laser]
    driver = "tunics"
    help = "Tunable laser source"

    [devices.psu]
    driver = "mock_supply"
"#;

fn open_station() -> Station {
    let settings: Settings = toml::from_str(STATION_TOML).unwrap();
    Station::open(&settings).unwrap()
}

#[test]
fn test_station_opens_all_configured_devices() {
    let station = open_station();
    assert_eq!(station.name(), "integration");
    assert_eq!(station.list_devices(), vec!["laser", "psu"]);
    assert_eq!(station.device("laser").unwrap().driver_id(), "tunics");
    assert_eq!(station.device("psu").unwrap().driver_id(), "mock_supply");
    assert_eq!(
        station.device("laser").unwrap().root().help(),
        Some("Tunable laser source")
    );
    station.close().unwrap();
}

#[test]
fn test_laser_control_through_addresses() {
    let station = open_station();

    let wavelength = station.variable("laser.wavelength").unwrap();
    wavelength.write_text("1536.5").unwrap();
    assert_eq!(wavelength.read().unwrap(), Value::Float(1536.5));

    // Setting a power enables the output.
    station
        .variable("laser.power")
        .unwrap()
        .write(Value::Float(2.0))
        .unwrap();
    assert_eq!(
        station.variable("laser.output").unwrap().read().unwrap(),
        Value::Bool(true)
    );

    station.close().unwrap();
}

#[test]
fn test_supply_flow_with_action() {
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
        .write_text("on")
        .unwrap();

    let measured = match station.variable("psu.ch1.measure").unwrap().read().unwrap() {
        Value::Float(v) => v,
        other => panic!("expected a float, got {other:?}"),
    };
    assert!((measured - 5.0).abs() <= 0.051, "measured {measured}");

    station.action("psu.reset").unwrap().execute().unwrap();
    assert_eq!(
        station.variable("psu.ch1.voltage").unwrap().read().unwrap(),
        Value::Float(0.0)
    );

    station.close().unwrap();
}

#[test]
fn test_reading_saved_to_data_directory() {
    let station = open_station();
    let dir = tempfile::tempdir().unwrap();

    let path = station
        .variable("laser.wavelength")
        .unwrap()
        .save(dir.path(), None)
        .unwrap();

    assert_eq!(path, dir.path().join("laser.wavelength.txt"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "1550");

    station.close().unwrap();
}

#[test]
fn test_structure_lists_every_element() {
    let station = open_station();
    let structure = station.structure();

    assert!(structure.contains(&("laser".to_string(), ElementKind::Module)));
    assert!(structure.contains(&("laser.motor_speed".to_string(), ElementKind::Variable)));
    assert!(structure.contains(&("psu.ch1".to_string(), ElementKind::Module)));
    assert!(structure.contains(&("psu.ch2.current".to_string(), ElementKind::Variable)));
    assert!(structure.contains(&("psu.reset".to_string(), ElementKind::Action)));

    // Bare device names resolve to module roots, wrong kinds are refused.
    assert_eq!(
        station.element("psu").unwrap().kind(),
        ElementKind::Module
    );
    assert!(matches!(
        station.variable("psu").unwrap_err(),
        RigError::WrongElementKind { .. }
    ));

    station.close().unwrap();
}

#[test]
fn test_device_names_are_cleaned_on_open() {
    let settings: Settings = toml::from_str(
        r#"
        [devices."main psu"]
        driver = "mock_supply"
        "#,
    )
    .unwrap();
    let station = Station::open(&settings).unwrap();
    assert_eq!(station.list_devices(), vec!["mainpsu"]);
    assert!(station.variable("mainpsu.ch1.voltage").is_ok());
    station.close().unwrap();
}

#[test]
fn test_unknown_driver_is_a_configuration_error() {
    let settings: Settings = toml::from_str(
        r#"
        [devices.scope]
        driver = "no_such_driver"
        "#,
    )
    .unwrap();
    let err = Station::open(&settings).unwrap_err();
    assert!(matches!(err, RigError::Configuration(_)), "{err}");
}
