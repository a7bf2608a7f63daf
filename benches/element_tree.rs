use criterion::{black_box, criterion_group, criterion_main, Criterion};

use labrig::config::Settings;
use labrig::station::Station;
use labrig::value::{Value, ValueKind};

fn bench_station() -> Station {
    let settings: Settings = toml::from_str(
        r#"
        [devices.laser]
        driver = "tunics"

        [devices.psu]
        driver = "mock_supply"
        "#,
    )
    .expect("settings parse");
    Station::open(&settings).expect("station opens")
}

fn bench_address_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("address_resolution");
    let station = bench_station();

    group.bench_function("device_root", |b| {
        b.iter(|| station.element(black_box("psu")).unwrap());
    });

    group.bench_function("nested_variable", |b| {
        b.iter(|| station.element(black_box("psu.ch1.voltage")).unwrap());
    });

    group.bench_function("miss", |b| {
        b.iter(|| station.element(black_box("psu.ch1.resistance")).unwrap_err());
    });

    group.finish();
}

fn bench_variable_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("variable_access");
    let station = bench_station();
    let voltage = station.variable("psu.ch1.voltage").expect("variable");
    voltage.write(Value::Float(3.3)).expect("write");

    group.bench_function("read", |b| {
        b.iter(|| black_box(voltage.read().unwrap()));
    });

    group.bench_function("write", |b| {
        b.iter(|| voltage.write(black_box(Value::Float(3.3))).unwrap());
    });

    group.finish();
}

fn bench_value_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_parsing");

    group.bench_function("parse_float", |b| {
        b.iter(|| Value::parse(ValueKind::Float, black_box("1536.5")).unwrap());
    });

    group.bench_function("parse_array", |b| {
        b.iter(|| Value::parse(ValueKind::Array, black_box("[1.0, 2.0, 3.5, 4.25]")).unwrap());
    });

    group.bench_function("infer", |b| {
        b.iter(|| Value::infer(black_box("1536.5")));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_address_resolution,
    bench_variable_access,
    bench_value_parsing
);
criterion_main!(benches);
