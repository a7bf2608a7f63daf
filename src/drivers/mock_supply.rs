//! In-memory two-channel power supply.
//!
//! Purely simulated: setpoints live in shared state and the measured voltage
//! adds a little noise on top of the setpoint. Useful for exercising the
//! element tree, the monitor and the CLI without any hardware attached.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use rand::Rng;

use crate::driver::{ActionDef, Driver, ElementDef, ModuleDef, VariableDef};
use crate::value::{Value, ValueKind};

const IDN: &str = "Labrig Instruments,MOCK-PSU2,00001,1.0";

#[derive(Clone, Copy)]
struct ChannelState {
    voltage: f64,
    current: f64,
    output: bool,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            voltage: 0.0,
            current: 0.1,
            output: false,
        }
    }
}

#[derive(Default)]
struct SupplyState {
    output: bool,
    channels: [ChannelState; 2],
}

/// Driver for the simulated supply.
#[derive(Default)]
pub struct MockSupply {
    state: Arc<Mutex<SupplyState>>,
}

impl MockSupply {
    /// Creates a supply in the power-on state (all outputs off).
    pub fn new() -> Self {
        Self::default()
    }
}

fn with_state<T>(state: &Arc<Mutex<SupplyState>>, f: impl FnOnce(&mut SupplyState) -> T) -> T {
    let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut guard)
}

fn channel_def(state: &Arc<Mutex<SupplyState>>, index: usize) -> ModuleDef {
    let mut children: Vec<ElementDef> = Vec::new();

    let read = state.clone();
    let write = state.clone();
    children.push(
        VariableDef::new("voltage", ValueKind::Float)
            .with_unit("V")
            .with_help("Voltage setpoint")
            .with_read(move || Ok(Value::Float(with_state(&read, |s| s.channels[index].voltage))))
            .with_write(move |value| {
                let v = value.as_f64().context("voltage expects a number")?;
                with_state(&write, |s| s.channels[index].voltage = v);
                Ok(())
            })
            .into(),
    );

    let read = state.clone();
    let write = state.clone();
    children.push(
        VariableDef::new("current", ValueKind::Float)
            .with_unit("A")
            .with_help("Current limit")
            .with_read(move || Ok(Value::Float(with_state(&read, |s| s.channels[index].current))))
            .with_write(move |value| {
                let v = value.as_f64().context("current expects a number")?;
                with_state(&write, |s| s.channels[index].current = v);
                Ok(())
            })
            .into(),
    );

    let read = state.clone();
    let write = state.clone();
    children.push(
        VariableDef::new("output", ValueKind::Bool)
            .with_help("Channel output switch")
            .with_read(move || Ok(Value::Bool(with_state(&read, |s| s.channels[index].output))))
            .with_write(move |value| {
                let on = value.as_bool().context("output expects a boolean")?;
                with_state(&write, |s| s.channels[index].output = on);
                Ok(())
            })
            .into(),
    );

    let read = state.clone();
    children.push(
        VariableDef::new("measure", ValueKind::Float)
            .with_unit("V")
            .with_help("Measured output voltage")
            .with_read(move || {
                let setpoint = with_state(&read, |s| {
                    if s.output && s.channels[index].output {
                        Some(s.channels[index].voltage)
                    } else {
                        None
                    }
                });
                let measured = match setpoint {
                    // A live channel reads back its setpoint plus 1 % noise.
                    Some(v) => v * (1.0 + rand::thread_rng().gen_range(-0.01..=0.01)),
                    None => 0.0,
                };
                Ok(Value::Float(measured))
            })
            .into(),
    );

    ModuleDef::new(format!("ch{}", index + 1))
        .with_help(format!("Output channel {}", index + 1))
        .with_children(children)
}

impl Driver for MockSupply {
    fn id(&self) -> &'static str {
        "mock_supply"
    }

    fn driver_model(&self) -> Vec<ElementDef> {
        let mut model: Vec<ElementDef> = Vec::new();

        model.push(
            VariableDef::new("idn", ValueKind::Str)
                .with_help("Instrument identification")
                .with_read(move || Ok(Value::Str(IDN.to_string())))
                .into(),
        );

        let read = self.state.clone();
        let write = self.state.clone();
        model.push(
            VariableDef::new("output", ValueKind::Bool)
                .with_help("Master output switch. Channels only drive while this is on")
                .with_read(move || Ok(Value::Bool(with_state(&read, |s| s.output))))
                .with_write(move |value| {
                    let on = value.as_bool().context("output expects a boolean")?;
                    with_state(&write, |s| s.output = on);
                    Ok(())
                })
                .into(),
        );

        let state = self.state.clone();
        model.push(
            ActionDef::new("reset")
                .with_help("Restore power-on settings")
                .with_do(move || {
                    with_state(&state, |s| *s = SupplyState::default());
                    Ok(())
                })
                .into(),
        );

        model.push(channel_def(&self.state, 0).into());
        model.push(channel_def(&self.state, 1).into());

        model
    }
}
