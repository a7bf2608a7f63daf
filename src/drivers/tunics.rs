//! Yenista / EXFO TUNICS tunable laser source.
//!
//! Command grammar (newline terminated): `L=` / `L?` for the wavelength in
//! nm, `F=` / `F?` for the frequency in GHz, `P=` / `P?` for the output power
//! in mW, `I=` / `I?` for the diode current in mA, `ENABLE` / `DISABLE` for
//! the output switch, `MOTOR_SPEED=` / `MOTOR_SPEED?` in nm/s and `*IDN?`
//! for identification. Replies echo the command name (`L=1550.000`); while
//! the output is off, power and current queries answer `DISABLED`.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Context, Result};

use crate::config::DeviceConfig;
use crate::driver::{Driver, ElementDef, VariableDef};
use crate::error::{RigError, RigResult};
use crate::transport::{Transport, TransportConfig, DEFAULT_TIMEOUT};
use crate::value::{Value, ValueKind};

/// Speed of light scaled so that `frequency [GHz] = C_NM_GHZ / wavelength [nm]`.
const C_NM_GHZ: f64 = 299_792_458.0;

/// Driver for a TUNICS tunable laser.
pub struct Tunics {
    link: Arc<dyn Transport>,
}

impl Tunics {
    /// Opens the driver over the configured transport, or over the built-in
    /// simulator when none (or `kind = "sim"`) is configured.
    pub fn from_config(config: &DeviceConfig) -> RigResult<Self> {
        let timeout = config.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let link: Arc<dyn Transport> = match &config.transport {
            None | Some(TransportConfig::Sim) => Arc::new(TunicsSim::new()),
            Some(other) => other.open(timeout)?,
        };
        Self::open(link).map_err(RigError::Transport)
    }

    /// Opens the driver over an already-established link.
    pub fn open(link: Arc<dyn Transport>) -> Result<Self> {
        // Power and current are set and reported in mW / mA.
        link.write_cmd("MW").context("Failed to select mW units")?;
        Ok(Self { link })
    }
}

impl Driver for Tunics {
    fn id(&self) -> &'static str {
        "tunics"
    }

    fn driver_model(&self) -> Vec<ElementDef> {
        let mut model = Vec::new();

        let read = self.link.clone();
        let write = self.link.clone();
        model.push(
            VariableDef::new("wavelength", ValueKind::Float)
                .with_unit("nm")
                .with_help("Emission wavelength")
                .with_read(move || get_wavelength(&read).map(Value::Float))
                .with_write(move |value| {
                    let v = value.as_f64().context("wavelength expects a number")?;
                    set_wavelength(&write, v)
                })
                .into(),
        );

        let read = self.link.clone();
        let write = self.link.clone();
        model.push(
            VariableDef::new("frequency", ValueKind::Float)
                .with_unit("GHz")
                .with_help("Emission frequency")
                .with_read(move || get_frequency(&read).map(Value::Float))
                .with_write(move |value| {
                    let v = value.as_f64().context("frequency expects a number")?;
                    set_frequency(&write, v)
                })
                .into(),
        );

        let read = self.link.clone();
        let write = self.link.clone();
        model.push(
            VariableDef::new("power", ValueKind::Float)
                .with_unit("mW")
                .with_help("Output power. Writing 0 disables the output; any other value enables it")
                .with_read(move || get_power(&read).map(Value::Float))
                .with_write(move |value| {
                    let v = value.as_f64().context("power expects a number")?;
                    set_power(&write, v)
                })
                .into(),
        );

        let read = self.link.clone();
        let write = self.link.clone();
        model.push(
            VariableDef::new("intensity", ValueKind::Float)
                .with_unit("mA")
                .with_help("Diode current. Writing 0 disables the output; any other value enables it")
                .with_read(move || get_intensity(&read).map(Value::Float))
                .with_write(move |value| {
                    let v = value.as_f64().context("intensity expects a number")?;
                    set_intensity(&write, v)
                })
                .into(),
        );

        let read = self.link.clone();
        let write = self.link.clone();
        model.push(
            VariableDef::new("output", ValueKind::Bool)
                .with_help("Output switch")
                .with_read(move || get_output(&read).map(Value::Bool))
                .with_write(move |value| {
                    let on = value.as_bool().context("output expects a boolean")?;
                    set_output(&write, on)
                })
                .into(),
        );

        let read = self.link.clone();
        let write = self.link.clone();
        model.push(
            VariableDef::new("motor_speed", ValueKind::Float)
                .with_unit("nm/s")
                .with_help("Wavelength sweep speed, 1 to 100 nm/s")
                .with_read(move || get_motor_speed(&read).map(Value::Float))
                .with_write(move |value| {
                    let v = value.as_f64().context("motor_speed expects a number")?;
                    set_motor_speed(&write, v)
                })
                .into(),
        );

        model
    }

    fn close(&self) -> Result<()> {
        self.link.close()
    }
}

// =============================================================================
// Command helpers
// =============================================================================

/// Queries the instrument and strips the `<name>=` reply prefix.
fn ask(link: &Arc<dyn Transport>, command: &str) -> Result<String> {
    let response = link.query(command)?;
    let response = response.trim();
    let value = match response.split_once('=') {
        Some((_, value)) => value,
        None => response,
    };
    Ok(value.trim().to_string())
}

fn ask_f64(link: &Arc<dyn Transport>, command: &str) -> Result<f64> {
    let text = ask(link, command)?;
    text.parse::<f64>()
        .with_context(|| format!("Unexpected response '{text}' to '{command}'"))
}

/// The instrument only answers once the previous command completed, so an
/// identification query doubles as a completion barrier after writes.
fn wait(link: &Arc<dyn Transport>) -> Result<()> {
    ask(link, "*IDN?").map(|_| ())
}

fn get_wavelength(link: &Arc<dyn Transport>) -> Result<f64> {
    ask_f64(link, "L?")
}

fn set_wavelength(link: &Arc<dyn Transport>, value: f64) -> Result<()> {
    link.write_cmd(&format!("L={value}"))?;
    wait(link)
}

fn get_frequency(link: &Arc<dyn Transport>) -> Result<f64> {
    ask_f64(link, "F?")
}

fn set_frequency(link: &Arc<dyn Transport>, value: f64) -> Result<()> {
    link.write_cmd(&format!("F={value}"))?;
    wait(link)
}

fn get_power(link: &Arc<dyn Transport>) -> Result<f64> {
    let text = ask(link, "P?")?;
    if text == "DISABLED" {
        return Ok(0.0);
    }
    text.parse::<f64>()
        .with_context(|| format!("Unexpected response '{text}' to 'P?'"))
}

fn set_power(link: &Arc<dyn Transport>, value: f64) -> Result<()> {
    link.write_cmd(&format!("P={value}"))?;
    if value == 0.0 {
        set_output(link, false)?;
    } else if !get_output(link)? {
        set_output(link, true)?;
    }
    wait(link)
}

fn get_intensity(link: &Arc<dyn Transport>) -> Result<f64> {
    let text = ask(link, "I?")?;
    if text == "DISABLED" {
        return Ok(0.0);
    }
    text.parse::<f64>()
        .with_context(|| format!("Unexpected response '{text}' to 'I?'"))
}

fn set_intensity(link: &Arc<dyn Transport>, value: f64) -> Result<()> {
    link.write_cmd(&format!("I={value}"))?;
    if value == 0.0 {
        set_output(link, false)?;
    } else if !get_output(link)? {
        set_output(link, true)?;
    }
    wait(link)
}

/// A disabled output reports `DISABLED` for power, which is how the output
/// state is queried.
fn get_output(link: &Arc<dyn Transport>) -> Result<bool> {
    Ok(ask(link, "P?")? != "DISABLED")
}

fn set_output(link: &Arc<dyn Transport>, on: bool) -> Result<()> {
    link.write_cmd(if on { "ENABLE" } else { "DISABLE" })?;
    wait(link)
}

fn get_motor_speed(link: &Arc<dyn Transport>) -> Result<f64> {
    ask_f64(link, "MOTOR_SPEED?")
}

fn set_motor_speed(link: &Arc<dyn Transport>, value: f64) -> Result<()> {
    link.write_cmd(&format!("MOTOR_SPEED={value}"))?;
    wait(link)
}

// =============================================================================
// Simulator
// =============================================================================

struct SimState {
    wavelength: f64,
    power: f64,
    current: f64,
    output: bool,
    motor_speed: f64,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            wavelength: 1550.0,
            power: 1.0,
            current: 100.0,
            output: false,
            motor_speed: 100.0,
        }
    }
}

/// In-memory behavioural model of a TUNICS source.
///
/// Speaks the same command grammar as the real instrument, including the
/// `DISABLED` replies and the wavelength/frequency coupling, so the driver
/// code path is identical with and without hardware.
#[derive(Default)]
pub struct TunicsSim {
    state: Mutex<SimState>,
}

impl TunicsSim {
    /// Creates a simulator in the power-on state (output off, 1550 nm).
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn sim_num(command: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .with_context(|| format!("TUNICS simulator: bad number in '{command}'"))
}

impl Transport for TunicsSim {
    fn write_cmd(&self, command: &str) -> Result<()> {
        let mut state = self.lock();
        match command {
            "MW" => Ok(()),
            "ENABLE" => {
                state.output = true;
                Ok(())
            }
            "DISABLE" => {
                state.output = false;
                Ok(())
            }
            _ => match command.split_once('=') {
                Some(("L", value)) => {
                    state.wavelength = sim_num(command, value)?;
                    Ok(())
                }
                Some(("F", value)) => {
                    let frequency = sim_num(command, value)?;
                    if frequency <= 0.0 {
                        bail!("TUNICS simulator: frequency must be positive");
                    }
                    state.wavelength = C_NM_GHZ / frequency;
                    Ok(())
                }
                Some(("P", value)) => {
                    state.power = sim_num(command, value)?;
                    Ok(())
                }
                Some(("I", value)) => {
                    state.current = sim_num(command, value)?;
                    Ok(())
                }
                Some(("MOTOR_SPEED", value)) => {
                    state.motor_speed = sim_num(command, value)?.clamp(1.0, 100.0);
                    Ok(())
                }
                _ => bail!("TUNICS simulator: unknown command '{command}'"),
            },
        }
    }

    fn query(&self, command: &str) -> Result<String> {
        let state = self.lock();
        match command {
            "*IDN?" => Ok("YENISTA,TUNICS T100S-HP,0001,1.02".to_string()),
            "L?" => Ok(format!("L={:.3}", state.wavelength)),
            "F?" => Ok(format!("F={:.3}", C_NM_GHZ / state.wavelength)),
            "P?" => {
                if state.output {
                    Ok(format!("P={:.2}", state.power))
                } else {
                    Ok("DISABLED".to_string())
                }
            }
            "I?" => {
                if state.output {
                    Ok(format!("I={:.1}", state.current))
                } else {
                    Ok("DISABLED".to_string())
                }
            }
            "MOTOR_SPEED?" => Ok(format!("MOTOR_SPEED={:.1}", state.motor_speed)),
            _ => bail!("TUNICS simulator: unknown query '{command}'"),
        }
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Module;
    use crate::transport::MockTransport;

    fn sim_tree() -> std::sync::Arc<Module> {
        let config = DeviceConfig {
            driver: "tunics".to_string(),
            transport: None,
            timeout: None,
            help: None,
        };
        let driver = Tunics::from_config(&config).unwrap();
        Module::device_root("laser", None, driver.driver_model()).unwrap()
    }

    fn read_f64(root: &std::sync::Arc<Module>, name: &str) -> f64 {
        match root.variable(name).unwrap().read().unwrap() {
            Value::Float(v) => v,
            other => panic!("expected a float, got {other:?}"),
        }
    }

    #[test]
    fn test_power_on_state() {
        let root = sim_tree();
        assert_eq!(read_f64(&root, "wavelength"), 1550.0);
        assert_eq!(
            root.variable("output").unwrap().read().unwrap(),
            Value::Bool(false)
        );
        // Output off: power and current report disabled, mapped to zero.
        assert_eq!(read_f64(&root, "power"), 0.0);
        assert_eq!(read_f64(&root, "intensity"), 0.0);
    }

    #[test]
    fn test_wavelength_round_trip() {
        let root = sim_tree();
        let wavelength = root.variable("wavelength").unwrap();
        wavelength.write(Value::Float(1536.5)).unwrap();
        assert_eq!(read_f64(&root, "wavelength"), 1536.5);
    }

    #[test]
    fn test_frequency_couples_to_wavelength() {
        let root = sim_tree();
        assert_eq!(read_f64(&root, "frequency"), 193414.489);

        root.variable("frequency")
            .unwrap()
            .write(Value::Float(193414.489))
            .unwrap();
        assert_eq!(read_f64(&root, "wavelength"), 1550.0);
    }

    #[test]
    fn test_power_write_toggles_output() {
        let root = sim_tree();
        let power = root.variable("power").unwrap();
        let output = root.variable("output").unwrap();

        power.write(Value::Float(1.5)).unwrap();
        assert_eq!(output.read().unwrap(), Value::Bool(true));
        assert_eq!(read_f64(&root, "power"), 1.5);

        power.write(Value::Float(0.0)).unwrap();
        assert_eq!(output.read().unwrap(), Value::Bool(false));
        assert_eq!(read_f64(&root, "power"), 0.0);
    }

    #[test]
    fn test_intensity_readback_once_enabled() {
        let root = sim_tree();
        root.variable("output")
            .unwrap()
            .write(Value::Bool(true))
            .unwrap();
        assert_eq!(read_f64(&root, "intensity"), 100.0);
    }

    #[test]
    fn test_motor_speed_clamped_by_instrument() {
        let root = sim_tree();
        let motor_speed = root.variable("motor_speed").unwrap();

        motor_speed.write(Value::Float(500.0)).unwrap();
        assert_eq!(read_f64(&root, "motor_speed"), 100.0);

        motor_speed.write(Value::Float(0.2)).unwrap();
        assert_eq!(read_f64(&root, "motor_speed"), 1.0);
    }

    #[test]
    fn test_reply_prefix_stripping_over_scripted_link() {
        let link = std::sync::Arc::new(
            MockTransport::new()
                .expect_write("MW")
                .expect_query("L?", "L=1548.25")
                .expect_query("P?", "DISABLED"),
        );
        let driver = Tunics::open(link.clone()).unwrap();
        let root = Module::device_root("laser", None, driver.driver_model()).unwrap();

        assert_eq!(
            root.variable("wavelength").unwrap().read().unwrap(),
            Value::Float(1548.25)
        );
        assert_eq!(
            root.variable("power").unwrap().read().unwrap(),
            Value::Float(0.0)
        );
        assert_eq!(link.remaining(), 0);
    }

    #[test]
    fn test_wavelength_write_waits_for_completion() {
        let link = std::sync::Arc::new(
            MockTransport::new()
                .expect_write("MW")
                .expect_write("L=1536.5")
                .expect_query("*IDN?", "YENISTA,TUNICS T100S-HP,0001,1.02"),
        );
        let driver = Tunics::open(link.clone()).unwrap();
        let root = Module::device_root("laser", None, driver.driver_model()).unwrap();

        root.variable("wavelength")
            .unwrap()
            .write(Value::Float(1536.5))
            .unwrap();
        assert_eq!(link.remaining(), 0);
    }
}
