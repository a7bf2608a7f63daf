//! CLI entry point for labrig.
//!
//! Opens the configured station and operates its elements from the command
//! line:
//!
//! ```bash
//! labrig devices
//! labrig tree laser
//! labrig get laser.wavelength
//! labrig set laser.wavelength 1536.5
//! labrig do psu.reset
//! labrig save psu.ch1.measure -o ./data
//! labrig monitor laser.power --interval 0.5 --count 20
//! labrig var set start '$eval: device("laser.wavelength") - 5'
//! ```
//!
//! The station file is looked up in the user configuration directory unless
//! `--config` points elsewhere. User variables persist between invocations
//! in `variables.json` next to the station file's default location.

// Use mimalloc for improved allocation performance.
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;

use labrig::config::Settings;
use labrig::drivers;
use labrig::element::ElementKind;
use labrig::monitor::Monitor;
use labrig::station::Station;
use labrig::value::Value;
use labrig::variables::{self, Raw, VARIABLES};

#[derive(Parser)]
#[command(name = "labrig")]
#[command(about = "Laboratory instrument automation from the command line", long_about = None)]
struct Cli {
    /// Path to the station configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured devices
    Devices,

    /// Show the element tree of a device (or of every device)
    Tree {
        /// Device name; omit to show the whole station
        device: Option<String>,
    },

    /// Print the documentation of an element
    Info {
        /// Element address, e.g. laser.wavelength
        address: String,
    },

    /// Read a variable
    Get {
        /// Variable address
        address: String,
    },

    /// Write a variable
    Set {
        /// Variable address
        address: String,

        /// Value text, or an expression with the $eval: prefix
        value: String,
    },

    /// Trigger an action
    Do {
        /// Action address
        address: String,
    },

    /// Read a variable and write the value to a file
    Save {
        /// Variable address
        address: String,

        /// Target file or directory (defaults to the station data directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Poll a variable on an interval, printing each point
    Monitor {
        /// Variable address
        address: String,

        /// Seconds between reads
        #[arg(long, default_value = "1.0", value_parser = parse_interval)]
        interval: Duration,

        /// Stop after this many points (default: until Ctrl+C)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        count: Option<u64>,
    },

    /// Manage user variables
    #[command(subcommand)]
    Var(VarCommands),

    /// List the available driver ids
    Drivers,
}

#[derive(Subcommand)]
enum VarCommands {
    /// List user variables with their raw and evaluated values
    List,

    /// Create or replace a user variable ($eval: prefixes an expression)
    Set {
        /// Variable name
        name: String,

        /// Value text or $eval: expression
        value: String,
    },

    /// Evaluate a user variable
    Get {
        /// Variable name
        name: String,
    },

    /// Delete a user variable
    Remove {
        /// Variable name
        name: String,
    },

    /// Rename a user variable
    Rename {
        /// Current name
        old: String,

        /// New name
        new: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Listing driver ids needs no configuration.
    if matches!(cli.command, Commands::Drivers) {
        return print_drivers(cli.json);
    }

    let settings = Settings::load(cli.config.as_deref())?;
    init_logging(&settings.log_level);

    let station = Arc::new(Station::open(&settings)?);
    VARIABLES.attach_station(Arc::clone(&station));
    load_variables(&variables_file())?;

    let result = run_command(cli.command, &station, cli.json).await;

    if let Err(e) = station.close() {
        log::error!("{e}");
    }
    result
}

async fn run_command(command: Commands, station: &Arc<Station>, json: bool) -> Result<()> {
    match command {
        Commands::Devices => print_devices(station, json),
        Commands::Tree { device } => print_tree(station, device.as_deref(), json),
        Commands::Info { address } => {
            println!("{}", station.element(&address)?.describe());
            Ok(())
        }
        Commands::Get { address } => {
            let value = station.variable(&address)?.read()?;
            if json {
                println!("{}", serde_json::to_string(&json!({
                    "address": address,
                    "value": value,
                }))?);
            } else {
                println!("{value}");
            }
            Ok(())
        }
        Commands::Set { address, value } => {
            let variable = station.variable(&address)?;
            let value = parse_set_value(&variable, &value)?;
            variable.write(value.clone())?;
            if json {
                println!("{}", serde_json::to_string(&json!({
                    "address": address,
                    "written": value,
                }))?);
            } else {
                println!("{address} = {value}");
            }
            Ok(())
        }
        Commands::Do { address } => {
            station.action(&address)?.execute()?;
            if json {
                println!("{}", serde_json::to_string(&json!({ "executed": address }))?);
            } else {
                println!("Executed {address}");
            }
            Ok(())
        }
        Commands::Save { address, output } => {
            let variable = station.variable(&address)?;
            let target = match output {
                Some(path) => path,
                None => {
                    let dir = station
                        .data_dir()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| PathBuf::from("."));
                    std::fs::create_dir_all(&dir)?;
                    dir
                }
            };
            let path = variable.save(&target, None)?;
            if json {
                println!("{}", serde_json::to_string(&json!({
                    "address": address,
                    "path": path,
                }))?);
            } else {
                println!("Saved {address} to {}", path.display());
            }
            Ok(())
        }
        Commands::Monitor {
            address,
            interval,
            count,
        } => run_monitor(station, &address, interval, count, json).await,
        Commands::Var(command) => run_var_command(command, json),
        Commands::Drivers => print_drivers(json),
    }
}

// =============================================================================
// Device and tree listings
// =============================================================================

fn print_devices(station: &Station, json: bool) -> Result<()> {
    if json {
        let devices: Vec<serde_json::Value> = station
            .devices()
            .iter()
            .map(|device| {
                json!({
                    "name": device.name(),
                    "driver": device.driver_id(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string(&devices)?);
    } else if station.devices().is_empty() {
        println!("No devices configured");
    } else {
        for device in station.devices() {
            println!("{:<20} {}", device.name(), device.driver_id());
        }
    }
    Ok(())
}

fn print_tree(station: &Station, device: Option<&str>, json: bool) -> Result<()> {
    let entries = match device {
        Some(name) => {
            let device = station.device(name)?;
            let mut entries = vec![(device.root().address(), ElementKind::Module)];
            entries.extend(device.root().structure());
            entries
        }
        None => station.structure(),
    };

    if json {
        let mut lines = Vec::with_capacity(entries.len());
        for (address, kind) in entries {
            lines.push(tree_entry_json(station, &address, kind)?);
        }
        println!("{}", serde_json::to_string(&lines)?);
    } else {
        for (address, kind) in entries {
            println!("{}", tree_entry_text(station, &address, kind)?);
        }
    }
    Ok(())
}

fn tree_entry_text(station: &Station, address: &str, kind: ElementKind) -> Result<String> {
    Ok(match kind {
        ElementKind::Module => address.to_string(),
        ElementKind::Variable => {
            let variable = station.variable(address)?;
            let mut flags = String::new();
            if variable.readable() {
                flags.push('r');
            }
            if variable.writable() {
                flags.push('w');
            }
            let unit = variable
                .unit()
                .map(|unit| format!(" ({unit})"))
                .unwrap_or_default();
            format!(
                "{address:<32} {:<7} [{flags}]{unit}",
                variable.kind().as_str()
            )
        }
        ElementKind::Action => format!("{address:<32} action"),
    })
}

fn tree_entry_json(
    station: &Station,
    address: &str,
    kind: ElementKind,
) -> Result<serde_json::Value> {
    Ok(match kind {
        ElementKind::Module => json!({ "address": address, "kind": kind }),
        ElementKind::Variable => {
            let variable = station.variable(address)?;
            json!({
                "address": address,
                "kind": kind,
                "type": variable.kind(),
                "unit": variable.unit(),
                "readable": variable.readable(),
                "writable": variable.writable(),
            })
        }
        ElementKind::Action => json!({ "address": address, "kind": kind }),
    })
}

fn print_drivers(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(drivers::driver_ids())?);
    } else {
        for id in drivers::driver_ids() {
            println!("{id}");
        }
    }
    Ok(())
}

// =============================================================================
// Writes and monitoring
// =============================================================================

/// Value for a `set`: plain text is parsed against the variable's kind,
/// `$eval:` text is evaluated first.
fn parse_set_value(variable: &labrig::element::Variable, text: &str) -> Result<Value> {
    match Raw::parse(text) {
        Raw::Expr(expr) => Ok(VARIABLES.eval(&expr)?),
        Raw::Literal(_) => Ok(Value::parse(variable.kind(), text.trim())?),
    }
}

/// Parses the `--interval` seconds. Values a `Duration` cannot represent,
/// and zero, are rejected.
fn parse_interval(text: &str) -> Result<Duration, String> {
    let seconds: f64 = text
        .parse()
        .map_err(|_| format!("'{text}' is not a number of seconds"))?;
    let interval = Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("'{text}' is not a usable interval"))?;
    if interval.is_zero() {
        return Err("the interval must be greater than zero".into());
    }
    Ok(interval)
}

async fn run_monitor(
    station: &Arc<Station>,
    address: &str,
    interval: Duration,
    count: Option<u64>,
    json: bool,
) -> Result<()> {
    let variable = station.variable(address)?;
    let mut monitor = Monitor::start(variable, interval)?;
    let mut rx = monitor.subscribe();

    let mut seen = 0u64;
    loop {
        tokio::select! {
            point = rx.recv() => {
                match point {
                    Ok(point) => {
                        if json {
                            println!("{}", serde_json::to_string(&point)?);
                        } else {
                            println!("{}  {}", point.timestamp.to_rfc3339(), point.value);
                        }
                        seen += 1;
                        if let Some(count) = count {
                            if seen >= count {
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("Monitor output lagged, {missed} point(s) skipped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    monitor.stop().await;
    Ok(())
}

// =============================================================================
// User variables
// =============================================================================

fn run_var_command(command: VarCommands, json: bool) -> Result<()> {
    let path = variables_file();
    match command {
        VarCommands::List => {
            if json {
                let mut entries = serde_json::Map::new();
                for (name, raw) in variables::list_variables() {
                    let value = match variables::get_variable(&name) {
                        Ok(value) => json!(value),
                        Err(e) => json!({ "error": e.to_string() }),
                    };
                    entries.insert(name, json!({ "raw": raw.display_text(), "value": value }));
                }
                println!("{}", serde_json::to_string(&entries)?);
            } else {
                for (name, raw) in variables::list_variables() {
                    let value = match variables::get_variable(&name) {
                        Ok(value) => value.to_string(),
                        Err(e) => format!("<{e}>"),
                    };
                    println!("{name:<20} {:<32} {value}", raw.display_text());
                }
            }
            Ok(())
        }
        VarCommands::Set { name, value } => {
            let stored = variables::set_variable(&name, &value)?;
            save_variables(&path)?;
            println!("{stored} = {value}");
            Ok(())
        }
        VarCommands::Get { name } => {
            let value = variables::get_variable(&name)?;
            if json {
                println!("{}", serde_json::to_string(&json!({ "name": name, "value": value }))?);
            } else {
                println!("{value}");
            }
            Ok(())
        }
        VarCommands::Remove { name } => {
            variables::remove_variable(&name)?;
            save_variables(&path)?;
            println!("Removed {name}");
            Ok(())
        }
        VarCommands::Rename { old, new } => {
            let stored = variables::rename_variable(&old, &new)?;
            save_variables(&path)?;
            println!("Renamed {old} to {stored}");
            Ok(())
        }
    }
}

/// User variables persist between invocations as a name to raw-text map.
fn variables_file() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("labrig").join("variables.json"))
        .unwrap_or_else(|| PathBuf::from("labrig_variables.json"))
}

fn load_variables(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let text = std::fs::read_to_string(path)?;
    let entries: BTreeMap<String, String> = serde_json::from_str(&text)?;
    for (name, raw) in entries {
        if let Err(e) = variables::set_variable(&name, &raw) {
            log::warn!("Skipping stored variable '{name}': {e}");
        }
    }
    Ok(())
}

fn save_variables(path: &Path) -> Result<()> {
    let entries: BTreeMap<String, String> = variables::list_variables()
        .into_iter()
        .map(|(name, raw)| (name, raw.display_text()))
        .collect();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&entries)?)?;
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

/// Initialize logging from the configured level; `RUST_LOG` still wins.
fn init_logging(log_level: &str) {
    let level = log_level.parse().unwrap_or(log::LevelFilter::Info);

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Off)
        .filter_module("labrig", level)
        .format_timestamp(None)
        .format_module_path(false)
        .init();
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_get() {
        let cli = Cli::try_parse_from(["labrig", "get", "psu.ch1.voltage"]).unwrap();
        match cli.command {
            Commands::Get { address } => assert_eq!(address, "psu.ch1.voltage"),
            _ => panic!("expected get"),
        }
        assert!(!cli.json);
    }

    #[test]
    fn test_parse_monitor_defaults() {
        let cli = Cli::try_parse_from(["labrig", "monitor", "laser.power"]).unwrap();
        match cli.command {
            Commands::Monitor {
                address,
                interval,
                count,
            } => {
                assert_eq!(address, "laser.power");
                assert_eq!(interval, Duration::from_secs(1));
                assert_eq!(count, None);
            }
            _ => panic!("expected monitor"),
        }
    }

    #[test]
    fn test_monitor_interval_rejects_unusable_values() {
        for bad in ["nan", "-1.0", "0", "1e300", "fast"] {
            let arg = format!("--interval={bad}");
            assert!(
                Cli::try_parse_from(["labrig", "monitor", "laser.power", arg.as_str()]).is_err(),
                "interval '{bad}' should be rejected"
            );
        }

        let cli =
            Cli::try_parse_from(["labrig", "monitor", "laser.power", "--interval=0.25"]).unwrap();
        match cli.command {
            Commands::Monitor { interval, .. } => {
                assert_eq!(interval, Duration::from_millis(250));
            }
            _ => panic!("expected monitor"),
        }
    }

    #[test]
    fn test_monitor_count_must_be_positive() {
        assert!(Cli::try_parse_from(["labrig", "monitor", "laser.power", "--count", "0"]).is_err());

        let cli =
            Cli::try_parse_from(["labrig", "monitor", "laser.power", "--count", "5"]).unwrap();
        match cli.command {
            Commands::Monitor { count, .. } => assert_eq!(count, Some(5)),
            _ => panic!("expected monitor"),
        }
    }

    #[test]
    fn test_parse_var_set_with_global_flags() {
        let cli = Cli::try_parse_from([
            "labrig",
            "var",
            "set",
            "start",
            "$eval: 1550 - span / 2",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Var(VarCommands::Set { name, value }) => {
                assert_eq!(name, "start");
                assert_eq!(value, "$eval: 1550 - span / 2");
            }
            _ => panic!("expected var set"),
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_variables_file_round_trip() {
        variables::clear_variables();
        variables::set_variable("span", "10").unwrap();
        variables::set_variable("start", "$eval: 1550 - span / 2").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variables.json");
        save_variables(&path).unwrap();

        variables::clear_variables();
        load_variables(&path).unwrap();
        assert_eq!(
            variables::get_variable("start").unwrap(),
            Value::Int(1545)
        );

        variables::clear_variables();
    }
}
