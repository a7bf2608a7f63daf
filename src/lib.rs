//! # Labrig Core Library
//!
//! This crate is the core library of the `labrig` laboratory automation
//! framework. It turns a set of configured instruments into one addressable
//! station: every instrument exposes a tree of typed elements, and elements
//! anywhere in the station are reached through dot-joined addresses such as
//! `laser.wavelength` or `psu.ch1.voltage`. The same library backs the
//! bundled CLI (`main.rs`) and embedding in other programs.
//!
//! ## Crate Structure
//!
//! The library is organized into several modules, each with a distinct
//! responsibility:
//!
//! - **`element`**: The element tree itself: `Module`, `Variable` and
//!   `Action` nodes, address resolution, reads, writes and executions.
//! - **`value`**: The `Value` data model shared by every variable, with
//!   parsing, coercion, display and file output.
//! - **`driver`**: The `Driver` trait plus the `ElementDef` builders drivers
//!   use to declare their element model.
//! - **`drivers`**: Bundled instrument drivers and the registry resolving
//!   driver ids from configuration.
//! - **`transport`**: Byte links to instruments (TCP, serial behind the
//!   `instrument_serial` feature, a scriptable mock) behind the `Transport`
//!   trait.
//! - **`station`**: Opens every configured device and resolves station-wide
//!   addresses. See `station::Station`.
//! - **`config`**: Loading and validating the station TOML configuration.
//!   See `config::Settings`.
//! - **`variables`**: User variables with `$eval:` expressions evaluated
//!   against the station.
//! - **`monitor`**: Background polling of a readable variable with history
//!   and broadcast output.
//! - **`error`**: The central `RigError` enum and `RigResult` alias.
//! - **`utils`**: Name cleaning and small text helpers.

pub mod config;
pub mod driver;
pub mod drivers;
pub mod element;
pub mod error;
pub mod monitor;
pub mod station;
pub mod transport;
pub mod utils;
pub mod value;
pub mod variables;

pub use config::Settings;
pub use element::{Action, Element, ElementKind, Module, Variable};
pub use error::{RigError, RigResult};
pub use station::Station;
pub use value::{Value, ValueKind};
