//! Custom error types for the framework.
//!
//! This module defines the primary error type, `RigError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the different kinds of errors that can occur, from I/O and
//! configuration issues to instrument-specific problems.
//!
//! ## Error Hierarchy
//!
//! `RigError` is an enum that consolidates various error sources:
//!
//! - **`Config`**: Wraps errors from the `config` crate, typically related to
//!   file parsing or format issues in the station configuration.
//! - **`Configuration`**: Represents semantic errors in the configuration, such
//!   as values that parse but are logically invalid (an unknown driver id, a
//!   device name that cleans down to nothing). These are caught during the
//!   validation step.
//! - **Element tree errors**: Raised while building a device tree from a driver
//!   model (`EmptyElementName`, `DuplicateElementName`, ...) or while resolving
//!   and operating elements (`UnknownAddress`, `NotReadable`, `KindMismatch`).
//! - **`Driver`**: Wraps a failure reported by a driver callable, annotated with
//!   the address of the element that triggered it.
//! - **User variable errors**: Raised by the expression store
//!   (`UnknownUserVariable`, `SelfReference`, `CircularReference`, `Eval`).
//! - **`FeatureNotEnabled`**: Used when the code attempts functionality (like
//!   the serial transport) that was not included at compile time via feature
//!   flags. The message tells the user how to enable it.
//!
//! By using `#[from]`, `RigError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the crate with the `?`
//! operator.

use thiserror::Error;

use crate::element::ElementKind;
use crate::value::ValueKind;

/// Convenience alias for results using the crate error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

/// Unified error type for station, element tree and variable operations.
#[derive(Error, Debug)]
pub enum RigError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Module {module}: element names cannot be empty once cleaned")]
    EmptyElementName { module: String },

    #[error("Module {module}: an element named '{name}' already exists")]
    DuplicateElementName { module: String, name: String },

    #[error("Variable {address}: at least one of a read or a write function is required")]
    VariableNotOperable { address: String },

    #[error("Action {address}: a do function is required")]
    ActionNotOperable { address: String },

    #[error("No {kind} named '{name}' in module {module}")]
    UnknownChild {
        module: String,
        kind: ElementKind,
        name: String,
    },

    #[error("No element at address '{0}'")]
    UnknownAddress(String),

    #[error("Element {address} is a {kind}, not a {expected}")]
    WrongElementKind {
        address: String,
        kind: ElementKind,
        expected: ElementKind,
    },

    #[error("No device named '{0}' in the station")]
    UnknownDevice(String),

    #[error("Variable {0} is not readable")]
    NotReadable(String),

    #[error("Variable {0} is not writable")]
    NotWritable(String),

    #[error("Variable {address} expects {expected} values, got {actual}")]
    KindMismatch {
        address: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("Cannot parse '{input}' as {kind}")]
    ValueParse { kind: ValueKind, input: String },

    #[error("Table rows must have {expected} columns, got {actual}")]
    TableShape { expected: usize, actual: usize },

    #[error("Transport error: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("Driver error at {address}: {source}")]
    Driver {
        address: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Variable {0} cannot be monitored (a readable numerical or array variable is required)")]
    NotMonitorable(String),

    #[error("Monitor interval must be greater than zero")]
    ZeroInterval,

    #[error("No user variable named '{0}'")]
    UnknownUserVariable(String),

    #[error("A user variable named '{0}' already exists")]
    UserVariableExists(String),

    #[error("Variable '{0}' cannot reference itself")]
    SelfReference(String),

    #[error("Circular reference while evaluating '{0}'")]
    CircularReference(String),

    #[error("Evaluation error: {0}")]
    Eval(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Shutdown failed with {} error(s)", .0.len())]
    ShutdownFailed(Vec<RigError>),
}
