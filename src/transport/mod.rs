//! Wire transports connecting drivers to instruments.
//!
//! A [`Transport`] is a synchronous command/response link: drivers send
//! terminated command strings and read single reply lines, without caring
//! whether the other end is a TCP socket, a serial port, a scripted mock or
//! an in-process simulator. Which link to open is chosen by the
//! [`TransportConfig`] section of a device's configuration.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod tcp;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RigError, RigResult};

pub use mock::MockTransport;
pub use tcp::TcpTransport;

/// Read timeout applied when a device configuration does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// A synchronous command/response link to an instrument.
///
/// Implementations use interior mutability so a shared handle can be
/// captured by many driver callables. Errors are reported through `anyhow`
/// with enough context to identify the link.
pub trait Transport: Send + Sync {
    /// Sends a command that expects no reply.
    fn write_cmd(&self, command: &str) -> anyhow::Result<()>;

    /// Sends a command and waits for a single reply line, returned without
    /// its terminator.
    fn query(&self, command: &str) -> anyhow::Result<String>;

    /// Closes the link. Further operations may fail.
    fn close(&self) -> anyhow::Result<()>;
}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<dyn Transport>")
    }
}

/// Connection settings for a device, as written in the station file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// The driver's built-in simulator. Handled by the driver factory, not
    /// by [`TransportConfig::open`].
    Sim,
    /// A scripted transport with no script attached; every exchange fails.
    /// Useful for exercising configuration plumbing.
    Mock,
    /// TCP socket speaking newline-terminated commands.
    Tcp {
        /// Host name or address of the instrument.
        host: String,
        /// TCP port to connect to.
        port: u16,
    },
    /// Serial port (requires the `instrument_serial` feature).
    Serial {
        /// Serial device path, e.g. `/dev/ttyUSB0` or `COM3`.
        port: String,
        /// Baud rate. Defaults to 9600.
        #[serde(default = "default_baud")]
        baud: u32,
    },
}

fn default_baud() -> u32 {
    9600
}

impl TransportConfig {
    /// Opens the transport described by this configuration.
    pub fn open(&self, timeout: Duration) -> RigResult<Arc<dyn Transport>> {
        match self {
            TransportConfig::Sim => Err(RigError::Configuration(
                "the sim transport is provided by the driver, not opened directly".to_string(),
            )),
            TransportConfig::Mock => Ok(Arc::new(MockTransport::new())),
            TransportConfig::Tcp { host, port } => {
                let transport = TcpTransport::connect(host, *port, timeout)
                    .map_err(RigError::Transport)?;
                Ok(Arc::new(transport))
            }
            TransportConfig::Serial { port, baud } => open_serial(port, *baud, timeout),
        }
    }
}

#[cfg(feature = "instrument_serial")]
fn open_serial(port: &str, baud: u32, timeout: Duration) -> RigResult<Arc<dyn Transport>> {
    let transport =
        serial::SerialTransport::open(port, baud, timeout).map_err(RigError::Transport)?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "instrument_serial"))]
fn open_serial(_port: &str, _baud: u32, _timeout: Duration) -> RigResult<Arc<dyn Transport>> {
    Err(RigError::FeatureNotEnabled("instrument_serial".to_string()))
}
