//! Serial port transport (RS-232 / USB-serial instruments).

use std::io::Read;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Context};
use serialport::SerialPort;

use super::Transport;

/// A line-oriented serial link to an instrument.
///
/// Commands are terminated with `\n`; replies are read byte by byte up to
/// the next `\n`, which keeps the per-byte timeout of the underlying port
/// effective even for slow instruments.
pub struct SerialTransport {
    port_name: String,
    port: Mutex<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Opens `port` at the given baud rate with `timeout` applied to reads.
    pub fn open(port: &str, baud: u32, timeout: Duration) -> anyhow::Result<Self> {
        let handle = serialport::new(port, baud)
            .timeout(timeout)
            .open()
            .with_context(|| format!("Failed to open serial port {port}"))?;
        log::debug!("Opened serial port {port} at {baud} baud");
        Ok(Self {
            port_name: port.to_string(),
            port: Mutex::new(handle),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn SerialPort>> {
        self.port.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(port: &mut Box<dyn SerialPort>, command: &str) -> anyhow::Result<()> {
        port.write_all(command.as_bytes())?;
        if !command.ends_with('\n') {
            port.write_all(b"\n")?;
        }
        port.flush()?;
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn write_cmd(&self, command: &str) -> anyhow::Result<()> {
        let mut port = self.lock();
        Self::send(&mut port, command)
            .with_context(|| format!("Failed to send '{command}' on {}", self.port_name))
    }

    fn query(&self, command: &str) -> anyhow::Result<String> {
        let mut port = self.lock();
        Self::send(&mut port, command)
            .with_context(|| format!("Failed to send '{command}' on {}", self.port_name))?;

        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = port
                .read(&mut byte)
                .with_context(|| format!("No response to '{command}' on {}", self.port_name))?;
            if n == 0 {
                bail!("Serial port {} returned EOF", self.port_name);
            }
            if byte[0] == b'\n' {
                break;
            }
            response.push(byte[0]);
        }
        Ok(String::from_utf8_lossy(&response)
            .trim_end_matches('\r')
            .to_string())
    }

    fn close(&self) -> anyhow::Result<()> {
        // Dropping the handle releases the OS port; nothing buffered to drain.
        Ok(())
    }
}
