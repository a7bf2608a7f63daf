//! TCP socket transport speaking newline-terminated commands.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Context};

use super::Transport;

/// A line-oriented TCP link to an instrument.
///
/// Commands are terminated with `\n` on the way out; replies are read up to
/// the next `\n` and returned with the terminator (and any trailing `\r`)
/// stripped. Reads honour the configured timeout.
#[derive(Debug)]
pub struct TcpTransport {
    peer: String,
    stream: Mutex<BufReader<TcpStream>>,
}

impl TcpTransport {
    /// Connects to `host:port` and applies `timeout` to reads and writes.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> anyhow::Result<Self> {
        let stream = TcpStream::connect((host, port))
            .with_context(|| format!("Failed to connect to {host}:{port}"))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        log::debug!("Connected to {host}:{port}");
        Ok(Self {
            peer: format!("{host}:{port}"),
            stream: Mutex::new(BufReader::new(stream)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BufReader<TcpStream>> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(stream: &mut TcpStream, command: &str) -> anyhow::Result<()> {
        stream.write_all(command.as_bytes())?;
        if !command.ends_with('\n') {
            stream.write_all(b"\n")?;
        }
        stream.flush()?;
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn write_cmd(&self, command: &str) -> anyhow::Result<()> {
        let mut guard = self.lock();
        Self::send(guard.get_mut(), command)
            .with_context(|| format!("Failed to send '{command}' to {}", self.peer))
    }

    fn query(&self, command: &str) -> anyhow::Result<String> {
        let mut guard = self.lock();
        Self::send(guard.get_mut(), command)
            .with_context(|| format!("Failed to send '{command}' to {}", self.peer))?;

        let mut line = String::new();
        let n = guard
            .read_line(&mut line)
            .with_context(|| format!("No response to '{command}' from {}", self.peer))?;
        if n == 0 {
            bail!("Connection to {} closed by peer", self.peer);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn close(&self) -> anyhow::Result<()> {
        match self.lock().get_ref().shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Already gone; closing twice is not an error.
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to close link to {}", self.peer)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn spawn_line_server() -> (std::net::SocketAddr, std::thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut stream = stream;
            let mut seen = Vec::new();
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                let command = line.trim_end().to_string();
                if command.ends_with('?') {
                    stream
                        .write_all(format!("reply:{command}\r\n").as_bytes())
                        .unwrap();
                }
                seen.push(command);
                line.clear();
            }
            seen
        });
        (addr, handle)
    }

    #[test]
    fn test_query_and_write_round_trip() {
        let (addr, server) = spawn_line_server();
        let transport =
            TcpTransport::connect("127.0.0.1", addr.port(), Duration::from_secs(1)).unwrap();

        assert_eq!(transport.query("*IDN?").unwrap(), "reply:*IDN?");
        transport.write_cmd("RST").unwrap();
        transport.close().unwrap();

        let seen = server.join().unwrap();
        assert_eq!(seen, ["*IDN?", "RST"]);
    }

    #[test]
    fn test_connect_refused_reports_peer() {
        // Port 1 is essentially never listening on loopback.
        let err = TcpTransport::connect("127.0.0.1", 1, Duration::from_millis(100)).unwrap_err();
        assert!(err.to_string().contains("127.0.0.1:1"));
    }

    #[test]
    fn test_close_twice_is_ok() {
        let (addr, server) = spawn_line_server();
        let transport =
            TcpTransport::connect("127.0.0.1", addr.port(), Duration::from_secs(1)).unwrap();
        transport.close().unwrap();
        transport.close().unwrap();
        drop(transport);
        server.join().unwrap();
    }
}
