//! Scripted transport for exercising drivers without hardware.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use anyhow::bail;

use super::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Exchange {
    Write(String),
    Query { command: String, response: String },
}

/// A transport that replays a pre-recorded script of exchanges.
///
/// Each expected command is checked in order; any deviation from the script
/// fails the exchange. An empty script rejects everything, which is what a
/// `kind = "mock"` transport in a station file produces.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Exchange>>,
}

impl MockTransport {
    /// Creates a transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an expected write-only command to the script.
    pub fn expect_write(self, command: impl Into<String>) -> Self {
        self.lock().push_back(Exchange::Write(command.into()));
        self
    }

    /// Appends an expected query and the response to serve for it.
    pub fn expect_query(self, command: impl Into<String>, response: impl Into<String>) -> Self {
        self.lock().push_back(Exchange::Query {
            command: command.into(),
            response: response.into(),
        });
        self
    }

    /// Number of scripted exchanges not yet consumed.
    pub fn remaining(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Exchange>> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Transport for MockTransport {
    fn write_cmd(&self, command: &str) -> anyhow::Result<()> {
        match self.lock().pop_front() {
            Some(Exchange::Write(expected)) if expected == command => Ok(()),
            Some(expected) => bail!("unexpected command '{command}', script has {expected:?}"),
            None => bail!("unexpected command '{command}', script is empty"),
        }
    }

    fn query(&self, command: &str) -> anyhow::Result<String> {
        match self.lock().pop_front() {
            Some(Exchange::Query {
                command: expected,
                response,
            }) if expected == command => Ok(response),
            Some(expected) => bail!("unexpected query '{command}', script has {expected:?}"),
            None => bail!("unexpected query '{command}', script is empty"),
        }
    }

    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
