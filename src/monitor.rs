//! Background polling of a readable variable.
//!
//! A [`Monitor`] spawns a tokio task that reads its variable on a fixed
//! interval, keeps a bounded history and broadcasts every point to
//! subscribers. Read failures are logged and counted; polling continues.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::element::Variable;
use crate::error::{RigError, RigResult};
use crate::value::Value;

/// Points kept in memory before the oldest are dropped.
const HISTORY_LIMIT: usize = 10_000;

/// Broadcast capacity; slow subscribers miss points rather than block.
const CHANNEL_CAPACITY: usize = 256;

/// One sampled reading. Array values are reduced to their mean.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MonitorPoint {
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// Sampled value.
    pub value: f64,
}

/// Handle to a running polling task.
pub struct Monitor {
    variable: Arc<Variable>,
    history: Arc<Mutex<VecDeque<MonitorPoint>>>,
    tx: broadcast::Sender<MonitorPoint>,
    error_count: Arc<AtomicU64>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Starts polling the variable. Only readable variables of numerical or
    /// array kind can be monitored, and the interval must be nonzero.
    pub fn start(variable: Arc<Variable>, interval: Duration) -> RigResult<Self> {
        if !variable.monitorable() {
            return Err(RigError::NotMonitorable(variable.address()));
        }
        // tokio::time::interval panics on a zero period.
        if interval.is_zero() {
            return Err(RigError::ZeroInterval);
        }

        let history = Arc::new(Mutex::new(VecDeque::new()));
        let error_count = Arc::new(AtomicU64::new(0));
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let poll_variable = Arc::clone(&variable);
        let poll_history = Arc::clone(&history);
        let poll_errors = Arc::clone(&error_count);
        let poll_tx = tx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match sample(&poll_variable) {
                            Ok(point) => {
                                let mut history =
                                    poll_history.lock().unwrap_or_else(|e| e.into_inner());
                                if history.len() == HISTORY_LIMIT {
                                    history.pop_front();
                                }
                                history.push_back(point);
                                drop(history);
                                // No subscribers is fine; the history still fills.
                                let _ = poll_tx.send(point);
                            }
                            Err(e) => {
                                log::warn!(
                                    "Monitor read of '{}' failed: {e}",
                                    poll_variable.address()
                                );
                                poll_errors.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }
        });

        log::info!(
            "Monitoring '{}' every {:?}",
            variable.address(),
            interval
        );
        Ok(Self {
            variable,
            history,
            tx,
            error_count,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(handle),
        })
    }

    /// Address of the monitored variable.
    pub fn address(&self) -> String {
        self.variable.address()
    }

    /// Receiver for points as they are sampled.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorPoint> {
        self.tx.subscribe()
    }

    /// Snapshot of the collected history, oldest first.
    pub fn history(&self) -> Vec<MonitorPoint> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect()
    }

    /// Number of failed reads since the monitor started.
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Writes the history as CSV with `timestamp,value` columns.
    pub fn save_csv(&self, path: &Path) -> RigResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["timestamp", "value"])?;
        for point in self.history() {
            writer.write_record([point.timestamp.to_rfc3339(), point.value.to_string()])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Signals the polling task to stop and waits for it to finish. The
    /// history and error count remain available afterwards.
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                log::warn!(
                    "Monitor task for '{}' ended abnormally: {e}",
                    self.variable.address()
                );
            }
        }
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Monitor('{}')", self.variable.address())
    }
}

fn sample(variable: &Variable) -> RigResult<MonitorPoint> {
    let value = variable.read()?;
    let value = match &value {
        Value::Array(items) if !items.is_empty() => {
            items.iter().sum::<f64>() / items.len() as f64
        }
        other => other
            .as_f64()
            .ok_or_else(|| RigError::NotMonitorable(variable.address()))?,
    };
    Ok(MonitorPoint {
        timestamp: Utc::now(),
        value,
    })
}
