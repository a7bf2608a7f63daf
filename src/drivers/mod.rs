//! Shipped instrument drivers.
//!
//! Station files reference drivers by a string id. [`build`] is the single
//! factory: it resolves the id, opens the configured transport (or the
//! driver's built-in simulator when none is configured) and returns a shared
//! driver handle ready to produce its element model.

pub mod mock_supply;
pub mod tunics;

use std::sync::Arc;

use crate::config::DeviceConfig;
use crate::driver::Driver;
use crate::error::{RigError, RigResult};
use crate::transport::TransportConfig;

/// Ids accepted in the `driver` field of a device configuration.
pub fn driver_ids() -> &'static [&'static str] {
    &["mock_supply", "tunics"]
}

/// Instantiates the driver a device configuration references.
pub fn build(config: &DeviceConfig) -> RigResult<Arc<dyn Driver>> {
    match config.driver.as_str() {
        "mock_supply" => {
            if !matches!(config.transport, None | Some(TransportConfig::Sim)) {
                log::warn!("mock_supply is purely in-memory, ignoring the configured transport");
            }
            Ok(Arc::new(mock_supply::MockSupply::new()))
        }
        "tunics" => Ok(Arc::new(tunics::Tunics::from_config(config)?)),
        other => Err(RigError::Configuration(format!(
            "unknown driver '{other}', available: {:?}",
            driver_ids()
        ))),
    }
}
