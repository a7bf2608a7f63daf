//! The station: every configured device opened and assembled into one
//! addressable collection.
//!
//! A [`Station`] is built from [`Settings`]: each `[devices.<name>]` entry is
//! resolved to a driver, the driver's element model is instantiated as a tree
//! rooted at the device name, and elements anywhere in the station are then
//! reachable through dot-joined addresses such as `laser.wavelength` or
//! `psu.ch1.voltage`.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::{DeviceConfig, Settings};
use crate::driver::Driver;
use crate::drivers;
use crate::element::{Element, ElementKind, Module};
use crate::error::{RigError, RigResult};

/// One opened instrument: its driver handle and its element tree.
pub struct Device {
    driver: Arc<dyn Driver>,
    root: Arc<Module>,
}

impl Device {
    fn open(name: &str, config: &DeviceConfig) -> RigResult<Self> {
        let driver = drivers::build(config)?;
        let root = Module::device_root(name, config.help.clone(), driver.driver_model())?;
        log::info!(
            "Opened device '{}' with driver '{}'",
            root.name(),
            driver.id()
        );
        Ok(Self { driver, root })
    }

    /// Device name, which is also the first segment of every address below it.
    pub fn name(&self) -> &str {
        self.root.name()
    }

    /// Identifier of the driver backing this device.
    pub fn driver_id(&self) -> &'static str {
        self.driver.id()
    }

    /// Root of the device's element tree.
    pub fn root(&self) -> &Arc<Module> {
        &self.root
    }
}

/// All configured devices, indexed by name.
pub struct Station {
    name: String,
    data_dir: Option<std::path::PathBuf>,
    devices: Vec<Device>,
    index: HashMap<String, usize>,
}

impl Station {
    /// Opens every device in the settings. Devices are opened in name order
    /// and a failure closes nothing that already opened; call sites should
    /// treat an error here as fatal.
    pub fn open(settings: &Settings) -> RigResult<Self> {
        let mut names: Vec<&String> = settings.devices.keys().collect();
        names.sort();

        let mut devices = Vec::with_capacity(names.len());
        let mut index = HashMap::with_capacity(names.len());
        for name in names {
            let device = Device::open(name, &settings.devices[name])?;
            if index
                .insert(device.name().to_string(), devices.len())
                .is_some()
            {
                return Err(RigError::Configuration(format!(
                    "Device name '{}' is not unique once cleaned",
                    device.name()
                )));
            }
            devices.push(device);
        }

        log::info!(
            "Station '{}' is up with {} device(s)",
            settings.station.name,
            devices.len()
        );
        Ok(Self {
            name: settings.station.name.clone(),
            data_dir: settings.station.data_dir.clone(),
            devices,
            index,
        })
    }

    /// Station name from the settings.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default directory for saved readings, when configured.
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Device names in alphabetical order.
    pub fn list_devices(&self) -> Vec<&str> {
        self.devices.iter().map(Device::name).collect()
    }

    /// All opened devices, in name order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Looks a device up by name.
    pub fn device(&self, name: &str) -> RigResult<&Device> {
        self.index
            .get(name)
            .map(|&i| &self.devices[i])
            .ok_or_else(|| RigError::UnknownDevice(name.to_string()))
    }

    /// Resolves a dot-joined address to an element. The first segment names
    /// the device; a bare device name resolves to its root module.
    pub fn element(&self, address: &str) -> RigResult<Element> {
        let address = address.trim();
        if address.is_empty() {
            return Err(RigError::UnknownAddress(address.to_string()));
        }
        match address.split_once('.') {
            Some((device, path)) => self.device(device)?.root().find(path),
            None => Ok(Element::Module(Arc::clone(self.device(address)?.root()))),
        }
    }

    /// Resolves an address that must point at a variable.
    pub fn variable(&self, address: &str) -> RigResult<Arc<crate::element::Variable>> {
        self.element(address)?.into_variable()
    }

    /// Resolves an address that must point at an action.
    pub fn action(&self, address: &str) -> RigResult<Arc<crate::element::Action>> {
        self.element(address)?.into_action()
    }

    /// Addresses of every element in the station, devices in name order and
    /// each tree in declaration order.
    pub fn structure(&self) -> Vec<(String, ElementKind)> {
        let mut entries = Vec::new();
        for device in &self.devices {
            entries.push((device.root().address(), ElementKind::Module));
            entries.extend(device.root().structure());
        }
        entries
    }

    /// Closes every driver, reporting all failures rather than stopping at
    /// the first one.
    pub fn close(&self) -> RigResult<()> {
        let mut failures = Vec::new();
        for device in &self.devices {
            log::debug!("Closing device '{}'", device.name());
            if let Err(source) = device.driver.close() {
                failures.push(RigError::Driver {
                    address: device.name().to_string(),
                    source,
                });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RigError::ShutdownFailed(failures))
        }
    }
}

impl fmt::Debug for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Station('{}', {:?})", self.name, self.list_devices())
    }
}
