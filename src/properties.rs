//! Device property extraction
//!
//! A native device carries a singly-linked list of `KEY=value` properties.
//! [`PropertyChain`] walks that list as a forward-only iterator of owned
//! pairs, [`PropertyMap`] collects it, and [`PropertyExtractor`] projects the
//! fixed set of fields in [`DeviceProperties`].
//!
//! Two extraction strategies produce identical records:
//! - [`ExtractStrategy::ChainWalk`] reads the whole list once and projects
//!   from the collected map
//! - [`ExtractStrategy::DirectLookup`] asks the device for each key
//!
//! # Examples
//!
//! ```no_run
//! use devmon::{DeviceContext, PropertyExtractor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = DeviceContext::open()?;
//! if let Some(device) = ctx.device_from_syspath("/sys/class/net/eth0")? {
//!     for (key, value) in device.properties() {
//!         println!("{}={}", key, value);
//!     }
//!     let props = PropertyExtractor::default().extract(&device);
//!     println!("driver: {:?}", props.driver);
//! }
//! # Ok(())
//! # }
//! ```

use crate::device::DeviceHandle;
use crate::native::{ListEntries, NativeLibrary, RawHandle};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

/// Property keys projected into [`DeviceProperties`]
pub mod keys {
    pub const ACTION: &str = "ACTION";
    pub const DEVPATH: &str = "DEVPATH";
    pub const SUBSYSTEM: &str = "SUBSYSTEM";
    pub const DEVTYPE: &str = "DEVTYPE";
    pub const DRIVER: &str = "DRIVER";
    pub const ID_BUS: &str = "ID_BUS";
    pub const ID_MODEL: &str = "ID_MODEL";
    pub const ID_MODEL_ID: &str = "ID_MODEL_ID";
    pub const ID_REVISION: &str = "ID_REVISION";
    pub const ID_SERIAL: &str = "ID_SERIAL";
    pub const ID_SERIAL_SHORT: &str = "ID_SERIAL_SHORT";
    pub const ID_TYPE: &str = "ID_TYPE";
    pub const ID_VENDOR: &str = "ID_VENDOR";
    pub const ID_VENDOR_ID: &str = "ID_VENDOR_ID";

    /// Every key read by the extractor
    pub const ALL: [&str; 14] = [
        ACTION,
        DEVPATH,
        SUBSYSTEM,
        DEVTYPE,
        DRIVER,
        ID_BUS,
        ID_MODEL,
        ID_MODEL_ID,
        ID_REVISION,
        ID_SERIAL,
        ID_SERIAL_SHORT,
        ID_TYPE,
        ID_VENDOR,
        ID_VENDOR_ID,
    ];
}

/// Forward-only walk over a device's property list
///
/// Yields owned `(key, value)` pairs and borrows the device, so the walk can
/// neither outlive the device nor be restarted. Entries without a name or a
/// value are skipped.
pub struct PropertyChain<'a> {
    lib: &'a dyn NativeLibrary,
    entries: ListEntries<'a>,
    visited: usize,
}

impl<'a> PropertyChain<'a> {
    pub(crate) fn new(lib: &'a dyn NativeLibrary, first: Option<RawHandle>) -> Self {
        Self {
            lib,
            entries: ListEntries::new(lib, first),
            visited: 0,
        }
    }

    /// Number of native entries visited so far
    pub fn visited(&self) -> usize {
        self.visited
    }
}

impl Iterator for PropertyChain<'_> {
    type Item = (String, String);

    fn next(&mut self) -> Option<(String, String)> {
        loop {
            let entry = self.entries.next()?;
            self.visited += 1;
            match (
                self.lib.list_entry_get_name(entry),
                self.lib.list_entry_get_value(entry),
            ) {
                (Some(name), Some(value)) => {
                    log::trace!("property {}={}", name, value);
                    return Some((name, value));
                }
                (name, _) => log::trace!("skipping incomplete property entry {:?}", name),
            }
        }
    }
}

impl std::iter::FusedIterator for PropertyChain<'_> {}

/// All properties of one device, keyed by name
///
/// If the native list repeats a key, the last value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMap {
    entries: BTreeMap<String, String>,
    #[serde(skip)]
    visited: usize,
}

impl PropertyMap {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of native list entries walked to build this map, including
    /// incomplete entries that were skipped; 0 if it was not built from a walk
    pub fn visited(&self) -> usize {
        self.visited
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.entries.iter()
    }

    /// Collect a property walk, counting every visited entry
    pub fn from_chain(mut chain: PropertyChain<'_>) -> Self {
        let mut entries = BTreeMap::new();
        for (key, value) in chain.by_ref() {
            entries.insert(key, value);
        }
        Self {
            entries,
            visited: chain.visited(),
        }
    }
}

/// Maps built from plain pairs did not walk a native list, so
/// [`PropertyMap::visited`] is 0 for them.
impl FromIterator<(String, String)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            visited: 0,
        }
    }
}

impl<'a> IntoIterator for &'a PropertyMap {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Normalized description of one device
///
/// Every field is optional: `None` means the device does not carry that
/// property, which is distinct from a property whose value is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Event action ("add", "remove", ...); absent for enumerated devices
    pub action: Option<String>,
    /// Kernel devpath
    pub dev_path: Option<String>,
    pub subsystem: Option<String>,
    pub dev_type: Option<String>,
    pub driver: Option<String>,
    /// Bus type ("usb", "pci", "ata", ...)
    pub id_bus: Option<String>,
    /// Product name
    pub id_model: Option<String>,
    pub id_model_id: Option<String>,
    pub id_revision: Option<String>,
    pub id_serial: Option<String>,
    pub id_serial_short: Option<String>,
    pub id_type: Option<String>,
    pub id_vendor: Option<String>,
    pub id_vendor_id: Option<String>,
}

impl DeviceProperties {
    /// Build a record through a key lookup function
    ///
    /// `DEVPATH` falls back to `devpath` when the property itself is missing.
    fn project<F>(lookup: F, devpath: impl FnOnce() -> Option<String>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            action: lookup(keys::ACTION),
            dev_path: lookup(keys::DEVPATH).or_else(devpath),
            subsystem: lookup(keys::SUBSYSTEM),
            dev_type: lookup(keys::DEVTYPE),
            driver: lookup(keys::DRIVER),
            id_bus: lookup(keys::ID_BUS),
            id_model: lookup(keys::ID_MODEL),
            id_model_id: lookup(keys::ID_MODEL_ID),
            id_revision: lookup(keys::ID_REVISION),
            id_serial: lookup(keys::ID_SERIAL),
            id_serial_short: lookup(keys::ID_SERIAL_SHORT),
            id_type: lookup(keys::ID_TYPE),
            id_vendor: lookup(keys::ID_VENDOR),
            id_vendor_id: lookup(keys::ID_VENDOR_ID),
        }
    }

    /// Project the fixed fields out of a collected property map
    ///
    /// `devpath` stands in for a missing `DEVPATH` property; pass
    /// [`DeviceHandle::devpath`] to get the same record as
    /// [`PropertyExtractor::extract`].
    pub fn from_map(map: &PropertyMap, devpath: Option<&str>) -> Self {
        Self::project(
            |key| map.get(key).map(str::to_string),
            || devpath.map(str::to_string),
        )
    }

    /// Whether no field is present
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Value of a field by its property key
    pub fn get(&self, key: &str) -> Option<&str> {
        let field = match key {
            keys::ACTION => &self.action,
            keys::DEVPATH => &self.dev_path,
            keys::SUBSYSTEM => &self.subsystem,
            keys::DEVTYPE => &self.dev_type,
            keys::DRIVER => &self.driver,
            keys::ID_BUS => &self.id_bus,
            keys::ID_MODEL => &self.id_model,
            keys::ID_MODEL_ID => &self.id_model_id,
            keys::ID_REVISION => &self.id_revision,
            keys::ID_SERIAL => &self.id_serial,
            keys::ID_SERIAL_SHORT => &self.id_serial_short,
            keys::ID_TYPE => &self.id_type,
            keys::ID_VENDOR => &self.id_vendor,
            keys::ID_VENDOR_ID => &self.id_vendor_id,
            _ => return None,
        };
        field.as_deref()
    }
}

impl fmt::Display for DeviceProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "Device {}: {} Vendor: {} Product: {}",
            or_dash(&self.action),
            or_dash(&self.dev_path),
            or_dash(&self.id_vendor),
            or_dash(&self.id_model)
        )
    }
}

/// How [`PropertyExtractor`] reads a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractStrategy {
    /// Walk the property list once and project from the collected map
    #[default]
    ChainWalk,
    /// Query each known key individually
    DirectLookup,
}

impl fmt::Display for ExtractStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractStrategy::ChainWalk => write!(f, "chain-walk"),
            ExtractStrategy::DirectLookup => write!(f, "direct-lookup"),
        }
    }
}

/// Reads [`DeviceProperties`] from a device handle
///
/// The extractor only borrows the device; releasing it stays with the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyExtractor {
    strategy: ExtractStrategy,
}

impl PropertyExtractor {
    pub fn new(strategy: ExtractStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ExtractStrategy {
        self.strategy
    }

    /// Read the fixed set of fields
    pub fn extract(&self, device: &DeviceHandle) -> DeviceProperties {
        match self.strategy {
            ExtractStrategy::ChainWalk => {
                let map = self.collect(device);
                let devpath = if map.contains_key(keys::DEVPATH) {
                    None
                } else {
                    device.devpath()
                };
                DeviceProperties::from_map(&map, devpath.as_deref())
            }
            ExtractStrategy::DirectLookup => {
                DeviceProperties::project(|key| device.property(key), || device.devpath())
            }
        }
    }

    /// Read every property of the device
    pub fn collect(&self, device: &DeviceHandle) -> PropertyMap {
        PropertyMap::from_chain(device.properties())
    }
}
