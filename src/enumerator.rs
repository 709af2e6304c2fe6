// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2024 NervoSys

//! One-shot device enumeration
//!
//! A [`DeviceEnumerator`] moves through a fixed lifecycle:
//!
//! ```text
//! Created -> Filtered (0..n) -> Scanned -> Iterating -> Exhausted
//! ```
//!
//! Filters must be added before [`DeviceEnumerator::scan`], and the matched
//! devices can be read exactly once through [`DeviceEnumerator::entries`].
//! Subsystem filters are OR-ed: a device matches if its subsystem equals any
//! of the filters, which is how libudev combines matches of the same kind.
//!
//! # Examples
//!
//! ```no_run
//! use devmon::DeviceContext;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = DeviceContext::open()?;
//! let mut enumerator = ctx.enumerator()?;
//! enumerator.add_subsystem_filter("net")?;
//! enumerator.scan()?;
//!
//! for device in enumerator.entries()? {
//!     println!("{} ({:?})", device.dev_path.unwrap_or_default(), device.driver);
//! }
//! enumerator.destroy()?;
//! # Ok(())
//! # }
//! ```

use crate::context::{ContextShared, DeviceContext};
use crate::device::DeviceHandle;
use crate::error::{Error, Result};
use crate::native::{check_status, ListEntries, RawHandle};
use crate::properties::{DeviceProperties, PropertyExtractor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a [`DeviceEnumerator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnumeratorState {
    Created,
    Filtered,
    Scanned,
    Iterating,
    Exhausted,
    Destroyed,
}

impl EnumeratorState {
    fn describe(self) -> &'static str {
        match self {
            EnumeratorState::Created => "created",
            EnumeratorState::Filtered => "filtered",
            EnumeratorState::Scanned => "scanned",
            EnumeratorState::Iterating => "iterating",
            EnumeratorState::Exhausted => "exhausted",
            EnumeratorState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for EnumeratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// Filterable scan of the devices currently present
pub struct DeviceEnumerator {
    ctx: Arc<ContextShared>,
    raw: Option<RawHandle>,
    state: EnumeratorState,
    subsystems: Vec<String>,
    extractor: PropertyExtractor,
}

impl DeviceEnumerator {
    /// Create an enumerator on a fresh context from the platform provider
    pub fn new() -> Result<Self> {
        let ctx = DeviceContext::open()?;
        Self::create(&ctx)
    }

    /// Create an enumerator on an existing context
    pub fn create(ctx: &DeviceContext) -> Result<Self> {
        let shared = ctx.shared()?;
        let raw = shared.lib().enumerate_new(shared.handle()).ok_or_else(|| {
            Error::unavailable(format!(
                "{}: failed to allocate enumerator",
                shared.lib().name()
            ))
        })?;
        log::debug!("created enumerator {:?}", raw);

        Ok(Self {
            ctx: shared,
            raw: Some(raw),
            state: EnumeratorState::Created,
            subsystems: Vec::new(),
            extractor: PropertyExtractor::default(),
        })
    }

    /// Use a specific extractor for the records produced by [`Self::entries`]
    pub fn with_extractor(mut self, extractor: PropertyExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn state(&self) -> EnumeratorState {
        self.state
    }

    /// Subsystem filters accepted so far
    pub fn subsystems(&self) -> &[String] {
        &self.subsystems
    }

    fn live_handle(&self) -> Result<RawHandle> {
        self.raw.ok_or(Error::Closed("device enumerator"))
    }

    /// Restrict the scan to a subsystem ("net", "usb", "block", ...)
    ///
    /// May be called several times before [`Self::scan`]. A rejected filter
    /// leaves the enumerator in its previous state.
    pub fn add_subsystem_filter(&mut self, subsystem: &str) -> Result<()> {
        let raw = self.live_handle()?;
        match self.state {
            EnumeratorState::Created | EnumeratorState::Filtered => {}
            state => {
                return Err(Error::InvalidState {
                    operation: "add subsystem filter",
                    state: state.describe(),
                })
            }
        }
        if subsystem.is_empty() {
            return Err(Error::InvalidFilter {
                subsystem: String::new(),
                reason: "subsystem name is empty".to_string(),
            });
        }

        let status = self
            .ctx
            .lib()
            .enumerate_add_match_subsystem(raw, subsystem);
        check_status(status).map_err(|status| Error::InvalidFilter {
            subsystem: subsystem.to_string(),
            reason: format!("add_match_subsystem returned status {}", status),
        })?;

        log::debug!("enumerator {:?} matches subsystem '{}'", raw, subsystem);
        self.subsystems.push(subsystem.to_string());
        self.state = EnumeratorState::Filtered;
        Ok(())
    }

    /// Scan sysfs for devices matching the filters
    ///
    /// A failed scan can be retried.
    pub fn scan(&mut self) -> Result<()> {
        let raw = self.live_handle()?;
        match self.state {
            EnumeratorState::Created | EnumeratorState::Filtered => {}
            state => {
                return Err(Error::InvalidState {
                    operation: "scan",
                    state: state.describe(),
                })
            }
        }

        let status = self.ctx.lib().enumerate_scan_devices(raw);
        check_status(status).map_err(|status| Error::ScanFailed { status })?;

        log::debug!(
            "enumerator {:?} scanned (subsystems: {:?})",
            raw,
            self.subsystems
        );
        self.state = EnumeratorState::Scanned;
        Ok(())
    }

    /// Lazily read the matched devices
    ///
    /// The sequence is single-pass: once it has been started, later calls
    /// return an empty sequence rather than a fresh scan. Each device is
    /// opened, extracted and released before the next one is opened.
    pub fn entries(&mut self) -> Result<Entries<'_>> {
        let raw = self.live_handle()?;
        let first = match self.state {
            EnumeratorState::Scanned => self.ctx.lib().enumerate_get_list_entry(raw),
            EnumeratorState::Iterating | EnumeratorState::Exhausted => None,
            state => {
                return Err(Error::InvalidState {
                    operation: "read entries",
                    state: state.describe(),
                })
            }
        };
        self.state = EnumeratorState::Iterating;
        Ok(Entries {
            ctx: &self.ctx,
            extractor: self.extractor,
            walk: ListEntries::new(self.ctx.lib(), first),
            state: &mut self.state,
        })
    }

    /// Release the native enumerator
    ///
    /// Dropping the enumerator has the same effect; calling this twice
    /// reports `DoubleRelease`.
    pub fn destroy(&mut self) -> Result<()> {
        let raw = self
            .raw
            .take()
            .ok_or(Error::DoubleRelease("device enumerator"))?;
        log::debug!("destroying enumerator {:?} in state {}", raw, self.state);
        self.ctx.lib().enumerate_unref(raw);
        self.state = EnumeratorState::Destroyed;
        Ok(())
    }
}

impl Drop for DeviceEnumerator {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            log::debug!("releasing enumerator {:?} on drop", raw);
            self.ctx.lib().enumerate_unref(raw);
        }
    }
}

impl fmt::Debug for DeviceEnumerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEnumerator")
            .field("raw", &self.raw)
            .field("state", &self.state)
            .field("subsystems", &self.subsystems)
            .finish()
    }
}

/// Lazy sequence of the devices matched by a scan
///
/// Borrows the enumerator, so the native match list cannot be released while
/// the sequence is alive. Dropping it early still marks the enumerator
/// exhausted.
pub struct Entries<'a> {
    ctx: &'a Arc<ContextShared>,
    extractor: PropertyExtractor,
    walk: ListEntries<'a>,
    state: &'a mut EnumeratorState,
}

impl Iterator for Entries<'_> {
    type Item = DeviceProperties;

    fn next(&mut self) -> Option<DeviceProperties> {
        loop {
            let Some(entry) = self.walk.next() else {
                *self.state = EnumeratorState::Exhausted;
                return None;
            };
            let lib = self.ctx.lib();
            let Some(syspath) = lib.list_entry_get_name(entry) else {
                log::warn!("match-list entry {:?} has no sys-path, skipping", entry);
                continue;
            };

            let Some(raw) = lib.device_new_from_syspath(self.ctx.handle(), &syspath) else {
                log::warn!("device {} disappeared before it could be opened", syspath);
                continue;
            };

            let device = DeviceHandle::from_raw(Arc::clone(self.ctx), raw);
            let properties = self.extractor.extract(&device);
            drop(device);
            return Some(properties);
        }
    }
}

impl std::iter::FusedIterator for Entries<'_> {}

impl Drop for Entries<'_> {
    fn drop(&mut self) {
        *self.state = EnumeratorState::Exhausted;
    }
}

/// Scan the given subsystems (all devices if empty) and collect the results
pub fn enumerate_devices(
    ctx: &DeviceContext,
    subsystems: &[&str],
) -> Result<Vec<DeviceProperties>> {
    let mut enumerator = ctx.enumerator()?;
    for subsystem in subsystems {
        enumerator.add_subsystem_filter(subsystem)?;
    }
    enumerator.scan()?;
    let devices: Vec<DeviceProperties> = enumerator.entries()?.collect();
    enumerator.destroy()?;
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{SimDevice, SimulatedLibrary};
    use crate::properties::ExtractStrategy;

    fn device(path: &str, subsystem: &str) -> SimDevice {
        SimDevice::new(path).property("SUBSYSTEM", subsystem)
    }

    fn usb(path: &str, vendor: &str) -> SimDevice {
        device(path, "usb").property("ID_VENDOR", vendor)
    }

    fn sample_library() -> Arc<SimulatedLibrary> {
        Arc::new(
            SimulatedLibrary::new()
                .with_device(device("/sys/devices/virtual/net/lo", "net"))
                .with_device(usb("/sys/bus/usb/devices/1-1", "1a2b"))
                .with_device(device("/sys/class/net/eth0", "net"))
                .with_device(device("/sys/block/sda", "block"))
                .with_device(usb("/sys/bus/usb/devices/1-2", "3c4d"))
                .with_device(usb("/sys/bus/usb/devices/2-1", "5e6f")),
        )
    }

    #[test]
    fn test_three_usb_vendors_in_order() {
        let lib = sample_library();
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let mut enumerator = ctx.enumerator().unwrap();
        enumerator.add_subsystem_filter("usb").unwrap();
        enumerator.scan().unwrap();

        let vendors: Vec<_> = enumerator
            .entries()
            .unwrap()
            .map(|p| p.id_vendor.unwrap())
            .collect();
        assert_eq!(vendors, vec!["1a2b", "3c4d", "5e6f"]);

        enumerator.destroy().unwrap();
        drop(enumerator);
        drop(ctx);

        let stats = lib.stats();
        assert_eq!(stats.devices_opened, 3);
        assert_eq!(stats.devices_released, 3);
        assert_eq!(stats.peak_open_devices, 1);
        assert_eq!(stats.match_entries_visited, 3);
        assert!(stats.is_balanced());
    }

    #[test]
    fn test_net_filter_only_returns_net() {
        let lib = sample_library();
        let ctx = DeviceContext::open_with(lib).unwrap();
        let devices = enumerate_devices(&ctx, &["net"]).unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices
            .iter()
            .all(|d| d.subsystem.as_deref() == Some("net")));
    }

    #[test]
    fn test_no_filter_returns_everything() {
        let lib = sample_library();
        let ctx = DeviceContext::open_with(lib).unwrap();
        let devices = enumerate_devices(&ctx, &[]).unwrap();
        assert_eq!(devices.len(), 6);
    }

    #[test]
    fn test_filters_are_ored() {
        let lib = sample_library();
        let ctx = DeviceContext::open_with(lib).unwrap();
        let devices = enumerate_devices(&ctx, &["net", "block"]).unwrap();
        assert_eq!(devices.len(), 3);
    }

    #[test]
    fn test_single_pass() {
        let lib = sample_library();
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let mut enumerator = ctx.enumerator().unwrap();
        enumerator.scan().unwrap();

        assert_eq!(enumerator.entries().unwrap().count(), 6);
        assert_eq!(enumerator.state(), EnumeratorState::Exhausted);
        assert_eq!(enumerator.entries().unwrap().count(), 0);
        assert_eq!(lib.stats().devices_opened, 6);

        enumerator.destroy().unwrap();
        assert!(matches!(enumerator.entries(), Err(Error::Closed(_))));
    }

    #[test]
    fn test_abandoned_iteration_is_not_restartable() {
        let lib = sample_library();
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let mut enumerator = ctx.enumerator().unwrap();
        enumerator.scan().unwrap();

        let first = enumerator.entries().unwrap().next();
        assert!(first.is_some());
        assert_eq!(enumerator.state(), EnumeratorState::Exhausted);
        assert_eq!(enumerator.entries().unwrap().count(), 0);
        assert_eq!(lib.stats().open_devices(), 0);
    }

    #[test]
    fn test_rejected_filter_keeps_state() {
        let lib = sample_library();
        lib.fail_add_match(-12);
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let mut enumerator = ctx.enumerator().unwrap();

        let err = enumerator.add_subsystem_filter("usb").unwrap_err();
        match err {
            Error::InvalidFilter { subsystem, reason } => {
                assert_eq!(subsystem, "usb");
                assert!(reason.contains("-12"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(enumerator.state(), EnumeratorState::Created);
        assert!(enumerator.subsystems().is_empty());

        lib.clear_failures();
        enumerator.add_subsystem_filter("usb").unwrap();
        assert_eq!(enumerator.state(), EnumeratorState::Filtered);
    }

    #[test]
    fn test_empty_filter_rejected() {
        let lib = sample_library();
        let ctx = DeviceContext::open_with(lib).unwrap();
        let mut enumerator = ctx.enumerator().unwrap();
        assert!(matches!(
            enumerator.add_subsystem_filter(""),
            Err(Error::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_scan_failure_and_retry() {
        let lib = sample_library();
        lib.fail_scan(-5);
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let mut enumerator = ctx.enumerator().unwrap();
        assert!(matches!(
            enumerator.scan(),
            Err(Error::ScanFailed { status: -5 })
        ));
        assert_eq!(enumerator.state(), EnumeratorState::Created);

        lib.clear_failures();
        enumerator.scan().unwrap();
        assert_eq!(enumerator.state(), EnumeratorState::Scanned);
    }

    #[test]
    fn test_out_of_order_calls() {
        let lib = sample_library();
        let ctx = DeviceContext::open_with(lib).unwrap();
        let mut enumerator = ctx.enumerator().unwrap();

        assert!(matches!(
            enumerator.entries(),
            Err(Error::InvalidState { .. })
        ));
        enumerator.scan().unwrap();
        assert!(matches!(
            enumerator.add_subsystem_filter("usb"),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(enumerator.scan(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_double_destroy() {
        let lib = sample_library();
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let mut enumerator = ctx.enumerator().unwrap();
        enumerator.destroy().unwrap();
        assert!(matches!(
            enumerator.destroy(),
            Err(Error::DoubleRelease(_))
        ));
        drop(enumerator);
        assert_eq!(lib.stats().enumerators_released, 1);
        assert_eq!(lib.stats().invalid_releases, 0);
    }

    #[test]
    fn test_vanished_device_skipped() {
        let lib = sample_library();
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let mut enumerator = ctx.enumerator().unwrap();
        enumerator.add_subsystem_filter("usb").unwrap();
        enumerator.scan().unwrap();
        lib.remove_device("/sys/bus/usb/devices/1-2");

        let vendors: Vec<_> = enumerator
            .entries()
            .unwrap()
            .filter_map(|p| p.id_vendor)
            .collect();
        assert_eq!(vendors, vec!["1a2b", "5e6f"]);
    }

    #[test]
    fn test_allocation_failure() {
        let lib = sample_library();
        lib.fail_enumerate_new();
        let ctx = DeviceContext::open_with(lib).unwrap();
        assert!(matches!(
            DeviceEnumerator::create(&ctx),
            Err(Error::CapabilityUnavailable(_))
        ));
    }

    #[test]
    fn test_direct_lookup_extractor() {
        let lib = sample_library();
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let mut enumerator = ctx
            .enumerator()
            .unwrap()
            .with_extractor(PropertyExtractor::new(ExtractStrategy::DirectLookup));
        enumerator.add_subsystem_filter("usb").unwrap();
        enumerator.scan().unwrap();
        assert_eq!(enumerator.entries().unwrap().count(), 3);
        assert_eq!(lib.stats().property_entries_visited, 0);
    }

    #[test]
    fn test_drop_releases_everything() {
        let lib = sample_library();
        {
            let ctx = DeviceContext::open_with(lib.clone()).unwrap();
            let mut enumerator = ctx.enumerator().unwrap();
            enumerator.scan().unwrap();
            let _ = enumerator.entries().unwrap().take(2).count();
        }
        assert!(lib.stats().is_balanced());
    }
}
