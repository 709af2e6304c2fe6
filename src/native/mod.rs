//! Native device-library capability boundary
//!
//! This module defines the handle-based interface that every device-library
//! provider must implement. The rest of the crate only talks to the OS device
//! manager through [`NativeLibrary`], which keeps ownership and lifetime rules
//! in one place and lets tests swap in the [`simulated`] provider.
//!
//! Providers:
//! - [`libudev`] - the system `libudev.so` (Linux, `udev` feature)
//! - [`unavailable`] - null provider for platforms without a device manager
//! - [`simulated`] - in-process provider with release accounting

#[cfg(all(target_os = "linux", feature = "udev"))]
pub mod libudev;

pub mod simulated;
pub mod unavailable;

use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub use simulated::{HandleStats, SimDevice, SimulatedLibrary};
pub use unavailable::Unavailable;

/// Native status code: 0 on success, negative errno on failure
pub type Status = i32;

/// Opaque reference to a native object (context, monitor, enumerator, device
/// or list entry)
///
/// A `RawHandle` is never null. Functions that may produce no object return
/// `Option<RawHandle>`, so absence is checked before a handle exists at all.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(NonZeroUsize);

impl RawHandle {
    /// Wrap a native pointer, returning `None` for null
    pub fn from_ptr<T>(ptr: *const T) -> Option<Self> {
        NonZeroUsize::new(ptr as usize).map(RawHandle)
    }

    /// Wrap a provider-assigned identifier, returning `None` for zero
    pub fn from_raw(value: usize) -> Option<Self> {
        NonZeroUsize::new(value).map(RawHandle)
    }

    /// Reinterpret as a native pointer
    pub fn as_ptr<T>(self) -> *mut T {
        self.0.get() as *mut T
    }

    /// Raw identifier value
    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({:#x})", self.0.get())
    }
}

/// Handle-based interface to a native device-management library
///
/// The method set mirrors libudev. Reference-counted objects (context,
/// monitor, enumerator, device) must be released exactly once through the
/// matching `*_unref` call. List entries belong to the object that produced
/// them and are never released on their own.
pub trait NativeLibrary: Send + Sync {
    /// Human-readable provider name, used in error messages
    fn name(&self) -> &str;

    // === Context ===

    /// Create a new library context
    fn context_new(&self) -> Option<RawHandle>;

    /// Release a library context
    fn context_unref(&self, ctx: RawHandle);

    // === Monitor ===

    /// Open a notification channel for the given source ("udev" or "kernel")
    fn monitor_new_from_source(&self, ctx: RawHandle, name: &str) -> Option<RawHandle>;

    /// Bind the channel so events start queuing
    fn monitor_enable_receiving(&self, monitor: RawHandle) -> Status;

    /// Block until the next device arrives on the channel
    ///
    /// Returns `None` if the channel is closed or the wait failed. The returned
    /// device is owned by the caller and must be released with
    /// [`NativeLibrary::device_unref`].
    fn monitor_receive_device(&self, monitor: RawHandle) -> Option<RawHandle>;

    /// Release a monitor
    fn monitor_unref(&self, monitor: RawHandle);

    // === Enumerate ===

    /// Create a new enumerator
    fn enumerate_new(&self, ctx: RawHandle) -> Option<RawHandle>;

    /// Add a subsystem match
    fn enumerate_add_match_subsystem(&self, enumerate: RawHandle, subsystem: &str) -> Status;

    /// Scan sysfs and collect the matching devices
    fn enumerate_scan_devices(&self, enumerate: RawHandle) -> Status;

    /// First entry of the match list; each entry name is a device sys-path
    fn enumerate_get_list_entry(&self, enumerate: RawHandle) -> Option<RawHandle>;

    /// Release an enumerator and its match list
    fn enumerate_unref(&self, enumerate: RawHandle);

    // === Device ===

    /// Open a device by its sys-path
    fn device_new_from_syspath(&self, ctx: RawHandle, syspath: &str) -> Option<RawHandle>;

    /// Kernel devpath (sys-path without the `/sys` mount point)
    fn device_get_devpath(&self, device: RawHandle) -> Option<String>;

    /// Value of a single property
    fn device_get_property_value(&self, device: RawHandle, key: &str) -> Option<String>;

    /// First entry of the device's property list
    fn device_get_properties_list_entry(&self, device: RawHandle) -> Option<RawHandle>;

    /// Release a device
    fn device_unref(&self, device: RawHandle);

    // === List entry ===

    /// Entry name (property key, or sys-path for match lists)
    fn list_entry_get_name(&self, entry: RawHandle) -> Option<String>;

    /// Entry value
    fn list_entry_get_value(&self, entry: RawHandle) -> Option<String>;

    /// Next entry in the list
    fn list_entry_get_next(&self, entry: RawHandle) -> Option<RawHandle>;
}

/// Translate a native status code, keeping negative codes as the error
pub(crate) fn check_status(status: Status) -> std::result::Result<(), Status> {
    if status < 0 {
        Err(status)
    } else {
        Ok(())
    }
}

/// Forward-only walk over a native list, starting from its first entry
///
/// The walk borrows the list owner for `'a`, so no entry can be observed after
/// the owner has been released.
pub(crate) struct ListEntries<'a> {
    lib: &'a dyn NativeLibrary,
    cursor: Option<RawHandle>,
    _owner: PhantomData<&'a ()>,
}

impl<'a> ListEntries<'a> {
    pub(crate) fn new(lib: &'a dyn NativeLibrary, first: Option<RawHandle>) -> Self {
        Self {
            lib,
            cursor: first,
            _owner: PhantomData,
        }
    }
}

impl Iterator for ListEntries<'_> {
    type Item = RawHandle;

    fn next(&mut self) -> Option<RawHandle> {
        let entry = self.cursor.take()?;
        self.cursor = self.lib.list_entry_get_next(entry);
        Some(entry)
    }
}

impl std::iter::FusedIterator for ListEntries<'_> {}

/// Select the device-library provider for this build and platform
pub fn default_library() -> Arc<dyn NativeLibrary> {
    #[cfg(all(target_os = "linux", feature = "udev"))]
    {
        Arc::new(libudev::LibUdev::new())
    }

    #[cfg(all(target_os = "linux", not(feature = "udev")))]
    {
        Arc::new(Unavailable::new(
            "devmon was built without the `udev` feature",
        ))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(Unavailable::new(format!(
            "no device notification subsystem on {}",
            std::env::consts::OS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_handle_null() {
        assert!(RawHandle::from_ptr(std::ptr::null::<u8>()).is_none());
        assert!(RawHandle::from_raw(0).is_none());
        let handle = RawHandle::from_raw(0x10).unwrap();
        assert_eq!(handle.get(), 0x10);
        assert_eq!(handle.as_ptr::<u8>() as usize, 0x10);
    }

    #[test]
    fn test_check_status() {
        assert_eq!(check_status(0), Ok(()));
        assert_eq!(check_status(3), Ok(()));
        assert_eq!(check_status(-22), Err(-22));
    }

    #[test]
    fn test_list_walk_on_empty_list() {
        let lib = SimulatedLibrary::new();
        let mut walk = ListEntries::new(&lib, None);
        assert!(walk.next().is_none());
        assert!(walk.next().is_none());
    }

    #[test]
    #[cfg(not(feature = "udev"))]
    fn test_default_library_without_udev() {
        let lib = default_library();
        assert!(lib.context_new().is_none());
    }
}
