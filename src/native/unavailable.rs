//! Null provider for platforms without a device notification subsystem
//!
//! Every constructor reports absence, so [`crate::DeviceContext::open`]
//! fails with `CapabilityUnavailable` instead of emulating devices.

use super::{NativeLibrary, RawHandle, Status};

/// "Function not implemented", reported for every setup call
const ENOSYS: Status = 38;

/// Provider that never produces a handle
#[derive(Debug, Clone)]
pub struct Unavailable {
    reason: String,
}

impl Unavailable {
    pub fn new<S: Into<String>>(reason: S) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl NativeLibrary for Unavailable {
    fn name(&self) -> &str {
        &self.reason
    }

    fn context_new(&self) -> Option<RawHandle> {
        None
    }

    fn context_unref(&self, _ctx: RawHandle) {}

    fn monitor_new_from_source(&self, _ctx: RawHandle, _name: &str) -> Option<RawHandle> {
        None
    }

    fn monitor_enable_receiving(&self, _monitor: RawHandle) -> Status {
        -ENOSYS
    }

    fn monitor_receive_device(&self, _monitor: RawHandle) -> Option<RawHandle> {
        None
    }

    fn monitor_unref(&self, _monitor: RawHandle) {}

    fn enumerate_new(&self, _ctx: RawHandle) -> Option<RawHandle> {
        None
    }

    fn enumerate_add_match_subsystem(&self, _enumerate: RawHandle, _subsystem: &str) -> Status {
        -ENOSYS
    }

    fn enumerate_scan_devices(&self, _enumerate: RawHandle) -> Status {
        -ENOSYS
    }

    fn enumerate_get_list_entry(&self, _enumerate: RawHandle) -> Option<RawHandle> {
        None
    }

    fn enumerate_unref(&self, _enumerate: RawHandle) {}

    fn device_new_from_syspath(&self, _ctx: RawHandle, _syspath: &str) -> Option<RawHandle> {
        None
    }

    fn device_get_devpath(&self, _device: RawHandle) -> Option<String> {
        None
    }

    fn device_get_property_value(&self, _device: RawHandle, _key: &str) -> Option<String> {
        None
    }

    fn device_get_properties_list_entry(&self, _device: RawHandle) -> Option<RawHandle> {
        None
    }

    fn device_unref(&self, _device: RawHandle) {}

    fn list_entry_get_name(&self, _entry: RawHandle) -> Option<String> {
        None
    }

    fn list_entry_get_value(&self, _entry: RawHandle) -> Option<String> {
        None
    }

    fn list_entry_get_next(&self, _entry: RawHandle) -> Option<RawHandle> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_never_creates_context() {
        let lib = Unavailable::new("no udev here");
        assert!(lib.context_new().is_none());
        assert_eq!(lib.name(), "no udev here");
        assert_eq!(lib.reason(), "no udev here");
    }
}
