//! Owned native device handle

use crate::context::ContextShared;
use crate::native::RawHandle;
use crate::properties::PropertyChain;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Exclusive owner of one native device reference
///
/// The reference is released when the handle is dropped. A handle can be
/// moved to another thread but not shared between threads, since the native
/// library does not synchronize access to a single device.
pub struct DeviceHandle {
    ctx: Arc<ContextShared>,
    raw: RawHandle,
    _not_sync: PhantomData<Cell<()>>,
}

impl DeviceHandle {
    /// Take ownership of a device reference produced under `ctx`
    pub(crate) fn from_raw(ctx: Arc<ContextShared>, raw: RawHandle) -> Self {
        log::trace!("acquired device {:?}", raw);
        Self {
            ctx,
            raw,
            _not_sync: PhantomData,
        }
    }

    /// Kernel devpath, e.g. `/devices/pci0000:00/0000:00:14.0/usb1`
    pub fn devpath(&self) -> Option<String> {
        self.ctx.lib().device_get_devpath(self.raw)
    }

    /// Look up a single property
    pub fn property(&self, key: &str) -> Option<String> {
        self.ctx.lib().device_get_property_value(self.raw, key)
    }

    /// Walk the device's property list
    pub fn properties(&self) -> PropertyChain<'_> {
        let first = self.ctx.lib().device_get_properties_list_entry(self.raw);
        PropertyChain::new(self.ctx.lib(), first)
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        log::trace!("releasing device {:?}", self.raw);
        self.ctx.lib().device_unref(self.raw);
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle").field("raw", &self.raw).finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::native::{SimDevice, SimulatedLibrary};
    use crate::DeviceContext;
    use std::sync::Arc;

    #[test]
    fn test_handle_reads_and_releases() {
        let lib = Arc::new(
            SimulatedLibrary::new().with_device(
                SimDevice::new("/sys/devices/virtual/net/lo")
                    .property("SUBSYSTEM", "net")
                    .property("INTERFACE", "lo"),
            ),
        );
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let device = ctx
            .device_from_syspath("/sys/devices/virtual/net/lo")
            .unwrap()
            .unwrap();

        assert_eq!(device.devpath().as_deref(), Some("/devices/virtual/net/lo"));
        assert_eq!(device.property("INTERFACE").as_deref(), Some("lo"));
        assert!(device.property("ID_VENDOR").is_none());
        assert_eq!(lib.stats().open_devices(), 1);

        drop(device);
        assert_eq!(lib.stats().open_devices(), 0);
        assert_eq!(lib.stats().devices_released, 1);
    }
}
