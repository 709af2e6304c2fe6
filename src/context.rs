//! Device library context
//!
//! [`DeviceContext`] owns the root native handle. Enumerators, monitors and
//! device handles keep a shared reference to it, so the native context is
//! released once its owner has closed it and every dependent object is gone,
//! mirroring libudev's own reference counting.

use crate::device::DeviceHandle;
use crate::enumerator::DeviceEnumerator;
use crate::error::{Error, Result};
use crate::monitor::DeviceMonitor;
use crate::native::{self, NativeLibrary, RawHandle};
use std::fmt;
use std::sync::Arc;

/// Shared ownership of one native context handle
pub(crate) struct ContextShared {
    lib: Arc<dyn NativeLibrary>,
    handle: RawHandle,
}

impl ContextShared {
    pub(crate) fn lib(&self) -> &dyn NativeLibrary {
        self.lib.as_ref()
    }

    pub(crate) fn handle(&self) -> RawHandle {
        self.handle
    }
}

impl Drop for ContextShared {
    fn drop(&mut self) {
        log::debug!("releasing {} context {:?}", self.lib.name(), self.handle);
        self.lib.context_unref(self.handle);
    }
}

/// Session with the native device library
///
/// Created with [`DeviceContext::open`] (platform provider) or
/// [`DeviceContext::open_with`] (explicit provider). The context is not
/// `Clone`; hand out enumerators and monitors instead.
pub struct DeviceContext {
    shared: Option<Arc<ContextShared>>,
    provider: String,
}

impl DeviceContext {
    /// Open a context on the platform's default device library
    pub fn open() -> Result<Self> {
        Self::open_with(native::default_library())
    }

    /// Open a context on a specific device library
    pub fn open_with(lib: Arc<dyn NativeLibrary>) -> Result<Self> {
        let provider = lib.name().to_string();
        let handle = lib.context_new().ok_or_else(|| {
            Error::unavailable(format!("{}: failed to create device context", provider))
        })?;
        log::debug!("opened {} context {:?}", provider, handle);

        Ok(Self {
            shared: Some(Arc::new(ContextShared { lib, handle })),
            provider,
        })
    }

    /// Release this context
    ///
    /// The native handle is freed immediately unless enumerators, monitors or
    /// devices created from it are still alive, in which case it is freed when
    /// the last of them is dropped. Closing twice reports `DoubleRelease`.
    pub fn close(&mut self) -> Result<()> {
        match self.shared.take() {
            Some(shared) => {
                let dependents = Arc::strong_count(&shared) - 1;
                if dependents > 0 {
                    log::debug!(
                        "{} context closed with {} dependent handle(s) still alive",
                        self.provider,
                        dependents
                    );
                }
                Ok(())
            }
            None => Err(Error::DoubleRelease("device context")),
        }
    }

    /// Whether [`DeviceContext::close`] has not been called yet
    pub fn is_open(&self) -> bool {
        self.shared.is_some()
    }

    /// Name of the native provider backing this context
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub(crate) fn shared(&self) -> Result<Arc<ContextShared>> {
        self.shared
            .as_ref()
            .map(Arc::clone)
            .ok_or(Error::Closed("device context"))
    }

    /// Create an enumerator on this context
    pub fn enumerator(&self) -> Result<DeviceEnumerator> {
        DeviceEnumerator::create(self)
    }

    /// Create a monitor for the given event source ("udev" or "kernel")
    pub fn monitor(&self, source_name: &str) -> Result<DeviceMonitor> {
        DeviceMonitor::create(self, source_name)
    }

    /// Open a single device by sys-path
    ///
    /// Returns `Ok(None)` if no such device exists.
    pub fn device_from_syspath(&self, syspath: &str) -> Result<Option<DeviceHandle>> {
        let shared = self.shared()?;
        let raw = shared.lib().device_new_from_syspath(shared.handle(), syspath);
        Ok(raw.map(|raw| DeviceHandle::from_raw(shared, raw)))
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("provider", &self.provider)
            .field("open", &self.is_open())
            .finish()
    }
}
