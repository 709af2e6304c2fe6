// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2024 NervoSys

//! Live device event monitoring
//!
//! A [`DeviceMonitor`] opens a notification channel on the device library
//! ("udev" for processed events, "kernel" for raw uevents), and after
//! [`DeviceMonitor::enable_receiving`] delivers one [`DeviceEvent`] per
//! device change in the order the kernel reported them.
//!
//! [`DeviceMonitor::next_event`] blocks the calling thread with no timeout.
//! Run it on a dedicated thread, or use [`crate::MonitorWorker`] which does
//! that and adds a cancellation flag. The native receive itself cannot be
//! interrupted; cancellation takes effect once it returns.
//!
//! # Examples
//!
//! ```no_run
//! use devmon::DeviceContext;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = DeviceContext::open()?;
//! let mut monitor = ctx.monitor("udev")?;
//! monitor.enable_receiving()?;
//!
//! loop {
//!     let event = monitor.next_event()?;
//!     println!("{}", event.properties);
//! }
//! # }
//! ```

use crate::context::{ContextShared, DeviceContext};
use crate::device::DeviceHandle;
use crate::error::{Error, Result};
use crate::native::{check_status, RawHandle};
use crate::properties::{DeviceProperties, PropertyExtractor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default event source: events after udev rule processing
pub const DEFAULT_SOURCE: &str = "udev";

/// Kind of device change
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Remove,
    Change,
    Move,
    Bind,
    Unbind,
    Online,
    Offline,
    /// Action not known to this crate
    Other(String),
    /// Event carried no `ACTION` property
    Unknown,
}

impl Action {
    /// Parse the value of the `ACTION` property
    pub fn from_property(value: Option<&str>) -> Self {
        match value {
            Some("add") => Action::Add,
            Some("remove") => Action::Remove,
            Some("change") => Action::Change,
            Some("move") => Action::Move,
            Some("bind") => Action::Bind,
            Some("unbind") => Action::Unbind,
            Some("online") => Action::Online,
            Some("offline") => Action::Offline,
            Some(other) => Action::Other(other.to_string()),
            None => Action::Unknown,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Add => write!(f, "add"),
            Action::Remove => write!(f, "remove"),
            Action::Change => write!(f, "change"),
            Action::Move => write!(f, "move"),
            Action::Bind => write!(f, "bind"),
            Action::Unbind => write!(f, "unbind"),
            Action::Online => write!(f, "online"),
            Action::Offline => write!(f, "offline"),
            Action::Other(s) => write!(f, "{}", s),
            Action::Unknown => write!(f, "unknown"),
        }
    }
}

/// One device change received from a monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub properties: DeviceProperties,
    pub action: Action,
    /// When the event was taken off the channel
    pub received_at: DateTime<Utc>,
    /// Position in this monitor's event stream, starting at 1
    pub sequence: u64,
}

/// Lifecycle state of a [`DeviceMonitor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonitorState {
    Created,
    Receiving,
    Closed,
}

/// Subscription to device add/remove/change events
pub struct DeviceMonitor {
    ctx: Arc<ContextShared>,
    raw: Option<RawHandle>,
    source_name: String,
    state: MonitorState,
    extractor: PropertyExtractor,
    sequence: u64,
}

impl DeviceMonitor {
    /// Create a monitor on a fresh context from the platform provider
    pub fn new(source_name: &str) -> Result<Self> {
        let ctx = DeviceContext::open()?;
        Self::create(&ctx, source_name)
    }

    /// Open a notification channel for `source_name` ("udev" or "kernel")
    pub fn create(ctx: &DeviceContext, source_name: &str) -> Result<Self> {
        let shared = ctx.shared()?;
        let raw = shared
            .lib()
            .monitor_new_from_source(shared.handle(), source_name)
            .ok_or_else(|| {
                Error::unavailable(format!(
                    "{}: cannot open '{}' event channel",
                    shared.lib().name(),
                    source_name
                ))
            })?;
        log::debug!("created '{}' monitor {:?}", source_name, raw);

        Ok(Self {
            ctx: shared,
            raw: Some(raw),
            source_name: source_name.to_string(),
            state: MonitorState::Created,
            extractor: PropertyExtractor::default(),
            sequence: 0,
        })
    }

    /// Use a specific extractor for received devices
    pub fn with_extractor(mut self, extractor: PropertyExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Number of events delivered so far
    pub fn events_received(&self) -> u64 {
        self.sequence
    }

    /// Start queuing events on the channel
    pub fn enable_receiving(&mut self) -> Result<()> {
        let raw = self.raw.ok_or(Error::Closed("device monitor"))?;
        if self.state == MonitorState::Receiving {
            return Ok(());
        }

        let status = self.ctx.lib().monitor_enable_receiving(raw);
        check_status(status).map_err(|status| Error::ActivationFailed {
            source_name: self.source_name.clone(),
            status,
        })?;

        log::debug!("monitor {:?} receiving '{}' events", raw, self.source_name);
        self.state = MonitorState::Receiving;
        Ok(())
    }

    /// Block until the next device event
    ///
    /// The received device is released before this returns, so no native
    /// device reference outlives the call. If the channel hangs up or its
    /// wait fails, this returns `Closed`; the monitor itself stays open and
    /// must still be closed or dropped.
    pub fn next_event(&mut self) -> Result<DeviceEvent> {
        let raw = self.raw.ok_or(Error::Closed("device monitor"))?;
        if self.state != MonitorState::Receiving {
            return Err(Error::InvalidState {
                operation: "receive events",
                state: "not receiving",
            });
        }

        let device = self
            .ctx
            .lib()
            .monitor_receive_device(raw)
            .ok_or(Error::Closed("device monitor channel"))?;
        let received_at = Utc::now();
        let device = DeviceHandle::from_raw(Arc::clone(&self.ctx), device);
        let properties = self.extractor.extract(&device);
        drop(device);

        self.sequence += 1;
        let action = Action::from_property(properties.action.as_deref());
        log::debug!(
            "event #{} on '{}': {} {}",
            self.sequence,
            self.source_name,
            action,
            properties.dev_path.as_deref().unwrap_or("-")
        );

        Ok(DeviceEvent {
            properties,
            action,
            received_at,
            sequence: self.sequence,
        })
    }

    /// Release the notification channel
    ///
    /// Later calls to [`Self::next_event`] fail with `Closed`; closing twice
    /// reports `DoubleRelease`.
    pub fn close(&mut self) -> Result<()> {
        let raw = self.raw.take().ok_or(Error::DoubleRelease("device monitor"))?;
        log::debug!(
            "closing '{}' monitor {:?} after {} event(s)",
            self.source_name,
            raw,
            self.sequence
        );
        self.ctx.lib().monitor_unref(raw);
        self.state = MonitorState::Closed;
        Ok(())
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            log::debug!("releasing monitor {:?} on drop", raw);
            self.ctx.lib().monitor_unref(raw);
        }
    }
}

impl fmt::Debug for DeviceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMonitor")
            .field("source_name", &self.source_name)
            .field("raw", &self.raw)
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{SimDevice, SimulatedLibrary};

    fn event(action: &str, path: &str) -> SimDevice {
        SimDevice::new(format!("/sys{}", path))
            .property("ACTION", action)
            .property("DEVPATH", path)
            .property("SUBSYSTEM", "usb")
    }

    fn receiving_monitor(lib: &Arc<SimulatedLibrary>) -> (DeviceContext, DeviceMonitor) {
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let mut monitor = ctx.monitor(DEFAULT_SOURCE).unwrap();
        monitor.enable_receiving().unwrap();
        (ctx, monitor)
    }

    #[test]
    fn test_events_in_order() {
        let lib = Arc::new(SimulatedLibrary::new());
        let (_ctx, mut monitor) = receiving_monitor(&lib);
        lib.push_event(event("add", "/devices/usb1/1-1"));
        lib.push_event(event("remove", "/devices/usb1/1-1"));
        lib.push_event(event("add", "/devices/usb1/1-2"));

        let actions: Vec<_> = (0..3)
            .map(|_| monitor.next_event().unwrap())
            .map(|e| (e.sequence, e.properties.action.unwrap()))
            .collect();

        assert_eq!(
            actions,
            vec![
                (1, "add".to_string()),
                (2, "remove".to_string()),
                (3, "add".to_string())
            ]
        );
        assert_eq!(monitor.events_received(), 3);
    }

    #[test]
    fn test_each_event_releases_its_device() {
        let lib = Arc::new(SimulatedLibrary::new());
        let (_ctx, mut monitor) = receiving_monitor(&lib);
        for i in 0..5 {
            lib.push_event(event("change", &format!("/devices/usb1/1-{}", i)));
        }
        for _ in 0..5 {
            monitor.next_event().unwrap();
            assert_eq!(lib.stats().open_devices(), 0);
        }
        let stats = lib.stats();
        assert_eq!(stats.devices_opened, 5);
        assert_eq!(stats.devices_released, 5);
        assert_eq!(stats.peak_open_devices, 1);
    }

    #[test]
    fn test_action_parsing() {
        let lib = Arc::new(SimulatedLibrary::new());
        let (_ctx, mut monitor) = receiving_monitor(&lib);
        lib.push_event(event("bind", "/devices/usb1/1-1"));
        lib.push_event(SimDevice::new("/sys/devices/odd").property("ACTION", "frobnicate"));
        lib.push_event(SimDevice::new("/sys/devices/bare"));

        assert_eq!(monitor.next_event().unwrap().action, Action::Bind);
        assert_eq!(
            monitor.next_event().unwrap().action,
            Action::Other("frobnicate".to_string())
        );
        let bare = monitor.next_event().unwrap();
        assert_eq!(bare.action, Action::Unknown);
        assert_eq!(bare.properties.dev_path.as_deref(), Some("/devices/bare"));
    }

    #[test]
    fn test_next_event_requires_receiving() {
        let lib = Arc::new(SimulatedLibrary::new());
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let mut monitor = ctx.monitor("udev").unwrap();
        assert_eq!(monitor.state(), MonitorState::Created);
        assert!(matches!(
            monitor.next_event(),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn test_activation_failure() {
        let lib = Arc::new(SimulatedLibrary::new());
        lib.fail_enable_receiving(-13);
        let ctx = DeviceContext::open_with(lib).unwrap();
        let mut monitor = ctx.monitor("kernel").unwrap();
        match monitor.enable_receiving() {
            Err(Error::ActivationFailed {
                source_name,
                status,
            }) => {
                assert_eq!(source_name, "kernel");
                assert_eq!(status, -13);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(monitor.state(), MonitorState::Created);
    }

    #[test]
    fn test_channel_open_failure() {
        let lib = Arc::new(SimulatedLibrary::new());
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        assert!(matches!(
            ctx.monitor("bogus"),
            Err(Error::CapabilityUnavailable(_))
        ));
        lib.fail_monitor_new();
        assert!(matches!(
            DeviceMonitor::create(&ctx, "udev"),
            Err(Error::CapabilityUnavailable(_))
        ));
    }

    #[test]
    fn test_hang_up_closes_channel() {
        let lib = Arc::new(SimulatedLibrary::new());
        let (_ctx, mut monitor) = receiving_monitor(&lib);
        lib.push_event(event("add", "/devices/usb1/1-1"));
        lib.hang_up();

        // Queued events are still delivered before the hang-up shows
        assert_eq!(monitor.next_event().unwrap().action, Action::Add);
        assert!(matches!(
            monitor.next_event(),
            Err(Error::Closed("device monitor channel"))
        ));
        assert_eq!(monitor.state(), MonitorState::Receiving);
        monitor.close().unwrap();
        assert_eq!(lib.stats().monitors_released, 1);
    }

    #[test]
    fn test_events_before_receiving_are_not_seen() {
        let lib = Arc::new(SimulatedLibrary::new());
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let mut monitor = ctx.monitor("udev").unwrap();
        lib.push_event(event("add", "/devices/usb1/old"));
        monitor.enable_receiving().unwrap();
        lib.push_event(event("add", "/devices/usb1/new"));

        let event = monitor.next_event().unwrap();
        assert_eq!(event.properties.dev_path.as_deref(), Some("/devices/usb1/new"));
        assert_eq!(event.sequence, 1);
    }

    #[test]
    fn test_close() {
        let lib = Arc::new(SimulatedLibrary::new());
        let (ctx, mut monitor) = receiving_monitor(&lib);
        monitor.close().unwrap();
        assert_eq!(monitor.state(), MonitorState::Closed);
        assert!(matches!(monitor.next_event(), Err(Error::Closed(_))));
        assert!(matches!(monitor.close(), Err(Error::DoubleRelease(_))));
        assert!(matches!(
            monitor.enable_receiving(),
            Err(Error::Closed(_))
        ));

        drop(monitor);
        drop(ctx);
        let stats = lib.stats();
        assert_eq!(stats.monitors_released, 1);
        assert!(stats.is_balanced());
    }

    #[test]
    fn test_independent_monitors_on_threads() {
        let lib = Arc::new(SimulatedLibrary::new());
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let mut first = ctx.monitor("udev").unwrap();
        let mut second = ctx.monitor("kernel").unwrap();
        first.enable_receiving().unwrap();
        second.enable_receiving().unwrap();

        let take_two = |mut monitor: DeviceMonitor| {
            std::thread::spawn(move || {
                (0..2)
                    .map(|_| {
                        let event = monitor.next_event().unwrap();
                        (event.sequence, event.properties.dev_path.unwrap())
                    })
                    .collect::<Vec<_>>()
            })
        };
        let a = take_two(first);
        let b = take_two(second);
        lib.push_event(event("add", "/devices/usb1/1-1"));
        lib.push_event(event("remove", "/devices/usb1/1-1"));

        let expected = vec![
            (1, "/devices/usb1/1-1".to_string()),
            (2, "/devices/usb1/1-1".to_string()),
        ];
        assert_eq!(a.join().unwrap(), expected);
        assert_eq!(b.join().unwrap(), expected);

        let stats = lib.stats();
        assert_eq!(stats.devices_opened, 4);
        assert_eq!(stats.open_devices(), 0);
    }

    #[test]
    fn test_event_serializes() {
        let lib = Arc::new(SimulatedLibrary::new());
        let (_ctx, mut monitor) = receiving_monitor(&lib);
        lib.push_event(event("remove", "/devices/usb1/1-1"));
        let event = monitor.next_event().unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "remove");
        assert_eq!(json["sequence"], 1);
    }
}
