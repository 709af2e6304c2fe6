//! Simulated device library
//!
//! An in-process [`NativeLibrary`] that models libudev's object graph: a
//! fixed set of "sysfs" devices for enumeration, synthetic events broadcast
//! to monitors, and reference accounting for every handle it hands out.
//!
//! Like a netlink socket, every monitor has its own queue. An event reaches
//! each monitor that is receiving at the time it is pushed; monitors created
//! or enabled later never see it.
//! Setup calls can be made to fail with a chosen negative status.
//!
//! Subsystem matches follow libudev's rule: several matches of the same kind
//! are OR-ed, so a device is listed if its `SUBSYSTEM` equals any of them.

use super::{NativeLibrary, RawHandle, Status};
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};

/// "Invalid argument", returned when a call targets the wrong kind of handle
const EINVAL: Status = 22;

/// A device known to the simulated library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDevice {
    syspath: String,
    properties: Vec<(String, String)>,
}

impl SimDevice {
    /// Device at the given sys-path with no properties
    pub fn new<S: Into<String>>(syspath: S) -> Self {
        Self {
            syspath: syspath.into(),
            properties: Vec::new(),
        }
    }

    /// Append a property; repeated keys are kept in order
    pub fn property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub fn syspath(&self) -> &str {
        &self.syspath
    }

    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }

    fn value(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Acquisition and release counters for every handle kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleStats {
    pub contexts_created: usize,
    pub contexts_released: usize,
    pub monitors_created: usize,
    pub monitors_released: usize,
    pub enumerators_created: usize,
    pub enumerators_released: usize,
    pub devices_opened: usize,
    pub devices_released: usize,
    /// Highest number of device handles open at the same time
    pub peak_open_devices: usize,
    /// Property-list entries handed out (first entries plus `get_next` steps)
    pub property_entries_visited: usize,
    /// Match-list entries handed out
    pub match_entries_visited: usize,
    /// Unref calls on handles that were not live
    pub invalid_releases: usize,
}

impl HandleStats {
    pub fn open_devices(&self) -> usize {
        self.devices_opened - self.devices_released
    }

    /// Every acquired handle was released exactly once
    pub fn is_balanced(&self) -> bool {
        self.contexts_created == self.contexts_released
            && self.monitors_created == self.monitors_released
            && self.enumerators_created == self.enumerators_released
            && self.devices_opened == self.devices_released
            && self.invalid_releases == 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Failures {
    context_new: bool,
    monitor_new: bool,
    enumerate_new: bool,
    add_match: Option<Status>,
    scan: Option<Status>,
    enable_receiving: Option<Status>,
}

#[derive(Debug)]
enum Object {
    Context,
    Monitor {
        receiving: bool,
        queue: VecDeque<SimDevice>,
    },
    Enumerate {
        subsystems: Vec<String>,
        matches: Vec<String>,
    },
    Device(SimDevice),
    Entry {
        owner: usize,
        index: usize,
    },
}

#[derive(Debug, Default)]
struct State {
    next_id: usize,
    objects: HashMap<usize, Object>,
    sysfs: Vec<SimDevice>,
    hung_up: bool,
    failures: Failures,
    stats: HandleStats,
}

impl State {
    fn alloc(&mut self, object: Object) -> RawHandle {
        // non-zero and 8-aligned, like the pointers libudev hands out
        self.next_id += 1;
        let id = self.next_id * 8;
        self.objects.insert(id, object);
        match RawHandle::from_raw(id) {
            Some(handle) => handle,
            None => unreachable!("simulated ids are never zero"),
        }
    }

    fn is_context(&self, handle: RawHandle) -> bool {
        matches!(self.objects.get(&handle.get()), Some(Object::Context))
    }

    fn device(&self, handle: RawHandle) -> Option<&SimDevice> {
        match self.objects.get(&handle.get()) {
            Some(Object::Device(device)) => Some(device),
            _ => None,
        }
    }

    fn open_device(&mut self, device: SimDevice) -> RawHandle {
        self.stats.devices_opened += 1;
        let open = self.stats.open_devices();
        if open > self.stats.peak_open_devices {
            self.stats.peak_open_devices = open;
        }
        self.alloc(Object::Device(device))
    }

    /// Release an owner and the list entries it produced
    fn release(&mut self, handle: RawHandle) -> Option<Object> {
        let object = self.objects.remove(&handle.get())?;
        let owner = handle.get();
        self.objects
            .retain(|_, obj| !matches!(obj, Object::Entry { owner: o, .. } if *o == owner));
        Some(object)
    }

    /// Number of entries in the list owned by `owner`
    fn list_len(&self, owner: usize) -> Option<usize> {
        match self.objects.get(&owner)? {
            Object::Device(device) => Some(device.properties.len()),
            Object::Enumerate { matches, .. } => Some(matches.len()),
            _ => None,
        }
    }

    fn entry(&mut self, owner: usize, index: usize) -> Option<RawHandle> {
        if index >= self.list_len(owner)? {
            return None;
        }
        match self.objects.get(&owner) {
            Some(Object::Device(_)) => self.stats.property_entries_visited += 1,
            Some(Object::Enumerate { .. }) => self.stats.match_entries_visited += 1,
            _ => {}
        }
        Some(self.alloc(Object::Entry { owner, index }))
    }

    fn entry_fields(&self, entry: RawHandle) -> Option<(String, Option<String>)> {
        let (owner, index) = match self.objects.get(&entry.get())? {
            Object::Entry { owner, index } => (*owner, *index),
            _ => return None,
        };
        match self.objects.get(&owner)? {
            Object::Device(device) => device
                .properties
                .get(index)
                .map(|(k, v)| (k.clone(), Some(v.clone()))),
            Object::Enumerate { matches, .. } => matches.get(index).map(|p| (p.clone(), None)),
            _ => None,
        }
    }
}

/// In-process device library with handle accounting
#[derive(Debug, Default)]
pub struct SimulatedLibrary {
    state: Mutex<State>,
    event_ready: Condvar,
}

impl SimulatedLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device to the simulated sysfs tree
    pub fn with_device(self, device: SimDevice) -> Self {
        self.add_device(device);
        self
    }

    /// Add a device to the simulated sysfs tree
    pub fn add_device(&self, device: SimDevice) {
        self.lock().sysfs.push(device);
    }

    /// Remove a device from sysfs, as if it was unplugged after a scan
    pub fn remove_device(&self, syspath: &str) {
        self.lock().sysfs.retain(|d| d.syspath != syspath);
    }

    /// Broadcast an event to every receiving monitor
    ///
    /// Returns the number of monitors that queued it.
    pub fn push_event(&self, device: SimDevice) -> usize {
        let mut state = self.lock();
        let mut delivered = 0;
        for object in state.objects.values_mut() {
            if let Object::Monitor {
                receiving: true,
                queue,
            } = object
            {
                queue.push_back(device.clone());
                delivered += 1;
            }
        }
        drop(state);
        self.event_ready.notify_all();
        delivered
    }

    /// Close the event channel; blocked and future receives return no device
    /// once the queue is drained
    pub fn hang_up(&self) {
        self.lock().hung_up = true;
        self.event_ready.notify_all();
    }

    pub fn fail_context_new(&self) {
        self.lock().failures.context_new = true;
    }

    pub fn fail_monitor_new(&self) {
        self.lock().failures.monitor_new = true;
    }

    pub fn fail_enumerate_new(&self) {
        self.lock().failures.enumerate_new = true;
    }

    pub fn fail_add_match(&self, status: Status) {
        self.lock().failures.add_match = Some(status);
    }

    pub fn fail_scan(&self, status: Status) {
        self.lock().failures.scan = Some(status);
    }

    pub fn fail_enable_receiving(&self, status: Status) {
        self.lock().failures.enable_receiving = Some(status);
    }

    /// Clear all injected failures
    pub fn clear_failures(&self) {
        self.lock().failures = Failures::default();
    }

    /// Snapshot of the handle counters
    pub fn stats(&self) -> HandleStats {
        self.lock().stats.clone()
    }

    /// Events queued on a monitor and not yet received
    pub fn pending_events(&self, monitor: RawHandle) -> usize {
        match self.lock().objects.get(&monitor.get()) {
            Some(Object::Monitor { queue, .. }) => queue.len(),
            _ => 0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl NativeLibrary for SimulatedLibrary {
    fn name(&self) -> &str {
        "simulated"
    }

    fn context_new(&self) -> Option<RawHandle> {
        let mut state = self.lock();
        if state.failures.context_new {
            return None;
        }
        state.stats.contexts_created += 1;
        Some(state.alloc(Object::Context))
    }

    fn context_unref(&self, ctx: RawHandle) {
        let mut state = self.lock();
        match state.release(ctx) {
            Some(Object::Context) => state.stats.contexts_released += 1,
            _ => state.stats.invalid_releases += 1,
        }
    }

    fn monitor_new_from_source(&self, ctx: RawHandle, name: &str) -> Option<RawHandle> {
        let mut state = self.lock();
        if state.failures.monitor_new || !state.is_context(ctx) {
            return None;
        }
        if name != "udev" && name != "kernel" {
            return None;
        }
        state.stats.monitors_created += 1;
        Some(state.alloc(Object::Monitor {
            receiving: false,
            queue: VecDeque::new(),
        }))
    }

    fn monitor_enable_receiving(&self, monitor: RawHandle) -> Status {
        let mut state = self.lock();
        if let Some(status) = state.failures.enable_receiving {
            return status;
        }
        match state.objects.get_mut(&monitor.get()) {
            Some(Object::Monitor { receiving, .. }) => {
                *receiving = true;
                0
            }
            _ => -EINVAL,
        }
    }

    fn monitor_receive_device(&self, monitor: RawHandle) -> Option<RawHandle> {
        let mut state = self.lock();
        loop {
            let next = match state.objects.get_mut(&monitor.get()) {
                Some(Object::Monitor {
                    receiving: true,
                    queue,
                }) => queue.pop_front(),
                _ => return None,
            };
            if let Some(device) = next {
                return Some(state.open_device(device));
            }
            if state.hung_up {
                return None;
            }
            state = self
                .event_ready
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn monitor_unref(&self, monitor: RawHandle) {
        let mut state = self.lock();
        match state.release(monitor) {
            Some(Object::Monitor { .. }) => state.stats.monitors_released += 1,
            _ => state.stats.invalid_releases += 1,
        }
    }

    fn enumerate_new(&self, ctx: RawHandle) -> Option<RawHandle> {
        let mut state = self.lock();
        if state.failures.enumerate_new || !state.is_context(ctx) {
            return None;
        }
        state.stats.enumerators_created += 1;
        Some(state.alloc(Object::Enumerate {
            subsystems: Vec::new(),
            matches: Vec::new(),
        }))
    }

    fn enumerate_add_match_subsystem(&self, enumerate: RawHandle, subsystem: &str) -> Status {
        let mut state = self.lock();
        if let Some(status) = state.failures.add_match {
            return status;
        }
        match state.objects.get_mut(&enumerate.get()) {
            Some(Object::Enumerate { subsystems, .. }) => {
                subsystems.push(subsystem.to_string());
                0
            }
            _ => -EINVAL,
        }
    }

    fn enumerate_scan_devices(&self, enumerate: RawHandle) -> Status {
        let mut state = self.lock();
        if let Some(status) = state.failures.scan {
            return status;
        }
        let State { objects, sysfs, .. } = &mut *state;
        match objects.get_mut(&enumerate.get()) {
            Some(Object::Enumerate {
                subsystems,
                matches,
            }) => {
                *matches = sysfs
                    .iter()
                    .filter(|d| {
                        subsystems.is_empty()
                            || d.value("SUBSYSTEM")
                                .map_or(false, |s| subsystems.iter().any(|m| m == s))
                    })
                    .map(|d| d.syspath.clone())
                    .collect();
                0
            }
            _ => -EINVAL,
        }
    }

    fn enumerate_get_list_entry(&self, enumerate: RawHandle) -> Option<RawHandle> {
        let mut state = self.lock();
        match state.objects.get(&enumerate.get()) {
            Some(Object::Enumerate { .. }) => state.entry(enumerate.get(), 0),
            _ => None,
        }
    }

    fn enumerate_unref(&self, enumerate: RawHandle) {
        let mut state = self.lock();
        match state.release(enumerate) {
            Some(Object::Enumerate { .. }) => state.stats.enumerators_released += 1,
            _ => state.stats.invalid_releases += 1,
        }
    }

    fn device_new_from_syspath(&self, ctx: RawHandle, syspath: &str) -> Option<RawHandle> {
        let mut state = self.lock();
        if !state.is_context(ctx) {
            return None;
        }
        let device = state.sysfs.iter().find(|d| d.syspath == syspath)?.clone();
        Some(state.open_device(device))
    }

    fn device_get_devpath(&self, device: RawHandle) -> Option<String> {
        let state = self.lock();
        let device = state.device(device)?;
        let devpath = device
            .syspath
            .strip_prefix("/sys")
            .unwrap_or(&device.syspath);
        Some(devpath.to_string())
    }

    fn device_get_property_value(&self, device: RawHandle, key: &str) -> Option<String> {
        let state = self.lock();
        state.device(device)?.value(key).map(str::to_string)
    }

    fn device_get_properties_list_entry(&self, device: RawHandle) -> Option<RawHandle> {
        let mut state = self.lock();
        state.device(device)?;
        state.entry(device.get(), 0)
    }

    fn device_unref(&self, device: RawHandle) {
        let mut state = self.lock();
        match state.release(device) {
            Some(Object::Device(_)) => state.stats.devices_released += 1,
            _ => state.stats.invalid_releases += 1,
        }
    }

    fn list_entry_get_name(&self, entry: RawHandle) -> Option<String> {
        self.lock().entry_fields(entry).map(|(name, _)| name)
    }

    fn list_entry_get_value(&self, entry: RawHandle) -> Option<String> {
        self.lock().entry_fields(entry).and_then(|(_, value)| value)
    }

    fn list_entry_get_next(&self, entry: RawHandle) -> Option<RawHandle> {
        let mut state = self.lock();
        let (owner, index) = match state.objects.get(&entry.get())? {
            Object::Entry { owner, index } => (*owner, *index),
            _ => return None,
        };
        state.entry(owner, index + 1)
    }
}
