//! Background event delivery
//!
//! [`MonitorWorker`] moves a [`DeviceMonitor`] onto a dedicated thread that
//! loops on [`DeviceMonitor::next_event`] and forwards results over a bounded
//! channel, preserving their order.
//!
//! # Cancellation
//!
//! [`MonitorWorker::stop`] sets a flag that the thread checks between
//! receives. A receive already blocked inside the device library is not
//! interrupted: the thread exits (and closes the monitor) once that call
//! returns. From the caller's side, every receive after `stop` reports
//! `Interrupted` immediately.
//!
//! # Examples
//!
//! ```no_run
//! use devmon::{DeviceContext, MonitorWorker};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = DeviceContext::open()?;
//! let mut worker = MonitorWorker::spawn(ctx.monitor("udev")?, 64)?;
//!
//! while let Some(event) = worker.recv_timeout(Duration::from_secs(5))? {
//!     println!("#{} {}", event.sequence, event.properties);
//! }
//! worker.stop();
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::monitor::{DeviceEvent, DeviceMonitor, MonitorState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default number of events buffered between the worker and the caller
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// A [`DeviceMonitor`] running on its own thread
pub struct MonitorWorker {
    receiver: Receiver<Result<DeviceEvent>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    source_name: String,
}

impl MonitorWorker {
    /// Start delivering events from `monitor`
    ///
    /// Enables receiving if the monitor is not receiving yet. At most
    /// `capacity` events are buffered; beyond that the worker waits for the
    /// caller before taking more events off the channel.
    pub fn spawn(mut monitor: DeviceMonitor, capacity: usize) -> Result<Self> {
        if monitor.state() == MonitorState::Created {
            monitor.enable_receiving()?;
        }

        let source_name = monitor.source_name().to_string();
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("devmon-{}", source_name))
            .spawn(move || run(monitor, sender, thread_stop))?;
        log::info!("started '{}' monitor worker", source_name);

        Ok(Self {
            receiver,
            stop,
            handle: Some(handle),
            source_name,
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Whether [`Self::stop`] has been called
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn disconnected(&self) -> Error {
        if self.is_stopped() {
            Error::Interrupted
        } else {
            Error::Closed("monitor worker")
        }
    }

    /// Wait for the next event
    pub fn recv(&self) -> Result<DeviceEvent> {
        if self.is_stopped() {
            return Err(Error::Interrupted);
        }
        match self.receiver.recv() {
            Ok(result) => result,
            Err(_) => Err(self.disconnected()),
        }
    }

    /// Wait up to `timeout` for the next event; `Ok(None)` on timeout
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<DeviceEvent>> {
        if self.is_stopped() {
            return Err(Error::Interrupted);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.disconnected()),
        }
    }

    /// Take an event if one is already queued
    pub fn try_recv(&self) -> Result<Option<DeviceEvent>> {
        if self.is_stopped() {
            return Err(Error::Interrupted);
        }
        match self.receiver.try_recv() {
            Ok(result) => result.map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.disconnected()),
        }
    }

    /// Iterate over events until the worker stops or reports an error
    pub fn iter(&self) -> impl Iterator<Item = DeviceEvent> + '_ {
        std::iter::from_fn(move || self.recv().ok())
    }

    /// Request cancellation without waiting for the thread
    pub fn stop(&mut self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            log::info!("stopping '{}' monitor worker", self.source_name);
        }
    }

    /// Request cancellation and wait for the thread to exit
    ///
    /// Blocks until the in-flight native receive returns, which may require
    /// one more device event or the channel closing.
    pub fn join(mut self) -> Result<()> {
        self.stop();
        // Unblock a worker waiting on a full queue
        while self.receiver.try_recv().is_ok() {}
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Closed("monitor worker (panicked)")),
            None => Ok(()),
        }
    }
}

impl Drop for MonitorWorker {
    fn drop(&mut self) {
        // The receiver goes away with us, so the thread exits on its next send
        self.stop.store(true, Ordering::Release);
    }
}

fn run(
    mut monitor: DeviceMonitor,
    sender: SyncSender<Result<DeviceEvent>>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Acquire) {
        let result = monitor.next_event();
        if stop.load(Ordering::Acquire) {
            if let Ok(event) = &result {
                log::debug!("dropping event #{} received after stop", event.sequence);
            }
            break;
        }

        let failed = result.is_err();
        if let Err(err) = &result {
            log::warn!("'{}' monitor worker ending: {}", monitor.source_name(), err);
        }
        if sender.send(result).is_err() || failed {
            break;
        }
    }

    if let Err(err) = monitor.close() {
        log::warn!("failed to close '{}' monitor: {}", monitor.source_name(), err);
    }
    log::info!(
        "'{}' monitor worker exited after {} event(s)",
        monitor.source_name(),
        monitor.events_received()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{SimDevice, SimulatedLibrary};
    use crate::DeviceContext;

    fn event(action: &str, n: u32) -> SimDevice {
        SimDevice::new(format!("/sys/devices/usb1/1-{}", n))
            .property("ACTION", action)
            .property("SUBSYSTEM", "usb")
    }

    fn worker(lib: &Arc<SimulatedLibrary>) -> (DeviceContext, MonitorWorker) {
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let monitor = ctx.monitor("udev").unwrap();
        let worker = MonitorWorker::spawn(monitor, DEFAULT_QUEUE_CAPACITY).unwrap();
        (ctx, worker)
    }

    #[test]
    fn test_worker_delivers_in_order() {
        let lib = Arc::new(SimulatedLibrary::new());
        let (_ctx, worker) = worker(&lib);
        lib.push_event(event("add", 1));
        lib.push_event(event("remove", 1));
        lib.push_event(event("add", 2));

        let actions: Vec<_> = (0..3)
            .map(|_| worker.recv().unwrap().properties.action.unwrap())
            .collect();
        assert_eq!(actions, vec!["add", "remove", "add"]);

        lib.hang_up();
        assert!(matches!(
            worker.recv(),
            Err(Error::Closed("device monitor channel"))
        ));
        assert!(matches!(worker.recv(), Err(Error::Closed("monitor worker"))));
        worker.join().unwrap();
        assert_eq!(lib.stats().monitors_released, 1);
        assert_eq!(lib.stats().open_devices(), 0);
    }

    #[test]
    fn test_recv_timeout_without_events() {
        let lib = Arc::new(SimulatedLibrary::new());
        let (_ctx, worker) = worker(&lib);
        assert!(worker
            .recv_timeout(Duration::from_millis(20))
            .unwrap()
            .is_none());
        assert!(worker.try_recv().unwrap().is_none());
        lib.hang_up();
        worker.join().unwrap();
    }

    #[test]
    fn test_stop_while_blocked() {
        let lib = Arc::new(SimulatedLibrary::new());
        let (_ctx, mut worker) = worker(&lib);
        worker.stop();
        assert!(worker.is_stopped());
        assert!(matches!(worker.recv(), Err(Error::Interrupted)));
        assert!(matches!(worker.try_recv(), Err(Error::Interrupted)));

        // The blocked receive only returns once the channel produces something
        lib.push_event(event("add", 1));
        worker.join().unwrap();
        assert_eq!(lib.stats().monitors_released, 1);
        assert_eq!(lib.stats().open_devices(), 0);
    }

    #[test]
    fn test_spawn_fails_on_activation_error() {
        let lib = Arc::new(SimulatedLibrary::new());
        lib.fail_enable_receiving(-1);
        let ctx = DeviceContext::open_with(lib.clone()).unwrap();
        let monitor = ctx.monitor("udev").unwrap();
        assert!(matches!(
            MonitorWorker::spawn(monitor, 8),
            Err(Error::ActivationFailed { .. })
        ));
        assert_eq!(lib.stats().monitors_released, 1);
    }

    #[test]
    fn test_iter_ends_on_hang_up() {
        let lib = Arc::new(SimulatedLibrary::new());
        let (_ctx, worker) = worker(&lib);
        for n in 0..4 {
            lib.push_event(event("change", n));
        }
        lib.hang_up();
        let sequences: Vec<_> = worker.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }
}
