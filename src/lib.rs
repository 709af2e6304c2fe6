//! # devmon
//!
//! Safe Rust access to the host's native device subsystem (udev on Linux):
//! one-shot enumeration of present devices and a blocking stream of
//! add/remove/change events, both reported as normalized
//! [`DeviceProperties`] records.
//!
//! ## Features
//!
//! - **Scoped handles**: every native reference is released exactly once,
//!   by `Drop` if not explicitly
//! - **Lazy enumeration**: devices are opened one at a time while iterating
//! - **Blocking monitors**: run directly or on a [`MonitorWorker`] thread
//! - **Pluggable providers**: libudev (feature `udev`), an unavailable
//!   provider for other platforms, and an in-memory simulation for tests
//!
//! ## Quick Start
//!
//! ### Listing devices
//!
//! ```no_run
//! use devmon::{enumerate_devices, DeviceContext};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = DeviceContext::open()?;
//! for device in enumerate_devices(&ctx, &["usb"])? {
//!     println!("{}", device);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Watching for changes
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
//!     println!("{} {:?}", event.action, event.properties.dev_path);
//! }
//! # }
//! ```
//!
//! ## Platform Support
//!
//! | Platform | Provider | Notes |
//! |----------|----------|-------|
//! | Linux (`udev` feature) | libudev | links `libudev.so` |
//! | Linux without `udev`, Windows, macOS | unavailable | opens fail with `CapabilityUnavailable` |

pub mod config; // Configuration management with TOML persistence
pub mod context;
pub mod device;
pub mod enumerator;
pub mod error;
pub mod monitor;
pub mod native; // Native library providers (libudev, unavailable, simulated)
pub mod platform;
pub mod properties;
pub mod watch; // Monitor on a dedicated thread

pub use config::{Config, ExtractionConfig, MonitorConfig, WorkerConfig};
pub use context::DeviceContext;
pub use device::DeviceHandle;
pub use enumerator::{enumerate_devices, DeviceEnumerator, Entries, EnumeratorState};
pub use error::{Error, Result};
pub use monitor::{Action, DeviceEvent, DeviceMonitor, MonitorState, DEFAULT_SOURCE};
pub use native::{default_library, NativeLibrary, SimulatedLibrary};
pub use platform::Platform;
pub use properties::{
    keys, DeviceProperties, ExtractStrategy, PropertyChain, PropertyExtractor, PropertyMap,
};
pub use watch::{MonitorWorker, DEFAULT_QUEUE_CAPACITY};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
