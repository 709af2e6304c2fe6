//! Host platform detection
//!
//! Only Linux ships a native device-notification subsystem (udev). Other
//! hosts get [`crate::native::Unavailable`] and every open reports
//! `CapabilityUnavailable`; [`Platform`] lets callers explain why.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Operating system family of the running host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
    MacOS,
    /// Other Unix-like systems (BSDs, illumos, ...)
    Unix,
    Unknown,
}

impl Platform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOS
        } else if cfg!(unix) {
            Platform::Unix
        } else {
            Platform::Unknown
        }
    }

    /// Whether a udev-style device event subsystem exists on this platform
    pub fn supports_device_events(&self) -> bool {
        matches!(self, Platform::Linux)
    }

    /// Whether this build links the native device library
    pub fn native_support_compiled() -> bool {
        cfg!(all(target_os = "linux", feature = "udev"))
    }

    /// Whether the udev daemon appears to be running
    ///
    /// systemd-udevd creates its control socket under `/run/udev`. Without
    /// the daemon, "udev" monitors receive nothing while "kernel" monitors
    /// still see raw uevents.
    pub fn udev_daemon_running(&self) -> bool {
        self.supports_device_events() && Path::new("/run/udev/control").exists()
    }

    /// Kernel release string, if the platform exposes one
    pub fn kernel_release(&self) -> Option<String> {
        if !self.supports_device_events() {
            return None;
        }
        fs::read_to_string("/proc/sys/kernel/osrelease")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Human-readable reason why devices cannot be listed or watched, if any
    pub fn unavailable_reason(&self) -> Option<String> {
        if !self.supports_device_events() {
            return Some(format!("{} has no udev device subsystem", self));
        }
        if !Self::native_support_compiled() {
            return Some("built without the `udev` feature".to_string());
        }
        None
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Linux => "Linux",
            Platform::Windows => "Windows",
            Platform::MacOS => "macOS",
            Platform::Unix => "Unix",
            Platform::Unknown => "unknown platform",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_platform() {
        let platform = Platform::current();
        #[cfg(target_os = "linux")]
        assert_eq!(platform, Platform::Linux);
        #[cfg(windows)]
        assert_eq!(platform, Platform::Windows);
        #[cfg(target_os = "macos")]
        assert_eq!(platform, Platform::MacOS);
        assert_eq!(
            platform.supports_device_events(),
            cfg!(target_os = "linux")
        );
    }

    #[test]
    fn test_unavailable_reason() {
        let reason = Platform::Windows.unavailable_reason().unwrap();
        assert!(reason.contains("Windows"));
        assert!(Platform::MacOS.kernel_release().is_none());
        assert!(!Platform::Unknown.udev_daemon_running());

        assert_eq!(
            Platform::Linux.unavailable_reason().is_none(),
            Platform::native_support_compiled()
        );
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&Platform::MacOS).unwrap(),
            "\"macos\""
        );
    }
}
