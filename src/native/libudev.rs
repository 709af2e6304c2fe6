// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2024 NervoSys

//! libudev provider
//!
//! Binds the system `libudev.so` through the `libudev-sys` declarations.
//! Handles cross the [`NativeLibrary`] boundary as [`RawHandle`]s wrapping
//! the native pointers; strings are copied out of libudev-owned memory
//! immediately.
//!
//! # Implementation Notes
//!
//! The netlink socket behind a udev monitor is non-blocking, so
//! `udev_monitor_receive_device` returns NULL when nothing is queued. To give
//! [`NativeLibrary::monitor_receive_device`] its blocking contract the monitor
//! fd is `poll(2)`ed until readable before each receive. A receive that still
//! yields NULL (message filtered or truncated) goes back to waiting.

use super::{NativeLibrary, RawHandle, Status};
use libc::{c_char, c_int};
use libudev_sys as ffi;
use std::ffi::{CStr, CString};
use std::io;

const EINVAL: Status = libc::EINVAL;

/// System libudev
#[derive(Debug, Default)]
pub struct LibUdev {
    _private: (),
}

impl LibUdev {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Wait until the monitor socket is readable
    fn wait_readable(fd: c_int) -> bool {
        loop {
            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::warn!("poll on udev monitor fd {} failed: {}", fd, err);
                return false;
            }
            if pfd.revents & libc::POLLIN != 0 {
                return true;
            }
            if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                log::debug!("udev monitor fd {} hung up (revents {:#x})", fd, pfd.revents);
                return false;
            }
        }
    }
}

/// Copy a libudev-owned C string
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
unsafe fn owned_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

impl NativeLibrary for LibUdev {
    fn name(&self) -> &str {
        "libudev"
    }

    fn context_new(&self) -> Option<RawHandle> {
        RawHandle::from_ptr(unsafe { ffi::udev_new() })
    }

    fn context_unref(&self, ctx: RawHandle) {
        unsafe {
            ffi::udev_unref(ctx.as_ptr());
        }
    }

    fn monitor_new_from_source(&self, ctx: RawHandle, name: &str) -> Option<RawHandle> {
        let name = CString::new(name).ok()?;
        RawHandle::from_ptr(unsafe {
            ffi::udev_monitor_new_from_netlink(ctx.as_ptr(), name.as_ptr())
        })
    }

    fn monitor_enable_receiving(&self, monitor: RawHandle) -> Status {
        unsafe { ffi::udev_monitor_enable_receiving(monitor.as_ptr()) }
    }

    fn monitor_receive_device(&self, monitor: RawHandle) -> Option<RawHandle> {
        let mon = monitor.as_ptr::<ffi::udev_monitor>();
        let fd = unsafe { ffi::udev_monitor_get_fd(mon) };
        if fd < 0 {
            return None;
        }

        loop {
            if !Self::wait_readable(fd) {
                return None;
            }
            let device = unsafe { ffi::udev_monitor_receive_device(mon) };
            if let Some(handle) = RawHandle::from_ptr(device) {
                return Some(handle);
            }
            log::trace!("udev monitor fd {} readable but no device, waiting again", fd);
        }
    }

    fn monitor_unref(&self, monitor: RawHandle) {
        unsafe {
            ffi::udev_monitor_unref(monitor.as_ptr());
        }
    }

    fn enumerate_new(&self, ctx: RawHandle) -> Option<RawHandle> {
        RawHandle::from_ptr(unsafe { ffi::udev_enumerate_new(ctx.as_ptr()) })
    }

    fn enumerate_add_match_subsystem(&self, enumerate: RawHandle, subsystem: &str) -> Status {
        match CString::new(subsystem) {
            Ok(subsystem) => unsafe {
                ffi::udev_enumerate_add_match_subsystem(enumerate.as_ptr(), subsystem.as_ptr())
            },
            Err(_) => -EINVAL,
        }
    }

    fn enumerate_scan_devices(&self, enumerate: RawHandle) -> Status {
        unsafe { ffi::udev_enumerate_scan_devices(enumerate.as_ptr()) }
    }

    fn enumerate_get_list_entry(&self, enumerate: RawHandle) -> Option<RawHandle> {
        RawHandle::from_ptr(unsafe { ffi::udev_enumerate_get_list_entry(enumerate.as_ptr()) })
    }

    fn enumerate_unref(&self, enumerate: RawHandle) {
        unsafe {
            ffi::udev_enumerate_unref(enumerate.as_ptr());
        }
    }

    fn device_new_from_syspath(&self, ctx: RawHandle, syspath: &str) -> Option<RawHandle> {
        let syspath = CString::new(syspath).ok()?;
        RawHandle::from_ptr(unsafe {
            ffi::udev_device_new_from_syspath(ctx.as_ptr(), syspath.as_ptr())
        })
    }

    fn device_get_devpath(&self, device: RawHandle) -> Option<String> {
        unsafe { owned_string(ffi::udev_device_get_devpath(device.as_ptr())) }
    }

    fn device_get_property_value(&self, device: RawHandle, key: &str) -> Option<String> {
        let key = CString::new(key).ok()?;
        unsafe {
            owned_string(ffi::udev_device_get_property_value(
                device.as_ptr(),
                key.as_ptr(),
            ))
        }
    }

    fn device_get_properties_list_entry(&self, device: RawHandle) -> Option<RawHandle> {
        RawHandle::from_ptr(unsafe { ffi::udev_device_get_properties_list_entry(device.as_ptr()) })
    }

    fn device_unref(&self, device: RawHandle) {
        unsafe {
            ffi::udev_device_unref(device.as_ptr());
        }
    }

    fn list_entry_get_name(&self, entry: RawHandle) -> Option<String> {
        unsafe { owned_string(ffi::udev_list_entry_get_name(entry.as_ptr())) }
    }

    fn list_entry_get_value(&self, entry: RawHandle) -> Option<String> {
        unsafe { owned_string(ffi::udev_list_entry_get_value(entry.as_ptr())) }
    }

    fn list_entry_get_next(&self, entry: RawHandle) -> Option<RawHandle> {
        RawHandle::from_ptr(unsafe { ffi::udev_list_entry_get_next(entry.as_ptr()) })
    }
}
