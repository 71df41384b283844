// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Single-owner wrapper for handles into the native layer.

use super::{dl::RawHandle, Error, Result};
use std::fmt;

/// Owns a live native handle and releases it exactly once.
///
/// The release action runs on the first [`release`](NativeHandle::release)
/// call, or on drop if never released explicitly. Using a handle after
/// release is an error, not undefined behavior.
pub struct NativeHandle {
    handle: Option<RawHandle>,
    release: Option<Box<dyn FnOnce(RawHandle) + Send + Sync>>,
}

impl NativeHandle {
    /// Take ownership of `handle`, to be freed by `release`.
    pub fn new(
        handle: RawHandle,
        release: impl FnOnce(RawHandle) + Send + Sync + 'static,
    ) -> NativeHandle {
        NativeHandle {
            handle: Some(handle),
            release: Some(Box::new(release)),
        }
    }

    /// The wrapped handle, if still live.
    pub fn get(&self) -> Result<RawHandle> {
        self.handle
            .ok_or_else(|| Error::InvalidArgument("native handle already released".into()))
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    /// Run the release action and invalidate the handle.
    ///
    /// Further calls do nothing.
    pub fn release(&mut self) {
        if let (Some(handle), Some(release)) = (self.handle.take(), self.release.take()) {
            release(handle);
        }
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("handle", &self.handle)
            .finish()
    }
}
