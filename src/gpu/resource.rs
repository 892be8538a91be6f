//! Device-owned GPU object lifecycle
//!
//! A `GpuObject` pairs a backend resource handle with release bookkeeping.
//! Release is safe by default: disposing an object marks it on the device's
//! disposal list stamped with the current frame id, and the backend resource
//! is freed only once enough frames have passed that no in-flight frame can
//! still reference it. Immediate release exists for teardown paths where the
//! caller knows the GPU is idle.

use std::sync::Arc;

use crate::core::error::Error;
use crate::gpu::backend::ResourceHandle;
use crate::gpu::device::DeviceShared;

/// Entry in the device's deferred disposal list
#[derive(Debug)]
pub struct PendingRelease {
    pub handle: ResourceHandle,
    pub label: String,
    /// VRAM returned to the device counter when the handle is freed
    pub vram_bytes: u64,
    /// Frame id stamped when the object was marked
    pub release_frame_id: u64,
}

/// A GPU resource owned through the device's release protocol
pub struct GpuObject {
    device: Arc<DeviceShared>,
    handle: ResourceHandle,
    label: String,
    version: u32,
    vram_bytes: u64,
    released: bool,
    marked: bool,
    release_frame_id: u64,
}

impl GpuObject {
    pub fn new(
        device: Arc<DeviceShared>,
        handle: ResourceHandle,
        label: impl Into<String>,
    ) -> Self {
        let label = label.into();
        log::trace!("created gpu object '{label}'");
        Self {
            device,
            handle,
            label,
            version: 0,
            vram_bytes: 0,
            released: false,
            marked: false,
            release_frame_id: 0,
        }
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Mutation counter for dependent caches
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Record a mutation of the underlying resource
    pub fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    pub fn vram_bytes(&self) -> u64 {
        self.vram_bytes
    }

    /// Record this object's VRAM footprint, updating the device counter
    pub fn set_vram_usage(&mut self, bytes: u64) {
        if self.vram_bytes > 0 {
            self.device.deallocate_vram(self.vram_bytes);
        }
        if bytes > 0 {
            self.device.allocate_vram(bytes);
        }
        self.vram_bytes = bytes;
    }

    /// Whether the backend resource has been freed
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Whether the object sits on the disposal list awaiting reclamation
    pub fn is_marked(&self) -> bool {
        self.marked
    }

    /// Frame id at release or marking; 0 while the object is live
    pub fn release_frame_id(&self) -> u64 {
        self.release_frame_id
    }

    /// Free the backend resource now
    ///
    /// Callable at most once; fails with `AlreadyReleased` on repeat calls
    /// or after the object was marked for deferred release.
    pub fn release(&mut self) -> Result<(), Error> {
        if self.released || self.marked {
            return Err(Error::AlreadyReleased(self.label.clone()));
        }
        self.device.backend().release_resource(self.handle);
        if self.vram_bytes > 0 {
            self.device.deallocate_vram(self.vram_bytes);
        }
        self.released = true;
        self.release_frame_id = self.device.clock().current();
        log::trace!("released gpu object '{}'", self.label);
        Ok(())
    }

    /// Relinquish the object, deferring the actual release unless asked
    /// to free immediately
    ///
    /// The deferred path stamps the current frame id and hands the handle
    /// to the device's disposal list; VRAM stays accounted until the sweep
    /// frees the resource.
    pub fn dispose(&mut self, immediate: bool) -> Result<(), Error> {
        if self.released || self.marked {
            return Err(Error::AlreadyReleased(self.label.clone()));
        }
        if immediate {
            return self.release();
        }
        let frame = self
            .device
            .mark_for_release(self.handle, self.label.clone(), self.vram_bytes)?;
        self.marked = true;
        self.release_frame_id = frame;
        log::trace!("marked gpu object '{}' at frame {frame}", self.label);
        Ok(())
    }
}

impl Drop for GpuObject {
    fn drop(&mut self) {
        if self.released || self.marked {
            return;
        }
        if self.dispose(false).is_err() {
            // Device already torn down; free the handle directly
            self.device.backend().release_resource(self.handle);
            if self.vram_bytes > 0 {
                self.device.deallocate_vram(self.vram_bytes);
            }
            self.released = true;
            log::debug!("released '{}' after device teardown", self.label);
        }
    }
}
