//! Pooled buffer upload task

use std::sync::Weak;

use super::pool::{PooledTask, TaskPool, recycle_into};
use super::{GpuTask, TaskContext};
use crate::core::error::Error;
use crate::gpu::backend::ResourceHandle;

/// Stages bytes and records a copy into a device-local buffer
///
/// The payload is written into the executing frame's staging buffer at
/// `staging_offset`, then a copy to the destination is recorded on the
/// task's command list. Callers hand out staging offsets so uploads within
/// one frame do not overlap.
#[derive(Default)]
pub struct BufferUploadTask {
    dst: ResourceHandle,
    dst_offset: u64,
    staging_offset: u64,
    data: Vec<u8>,
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
    pool: Option<Weak<TaskPool<BufferUploadTask>>>,
}

impl BufferUploadTask {
    /// Configure the upload, taking ownership of the payload
    pub fn set(&mut self, dst: ResourceHandle, dst_offset: u64, staging_offset: u64, data: Vec<u8>) {
        self.dst = dst;
        self.dst_offset = dst_offset;
        self.staging_offset = staging_offset;
        self.data = data;
    }

    /// Configure the upload by copying a typed slice into the task's payload
    ///
    /// Pooled tasks keep their payload allocation, so steady-state uploads
    /// of similar size stop allocating after warmup.
    pub fn set_slice<T: bytemuck::NoUninit>(
        &mut self,
        dst: ResourceHandle,
        dst_offset: u64,
        staging_offset: u64,
        data: &[T],
    ) {
        self.dst = dst;
        self.dst_offset = dst_offset;
        self.staging_offset = staging_offset;
        self.data.clear();
        self.data.extend_from_slice(bytemuck::cast_slice(data));
    }

    /// Add a callback fired after the upload is recorded
    pub fn on_complete(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn destination(&self) -> ResourceHandle {
        self.dst
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl PooledTask for BufferUploadTask {
    fn reset(&mut self) {
        self.dst = ResourceHandle::NULL;
        self.dst_offset = 0;
        self.staging_offset = 0;
        // Keep the payload's backing allocation across reuses
        self.data.clear();
        self.callbacks.clear();
        self.pool = None;
    }

    fn attach_pool(&mut self, pool: Weak<TaskPool<Self>>) {
        self.pool = Some(pool);
    }

    fn take_pool(&mut self) -> Option<Weak<TaskPool<Self>>> {
        self.pool.take()
    }
}

impl GpuTask for BufferUploadTask {
    fn is_valid(&self) -> bool {
        !self.dst.is_null() && !self.data.is_empty()
    }

    fn attach_resource(&mut self, handle: ResourceHandle) {
        self.dst = handle;
    }

    fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), Error> {
        let staging = ctx
            .staging
            .ok_or_else(|| Error::Staging("no staging buffer bound for upload".into()))?;
        ctx.backend
            .write_staging(staging, self.staging_offset, &self.data)?;
        ctx.backend.copy_staging_to_buffer(
            ctx.cmd,
            staging,
            self.staging_offset,
            self.dst,
            self.dst_offset,
            self.data.len() as u64,
        )
    }

    fn complete(&mut self) {
        for callback in self.callbacks.drain(..) {
            callback();
        }
    }

    fn recycle(mut self: Box<Self>) {
        let pool = self.take_pool();
        recycle_into(pool, self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::backend::{GpuBackend, StagingBufferDesc};
    use crate::gpu::headless::HeadlessBackend;

    #[test]
    fn test_validity_requires_destination_and_payload() {
        let mut task = BufferUploadTask::default();
        assert!(!task.is_valid());

        task.set(ResourceHandle::new(2), 0, 0, Vec::new());
        assert!(!task.is_valid());

        task.set(ResourceHandle::new(2), 0, 0, vec![1, 2, 3]);
        assert!(task.is_valid());
    }

    #[test]
    fn test_run_stages_and_copies() {
        let backend = HeadlessBackend::new();
        let cmd = backend.create_command_list("upload").unwrap();
        let staging = backend
            .create_staging_buffer(&StagingBufferDesc {
                readable: false,
                writable: true,
                size: 64,
            })
            .unwrap();
        let dst = backend.mint_resource();

        let mut task = BufferUploadTask::default();
        task.set(dst, 16, 0, vec![0xAB; 32]);

        let mut ctx = TaskContext {
            backend: &backend,
            cmd,
            staging: Some(&staging),
        };
        task.run(&mut ctx).unwrap();
        assert_eq!(backend.commands_recorded(cmd), 1);
    }

    #[test]
    fn test_run_without_staging_fails() {
        let backend = HeadlessBackend::new();
        let cmd = backend.create_command_list("upload").unwrap();

        let mut task = BufferUploadTask::default();
        task.set(backend.mint_resource(), 0, 0, vec![1]);

        let mut ctx = TaskContext {
            backend: &backend,
            cmd,
            staging: None,
        };
        assert!(task.run(&mut ctx).is_err());
        assert_eq!(backend.commands_recorded(cmd), 0);
    }

    #[test]
    fn test_set_slice_casts_to_bytes() {
        let mut task = BufferUploadTask::default();
        task.set_slice(ResourceHandle::new(2), 0, 0, &[1u32, 2, 3]);
        assert_eq!(task.len(), 12);
        assert!(task.is_valid());
    }

    #[test]
    fn test_reset_keeps_payload_capacity() {
        let mut task = BufferUploadTask::default();
        task.set(ResourceHandle::new(2), 0, 0, vec![0; 1024]);
        let capacity = task.data.capacity();

        task.reset();
        assert!(task.data.is_empty());
        assert_eq!(task.data.capacity(), capacity);
        assert!(task.dst.is_null());
    }
}
