//! Pooled compute dispatch task

use std::sync::Weak;

use super::pool::{PooledTask, TaskPool, recycle_into};
use super::{GpuTask, TaskContext};
use crate::core::error::Error;
use crate::gpu::backend::ResourceHandle;

/// Records a compute dispatch with fixed workgroup counts
///
/// Instances come from the task manager's pool; configure with `set`,
/// optionally add completion callbacks, then push. Invalid instances
/// (null shader or a zero workgroup count) are dropped at push.
#[derive(Default)]
pub struct ComputeDispatchTask {
    shader: ResourceHandle,
    groups: [u32; 3],
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
    pool: Option<Weak<TaskPool<ComputeDispatchTask>>>,
}

impl ComputeDispatchTask {
    /// Configure the dispatch
    pub fn set(&mut self, shader: ResourceHandle, groups: [u32; 3]) {
        self.shader = shader;
        self.groups = groups;
    }

    /// Add a callback fired after the dispatch is recorded
    pub fn on_complete(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn shader(&self) -> ResourceHandle {
        self.shader
    }

    pub fn groups(&self) -> [u32; 3] {
        self.groups
    }
}

impl PooledTask for ComputeDispatchTask {
    fn reset(&mut self) {
        self.shader = ResourceHandle::NULL;
        self.groups = [0; 3];
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

impl GpuTask for ComputeDispatchTask {
    fn is_valid(&self) -> bool {
        !self.shader.is_null() && self.groups.iter().all(|&count| count > 0)
    }

    fn attach_resource(&mut self, handle: ResourceHandle) {
        self.shader = handle;
    }

    fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), Error> {
        ctx.backend.dispatch_compute(ctx.cmd, self.shader, self.groups)
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
