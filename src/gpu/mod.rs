//! GPU device layer: frame pipelining, task queues, resource lifetime
//!
//! Key concepts:
//! - Frame Ring: One slot per in-flight frame, reused round-robin
//! - Task Lanes: Priority-ordered GPU work drained at frame boundaries
//! - Deferred Release: Resources freed only once the GPU is done with them
//! - Backend Seam: All submission goes through the `GpuBackend` trait

pub mod backend;
pub mod cache;
pub mod device;
pub mod frame;
pub mod headless;
pub mod resource;
pub mod tasks;
pub mod wgpu_backend;

pub use backend::{
    CommandListId, FormatUsage, GpuBackend, PixelFormat, ResourceHandle, StagingBuffer,
    StagingBufferDesc,
};
pub use cache::{CacheKey, GraphicsCache};
pub use device::{Device, DeviceEvent, DeviceShared, DeviceState, VramStats};
pub use frame::FrameSlot;
pub use headless::HeadlessBackend;
pub use resource::{GpuObject, PendingRelease};
pub use tasks::{
    BufferUploadTask, CallbackTask, ComputeDispatchTask, GpuTask, PooledTask, TaskContext,
    TaskManager, TaskPool, TaskPriority,
};
pub use wgpu_backend::WgpuBackend;
