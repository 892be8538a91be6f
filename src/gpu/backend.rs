//! Backend capability contract for the device layer
//!
//! The device core is API-agnostic. Everything it needs from a concrete
//! graphics API is one of the capabilities below: command list pooling,
//! labeled scopes, submission, staging memory, compute dispatch, format
//! queries, and resource release. Backends implement `GpuBackend`; the
//! device composes one behind `Arc<dyn GpuBackend>` so release hooks and
//! task execution can run from any thread.

use crate::core::error::Error;

/// Handle to a pooled backend command list
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct CommandListId(pub u32);

/// Handle to a backend-owned GPU resource
///
/// 0 is reserved as the null handle; backends mint ids from 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ResourceHandle(pub u64);

impl ResourceHandle {
    /// Null handle
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl Default for ResourceHandle {
    fn default() -> Self {
        Self::NULL
    }
}

/// Texture formats the device layer can query support for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    R32Uint,
}

/// Usage flags for format support queries
///
/// A query with no flags set is a caller bug and is rejected by the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FormatUsage(u32);

impl FormatUsage {
    pub const NONE: Self = Self(0);
    pub const SAMPLED: Self = Self(1);
    pub const STORAGE: Self = Self(1 << 1);
    pub const RENDER_TARGET: Self = Self(1 << 2);
    pub const BLENDABLE: Self = Self(1 << 3);

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for FormatUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for FormatUsage {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Descriptor for staging buffer allocation
#[derive(Clone, Copy, Debug)]
pub struct StagingBufferDesc {
    /// CPU can read the buffer back (readback staging)
    pub readable: bool,
    /// CPU can write into the buffer (upload staging)
    pub writable: bool,
    /// Size in bytes
    pub size: u64,
}

/// CPU-visible intermediate buffer, typically owned by a frame slot
#[derive(Debug)]
pub struct StagingBuffer {
    pub handle: ResourceHandle,
    pub size: u64,
    pub readable: bool,
    pub writable: bool,
}

/// Capabilities a concrete graphics API provides to the device core
///
/// All methods take `&self`: backends are shared across threads behind an
/// `Arc`, so any internal pools or arenas carry their own locking. Freeing
/// a command list after `submit` must always be safe; backends that need
/// to hold submitted lists until the GPU retires them defer internally.
pub trait GpuBackend: Send + Sync {
    /// One-time setup after construction, before any frame
    fn setup(&self) -> Result<(), Error>;

    /// Hook at the start of each CPU frame
    fn begin_frame(&self) {}

    /// Hook at the end of each CPU frame
    fn end_frame(&self) {}

    /// Acquire a command list in the recording state
    fn create_command_list(&self, label: &str) -> Result<CommandListId, Error>;

    /// Return a submitted list to the recording state, clearing its contents
    fn reset_command_list(&self, id: CommandListId) -> Result<(), Error>;

    /// Return a command list to the backend pool
    fn free_command_list(&self, id: CommandListId);

    /// Open a labeled debug scope on a recording list
    fn open_scope(&self, id: CommandListId, label: &str);

    /// Close the innermost debug scope on a recording list
    fn close_scope(&self, id: CommandListId);

    /// Submit a recorded list to the primary queue
    fn submit(&self, id: CommandListId) -> Result<(), Error>;

    /// Allocate a CPU-visible staging buffer
    fn create_staging_buffer(&self, desc: &StagingBufferDesc) -> Result<StagingBuffer, Error>;

    /// Free a staging buffer
    fn free_staging_buffer(&self, buffer: StagingBuffer);

    /// Write bytes into a writable staging buffer
    fn write_staging(&self, buffer: &StagingBuffer, offset: u64, data: &[u8])
    -> Result<(), Error>;

    /// Record a copy from staging memory into a device-local buffer
    fn copy_staging_to_buffer(
        &self,
        id: CommandListId,
        src: &StagingBuffer,
        src_offset: u64,
        dst: ResourceHandle,
        dst_offset: u64,
        len: u64,
    ) -> Result<(), Error>;

    /// Record a compute dispatch with the given workgroup counts
    fn dispatch_compute(
        &self,
        id: CommandListId,
        shader: ResourceHandle,
        groups: [u32; 3],
    ) -> Result<(), Error>;

    /// Whether `format` supports every usage in `usage`
    ///
    /// Callers guarantee `usage` is non-empty; the device rejects empty
    /// queries before they reach the backend.
    fn format_support(&self, format: PixelFormat, usage: FormatUsage) -> Result<bool, Error>;

    /// Release a GPU resource; must be callable from any thread
    fn release_resource(&self, handle: ResourceHandle);

    /// Final teardown after all resources and lists are released
    fn shutdown(&self);
}
