//! Device configuration

/// Upper bound on frames in flight; larger rings only add latency
pub const MAX_FRAME_BUFFER_SIZE: usize = 8;

/// How long released GPU objects are held before reclamation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReclaimDelay {
    /// Wait one full trip around the frame ring (the safe default)
    FrameRing,
    /// Wait a fixed number of frames regardless of ring size
    Frames(u64),
}

impl ReclaimDelay {
    /// Number of frames an object must age before its GPU memory is freed
    pub fn frames_to_wait(&self, frame_buffer_size: usize) -> u64 {
        match *self {
            ReclaimDelay::FrameRing => frame_buffer_size as u64,
            ReclaimDelay::Frames(n) => n,
        }
    }
}

/// Configuration for the graphics device
#[derive(Clone, Debug)]
pub struct GraphicsConfig {
    /// Number of frames in flight (ring buffer length)
    pub frame_buffer_size: usize,
    /// How long released objects are held before their memory is freed
    pub reclaim_delay: ReclaimDelay,
    /// Size in bytes of the per-frame staging buffer
    pub staging_buffer_size: u64,
    /// Soft VRAM budget in megabytes, used for pressure reporting
    pub vram_budget_mb: usize,
    /// Maximum recycled task instances retained per pool
    pub task_pool_capacity: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            frame_buffer_size: 3,        // Triple buffering
            reclaim_delay: ReclaimDelay::FrameRing,
            staging_buffer_size: 16 * 1024 * 1024,  // 16 MB per frame slot
            vram_budget_mb: 4096,
            task_pool_capacity: 64,
        }
    }
}

impl GraphicsConfig {
    /// Clamp out-of-range values, logging any adjustment
    pub fn validated(mut self) -> Self {
        if self.frame_buffer_size == 0 {
            log::warn!("frame_buffer_size 0 is invalid, clamping to 1");
            self.frame_buffer_size = 1;
        }
        if self.frame_buffer_size > MAX_FRAME_BUFFER_SIZE {
            log::warn!(
                "frame_buffer_size {} exceeds max {}, clamping",
                self.frame_buffer_size,
                MAX_FRAME_BUFFER_SIZE
            );
            self.frame_buffer_size = MAX_FRAME_BUFFER_SIZE;
        }
        if self.task_pool_capacity == 0 {
            log::warn!("task_pool_capacity 0 disables recycling, clamping to 1");
            self.task_pool_capacity = 1;
        }
        self
    }

    /// VRAM budget in bytes
    pub fn vram_budget_bytes(&self) -> u64 {
        (self.vram_budget_mb as u64) * 1024 * 1024
    }
}
