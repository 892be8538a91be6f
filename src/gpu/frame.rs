//! Per-frame bookkeeping slots
//!
//! The device keeps a ring of `FrameSlot`s, one per frame in flight. A slot
//! records every command list issued during its frame, grouped by branch
//! lane, and owns the CPU-visible staging buffer for uploads recorded that
//! frame. Slots are recycled: the slot about to be reused is reset at the
//! start of each frame, returning its command lists to the backend pool.

use crate::gpu::backend::{CommandListId, GpuBackend, StagingBuffer};

/// Initial number of branch lanes in a fresh slot
const INITIAL_BRANCHES: usize = 4;

/// Bookkeeping for one frame in flight
pub struct FrameSlot {
    /// Command lists issued this frame, grouped by branch lane
    branches: Vec<Vec<CommandListId>>,
    /// Number of lanes used since the last reset
    used_branches: usize,
    /// Frame id stamped at end of frame; 0 while the slot is recording
    frame_id: u64,
    /// Upload staging buffer owned by this slot
    staging: Option<StagingBuffer>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            branches: Vec::new(),
            used_branches: 0,
            frame_id: 0,
            staging: None,
        }
    }

    /// Record a command list under a branch lane
    ///
    /// The branch array grows by doubling when a lane index exceeds its
    /// length; it never shrinks, so steady-state tracking allocates nothing.
    pub fn track(&mut self, cmd: CommandListId, branch: u32) {
        let branch = branch as usize;
        self.ensure_branch(branch);
        self.branches[branch].push(cmd);
        self.used_branches = self.used_branches.max(branch + 1);
    }

    fn ensure_branch(&mut self, branch: usize) {
        if branch < self.branches.len() {
            return;
        }
        let mut new_len = self.branches.len().max(INITIAL_BRANCHES);
        while new_len <= branch {
            new_len *= 2;
        }
        log::trace!("frame slot branch array grew to {new_len} lanes");
        self.branches.resize_with(new_len, Vec::new);
    }

    /// Total command lists tracked since the last reset
    pub fn tracked_count(&self) -> usize {
        self.branches.iter().map(Vec::len).sum()
    }

    /// Command lists tracked under one lane since the last reset
    pub fn tracked_in_branch(&self, branch: u32) -> usize {
        self.branches.get(branch as usize).map_or(0, Vec::len)
    }

    /// Current length of the branch array
    pub fn branch_capacity(&self) -> usize {
        self.branches.len()
    }

    /// Number of lanes used since the last reset
    pub fn used_branches(&self) -> usize {
        self.used_branches
    }

    /// Frame id this slot last recorded, 0 if never stamped or reset
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Stamp the completed frame's id at end of frame
    pub fn stamp(&mut self, frame_id: u64) {
        self.frame_id = frame_id;
    }

    pub fn staging(&self) -> Option<&StagingBuffer> {
        self.staging.as_ref()
    }

    pub(crate) fn set_staging(&mut self, staging: StagingBuffer) {
        debug_assert!(self.staging.is_none(), "slot already owns a staging buffer");
        self.staging = Some(staging);
    }

    /// Return tracked command lists to the backend and clear the slot
    ///
    /// The branch array keeps its length; only its contents are emptied.
    pub fn reset(&mut self, backend: &dyn GpuBackend) {
        for branch in &mut self.branches {
            for cmd in branch.drain(..) {
                backend.free_command_list(cmd);
            }
        }
        self.used_branches = 0;
        self.frame_id = 0;
    }

    /// Reset and release the slot's staging buffer
    pub fn dispose(&mut self, backend: &dyn GpuBackend) {
        self.reset(backend);
        if let Some(staging) = self.staging.take() {
            backend.free_staging_buffer(staging);
        }
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}
