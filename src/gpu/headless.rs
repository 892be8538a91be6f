//! In-memory backend for tests and headless tools
//!
//! Implements the full backend contract with pure bookkeeping: command
//! lists live in a slot arena with a free list, staging buffers are size
//! records, and every protocol step is counted. Tests drive the device
//! against this backend and assert on the counters instead of GPU state.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::Error;
use crate::gpu::backend::{
    CommandListId, FormatUsage, GpuBackend, PixelFormat, ResourceHandle, StagingBuffer,
    StagingBufferDesc,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ListState {
    Recording,
    Submitted,
    Free,
}

struct ListSlot {
    state: ListState,
    label: String,
    scope_depth: u32,
    commands: usize,
}

struct StagingRecord {
    size: u64,
    writable: bool,
}

#[derive(Default)]
struct Counters {
    created_lists: usize,
    submits: u64,
    begin_frames: u64,
    end_frames: u64,
    setups: u32,
    shutdowns: u32,
    protocol_errors: usize,
    released: usize,
}

struct HeadlessState {
    lists: Vec<ListSlot>,
    free_lists: Vec<u32>,
    staging: HashMap<u64, StagingRecord>,
    released: HashSet<u64>,
    counters: Counters,
}

/// Backend that records protocol traffic without touching a GPU
pub struct HeadlessBackend {
    state: Mutex<HeadlessState>,
    next_handle: AtomicU64,
    fail_setup: bool,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeadlessState {
                lists: Vec::new(),
                free_lists: Vec::new(),
                staging: HashMap::new(),
                released: HashSet::new(),
                counters: Counters::default(),
            }),
            next_handle: AtomicU64::new(1),
            fail_setup: false,
        }
    }

    /// Variant whose `setup` fails, for initialization error tests
    pub fn failing_setup() -> Self {
        Self {
            fail_setup: true,
            ..Self::new()
        }
    }

    /// Mint a resource handle, standing in for a created GPU object
    pub fn mint_resource(&self) -> ResourceHandle {
        ResourceHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Total command list acquisitions
    pub fn created_lists(&self) -> usize {
        self.state.lock().unwrap().counters.created_lists
    }

    /// Command lists currently outside the free pool
    pub fn live_lists(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .lists
            .iter()
            .filter(|slot| slot.state != ListState::Free)
            .count()
    }

    /// Total submissions to the primary queue
    pub fn submit_count(&self) -> u64 {
        self.state.lock().unwrap().counters.submits
    }

    /// Staging buffers currently allocated
    pub fn staging_alive(&self) -> usize {
        self.state.lock().unwrap().staging.len()
    }

    /// Total bytes across live staging buffers
    pub fn staging_bytes_alive(&self) -> u64 {
        self.state
            .lock()
            .unwrap()
            .staging
            .values()
            .map(|record| record.size)
            .sum()
    }

    /// Total resources passed to `release_resource`
    pub fn released_count(&self) -> usize {
        self.state.lock().unwrap().counters.released
    }

    /// Whether a specific resource has been released
    pub fn was_released(&self, handle: ResourceHandle) -> bool {
        self.state.lock().unwrap().released.contains(&handle.0)
    }

    /// Protocol violations observed (double frees, scope mismatches)
    pub fn protocol_errors(&self) -> usize {
        self.state.lock().unwrap().counters.protocol_errors
    }

    pub fn setup_count(&self) -> u32 {
        self.state.lock().unwrap().counters.setups
    }

    pub fn shutdown_count(&self) -> u32 {
        self.state.lock().unwrap().counters.shutdowns
    }

    pub fn begin_frame_count(&self) -> u64 {
        self.state.lock().unwrap().counters.begin_frames
    }

    pub fn end_frame_count(&self) -> u64 {
        self.state.lock().unwrap().counters.end_frames
    }

    /// Commands recorded on a list since it last entered recording
    pub fn commands_recorded(&self, id: CommandListId) -> usize {
        self.state
            .lock()
            .unwrap()
            .lists
            .get(id.0 as usize)
            .map_or(0, |slot| slot.commands)
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessState {
    fn slot_mut(&mut self, id: CommandListId) -> Result<&mut ListSlot, Error> {
        self.lists
            .get_mut(id.0 as usize)
            .ok_or_else(|| Error::CommandList(format!("unknown command list {}", id.0)))
    }

    fn protocol_error(&mut self, what: &str) {
        log::error!("headless backend: {what}");
        self.counters.protocol_errors += 1;
    }
}

impl GpuBackend for HeadlessBackend {
    fn setup(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.counters.setups += 1;
        if self.fail_setup {
            return Err(Error::Backend("simulated setup failure".into()));
        }
        Ok(())
    }

    fn begin_frame(&self) {
        self.state.lock().unwrap().counters.begin_frames += 1;
    }

    fn end_frame(&self) {
        self.state.lock().unwrap().counters.end_frames += 1;
    }

    fn create_command_list(&self, label: &str) -> Result<CommandListId, Error> {
        let mut state = self.state.lock().unwrap();
        state.counters.created_lists += 1;
        let id = match state.free_lists.pop() {
            Some(index) => {
                let slot = &mut state.lists[index as usize];
                slot.state = ListState::Recording;
                slot.label = label.to_string();
                slot.scope_depth = 0;
                slot.commands = 0;
                index
            }
            None => {
                let index = state.lists.len() as u32;
                state.lists.push(ListSlot {
                    state: ListState::Recording,
                    label: label.to_string(),
                    scope_depth: 0,
                    commands: 0,
                });
                index
            }
        };
        Ok(CommandListId(id))
    }

    fn reset_command_list(&self, id: CommandListId) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let slot = state.slot_mut(id)?;
        match slot.state {
            ListState::Submitted => {
                slot.state = ListState::Recording;
                slot.scope_depth = 0;
                slot.commands = 0;
                Ok(())
            }
            ListState::Recording => Err(Error::CommandList(format!(
                "reset of recording list {}",
                id.0
            ))),
            ListState::Free => Err(Error::CommandList(format!("reset of freed list {}", id.0))),
        }
    }

    fn free_command_list(&self, id: CommandListId) {
        let mut state = self.state.lock().unwrap();
        match state.lists.get_mut(id.0 as usize) {
            Some(slot) if slot.state != ListState::Free => {
                slot.state = ListState::Free;
                slot.label.clear();
                slot.scope_depth = 0;
                slot.commands = 0;
                state.free_lists.push(id.0);
            }
            Some(_) => state.protocol_error(&format!("double free of command list {}", id.0)),
            None => state.protocol_error(&format!("free of unknown command list {}", id.0)),
        }
    }

    fn open_scope(&self, id: CommandListId, label: &str) {
        let mut state = self.state.lock().unwrap();
        match state.lists.get_mut(id.0 as usize) {
            Some(slot) if slot.state == ListState::Recording => slot.scope_depth += 1,
            _ => state.protocol_error(&format!("open_scope '{label}' on non-recording list")),
        }
    }

    fn close_scope(&self, id: CommandListId) {
        let mut state = self.state.lock().unwrap();
        match state.lists.get_mut(id.0 as usize) {
            Some(slot) if slot.state == ListState::Recording && slot.scope_depth > 0 => {
                slot.scope_depth -= 1;
            }
            _ => state.protocol_error(&format!("close_scope without open scope on list {}", id.0)),
        }
    }

    fn submit(&self, id: CommandListId) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let slot = state.slot_mut(id)?;
        if slot.state != ListState::Recording {
            return Err(Error::CommandList(format!(
                "submit of non-recording list {}",
                id.0
            )));
        }
        if slot.scope_depth != 0 {
            return Err(Error::CommandList(format!(
                "submit of list {} with {} open scopes",
                id.0, slot.scope_depth
            )));
        }
        slot.state = ListState::Submitted;
        state.counters.submits += 1;
        Ok(())
    }

    fn create_staging_buffer(&self, desc: &StagingBufferDesc) -> Result<StagingBuffer, Error> {
        if desc.size == 0 {
            return Err(Error::Staging("zero-size staging buffer".into()));
        }
        let handle = self.mint_resource();
        let mut state = self.state.lock().unwrap();
        state.staging.insert(
            handle.0,
            StagingRecord {
                size: desc.size,
                writable: desc.writable,
            },
        );
        Ok(StagingBuffer {
            handle,
            size: desc.size,
            readable: desc.readable,
            writable: desc.writable,
        })
    }

    fn free_staging_buffer(&self, buffer: StagingBuffer) {
        let mut state = self.state.lock().unwrap();
        if state.staging.remove(&buffer.handle.0).is_none() {
            state.protocol_error(&format!(
                "free of unknown staging buffer {}",
                buffer.handle.0
            ));
        }
    }

    fn write_staging(
        &self,
        buffer: &StagingBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), Error> {
        let state = self.state.lock().unwrap();
        let record = state
            .staging
            .get(&buffer.handle.0)
            .ok_or_else(|| Error::Staging(format!("unknown staging buffer {}", buffer.handle.0)))?;
        if !record.writable {
            return Err(Error::Staging(format!(
                "write to read-only staging buffer {}",
                buffer.handle.0
            )));
        }
        if offset + data.len() as u64 > record.size {
            return Err(Error::Staging(format!(
                "write of {} bytes at {} overruns staging buffer of {} bytes",
                data.len(),
                offset,
                record.size
            )));
        }
        Ok(())
    }

    fn copy_staging_to_buffer(
        &self,
        id: CommandListId,
        src: &StagingBuffer,
        src_offset: u64,
        dst: ResourceHandle,
        _dst_offset: u64,
        len: u64,
    ) -> Result<(), Error> {
        if dst.is_null() {
            return Err(Error::Backend("copy to null resource".into()));
        }
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.staging.get(&src.handle.0) {
            if src_offset + len > record.size {
                return Err(Error::Staging(format!(
                    "copy of {} bytes at {} overruns staging buffer of {} bytes",
                    len, src_offset, record.size
                )));
            }
        } else {
            return Err(Error::Staging(format!(
                "copy from unknown staging buffer {}",
                src.handle.0
            )));
        }
        let slot = state.slot_mut(id)?;
        if slot.state != ListState::Recording {
            return Err(Error::CommandList(format!(
                "copy recorded on non-recording list {}",
                id.0
            )));
        }
        slot.commands += 1;
        Ok(())
    }

    fn dispatch_compute(
        &self,
        id: CommandListId,
        shader: ResourceHandle,
        groups: [u32; 3],
    ) -> Result<(), Error> {
        if shader.is_null() {
            return Err(Error::Backend("dispatch with null shader".into()));
        }
        if groups.contains(&0) {
            return Err(Error::Backend(format!(
                "dispatch with zero workgroup count {groups:?}"
            )));
        }
        let mut state = self.state.lock().unwrap();
        let slot = state.slot_mut(id)?;
        if slot.state != ListState::Recording {
            return Err(Error::CommandList(format!(
                "dispatch recorded on non-recording list {}",
                id.0
            )));
        }
        slot.commands += 1;
        Ok(())
    }

    fn format_support(&self, format: PixelFormat, usage: FormatUsage) -> Result<bool, Error> {
        let blendable = !matches!(
            format,
            PixelFormat::Depth32Float | PixelFormat::R32Uint | PixelFormat::Rgba32Float
        );
        let storage = !matches!(format, PixelFormat::Bgra8Unorm | PixelFormat::Depth32Float);

        let mut supported = true;
        if usage.contains(FormatUsage::BLENDABLE) {
            supported &= blendable;
        }
        if usage.contains(FormatUsage::STORAGE) {
            supported &= storage;
        }
        Ok(supported)
    }

    fn release_resource(&self, handle: ResourceHandle) {
        let mut state = self.state.lock().unwrap();
        state.counters.released += 1;
        if !state.released.insert(handle.0) {
            state.protocol_error(&format!("repeat release of resource {}", handle.0));
        }
    }

    fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.counters.shutdowns += 1;
        let live = state
            .lists
            .iter()
            .filter(|slot| slot.state != ListState::Free)
            .count();
        if live > 0 {
            log::warn!("headless backend shut down with {live} live command lists");
        }
        if !state.staging.is_empty() {
            log::warn!(
                "headless backend shut down with {} live staging buffers",
                state.staging.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_list_lifecycle() {
        let backend = HeadlessBackend::new();
        let cmd = backend.create_command_list("upload").unwrap();
        assert_eq!(backend.live_lists(), 1);

        backend.open_scope(cmd, "upload");
        backend.close_scope(cmd);
        backend.submit(cmd).unwrap();
        assert_eq!(backend.submit_count(), 1);

        backend.reset_command_list(cmd).unwrap();
        backend.free_command_list(cmd);
        assert_eq!(backend.live_lists(), 0);
        assert_eq!(backend.protocol_errors(), 0);
    }

    #[test]
    fn test_free_list_reuses_slots() {
        let backend = HeadlessBackend::new();
        let a = backend.create_command_list("a").unwrap();
        backend.free_command_list(a);
        let b = backend.create_command_list("b").unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.created_lists(), 2);
    }

    #[test]
    fn test_double_free_is_protocol_error() {
        let backend = HeadlessBackend::new();
        let cmd = backend.create_command_list("a").unwrap();
        backend.free_command_list(cmd);
        backend.free_command_list(cmd);
        assert_eq!(backend.protocol_errors(), 1);
    }

    #[test]
    fn test_submit_rejects_open_scope() {
        let backend = HeadlessBackend::new();
        let cmd = backend.create_command_list("a").unwrap();
        backend.open_scope(cmd, "scope");
        assert!(backend.submit(cmd).is_err());
        backend.close_scope(cmd);
        assert!(backend.submit(cmd).is_ok());
    }

    #[test]
    fn test_staging_write_bounds() {
        let backend = HeadlessBackend::new();
        let staging = backend
            .create_staging_buffer(&StagingBufferDesc {
                readable: false,
                writable: true,
                size: 16,
            })
            .unwrap();

        assert!(backend.write_staging(&staging, 0, &[0u8; 16]).is_ok());
        assert!(backend.write_staging(&staging, 8, &[0u8; 9]).is_err());
        backend.free_staging_buffer(staging);
        assert_eq!(backend.staging_alive(), 0);
    }

    #[test]
    fn test_copy_requires_recording_list() {
        let backend = HeadlessBackend::new();
        let cmd = backend.create_command_list("copy").unwrap();
        let staging = backend
            .create_staging_buffer(&StagingBufferDesc {
                readable: false,
                writable: true,
                size: 64,
            })
            .unwrap();
        let dst = backend.mint_resource();

        backend
            .copy_staging_to_buffer(cmd, &staging, 0, dst, 0, 64)
            .unwrap();
        assert_eq!(backend.commands_recorded(cmd), 1);

        backend.submit(cmd).unwrap();
        assert!(
            backend
                .copy_staging_to_buffer(cmd, &staging, 0, dst, 0, 64)
                .is_err()
        );
    }

    #[test]
    fn test_dispatch_validates_arguments() {
        let backend = HeadlessBackend::new();
        let cmd = backend.create_command_list("compute").unwrap();
        let shader = backend.mint_resource();

        assert!(
            backend
                .dispatch_compute(cmd, ResourceHandle::NULL, [1, 1, 1])
                .is_err()
        );
        assert!(backend.dispatch_compute(cmd, shader, [4, 0, 1]).is_err());
        assert!(backend.dispatch_compute(cmd, shader, [4, 4, 1]).is_ok());
    }

    #[test]
    fn test_format_support_table() {
        let backend = HeadlessBackend::new();
        assert!(
            backend
                .format_support(PixelFormat::Rgba8Unorm, FormatUsage::SAMPLED)
                .unwrap()
        );
        assert!(
            !backend
                .format_support(PixelFormat::Depth32Float, FormatUsage::BLENDABLE)
                .unwrap()
        );
        assert!(
            !backend
                .format_support(
                    PixelFormat::Bgra8Unorm,
                    FormatUsage::SAMPLED | FormatUsage::STORAGE
                )
                .unwrap()
        );
    }

    #[test]
    fn test_failing_setup() {
        let backend = HeadlessBackend::failing_setup();
        assert!(backend.setup().is_err());
        assert_eq!(backend.setup_count(), 1);
    }

    #[test]
    fn test_release_tracks_handles() {
        let backend = HeadlessBackend::new();
        let handle = backend.mint_resource();
        backend.release_resource(handle);
        assert!(backend.was_released(handle));
        assert_eq!(backend.released_count(), 1);
    }
}
