//! Graphics device and frame pipelining
//!
//! `Device` owns the frame ring, the task manager, and the teardown
//! protocol; it lives on the render thread and all of its methods take
//! `&mut self`. `DeviceShared` is the thread-safe half behind an `Arc`:
//! producer threads use it for deferred release, VRAM accounting, the
//! structural cache, and format queries.
//!
//! The renderer drives one frame as: advance the frame clock, call
//! `begin_frame`, record work (draining task lanes at their points),
//! then `end_frame`. Ring resizes requested mid-frame apply at the next
//! `begin_frame`, so the current write index always stays inside the ring.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::config::{GraphicsConfig, MAX_FRAME_BUFFER_SIZE, ReclaimDelay};
use crate::core::error::Error;
use crate::core::time::FrameClock;
use crate::gpu::backend::{
    CommandListId, FormatUsage, GpuBackend, PixelFormat, ResourceHandle, StagingBufferDesc,
};
use crate::gpu::cache::GraphicsCache;
use crate::gpu::frame::FrameSlot;
use crate::gpu::resource::PendingRelease;
use crate::gpu::tasks::{TaskManager, TaskPriority};

/// Lifecycle states of the device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    Initializing,
    Initialized,
    Disposing,
    Disposed,
}

/// Notifications drained once per frame by the renderer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The frame ring changed length at a frame boundary
    FrameRingResized { old: usize, new: usize },
    /// An output surface was registered with the device
    OutputRegistered { output: ResourceHandle },
}

/// VRAM accounting snapshot
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct VramStats {
    pub allocated_bytes: u64,
    pub budget_bytes: u64,
    /// Fraction of the budget in use; 0.0 when no budget is set
    pub pressure: f32,
}

/// Thread-safe device state shared with producer threads
pub struct DeviceShared {
    backend: Arc<dyn GpuBackend>,
    clock: Arc<FrameClock>,
    disposals: Mutex<Vec<PendingRelease>>,
    allocated_vram: AtomicI64,
    vram_budget_bytes: u64,
    cache: GraphicsCache,
    events: Mutex<Vec<DeviceEvent>>,
    disposed: AtomicBool,
}

impl DeviceShared {
    fn new(backend: Arc<dyn GpuBackend>, clock: Arc<FrameClock>, vram_budget_bytes: u64) -> Self {
        Self {
            backend,
            clock,
            disposals: Mutex::new(Vec::new()),
            allocated_vram: AtomicI64::new(0),
            vram_budget_bytes,
            cache: GraphicsCache::new(),
            events: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &dyn GpuBackend {
        self.backend.as_ref()
    }

    pub fn clock(&self) -> &FrameClock {
        self.clock.as_ref()
    }

    pub fn cache(&self) -> &GraphicsCache {
        &self.cache
    }

    /// Put a resource on the disposal list, stamped with the current frame
    ///
    /// Returns the stamped frame id. Fails once the device has begun
    /// tearing down; the caller then owns the handle again.
    pub fn mark_for_release(
        &self,
        handle: ResourceHandle,
        label: String,
        vram_bytes: u64,
    ) -> Result<u64, Error> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::DeviceDisposed);
        }
        let frame = self.clock.current();
        self.disposals.lock().unwrap().push(PendingRelease {
            handle,
            label,
            vram_bytes,
            release_frame_id: frame,
        });
        Ok(frame)
    }

    /// Entries currently waiting on the disposal list
    pub fn pending_release_count(&self) -> usize {
        self.disposals.lock().unwrap().len()
    }

    pub fn allocate_vram(&self, bytes: u64) {
        self.allocated_vram.fetch_add(bytes as i64, Ordering::Relaxed);
    }

    pub fn deallocate_vram(&self, bytes: u64) {
        let previous = self.allocated_vram.fetch_sub(bytes as i64, Ordering::Relaxed);
        if previous < bytes as i64 {
            log::warn!("vram counter underflow: freed {bytes} bytes with {previous} accounted");
        }
    }

    pub fn vram_stats(&self) -> VramStats {
        let allocated = self.allocated_vram.load(Ordering::Relaxed).max(0) as u64;
        let pressure = if self.vram_budget_bytes > 0 {
            allocated as f32 / self.vram_budget_bytes as f32
        } else {
            0.0
        };
        VramStats {
            allocated_bytes: allocated,
            budget_bytes: self.vram_budget_bytes,
            pressure,
        }
    }

    /// Whether `format` supports every usage in `usage`
    pub fn format_support(&self, format: PixelFormat, usage: FormatUsage) -> Result<bool, Error> {
        if usage.is_empty() {
            return Err(Error::EmptyFormatQuery);
        }
        self.backend.format_support(format, usage)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn push_event(&self, event: DeviceEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Render-thread owner of the frame ring and device lifecycle
pub struct Device {
    shared: Arc<DeviceShared>,
    tasks: TaskManager,
    frames: Vec<FrameSlot>,
    frame_index: usize,
    requested_frames: usize,
    staging_buffer_size: u64,
    reclaim_delay: ReclaimDelay,
    outputs: Vec<ResourceHandle>,
    state: DeviceState,
}

impl Device {
    /// Build an uninitialized device; `initialize` brings up the ring
    pub fn new(backend: Arc<dyn GpuBackend>, clock: Arc<FrameClock>, config: GraphicsConfig) -> Self {
        let config = config.validated();
        let shared = Arc::new(DeviceShared::new(
            Arc::clone(&backend),
            clock,
            config.vram_budget_bytes(),
        ));
        Self {
            tasks: TaskManager::new(backend, config.task_pool_capacity),
            shared,
            frames: Vec::new(),
            frame_index: 0,
            requested_frames: config.frame_buffer_size,
            staging_buffer_size: config.staging_buffer_size,
            reclaim_delay: config.reclaim_delay,
            outputs: Vec::new(),
            state: DeviceState::Uninitialized,
        }
    }

    /// Handle producer threads hold on to
    pub fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == DeviceState::Initialized
    }

    /// Bring up the backend and build the frame ring
    pub fn initialize(&mut self) -> Result<(), Error> {
        match self.state {
            DeviceState::Uninitialized => {}
            DeviceState::Initializing | DeviceState::Initialized => {
                return Err(Error::AlreadyInitialized);
            }
            DeviceState::Disposing | DeviceState::Disposed => {
                return Err(Error::DeviceDisposed);
            }
        }
        self.state = DeviceState::Initializing;
        log::info!(
            "initializing graphics device ({} frames in flight)",
            self.requested_frames
        );

        if let Err(err) = self.shared.backend.setup() {
            log::error!("backend setup failed: {err}");
            self.state = DeviceState::Uninitialized;
            return Err(err);
        }

        for _ in 0..self.requested_frames {
            match self.new_slot() {
                Ok(slot) => self.frames.push(slot),
                Err(err) => {
                    for mut slot in self.frames.drain(..) {
                        slot.dispose(self.shared.backend());
                    }
                    self.state = DeviceState::Uninitialized;
                    return Err(err);
                }
            }
        }
        self.frame_index = 0;
        self.state = DeviceState::Initialized;
        Ok(())
    }

    fn new_slot(&self) -> Result<FrameSlot, Error> {
        let mut slot = FrameSlot::new();
        if self.staging_buffer_size > 0 {
            let staging = self.shared.backend.create_staging_buffer(&StagingBufferDesc {
                readable: false,
                writable: true,
                size: self.staging_buffer_size,
            })?;
            slot.set_staging(staging);
        }
        Ok(slot)
    }

    /// Open the next CPU frame
    ///
    /// Applies any pending ring resize, then resets the slot about to be
    /// reused. A shrink that would strand the write index outside the ring
    /// is deferred to a later frame boundary.
    pub fn begin_frame(&mut self) -> Result<(), Error> {
        self.require_initialized()?;
        self.shared.backend.begin_frame();

        let shrink_to = self.grow_ring()?;
        self.frames[self.frame_index].reset(self.shared.backend());
        if let Some(new_len) = shrink_to {
            self.shrink_ring(new_len);
        }
        Ok(())
    }

    fn grow_ring(&mut self) -> Result<Option<usize>, Error> {
        let target = self.requested_frames;
        let current = self.frames.len();
        if target == current {
            return Ok(None);
        }
        if target > current {
            for _ in current..target {
                let slot = self.new_slot()?;
                self.frames.push(slot);
            }
            log::info!("frame ring grew from {current} to {target}");
            self.shared.push_event(DeviceEvent::FrameRingResized {
                old: current,
                new: target,
            });
            return Ok(None);
        }
        if self.frame_index < target {
            Ok(Some(target))
        } else {
            log::trace!(
                "deferring frame ring shrink to {target} (write index {})",
                self.frame_index
            );
            Ok(None)
        }
    }

    fn shrink_ring(&mut self, new_len: usize) {
        let old = self.frames.len();
        for mut slot in self.frames.drain(new_len..) {
            slot.dispose(self.shared.backend());
        }
        log::info!("frame ring shrank from {old} to {new_len}");
        self.shared.push_event(DeviceEvent::FrameRingResized {
            old,
            new: new_len,
        });
    }

    /// Close the current CPU frame
    ///
    /// Stamps the slot with the frame clock's current id and advances the
    /// write index around the ring.
    pub fn end_frame(&mut self) -> Result<(), Error> {
        self.require_initialized()?;
        self.shared.backend.end_frame();
        let frame_id = self.shared.clock.current();
        self.frames[self.frame_index].stamp(frame_id);
        self.frame_index = (self.frame_index + 1) % self.frames.len();
        Ok(())
    }

    /// Drain one task lane against the current frame slot
    pub fn process_tasks(&mut self, priority: TaskPriority) -> Result<usize, Error> {
        self.require_initialized()?;
        let slot = &self.frames[self.frame_index];
        self.tasks
            .process(priority, self.frame_index, self.frames.len(), slot.staging())
    }

    /// Record a caller-owned command list in the current frame's slot
    pub fn track_command_list(&mut self, cmd: CommandListId, branch: u32) -> Result<(), Error> {
        self.require_initialized()?;
        self.frames[self.frame_index].track(cmd, branch);
        Ok(())
    }

    /// Request a new ring length; applied at the next `begin_frame`
    pub fn set_frame_buffer_size(&mut self, frames: usize) {
        let clamped = frames.clamp(1, MAX_FRAME_BUFFER_SIZE);
        if clamped != frames {
            log::warn!("frame buffer size {frames} out of range, clamping to {clamped}");
        }
        if clamped != self.frames.len() {
            log::debug!(
                "frame buffer size change requested: {} -> {clamped}",
                self.frames.len()
            );
        }
        self.requested_frames = clamped;
    }

    /// Current ring length; 0 before initialization
    pub fn frame_buffer_size(&self) -> usize {
        self.frames.len()
    }

    /// Ring slot the device is currently recording into
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn frame(&self, index: usize) -> Option<&FrameSlot> {
        self.frames.get(index)
    }

    pub fn current_frame(&self) -> Option<&FrameSlot> {
        self.frames.get(self.frame_index)
    }

    /// Free disposal-list entries at least `frames_to_wait` frames old
    ///
    /// Age is measured against `current_frame_id`; entries stamped in the
    /// future count as age 0. Returns the number of resources freed.
    pub fn dispose_marked(
        &mut self,
        frames_to_wait: u64,
        current_frame_id: u64,
    ) -> Result<usize, Error> {
        self.require_initialized()?;
        Ok(self.sweep_disposals(frames_to_wait, current_frame_id))
    }

    /// Sweep the disposal list using the configured reclaim delay
    pub fn collect_garbage(&mut self) -> Result<usize, Error> {
        self.require_initialized()?;
        let wait = self.reclaim_delay.frames_to_wait(self.frames.len());
        Ok(self.sweep_disposals(wait, self.shared.clock.current()))
    }

    fn sweep_disposals(&self, frames_to_wait: u64, current_frame_id: u64) -> usize {
        let mut disposals = self.shared.disposals.lock().unwrap();
        let mut released = 0;
        // Walk back to front so swap_remove never disturbs an unvisited entry
        for index in (0..disposals.len()).rev() {
            let age = current_frame_id.saturating_sub(disposals[index].release_frame_id);
            if age >= frames_to_wait {
                let pending = disposals.swap_remove(index);
                self.shared.backend.release_resource(pending.handle);
                if pending.vram_bytes > 0 {
                    self.shared.deallocate_vram(pending.vram_bytes);
                }
                log::trace!("reclaimed '{}' after {age} frames", pending.label);
                released += 1;
            }
        }
        released
    }

    /// Register an output surface the device presents to
    pub fn register_output(&mut self, output: ResourceHandle) -> Result<(), Error> {
        self.require_initialized()?;
        log::info!("registered output {output:?}");
        self.outputs.push(output);
        self.shared.push_event(DeviceEvent::OutputRegistered { output });
        Ok(())
    }

    pub fn outputs(&self) -> &[ResourceHandle] {
        &self.outputs
    }

    /// Take all queued device events, oldest first
    pub fn drain_events(&mut self) -> Vec<DeviceEvent> {
        std::mem::take(&mut *self.shared.events.lock().unwrap())
    }

    /// Whether `format` supports every usage in `usage`
    pub fn format_support(&self, format: PixelFormat, usage: FormatUsage) -> Result<bool, Error> {
        self.shared.format_support(format, usage)
    }

    /// Tear down in dependency order; safe to call more than once
    ///
    /// Queued tasks are dropped, frame slots disposed, outputs released,
    /// the disposal list force-flushed, and the backend shut down. Producer
    /// `mark_for_release` calls fail from the moment teardown starts.
    pub fn dispose(&mut self) {
        if matches!(self.state, DeviceState::Disposing | DeviceState::Disposed) {
            return;
        }
        self.state = DeviceState::Disposing;
        self.shared.disposed.store(true, Ordering::Release);
        log::info!("disposing graphics device");

        self.tasks.dispose();
        for slot in &mut self.frames {
            slot.dispose(self.shared.backend.as_ref());
        }
        self.frames.clear();
        self.frame_index = 0;
        for output in self.outputs.drain(..) {
            self.shared.backend.release_resource(output);
        }
        let flushed = self.sweep_disposals(0, 0);
        if flushed > 0 {
            log::debug!("flushed {flushed} pending releases at teardown");
        }
        self.shared.cache.clear();
        self.shared.events.lock().unwrap().clear();
        self.shared.backend.shutdown();
        self.state = DeviceState::Disposed;
    }

    fn require_initialized(&self) -> Result<(), Error> {
        match self.state {
            DeviceState::Initialized => Ok(()),
            DeviceState::Disposing | DeviceState::Disposed => Err(Error::DeviceDisposed),
            _ => Err(Error::NotInitialized),
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::HeadlessBackend;
    use crate::gpu::resource::GpuObject;

    fn device_with(config: GraphicsConfig) -> (Arc<HeadlessBackend>, Arc<FrameClock>, Device) {
        let backend = Arc::new(HeadlessBackend::new());
        let clock = Arc::new(FrameClock::new());
        let device = Device::new(
            Arc::clone(&backend) as Arc<dyn GpuBackend>,
            Arc::clone(&clock),
            config,
        );
        (backend, clock, device)
    }

    fn small_config(frames: usize) -> GraphicsConfig {
        GraphicsConfig {
            frame_buffer_size: frames,
            staging_buffer_size: 1024,
            ..Default::default()
        }
    }

    fn run_frame(clock: &FrameClock, device: &mut Device) {
        clock.advance();
        device.begin_frame().unwrap();
        device.end_frame().unwrap();
    }

    #[test]
    fn test_initialize_builds_frame_ring() {
        let (backend, _clock, mut device) = device_with(small_config(3));
        assert!(!device.is_initialized());

        device.initialize().unwrap();
        assert!(device.is_initialized());
        assert_eq!(device.frame_buffer_size(), 3);
        assert_eq!(device.frame_index(), 0);
        assert_eq!(backend.staging_alive(), 3);
        assert_eq!(backend.setup_count(), 1);

        let err = device.initialize().unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized));
    }

    #[test]
    fn test_initialize_failure_rolls_back() {
        let backend = Arc::new(HeadlessBackend::failing_setup());
        let clock = Arc::new(FrameClock::new());
        let mut device = Device::new(
            Arc::clone(&backend) as Arc<dyn GpuBackend>,
            clock,
            small_config(2),
        );

        assert!(device.initialize().is_err());
        assert_eq!(device.state(), DeviceState::Uninitialized);
        assert_eq!(backend.staging_alive(), 0);
        assert_eq!(device.frame_buffer_size(), 0);
    }

    #[test]
    fn test_frame_methods_require_initialization() {
        let (_backend, _clock, mut device) = device_with(small_config(2));
        assert!(matches!(device.begin_frame(), Err(Error::NotInitialized)));
        assert!(matches!(device.end_frame(), Err(Error::NotInitialized)));
        assert!(matches!(
            device.dispose_marked(0, 0),
            Err(Error::NotInitialized)
        ));
    }

    #[test]
    fn test_frame_index_wraps_around_ring() {
        let (_backend, clock, mut device) = device_with(small_config(2));
        device.initialize().unwrap();

        run_frame(&clock, &mut device);
        assert_eq!(device.frame_index(), 1);
        run_frame(&clock, &mut device);
        assert_eq!(device.frame_index(), 0);
        run_frame(&clock, &mut device);
        assert_eq!(device.frame_index(), 1);
    }

    #[test]
    fn test_end_frame_stamps_current_frame_id() {
        let (_backend, clock, mut device) = device_with(small_config(2));
        device.initialize().unwrap();

        for _ in 0..4 {
            clock.advance();
        }
        clock.advance();
        device.begin_frame().unwrap();
        device.end_frame().unwrap();

        assert_eq!(device.frame(0).unwrap().frame_id(), 5);
    }

    #[test]
    fn test_begin_frame_resets_reused_slot() {
        let (backend, clock, mut device) = device_with(small_config(2));
        device.initialize().unwrap();

        clock.advance();
        device.begin_frame().unwrap();
        let cmd = backend.create_command_list("worker").unwrap();
        device.track_command_list(cmd, 0).unwrap();
        assert_eq!(device.current_frame().unwrap().tracked_count(), 1);
        device.end_frame().unwrap();

        run_frame(&clock, &mut device);

        // Slot 0 comes up for reuse; its tracked list goes back to the pool
        clock.advance();
        device.begin_frame().unwrap();
        assert_eq!(device.frame_index(), 0);
        assert_eq!(device.current_frame().unwrap().tracked_count(), 0);
        assert_eq!(backend.live_lists(), 0);
        device.end_frame().unwrap();
    }

    #[test]
    fn test_deferred_release_respects_wait_threshold() {
        let (backend, clock, mut device) = device_with(small_config(3));
        device.initialize().unwrap();

        for _ in 0..10 {
            clock.advance();
        }
        let handle = backend.mint_resource();
        let mut object = GpuObject::new(Arc::clone(device.shared()), handle, "old texture");
        object.dispose(false).unwrap();
        assert_eq!(object.release_frame_id(), 10);

        // One frame later the object is still too young
        let released = device.dispose_marked(2, 11).unwrap();
        assert_eq!(released, 0);
        assert!(!backend.was_released(handle));
        assert_eq!(device.shared().pending_release_count(), 1);

        // Two frames of age reach the threshold
        let released = device.dispose_marked(2, 12).unwrap();
        assert_eq!(released, 1);
        assert!(backend.was_released(handle));
        assert_eq!(device.shared().pending_release_count(), 0);
    }

    #[test]
    fn test_collect_garbage_uses_configured_delay() {
        let config = GraphicsConfig {
            reclaim_delay: ReclaimDelay::Frames(2),
            ..small_config(3)
        };
        let (backend, clock, mut device) = device_with(config);
        device.initialize().unwrap();

        for _ in 0..3 {
            clock.advance();
        }
        let handle = backend.mint_resource();
        let mut object = GpuObject::new(Arc::clone(device.shared()), handle, "buffer");
        object.dispose(false).unwrap();

        clock.advance();
        assert_eq!(device.collect_garbage().unwrap(), 0);
        clock.advance();
        assert_eq!(device.collect_garbage().unwrap(), 1);
        assert!(backend.was_released(handle));
    }

    #[test]
    fn test_vram_returns_when_sweep_frees() {
        let (backend, _clock, mut device) = device_with(small_config(2));
        device.initialize().unwrap();

        let mut object = GpuObject::new(
            Arc::clone(device.shared()),
            backend.mint_resource(),
            "mesh",
        );
        object.set_vram_usage(2048);
        object.dispose(false).unwrap();
        drop(object);
        assert_eq!(device.shared().vram_stats().allocated_bytes, 2048);

        device.dispose_marked(0, 0).unwrap();
        assert_eq!(device.shared().vram_stats().allocated_bytes, 0);
    }

    #[test]
    fn test_vram_stats_reports_pressure() {
        let config = GraphicsConfig {
            vram_budget_mb: 1,
            ..small_config(2)
        };
        let (_backend, _clock, device) = device_with(config);

        device.shared().allocate_vram(512 * 1024);
        let stats = device.shared().vram_stats();
        assert_eq!(stats.allocated_bytes, 512 * 1024);
        assert_eq!(stats.budget_bytes, 1024 * 1024);
        assert_eq!(stats.pressure, 0.5);

        device.shared().deallocate_vram(512 * 1024);
        assert_eq!(device.shared().vram_stats().pressure, 0.0);
    }

    #[test]
    fn test_grow_ring_at_frame_boundary() {
        let (backend, clock, mut device) = device_with(small_config(2));
        device.initialize().unwrap();
        assert_eq!(backend.staging_alive(), 2);

        clock.advance();
        device.begin_frame().unwrap();
        let cmd = backend.create_command_list("worker").unwrap();
        device.track_command_list(cmd, 0).unwrap();
        device.end_frame().unwrap();

        device.set_frame_buffer_size(4);
        assert_eq!(device.frame_buffer_size(), 2);

        clock.advance();
        device.begin_frame().unwrap();
        assert_eq!(device.frame_buffer_size(), 4);
        assert_eq!(backend.staging_alive(), 4);
        // Growth appends fresh slots without touching in-flight ones
        assert_eq!(device.frame(0).unwrap().tracked_count(), 1);
        assert_eq!(device.frame(3).unwrap().tracked_count(), 0);
        device.end_frame().unwrap();

        let events = device.drain_events();
        assert_eq!(
            events,
            vec![DeviceEvent::FrameRingResized { old: 2, new: 4 }]
        );
    }

    #[test]
    fn test_shrink_deferred_until_index_fits() {
        let (backend, clock, mut device) = device_with(small_config(3));
        device.initialize().unwrap();

        run_frame(&clock, &mut device);
        run_frame(&clock, &mut device);
        assert_eq!(device.frame_index(), 2);

        device.set_frame_buffer_size(2);

        // Write index 2 would fall outside a 2-slot ring; shrink waits
        clock.advance();
        device.begin_frame().unwrap();
        assert_eq!(device.frame_buffer_size(), 3);
        assert!(device.frame_index() < device.frame_buffer_size());
        device.end_frame().unwrap();
        assert_eq!(device.frame_index(), 0);

        clock.advance();
        device.begin_frame().unwrap();
        assert_eq!(device.frame_buffer_size(), 2);
        assert_eq!(backend.staging_alive(), 2);
        assert!(device.frame_index() < device.frame_buffer_size());
        device.end_frame().unwrap();

        let events = device.drain_events();
        assert_eq!(
            events,
            vec![DeviceEvent::FrameRingResized { old: 3, new: 2 }]
        );
    }

    #[test]
    fn test_set_frame_buffer_size_clamps() {
        let (_backend, clock, mut device) = device_with(small_config(2));
        device.initialize().unwrap();

        device.set_frame_buffer_size(0);
        clock.advance();
        device.begin_frame().unwrap();
        assert_eq!(device.frame_buffer_size(), 1);
        device.end_frame().unwrap();

        device.set_frame_buffer_size(99);
        clock.advance();
        device.begin_frame().unwrap();
        assert_eq!(device.frame_buffer_size(), MAX_FRAME_BUFFER_SIZE);
        device.end_frame().unwrap();
    }

    #[test]
    fn test_process_tasks_uses_current_slot_staging() {
        let (backend, clock, mut device) = device_with(small_config(2));
        device.initialize().unwrap();

        clock.advance();
        device.begin_frame().unwrap();

        let dst = backend.mint_resource();
        let mut upload = device.tasks().acquire_upload();
        upload.set(dst, 0, 0, vec![7; 64]);
        device.tasks().push(TaskPriority::EndOfFrame, upload);

        let executed = device.process_tasks(TaskPriority::EndOfFrame).unwrap();
        assert_eq!(executed, 1);
        device.end_frame().unwrap();
    }

    #[test]
    fn test_dispose_flushes_and_shuts_down() {
        let (backend, _clock, mut device) = device_with(small_config(2));
        device.initialize().unwrap();

        let first = backend.mint_resource();
        let second = backend.mint_resource();
        GpuObject::new(Arc::clone(device.shared()), first, "a")
            .dispose(false)
            .unwrap();
        GpuObject::new(Arc::clone(device.shared()), second, "b")
            .dispose(false)
            .unwrap();
        assert_eq!(device.shared().pending_release_count(), 2);

        device.dispose();
        assert_eq!(device.state(), DeviceState::Disposed);
        assert!(backend.was_released(first));
        assert!(backend.was_released(second));
        assert_eq!(backend.staging_alive(), 0);
        assert_eq!(backend.shutdown_count(), 1);

        // Repeat disposal is a no-op
        device.dispose();
        assert_eq!(backend.shutdown_count(), 1);
    }

    #[test]
    fn test_marking_fails_after_teardown() {
        let (backend, _clock, mut device) = device_with(small_config(2));
        device.initialize().unwrap();
        let shared = Arc::clone(device.shared());
        device.dispose();

        assert!(shared.is_disposed());
        let err = shared
            .mark_for_release(backend.mint_resource(), "late".into(), 0)
            .unwrap_err();
        assert!(matches!(err, Error::DeviceDisposed));
        assert!(matches!(device.begin_frame(), Err(Error::DeviceDisposed)));
    }

    #[test]
    fn test_register_output_and_release_at_teardown() {
        let (backend, _clock, mut device) = device_with(small_config(2));
        device.initialize().unwrap();

        let surface = backend.mint_resource();
        device.register_output(surface).unwrap();
        assert_eq!(device.outputs(), &[surface]);
        assert_eq!(
            device.drain_events(),
            vec![DeviceEvent::OutputRegistered { output: surface }]
        );

        device.dispose();
        assert!(backend.was_released(surface));
    }

    #[test]
    fn test_format_support_rejects_empty_query() {
        let (_backend, _clock, mut device) = device_with(small_config(2));
        device.initialize().unwrap();

        let err = device
            .format_support(PixelFormat::Rgba8Unorm, FormatUsage::NONE)
            .unwrap_err();
        assert!(matches!(err, Error::EmptyFormatQuery));

        assert!(
            device
                .format_support(PixelFormat::Rgba8Unorm, FormatUsage::SAMPLED)
                .unwrap()
        );
    }

    #[test]
    fn test_drain_events_empties_queue() {
        let (backend, _clock, mut device) = device_with(small_config(2));
        device.initialize().unwrap();

        device.register_output(backend.mint_resource()).unwrap();
        assert_eq!(device.drain_events().len(), 1);
        assert!(device.drain_events().is_empty());
    }
}
