//! wgpu implementation of the backend contract
//!
//! Surface-less: the device layer only needs queues, encoders, buffers,
//! and compute. Command lists map to a `CommandEncoder` arena, labeled
//! scopes to debug groups, and staging writes go through the queue.
//! Callers that build richer passes create their own wgpu objects via
//! `device()`/`queue()` and register them for handle-based release.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::Error;
use crate::gpu::backend::{
    CommandListId, FormatUsage, GpuBackend, PixelFormat, ResourceHandle, StagingBuffer,
    StagingBufferDesc,
};

enum WgpuResource {
    Buffer(wgpu::Buffer),
    ComputePipeline(wgpu::ComputePipeline),
}

struct EncoderSlot {
    /// Taken at submit; a slot with no encoder is awaiting reset or free
    encoder: Option<wgpu::CommandEncoder>,
    label: String,
    scope_depth: u32,
}

#[derive(Default)]
struct EncoderArena {
    slots: Vec<Option<EncoderSlot>>,
    free: Vec<u32>,
}

impl EncoderArena {
    fn slot_mut(&mut self, id: CommandListId) -> Result<&mut EncoderSlot, Error> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::CommandList(format!("unknown command list {}", id.0)))
    }
}

/// GPU backend over a surface-less wgpu device
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    encoders: Mutex<EncoderArena>,
    resources: Mutex<HashMap<u64, WgpuResource>>,
    next_handle: AtomicU64,
}

impl WgpuBackend {
    /// Acquire an adapter and device on the primary backends
    pub fn new() -> Result<Self, Error> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self, Error> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Backend(format!("No suitable adapter found: {:?}", e)))?;

        let adapter_limits = adapter.limits();

        let device_desc = wgpu::DeviceDescriptor {
            label: Some("veldra_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits {
                max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
                max_buffer_size: adapter_limits.max_buffer_size,
                ..Default::default()
            },
            memory_hints: wgpu::MemoryHints::Performance,
            experimental_features: Default::default(),
            trace: Default::default(),
        };

        let (device, queue) = adapter
            .request_device(&device_desc)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            encoders: Mutex::new(EncoderArena::default()),
            resources: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    fn mint(&self) -> ResourceHandle {
        ResourceHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a caller-created buffer for handle-based release
    pub fn register_buffer(&self, buffer: wgpu::Buffer) -> ResourceHandle {
        let handle = self.mint();
        self.resources
            .lock()
            .unwrap()
            .insert(handle.0, WgpuResource::Buffer(buffer));
        handle
    }

    /// Register a compute pipeline for dispatch through the backend
    ///
    /// The dispatch seam sets no bind groups; pipelines registered here
    /// must have an empty layout. Passes that bind resources record
    /// through their own encoders instead.
    pub fn register_compute_pipeline(&self, pipeline: wgpu::ComputePipeline) -> ResourceHandle {
        let handle = self.mint();
        self.resources
            .lock()
            .unwrap()
            .insert(handle.0, WgpuResource::ComputePipeline(pipeline));
        handle
    }

    /// Create and register a device-local storage buffer
    pub fn create_storage_buffer(&self, label: &str, size: u64) -> ResourceHandle {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.register_buffer(buffer)
    }
}

impl GpuBackend for WgpuBackend {
    fn setup(&self) -> Result<(), Error> {
        let info = self.adapter.get_info();
        log::info!("wgpu backend: {} ({:?})", info.name, info.backend);

        let limits = self.adapter.limits();
        log::info!(
            "GPU buffer limits: max_buffer_size={}MB, max_storage_binding={}MB",
            limits.max_buffer_size / 1024 / 1024,
            limits.max_storage_buffer_binding_size / 1024 / 1024
        );
        Ok(())
    }

    fn end_frame(&self) {
        // Drive mapped-buffer callbacks and resource cleanup
        let _ = self.device.poll(wgpu::PollType::Poll);
    }

    fn create_command_list(&self, label: &str) -> Result<CommandListId, Error> {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        let slot = EncoderSlot {
            encoder: Some(encoder),
            label: label.to_string(),
            scope_depth: 0,
        };

        let mut arena = self.encoders.lock().unwrap();
        let index = match arena.free.pop() {
            Some(index) => {
                arena.slots[index as usize] = Some(slot);
                index
            }
            None => {
                arena.slots.push(Some(slot));
                (arena.slots.len() - 1) as u32
            }
        };
        Ok(CommandListId(index))
    }

    fn reset_command_list(&self, id: CommandListId) -> Result<(), Error> {
        let mut arena = self.encoders.lock().unwrap();
        let slot = arena.slot_mut(id)?;
        if slot.encoder.is_some() {
            return Err(Error::CommandList(format!(
                "reset of recording list {}",
                id.0
            )));
        }
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&slot.label),
            });
        slot.encoder = Some(encoder);
        slot.scope_depth = 0;
        Ok(())
    }

    fn free_command_list(&self, id: CommandListId) {
        let mut arena = self.encoders.lock().unwrap();
        match arena.slots.get_mut(id.0 as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                arena.free.push(id.0);
            }
            _ => log::error!("wgpu backend: free of unknown command list {}", id.0),
        }
    }

    fn open_scope(&self, id: CommandListId, label: &str) {
        let mut arena = self.encoders.lock().unwrap();
        match arena.slot_mut(id) {
            Ok(slot) => match slot.encoder.as_mut() {
                Some(encoder) => {
                    encoder.push_debug_group(label);
                    slot.scope_depth += 1;
                }
                None => log::error!("wgpu backend: open_scope '{label}' on submitted list"),
            },
            Err(err) => log::error!("wgpu backend: {err}"),
        }
    }

    fn close_scope(&self, id: CommandListId) {
        let mut arena = self.encoders.lock().unwrap();
        match arena.slot_mut(id) {
            Ok(slot) if slot.scope_depth > 0 => {
                if let Some(encoder) = slot.encoder.as_mut() {
                    encoder.pop_debug_group();
                    slot.scope_depth -= 1;
                }
            }
            Ok(_) => log::error!("wgpu backend: close_scope without open scope on list {}", id.0),
            Err(err) => log::error!("wgpu backend: {err}"),
        }
    }

    fn submit(&self, id: CommandListId) -> Result<(), Error> {
        let encoder = {
            let mut arena = self.encoders.lock().unwrap();
            let slot = arena.slot_mut(id)?;
            if slot.scope_depth != 0 {
                return Err(Error::CommandList(format!(
                    "submit of list {} with {} open scopes",
                    id.0, slot.scope_depth
                )));
            }
            slot.encoder.take().ok_or_else(|| {
                Error::CommandList(format!("submit of already-submitted list {}", id.0))
            })?
        };
        self.queue.submit([encoder.finish()]);
        Ok(())
    }

    fn create_staging_buffer(&self, desc: &StagingBufferDesc) -> Result<StagingBuffer, Error> {
        if desc.size == 0 {
            return Err(Error::Staging("zero-size staging buffer".into()));
        }
        // Uploads go through queue.write_buffer rather than persistent
        // mapping, so upload staging needs COPY_DST alongside COPY_SRC
        let mut usage = wgpu::BufferUsages::empty();
        if desc.writable {
            usage |= wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        }
        if desc.readable {
            usage |= wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST;
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("veldra_staging"),
            size: desc.size,
            usage,
            mapped_at_creation: false,
        });
        let handle = self.register_buffer(buffer);
        Ok(StagingBuffer {
            handle,
            size: desc.size,
            readable: desc.readable,
            writable: desc.writable,
        })
    }

    fn free_staging_buffer(&self, buffer: StagingBuffer) {
        self.release_resource(buffer.handle);
    }

    fn write_staging(
        &self,
        buffer: &StagingBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), Error> {
        if !buffer.writable {
            return Err(Error::Staging(format!(
                "write to read-only staging buffer {}",
                buffer.handle.0
            )));
        }
        if offset + data.len() as u64 > buffer.size {
            return Err(Error::Staging(format!(
                "write of {} bytes at {} overruns staging buffer of {} bytes",
                data.len(),
                offset,
                buffer.size
            )));
        }
        let resources = self.resources.lock().unwrap();
        match resources.get(&buffer.handle.0) {
            Some(WgpuResource::Buffer(raw)) => {
                self.queue.write_buffer(raw, offset, data);
                Ok(())
            }
            _ => Err(Error::Staging(format!(
                "unknown staging buffer {}",
                buffer.handle.0
            ))),
        }
    }

    fn copy_staging_to_buffer(
        &self,
        id: CommandListId,
        src: &StagingBuffer,
        src_offset: u64,
        dst: ResourceHandle,
        dst_offset: u64,
        len: u64,
    ) -> Result<(), Error> {
        if src_offset + len > src.size {
            return Err(Error::Staging(format!(
                "copy of {len} bytes at {src_offset} overruns staging buffer of {} bytes",
                src.size
            )));
        }
        // Lock order: resources, then encoders
        let resources = self.resources.lock().unwrap();
        let Some(WgpuResource::Buffer(src_raw)) = resources.get(&src.handle.0) else {
            return Err(Error::Staging(format!(
                "unknown staging buffer {}",
                src.handle.0
            )));
        };
        let Some(WgpuResource::Buffer(dst_raw)) = resources.get(&dst.0) else {
            return Err(Error::Backend(format!("unknown destination buffer {}", dst.0)));
        };

        let mut arena = self.encoders.lock().unwrap();
        let slot = arena.slot_mut(id)?;
        let encoder = slot.encoder.as_mut().ok_or_else(|| {
            Error::CommandList(format!("copy recorded on submitted list {}", id.0))
        })?;
        encoder.copy_buffer_to_buffer(src_raw, src_offset, dst_raw, dst_offset, len);
        Ok(())
    }

    fn dispatch_compute(
        &self,
        id: CommandListId,
        shader: ResourceHandle,
        groups: [u32; 3],
    ) -> Result<(), Error> {
        if groups.contains(&0) {
            return Err(Error::Backend(format!(
                "dispatch with zero workgroup count {groups:?}"
            )));
        }
        let resources = self.resources.lock().unwrap();
        let Some(WgpuResource::ComputePipeline(pipeline)) = resources.get(&shader.0) else {
            return Err(Error::Backend(format!("unknown compute pipeline {}", shader.0)));
        };

        let mut arena = self.encoders.lock().unwrap();
        let slot = arena.slot_mut(id)?;
        let encoder = slot.encoder.as_mut().ok_or_else(|| {
            Error::CommandList(format!("dispatch recorded on submitted list {}", id.0))
        })?;

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("veldra_dispatch"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        Ok(())
    }

    fn format_support(&self, format: PixelFormat, usage: FormatUsage) -> Result<bool, Error> {
        let mut supported = true;
        if usage.contains(FormatUsage::BLENDABLE) {
            supported &= match format {
                PixelFormat::Rgba32Float => self
                    .device
                    .features()
                    .contains(wgpu::Features::FLOAT32_FILTERABLE),
                PixelFormat::Depth32Float | PixelFormat::R32Uint => false,
                _ => true,
            };
        }
        if usage.contains(FormatUsage::STORAGE) {
            supported &= !matches!(
                format,
                PixelFormat::Bgra8Unorm | PixelFormat::Depth32Float
            );
        }
        Ok(supported)
    }

    fn release_resource(&self, handle: ResourceHandle) {
        if self.resources.lock().unwrap().remove(&handle.0).is_none() {
            log::debug!("release of unregistered resource {}", handle.0);
        }
    }

    fn shutdown(&self) {
        let live = self.resources.lock().unwrap().len();
        if live > 0 {
            log::warn!("wgpu backend shutting down with {live} live resources");
        }
        let _ = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        });
        log::debug!("wgpu backend shut down");
    }
}

#[cfg(test)]
mod tests {
    // Note: These tests require a GPU device, so they're integration tests
    // Unit tests for the protocol run against HeadlessBackend instead
}
