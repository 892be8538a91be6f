//! Priority-queued GPU task execution
//!
//! Producers on any thread push small recordable work items; the render
//! thread drains them at fixed points in the frame. Two queued lanes exist,
//! start-of-frame and end-of-frame, each draining FIFO into a pooled
//! command list ring indexed by the device's frame slot. Immediate tasks
//! bypass the queues entirely and execute during the push call.

pub mod callback;
pub mod compute;
pub mod pool;
pub mod upload;

pub use callback::CallbackTask;
pub use compute::ComputeDispatchTask;
pub use pool::{PooledTask, TaskPool};
pub use upload::BufferUploadTask;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::core::error::Error;
use crate::gpu::backend::{CommandListId, GpuBackend, ResourceHandle, StagingBuffer};

/// When a pushed task executes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskPriority {
    /// Execute during the push call itself, bypassing the queues
    Immediate,
    /// Drain at the start of the next frame
    StartOfFrame,
    /// Drain at the end of the current frame
    EndOfFrame,
}

impl TaskPriority {
    fn lane(self) -> Option<usize> {
        match self {
            TaskPriority::Immediate => None,
            TaskPriority::StartOfFrame => Some(0),
            TaskPriority::EndOfFrame => Some(1),
        }
    }

    /// Debug scope label for work executed at this priority
    pub fn label(self) -> &'static str {
        match self {
            TaskPriority::Immediate => "tasks.immediate",
            TaskPriority::StartOfFrame => "tasks.start_of_frame",
            TaskPriority::EndOfFrame => "tasks.end_of_frame",
        }
    }
}

/// Execution context handed to a running task
pub struct TaskContext<'a> {
    /// Backend to record against
    pub backend: &'a dyn GpuBackend,
    /// Command list the task records into
    pub cmd: CommandListId,
    /// Staging buffer of the executing frame slot, when one exists
    pub staging: Option<&'a StagingBuffer>,
}

/// A unit of GPU work that can be queued and recorded
pub trait GpuTask: Send + 'static {
    /// Whether the task carries everything it needs to execute
    fn is_valid(&self) -> bool {
        true
    }

    /// Bind a GPU resource before validation and queuing
    fn attach_resource(&mut self, _handle: ResourceHandle) {}

    /// Record the task's work into the context's command list
    fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), Error>;

    /// Fire completion callbacks; called only after a successful run
    fn complete(&mut self) {}

    /// Consume the task, returning pooled instances to their pool
    fn recycle(self: Box<Self>) {}
}

struct TaskLane {
    queue: Mutex<VecDeque<Box<dyn GpuTask>>>,
    /// One pooled command list per frame slot, created on first use
    ring: Mutex<Vec<Option<CommandListId>>>,
    label: &'static str,
}

impl TaskLane {
    fn new(label: &'static str) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ring: Mutex::new(Vec::new()),
            label,
        }
    }
}

/// Queues, drains, and recycles GPU tasks
pub struct TaskManager {
    backend: Arc<dyn GpuBackend>,
    lanes: [TaskLane; 2],
    compute_pool: Arc<TaskPool<ComputeDispatchTask>>,
    upload_pool: Arc<TaskPool<BufferUploadTask>>,
}

impl TaskManager {
    pub fn new(backend: Arc<dyn GpuBackend>, pool_capacity: usize) -> Self {
        Self {
            backend,
            lanes: [
                TaskLane::new(TaskPriority::StartOfFrame.label()),
                TaskLane::new(TaskPriority::EndOfFrame.label()),
            ],
            compute_pool: TaskPool::new(pool_capacity),
            upload_pool: TaskPool::new(pool_capacity),
        }
    }

    /// Take a pooled compute dispatch task
    pub fn acquire_compute(&self) -> Box<ComputeDispatchTask> {
        self.compute_pool.acquire()
    }

    /// Take a pooled buffer upload task
    pub fn acquire_upload(&self) -> Box<BufferUploadTask> {
        self.upload_pool.acquire()
    }

    /// Queue a task, or execute it now at immediate priority
    ///
    /// Invalid tasks are dropped without queuing; pooled instances go back
    /// to their pool.
    pub fn push(&self, priority: TaskPriority, task: Box<dyn GpuTask>) {
        if !task.is_valid() {
            log::debug!("{}: dropping invalid task", priority.label());
            task.recycle();
            return;
        }
        match priority.lane() {
            Some(lane) => self.lanes[lane].queue.lock().unwrap().push_back(task),
            None => self.run_one_shot(task),
        }
    }

    /// Queue a task with a resource binding, or record it now into `cmd`
    ///
    /// The resource is attached before validation. Immediate tasks record
    /// into the caller's list under a labeled scope and are not submitted
    /// here; queued tasks record into the lane's own list at process time.
    pub fn push_scoped(
        &self,
        cmd: CommandListId,
        priority: TaskPriority,
        resource: Option<ResourceHandle>,
        mut task: Box<dyn GpuTask>,
    ) {
        if let Some(handle) = resource {
            task.attach_resource(handle);
        }
        if !task.is_valid() {
            log::debug!("{}: dropping invalid task", priority.label());
            task.recycle();
            return;
        }
        match priority.lane() {
            Some(lane) => self.lanes[lane].queue.lock().unwrap().push_back(task),
            None => self.run_inline(cmd, task),
        }
    }

    /// Convenience push of a pooled compute dispatch
    pub fn dispatch_compute(&self, priority: TaskPriority, shader: ResourceHandle, groups: [u32; 3]) {
        let mut task = self.acquire_compute();
        task.set(shader, groups);
        self.push(priority, task);
    }

    /// Compute dispatch with a completion callback
    ///
    /// The callback fires after the dispatch executes without error. It is
    /// dropped unfired if the shader or group counts fail validation.
    pub fn dispatch_compute_with(
        &self,
        priority: TaskPriority,
        shader: ResourceHandle,
        groups: [u32; 3],
        on_complete: impl FnOnce() + Send + 'static,
    ) {
        let mut task = self.acquire_compute();
        task.set(shader, groups);
        task.on_complete(on_complete);
        self.push(priority, task);
    }

    /// Execute an immediate task on a one-shot submitted list
    fn run_one_shot(&self, mut task: Box<dyn GpuTask>) {
        let label = TaskPriority::Immediate.label();
        let cmd = match self.backend.create_command_list(label) {
            Ok(cmd) => cmd,
            Err(err) => {
                log::error!("{label}: no command list for immediate task: {err}");
                task.recycle();
                return;
            }
        };
        self.backend.open_scope(cmd, label);
        let mut ctx = TaskContext {
            backend: self.backend.as_ref(),
            cmd,
            staging: None,
        };
        match task.run(&mut ctx) {
            Ok(()) => task.complete(),
            Err(err) => log::error!("{label}: task failed: {err}"),
        }
        self.backend.close_scope(cmd);
        if let Err(err) = self.backend.submit(cmd) {
            log::error!("{label}: submit failed: {err}");
        }
        self.backend.free_command_list(cmd);
        task.recycle();
    }

    /// Record an immediate task into the caller's command list
    fn run_inline(&self, cmd: CommandListId, mut task: Box<dyn GpuTask>) {
        let label = TaskPriority::Immediate.label();
        self.backend.open_scope(cmd, label);
        let mut ctx = TaskContext {
            backend: self.backend.as_ref(),
            cmd,
            staging: None,
        };
        match task.run(&mut ctx) {
            Ok(()) => task.complete(),
            Err(err) => log::error!("{label}: task failed: {err}"),
        }
        self.backend.close_scope(cmd);
        task.recycle();
    }

    /// Drain one queued lane into its command list and submit
    ///
    /// Returns the number of tasks executed. An empty lane returns 0
    /// without touching the backend. `frame_index` selects the lane's
    /// pooled list; `ring_len` is the device's current frame ring length.
    pub fn process(
        &self,
        priority: TaskPriority,
        frame_index: usize,
        ring_len: usize,
        staging: Option<&StagingBuffer>,
    ) -> Result<usize, Error> {
        let Some(lane_index) = priority.lane() else {
            return Ok(0);
        };
        let lane = &self.lanes[lane_index];
        if lane.queue.lock().unwrap().is_empty() {
            return Ok(0);
        }

        let cmd = self.lane_command_list(lane, frame_index, ring_len)?;
        self.backend.open_scope(cmd, lane.label);

        let mut executed = 0;
        loop {
            let next = lane.queue.lock().unwrap().pop_front();
            let Some(mut task) = next else { break };
            let mut ctx = TaskContext {
                backend: self.backend.as_ref(),
                cmd,
                staging,
            };
            match task.run(&mut ctx) {
                Ok(()) => task.complete(),
                Err(err) => log::error!("{}: task failed: {err}", lane.label),
            }
            task.recycle();
            executed += 1;
        }

        self.backend.close_scope(cmd);
        self.backend.submit(cmd)?;
        log::trace!("{}: executed {executed} tasks", lane.label);
        Ok(executed)
    }

    /// Fetch or create the lane's pooled list for a frame slot
    fn lane_command_list(
        &self,
        lane: &TaskLane,
        frame_index: usize,
        ring_len: usize,
    ) -> Result<CommandListId, Error> {
        debug_assert!(frame_index < ring_len);
        let mut ring = lane.ring.lock().unwrap();
        if ring.len() > ring_len {
            for cmd in ring.drain(ring_len..).flatten() {
                self.backend.free_command_list(cmd);
            }
        }
        if ring.len() < ring_len {
            ring.resize(ring_len, None);
        }
        match ring[frame_index] {
            Some(cmd) => {
                self.backend.reset_command_list(cmd)?;
                Ok(cmd)
            }
            None => {
                let cmd = self
                    .backend
                    .create_command_list(&format!("{}.{}", lane.label, frame_index))?;
                ring[frame_index] = Some(cmd);
                Ok(cmd)
            }
        }
    }

    /// Tasks waiting in a queued lane; always 0 for immediate priority
    pub fn queued_len(&self, priority: TaskPriority) -> usize {
        match priority.lane() {
            Some(lane) => self.lanes[lane].queue.lock().unwrap().len(),
            None => 0,
        }
    }

    pub(crate) fn compute_pool(&self) -> &Arc<TaskPool<ComputeDispatchTask>> {
        &self.compute_pool
    }

    pub(crate) fn upload_pool(&self) -> &Arc<TaskPool<BufferUploadTask>> {
        &self.upload_pool
    }

    /// Drop queued tasks, free pooled lists, and clear the task pools
    pub fn dispose(&self) {
        for lane in &self.lanes {
            let mut queue = lane.queue.lock().unwrap();
            if !queue.is_empty() {
                log::warn!("{}: dropping {} queued tasks at teardown", lane.label, queue.len());
            }
            queue.clear();
            drop(queue);

            let mut ring = lane.ring.lock().unwrap();
            for cmd in ring.drain(..).flatten() {
                self.backend.free_command_list(cmd);
            }
        }
        self.compute_pool.clear();
        self.upload_pool.clear();
    }
}
