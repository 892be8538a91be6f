//! Reusable task instance pools
//!
//! High-frequency task kinds are pooled so steady-state submission does not
//! allocate. Each live instance carries a weak back-reference to its pool;
//! recycling resets the instance and returns it if the pool is still alive
//! and below capacity, otherwise the instance is simply dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// A task type that can live in a `TaskPool`
pub trait PooledTask: Default + Send + 'static {
    /// Clear all task state for reuse
    fn reset(&mut self);

    /// Install the owning pool for later recycling
    fn attach_pool(&mut self, pool: Weak<TaskPool<Self>>);

    /// Take the owning pool reference
    fn take_pool(&mut self) -> Option<Weak<TaskPool<Self>>>;
}

/// Fixed-capacity pool of recycled task instances
pub struct TaskPool<T: PooledTask> {
    free: Mutex<Vec<Box<T>>>,
    capacity: usize,
    allocated: AtomicUsize,
    recycled: AtomicUsize,
}

impl<T: PooledTask> TaskPool<T> {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            capacity,
            allocated: AtomicUsize::new(0),
            recycled: AtomicUsize::new(0),
        })
    }

    /// Take a recycled instance, or allocate a fresh one if the pool is
    /// empty or its lock is poisoned
    pub fn acquire(self: &Arc<Self>) -> Box<T> {
        let reused = match self.free.lock() {
            Ok(mut free) => free.pop(),
            Err(_) => {
                log::warn!("task pool lock poisoned, allocating fresh instance");
                None
            }
        };
        let mut task = match reused {
            Some(task) => task,
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Box::new(T::default())
            }
        };
        task.attach_pool(Arc::downgrade(self));
        task
    }

    /// Reset an instance and return it to the pool if below capacity
    pub fn recycle(&self, mut task: Box<T>) {
        task.reset();
        if let Ok(mut free) = self.free.lock() {
            if free.len() < self.capacity {
                self.recycled.fetch_add(1, Ordering::Relaxed);
                free.push(task);
            }
        }
    }

    /// Instances currently waiting for reuse
    pub fn free_count(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    /// Total fresh allocations over the pool's lifetime
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Total instances returned to the pool
    pub fn recycled(&self) -> usize {
        self.recycled.load(Ordering::Relaxed)
    }

    /// Drop all pooled instances
    pub fn clear(&self) {
        if let Ok(mut free) = self.free.lock() {
            free.clear();
        }
    }
}

/// Return a task to its pool if the pool is still alive, drop it otherwise
pub fn recycle_into<T: PooledTask>(pool: Option<Weak<TaskPool<T>>>, task: Box<T>) {
    if let Some(pool) = pool.and_then(|weak| weak.upgrade()) {
        pool.recycle(task);
    }
}
