//! One-shot callback task

use super::{GpuTask, TaskContext};
use crate::core::error::Error;

/// Wraps a closure as a task, for work that records its own commands
///
/// Not pooled; each instance runs once and is dropped.
pub struct CallbackTask {
    run_fn: Option<Box<dyn FnOnce(&mut TaskContext<'_>) -> Result<(), Error> + Send>>,
}

impl CallbackTask {
    pub fn new(
        run_fn: impl FnOnce(&mut TaskContext<'_>) -> Result<(), Error> + Send + 'static,
    ) -> Box<Self> {
        Box::new(Self {
            run_fn: Some(Box::new(run_fn)),
        })
    }
}

impl GpuTask for CallbackTask {
    fn is_valid(&self) -> bool {
        self.run_fn.is_some()
    }

    fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), Error> {
        match self.run_fn.take() {
            Some(run_fn) => run_fn(ctx),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::backend::GpuBackend;
    use crate::gpu::headless::HeadlessBackend;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_runs_exactly_once() {
        let backend = HeadlessBackend::new();
        let cmd = backend.create_command_list("callback").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let mut task = CallbackTask::new(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(task.is_valid());

        let mut ctx = TaskContext {
            backend: &backend,
            cmd,
            staging: None,
        };
        task.run(&mut ctx).unwrap();
        task.run(&mut ctx).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!task.is_valid());
    }

    #[test]
    fn test_propagates_errors() {
        let backend = HeadlessBackend::new();
        let cmd = backend.create_command_list("callback").unwrap();

        let mut task = CallbackTask::new(|_ctx| Err(Error::Backend("boom".into())));
        let mut ctx = TaskContext {
            backend: &backend,
            cmd,
            staging: None,
        };
        assert!(task.run(&mut ctx).is_err());
    }
}
