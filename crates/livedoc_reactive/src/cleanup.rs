//! Reverse-order teardown for composite components.

use parking_lot::Mutex;

type Task = Box<dyn FnOnce() + Send>;

/// A stack of teardown tasks run in reverse registration order.
///
/// Components that register several subscriptions defer the matching
/// unsubscribes here; `run` then tears them down last-registered-first,
/// mirroring construction order. Running twice is a no-op.
#[derive(Default)]
pub struct CleanupStack {
    tasks: Mutex<Vec<Task>>,
}

impl CleanupStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a teardown task.
    pub fn defer(&self, task: impl FnOnce() + Send + 'static) {
        self.tasks.lock().push(Box::new(task));
    }

    /// Registers a subscription to be dropped during teardown.
    pub fn defer_unsubscribe(&self, subscription: crate::Subscription) {
        self.defer(move || subscription.unsubscribe());
    }

    /// Runs all registered tasks in reverse registration order.
    ///
    /// Idempotent: tasks run at most once, and tasks registered after a run
    /// are executed by the next run.
    pub fn run(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(task) = tasks.pop() {
            task();
        }
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Returns true if no tasks are pending.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupStack")
            .field("pending", &self.len())
            .finish()
    }
}
