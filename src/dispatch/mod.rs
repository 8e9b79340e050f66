//! Background execution with results delivered on one designated context.
//!
//! # Concurrency Model
//!
//! - [`IoDispatcher`] runs operations as Tokio tasks; a semaphore bounds how
//!   many are in flight at once.
//! - [`CallbackContext`] is a single-consumer queue. Completion callbacks are
//!   only ever run by whoever drains it, one at a time.
//! - [`TaskScope`] groups operations so they can be cancelled together.
//!   Cancelling aborts in-flight operations and suppresses callbacks that were
//!   already queued. Dropping a scope cancels it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{AbortHandle, Abortable};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Minimum worker count.
pub const MIN_WORKERS: usize = 1;

/// Maximum worker count.
pub const MAX_WORKERS: usize = 64;

/// A completion queued for the callback context.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Errors constructing the dispatch layer.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Worker count out of range.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkers {
        /// The rejected value.
        value: usize,
    },
    /// Called outside a Tokio runtime.
    #[error("no Tokio runtime is running on this thread")]
    NoRuntime,
}

/// Bounded pool for I/O-bound operations.
#[derive(Debug)]
pub struct IoDispatcher {
    handle: Handle,
    semaphore: Arc<Semaphore>,
    workers: usize,
}

impl IoDispatcher {
    /// Creates a dispatcher spawning onto `handle` with at most `workers`
    /// operations in flight.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidWorkers`] outside 1..=64.
    pub fn new(handle: Handle, workers: usize) -> Result<Self, DispatchError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(DispatchError::InvalidWorkers { value: workers });
        }
        debug!(workers, "creating I/O dispatcher");
        Ok(Self {
            handle,
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
        })
    }

    /// Creates a dispatcher on the runtime of the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoRuntime`] outside a runtime, or
    /// [`DispatchError::InvalidWorkers`].
    pub fn current(workers: usize) -> Result<Self, DispatchError> {
        let handle = Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
        Self::new(handle, workers)
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of operations that could start right now.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Runs `op` once a permit is free. Resolves to `None` if the pool was closed.
    pub fn spawn<F>(&self, op: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        self.handle.spawn(async move {
            // Permit is held until the operation finishes
            let _permit = semaphore.acquire_owned().await.ok()?;
            Some(op.await)
        })
    }

    /// Stops admitting new operations; queued ones resolve to `None`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Sender half of a [`CallbackContext`].
#[derive(Debug, Clone)]
pub struct CallbackHandle {
    sender: mpsc::UnboundedSender<Callback>,
}

impl CallbackHandle {
    /// Queues `callback`. Returns false when the context is gone.
    pub fn post(&self, callback: impl FnOnce() + Send + 'static) -> bool {
        self.sender.send(Box::new(callback)).is_ok()
    }
}

/// The single context on which completions run.
#[derive(Debug)]
pub struct CallbackContext {
    sender: mpsc::UnboundedSender<Callback>,
    receiver: mpsc::UnboundedReceiver<Callback>,
}

impl Default for CallbackContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackContext {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    /// Returns a handle for queuing callbacks from any thread.
    #[must_use]
    pub fn handle(&self) -> CallbackHandle {
        CallbackHandle {
            sender: self.sender.clone(),
        }
    }

    /// Runs every callback queued so far and returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(callback) = self.receiver.try_recv() {
            callback();
            ran += 1;
        }
        trace!(ran, "drained callback context");
        ran
    }

    /// Waits for the next callback and runs it.
    pub async fn run_next(&mut self) {
        // The context owns a sender, so the channel never closes while it is alive.
        if let Some(callback) = self.receiver.recv().await {
            callback();
        }
    }
}

type Registry = Arc<Mutex<HashMap<u64, AbortHandle>>>;

fn lock_registry(
    registry: &Mutex<HashMap<u64, AbortHandle>>,
) -> MutexGuard<'_, HashMap<u64, AbortHandle>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps an operation registered until its completion is delivered or dropped.
struct Pending {
    registry: Registry,
    id: u64,
}

impl Drop for Pending {
    fn drop(&mut self) {
        lock_registry(&self.registry).remove(&self.id);
    }
}

/// Cancellation group for operations started on behalf of one owner.
pub struct TaskScope {
    dispatcher: Arc<IoDispatcher>,
    callbacks: CallbackHandle,
    handles: Registry,
    next_id: AtomicU64,
}

impl std::fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScope")
            .field("active", &self.active())
            .finish_non_exhaustive()
    }
}

impl TaskScope {
    #[must_use]
    pub fn new(dispatcher: Arc<IoDispatcher>, callbacks: CallbackHandle) -> Self {
        Self {
            dispatcher,
            callbacks,
            handles: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Runs `op` on the pool and delivers its output to `on_done` on the
    /// callback context, unless the scope is cancelled first.
    pub fn spawn<F, C>(&self, op: F, on_done: C)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
        C: FnOnce(F::Output) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (abort_handle, registration) = AbortHandle::new_pair();
        let guarded = Abortable::new(op, registration);
        lock_registry(&self.handles).insert(id, abort_handle.clone());
        let pending = Pending {
            registry: Arc::clone(&self.handles),
            id,
        };

        let callbacks = self.callbacks.clone();
        self.dispatcher.spawn(async move {
            let Ok(output) = guarded.await else {
                trace!("operation aborted before completion");
                return;
            };
            let delivered = callbacks.post(move || {
                drop(pending);
                if abort_handle.is_aborted() {
                    trace!("suppressing callback for cancelled operation");
                    return;
                }
                on_done(output);
            });
            if !delivered {
                debug!("callback context closed; dropping completion");
            }
        });
    }

    /// Aborts every operation started through this scope.
    pub fn cancel_all(&self) {
        let handles: Vec<AbortHandle> = lock_registry(&self.handles)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        if !handles.is_empty() {
            debug!(count = handles.len(), "cancelling scope");
        }
        for handle in handles {
            handle.abort();
        }
    }

    /// Operations started through this scope whose completion has not been
    /// delivered yet and that have not been cancelled.
    #[must_use]
    pub fn active(&self) -> usize {
        lock_registry(&self.handles).len()
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scope(context: &CallbackContext, workers: usize) -> TaskScope {
        let dispatcher = Arc::new(IoDispatcher::current(workers).unwrap());
        TaskScope::new(dispatcher, context.handle())
    }

    #[test]
    fn test_worker_bounds() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        assert!(matches!(
            IoDispatcher::new(runtime.handle().clone(), 0),
            Err(DispatchError::InvalidWorkers { value: 0 })
        ));
        assert!(IoDispatcher::new(runtime.handle().clone(), 65).is_err());
        assert_eq!(
            IoDispatcher::new(runtime.handle().clone(), 4).unwrap().workers(),
            4
        );
    }

    #[test]
    fn test_current_outside_runtime() {
        assert!(matches!(
            IoDispatcher::current(4),
            Err(DispatchError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_completion_runs_on_callback_context() {
        let mut context = CallbackContext::new();
        let scope = scope(&context, 2);
        let seen = Arc::new(AtomicUsize::new(0));

        let sink = Arc::clone(&seen);
        scope.spawn(async { 41 + 1 }, move |value| {
            sink.store(value, Ordering::SeqCst);
        });

        // Nothing runs until the context is drained.
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        tokio::time::timeout(Duration::from_secs(5), context.run_next())
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_operation() {
        let mut context = CallbackContext::new();
        let scope = scope(&context, 2);
        let calls = Arc::new(AtomicUsize::new(0));

        let sink = Arc::clone(&calls);
        scope.spawn(std::future::pending::<()>(), move |()| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(scope.active(), 1);
        scope.cancel_all();
        assert_eq!(scope.active(), 0);

        let waited = tokio::time::timeout(Duration::from_millis(50), context.run_next()).await;
        assert!(waited.is_err(), "no callback should be queued");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_suppresses_already_queued_callback() {
        let mut context = CallbackContext::new();
        let scope = scope(&context, 2);
        let calls = Arc::new(AtomicUsize::new(0));

        let sink = Arc::clone(&calls);
        scope.spawn(async {}, move |()| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        // Let the operation finish and queue its completion.
        tokio::time::sleep(Duration::from_millis(20)).await;
        scope.cancel_all();

        assert_eq!(context.run_pending(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delivered_operations_leave_the_scope() {
        let mut context = CallbackContext::new();
        let scope = scope(&context, 4);
        let calls = Arc::new(AtomicUsize::new(0));

        for value in 0..100 {
            let sink = Arc::clone(&calls);
            scope.spawn(async move { value }, move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            });
        }
        for _ in 0..100 {
            tokio::time::timeout(Duration::from_secs(5), context.run_next())
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 100);
        assert_eq!(scope.active(), 0);
    }

    #[tokio::test]
    async fn test_work_rejected_by_closed_pool_leaves_the_scope() {
        let context = CallbackContext::new();
        let dispatcher = Arc::new(IoDispatcher::current(1).unwrap());
        dispatcher.close();
        let scope = TaskScope::new(Arc::clone(&dispatcher), context.handle());

        scope.spawn(async {}, |()| {});
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(scope.active(), 0);
    }

    #[tokio::test]
    async fn test_drop_cancels_scope() {
        let mut context = CallbackContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let scope = scope(&context, 1);
            let sink = Arc::clone(&calls);
            scope.spawn(
                tokio::time::sleep(Duration::from_millis(10)),
                move |()| {
                    sink.fetch_add(1, Ordering::SeqCst);
                },
            );
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        context.run_pending();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispatcher_bounds_in_flight_operations() {
        let dispatcher = IoDispatcher::current(1).unwrap();
        let (release, wait) = tokio::sync::oneshot::channel::<()>();

        let first = dispatcher.spawn(async move {
            wait.await.ok();
            1
        });
        tokio::task::yield_now().await;
        assert_eq!(dispatcher.available_permits(), 0);

        let second = dispatcher.spawn(async { 2 });
        release.send(()).unwrap();
        assert_eq!(first.await.unwrap(), Some(1));
        assert_eq!(second.await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_closed_dispatcher_rejects_work() {
        let dispatcher = IoDispatcher::current(1).unwrap();
        dispatcher.close();
        assert_eq!(dispatcher.spawn(async { 1 }).await.unwrap(), None);
    }
}
