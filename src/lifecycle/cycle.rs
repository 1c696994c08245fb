//! Task-group tracker used by the orchestrator.
//!
//! A [`Cycle`] runs independent tasks on the tokio runtime, tells when all
//! of them have finished, and coalesces their failures into a single quit
//! outcome: the first error wins, later ones are logged and dropped.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Registry {
    launched: usize,
    error: Option<Error>,
}

#[derive(Debug)]
struct Inner {
    /// Serializes task registration, error reporting and close.
    registry: Mutex<Registry>,
    pending: watch::Sender<usize>,
    quit: watch::Sender<bool>,
    closing: AtomicBool,
}

impl Inner {
    fn close(&self) -> bool {
        let _registry = self.registry.lock();
        self.close_locked()
    }

    fn close_locked(&self) -> bool {
        if self
            .closing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.quit.send_replace(true);
            true
        } else {
            false
        }
    }

    fn report(&self, err: Error) {
        let mut registry = self.registry.lock();
        if self.closing.load(Ordering::Acquire) {
            tracing::warn!(target: "ego", error = %err, "cycle already closed, dropping task error");
            return;
        }
        registry.error = Some(err);
        self.close_locked();
    }
}

/// Decrements the pending count even if the task is aborted.
struct PendingGuard(Arc<Inner>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.pending.send_modify(|pending| *pending -= 1);
    }
}

/// Tracks a group of spawned tasks and their first failure.
#[derive(Debug, Clone)]
pub struct Cycle {
    inner: Arc<Inner>,
}

impl Cycle {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        let (quit, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                pending,
                quit,
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn `task` and track it until it completes.
    ///
    /// A returned error (or a panic) is offered to the quit outcome. Must be
    /// called from within a tokio runtime.
    pub fn run<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        {
            let mut registry = self.inner.registry.lock();
            registry.launched += 1;
            self.inner.pending.send_modify(|pending| *pending += 1);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _guard = PendingGuard(Arc::clone(&inner));
            let result = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(Error::Panic(panic_message(panic.as_ref()))),
            };
            if let Err(err) = result {
                inner.report(err);
            }
        });
    }

    /// Resolves once every task registered so far has completed.
    pub fn done(&self) -> impl Future<Output = ()> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let mut pending = inner.pending.subscribe();
        async move {
            let _ = pending.wait_for(|pending| *pending == 0).await;
            drop(inner);
        }
    }

    /// Wait for all tasks, then close the cycle.
    pub async fn done_and_close(&self) {
        self.done().await;
        self.close();
    }

    /// Close the quit outcome. Only the first call has an effect.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Resolves with the quit outcome: the first task error, or `None` once
    /// the cycle is closed without one.
    ///
    /// With `hang == false` and no task ever launched, the cycle is closed
    /// right away and the returned future is already resolved.
    pub fn wait(&self, hang: bool) -> impl Future<Output = Option<Error>> + Send + 'static {
        if !hang && self.launched() == 0 {
            self.close();
        }

        let inner = Arc::clone(&self.inner);
        let mut quit = inner.quit.subscribe();
        async move {
            let _ = quit.wait_for(|closed| *closed).await;
            let error = inner.registry.lock().error.take();
            error
        }
    }

    /// Total number of tasks launched on this cycle.
    pub fn launched(&self) -> usize {
        self.inner.registry.lock().launched
    }

    /// Number of tasks still running.
    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }
}

impl Default for Cycle {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
