// Background task submission
//
// Accepted provision and deprovision calls finish their work in a detached task.
// The spawner counts tasks in flight so shutdown and tests can wait for the
// background phase to settle instead of sleeping.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

pub type BackgroundTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Called after every background task, including ones that panicked
pub type CompletionHook = Arc<dyn Fn() + Send + Sync>;

/// Roughly thirty years, what tokio uses for a timer that never fires
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + timeout`, saturating at a far-future instant for oversized timeouts
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, name: &'static str, task: BackgroundTask);
}

#[derive(Default)]
struct SpawnerState {
    in_flight: AtomicUsize,
    idle: Notify,
}

#[derive(Clone, Default)]
pub struct TokioTaskSpawner {
    state: Arc<SpawnerState>,
    on_complete: Option<CompletionHook>,
}

struct InFlightGuard {
    state: Arc<SpawnerState>,
    on_complete: Option<CompletionHook>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(hook) = &self.on_complete {
            hook();
        }
        if self.state.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.idle.notify_waiters();
        }
    }
}

impl TokioTaskSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completion_hook(hook: CompletionHook) -> Self {
        Self {
            state: Arc::default(),
            on_complete: Some(hook),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no task is running. Returns false if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return true;
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }
}

impl TaskSpawner for TokioTaskSpawner {
    fn spawn(&self, name: &'static str, task: BackgroundTask) {
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard {
            state: self.state.clone(),
            on_complete: self.on_complete.clone(),
        };
        debug!(task = name, "Spawning background task");
        tokio::spawn(async move {
            let _guard = guard;
            task.await;
        });
    }
}
