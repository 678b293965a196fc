use std::future::Future;
use std::sync::LazyLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

static SHARED: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .thread_name("forgetree-goal")
        .enable_time()
        .build()
        .expect("failed to start the shared goal runtime")
});

/// Where goal bodies are executed.
///
/// A scheduler is captured when a goal is created, so a goal created inside
/// a runtime keeps running on that runtime. Outside of any runtime the
/// process-wide one is used, started only once something is spawned on it.
#[derive(Debug, Clone)]
pub struct Scheduler {
    target: Target,
}

#[derive(Debug, Clone)]
enum Target {
    Runtime(Handle),
    Shared,
}

impl Scheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            target: Target::Runtime(handle),
        }
    }

    /// The runtime of the caller, or the process-wide one outside of any
    /// runtime.
    pub fn current() -> Self {
        match Handle::try_current() {
            Ok(handle) => Self::new(handle),
            Err(_) => Self::shared(),
        }
    }

    /// Process-wide multi-thread runtime.
    pub fn shared() -> Self {
        Self {
            target: Target::Shared,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.target, Target::Shared)
    }

    /// Handle of the underlying runtime. Starts the shared runtime if this
    /// scheduler uses it.
    pub fn handle(&self) -> &Handle {
        match &self.target {
            Target::Runtime(handle) => handle,
            Target::Shared => SHARED.handle(),
        }
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle().spawn(future)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::current()
    }
}
