//! Lazy, memoized, cancelable asynchronous computations.
//!
//! A [`Goal`] wraps a computation together with the goals it depends on.
//! Nothing runs until the goal is started, either explicitly or by the first
//! [`Goal::get`]. Starting a goal starts its dependencies, waits for all of
//! them and only then runs the body, exactly once. Every awaiter observes the
//! same outcome.

mod scheduler;
mod scope;

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};

use crate::error::GoalError;

pub use scheduler::Scheduler;
pub use scope::GoalScope;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type Block<T> = Box<dyn FnOnce(GoalScope) -> BoxFuture<'static, anyhow::Result<T>> + Send>;

#[derive(Debug, Clone)]
pub enum GoalState<T> {
    Pending,
    Running,
    Completed(T),
    Failed(GoalError),
    Cancelled(Arc<str>),
}

impl<T> GoalState<T> {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GoalState::Completed(_) | GoalState::Failed(_) | GoalState::Cancelled(_)
        )
    }

    pub fn status(&self) -> GoalStatus {
        match self {
            GoalState::Pending => GoalStatus::Pending,
            GoalState::Running => GoalStatus::Running,
            GoalState::Completed(_) => GoalStatus::Completed,
            GoalState::Failed(_) => GoalStatus::Failed,
            GoalState::Cancelled(_) => GoalStatus::Cancelled,
        }
    }

    fn outcome(&self) -> Result<(), GoalError> {
        match self {
            GoalState::Completed(_) => Ok(()),
            GoalState::Failed(err) => Err(err.clone()),
            GoalState::Cancelled(reason) => Err(GoalError::Cancelled(reason.clone())),
            GoalState::Pending | GoalState::Running => Err(unsettled()),
        }
    }
}

impl<T: Clone> GoalState<T> {
    fn settle(&self) -> Result<T, GoalError> {
        match self {
            GoalState::Completed(value) => Ok(value.clone()),
            other => other.outcome().and_then(|_| Err(unsettled())),
        }
    }
}

fn unsettled() -> GoalError {
    GoalError::cancelled("goal was dropped before it settled")
}

/// Goal state without the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoalStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Type erased view of a goal, used to wire dependencies.
pub(crate) trait GoalNode: Send + Sync {
    fn start(self: Arc<Self>);
    fn cancel(&self, reason: &Arc<str>);
    fn wait(&self) -> BoxFuture<'static, Result<(), GoalError>>;
    fn status(&self) -> GoalStatus;
    fn attach(&self, dependent: Weak<dyn GoalNode>);
}

/// Handle to an upstream goal of any value type.
#[derive(Clone)]
pub struct Dependency(Arc<dyn GoalNode>);

impl Dependency {
    pub fn status(&self) -> GoalStatus {
        self.0.status()
    }

    pub fn start(&self) {
        self.0.clone().start();
    }

    pub fn cancel(&self, reason: impl Into<Arc<str>>) {
        self.0.cancel(&reason.into());
    }

    /// Waits until the goal settles, discarding its value.
    pub async fn wait(&self) -> Result<(), GoalError> {
        self.0.wait().await
    }
}

impl Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dependency").field(&self.status()).finish()
    }
}

struct GoalInner<T> {
    dependencies: Vec<Dependency>,
    dependents: Mutex<Vec<Weak<dyn GoalNode>>>,
    block: Mutex<Option<Block<T>>>,
    state: watch::Sender<GoalState<T>>,
    signal: watch::Sender<Option<Arc<str>>>,
    scheduler: Scheduler,
}

impl<T> GoalInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn launch(self: Arc<Self>) {
        let Some(block) = self
            .block
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        tracing::debug!(dependencies = self.dependencies.len(), "goal started");

        let scheduler = self.scheduler.clone();
        scheduler.spawn(self.drive(block));
    }

    async fn drive(self: Arc<Self>, block: Block<T>) {
        let scope = GoalScope::new(self.signal.subscribe());

        if let Err(err) = self.await_dependencies(&scope).await {
            match err {
                GoalError::Cancelled(reason) => self.cancel_with(&reason),
                err => self.finish(Err(GoalError::DependencyFailed(Box::new(err)))),
            }
            return;
        }

        let running = self.state.send_if_modified(|state| match state {
            GoalState::Pending => {
                *state = GoalState::Running;
                true
            }
            _ => false,
        });

        if !running {
            return;
        }

        let result = match self.scheduler.spawn(block(scope)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(GoalError::from_anyhow(err)),
            Err(err) => Err(from_join_error(err)),
        };

        self.finish(result);
    }

    /// Starts every dependency and waits for all of them. Returns the first
    /// failure, or `Cancelled` when this goal is cancelled while waiting.
    async fn await_dependencies(&self, scope: &GoalScope) -> Result<(), GoalError> {
        if self.dependencies.is_empty() {
            return Ok(());
        }

        let mut waiting = JoinSet::new();
        for dependency in &self.dependencies {
            dependency.start();
            waiting.spawn(dependency.0.wait());
        }

        loop {
            tokio::select! {
                _ = scope.cancelled() => {
                    let reason = scope.reason().unwrap_or_else(|| "cancelled".into());
                    return Err(GoalError::Cancelled(reason));
                }
                next = waiting.join_next() => {
                    match next {
                        None => return Ok(()),
                        Some(Ok(Ok(()))) => {}
                        Some(Ok(Err(err))) => return Err(err),
                        Some(Err(err)) => return Err(from_join_error(err)),
                    }
                }
            }
        }
    }

    fn finish(&self, result: Result<T, GoalError>) {
        self.state.send_if_modified(move |state| {
            if state.is_terminal() {
                return false;
            }

            *state = match result {
                Ok(value) => GoalState::Completed(value),
                Err(GoalError::Cancelled(reason)) => GoalState::Cancelled(reason),
                Err(err) => GoalState::Failed(err),
            };
            true
        });
    }

    fn cancel_with(&self, reason: &Arc<str>) {
        let cancelled = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = GoalState::Cancelled(reason.clone());
            true
        });

        if !cancelled {
            return;
        }

        tracing::debug!(%reason, "goal cancelled");

        self.signal.send_replace(Some(reason.clone()));
        self.block
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let dependents = std::mem::take(
            &mut *self
                .dependents
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for dependent in dependents.iter().filter_map(Weak::upgrade) {
            if dependent.status() == GoalStatus::Pending {
                dependent.cancel(reason);
            }
        }
    }
}

impl<T> GoalNode for GoalInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn start(self: Arc<Self>) {
        self.launch();
    }

    fn cancel(&self, reason: &Arc<str>) {
        self.cancel_with(reason);
    }

    fn wait(&self) -> BoxFuture<'static, Result<(), GoalError>> {
        let mut state = self.state.subscribe();
        Box::pin(async move {
            state
                .wait_for(GoalState::is_terminal)
                .await
                .map_err(|_| unsettled())
                .and_then(|state| state.outcome())
        })
    }

    fn status(&self) -> GoalStatus {
        self.state.borrow().status()
    }

    fn attach(&self, dependent: Weak<dyn GoalNode>) {
        let mut dependents = self
            .dependents
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        dependents.retain(|weak| weak.strong_count() > 0);
        dependents.push(dependent);
    }
}

fn from_join_error(err: JoinError) -> GoalError {
    if !err.is_panic() {
        return GoalError::cancelled("goal task was aborted");
    }

    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());

    GoalError::computation(anyhow::anyhow!("goal panicked: {message}"))
}

/// A lazily started computation producing a value of type `T`.
///
/// Cloning a goal is cheap and yields a handle to the same computation.
pub struct Goal<T> {
    inner: Arc<GoalInner<T>>,
}

impl<T> Clone for Goal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Goal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a goal running `block` on `scheduler` after every dependency
    /// completed.
    pub fn new<F, Fut>(
        scheduler: Scheduler,
        dependencies: impl IntoIterator<Item = Dependency>,
        block: F,
    ) -> Self
    where
        F: FnOnce(GoalScope) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let block: Block<T> = Box::new(move |scope| Box::pin(block(scope)));
        Self::with_state(
            scheduler,
            dependencies.into_iter().collect(),
            Some(block),
            GoalState::Pending,
        )
    }

    /// Same as [`Goal::new`] on the current scheduler.
    pub fn lazy<F, Fut>(dependencies: impl IntoIterator<Item = Dependency>, block: F) -> Self
    where
        F: FnOnce(GoalScope) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new(Scheduler::current(), dependencies, block)
    }

    /// A goal that is already completed.
    pub fn ready(value: T) -> Self {
        Self::with_state(
            Scheduler::current(),
            Vec::new(),
            None,
            GoalState::Completed(value),
        )
    }

    fn with_state(
        scheduler: Scheduler,
        dependencies: Vec<Dependency>,
        block: Option<Block<T>>,
        state: GoalState<T>,
    ) -> Self {
        let (state, _) = watch::channel(state);
        let (signal, _) = watch::channel(None);

        let inner = Arc::new(GoalInner {
            dependencies,
            dependents: Mutex::new(Vec::new()),
            block: Mutex::new(block),
            state,
            signal,
            scheduler,
        });

        let node: Arc<dyn GoalNode> = inner.clone();
        let weak = Arc::downgrade(&node);
        for dependency in &inner.dependencies {
            dependency.0.attach(weak.clone());
        }

        Self { inner }
    }

    /// Starts the computation. Calling this more than once has no effect.
    pub fn start(&self) {
        self.inner.clone().launch();
    }

    /// Starts the goal if needed and waits for its outcome.
    pub async fn get(&self) -> Result<T, GoalError> {
        self.start();

        let mut state = self.inner.state.subscribe();
        state
            .wait_for(GoalState::is_terminal)
            .await
            .map_err(|_| unsettled())
            .and_then(|state| state.settle())
    }

    /// Cancels the goal and every dependent goal that has not started yet.
    /// Terminal goals are left alone.
    pub fn cancel(&self, reason: impl Into<Arc<str>>) {
        self.inner.cancel_with(&reason.into());
    }

    pub fn status(&self) -> GoalStatus {
        self.inner.state.borrow().status()
    }

    /// The current state, including the value once completed.
    pub fn state(&self) -> GoalState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.inner.dependencies
    }

    pub fn dependency(&self) -> Dependency {
        Dependency(self.inner.clone())
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// A goal applying `f` to the value of this one.
    pub fn pipe<R, F, Fut>(&self, f: F) -> Goal<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let source = self.clone();
        Goal::new(self.inner.scheduler.clone(), [self.dependency()], move |_| async move {
            let value = source.get().await?;
            f(value).await
        })
    }

    /// A goal combining the values of a keyed collection of goals.
    pub fn join<K, R, F, Fut>(goals: BTreeMap<K, Goal<T>>, f: F) -> Goal<R>
    where
        K: Ord + Send + 'static,
        R: Clone + Send + Sync + 'static,
        F: FnOnce(BTreeMap<K, T>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let dependencies: Vec<_> = goals.values().map(Goal::dependency).collect();
        Goal::lazy(dependencies, move |_| async move {
            let mut values = BTreeMap::new();
            for (key, goal) in goals {
                values.insert(key, goal.get().await?);
            }
            f(values).await
        })
    }

    /// Same as [`Goal::join`] for a plain list, keeping its order.
    pub fn join_all<R, F, Fut>(goals: Vec<Goal<T>>, f: F) -> Goal<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(Vec<T>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let dependencies: Vec<_> = goals.iter().map(Goal::dependency).collect();
        Goal::lazy(dependencies, move |_| async move {
            let mut values = Vec::with_capacity(goals.len());
            for goal in goals {
                values.push(goal.get().await?);
            }
            f(values).await
        })
    }
}

impl<T> Debug for Goal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Goal")
            .field("status", &self.inner.state.borrow().status())
            .field("dependencies", &self.inner.dependencies.len())
            .finish()
    }
}
