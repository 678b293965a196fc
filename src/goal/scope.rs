use std::sync::Arc;

use tokio::sync::watch;

use crate::error::GoalError;

/// Handle given to a running goal body.
///
/// Cancellation is advisory: a body that never looks at its scope runs to
/// the end, and its result is thrown away.
#[derive(Debug, Clone)]
pub struct GoalScope {
    signal: watch::Receiver<Option<Arc<str>>>,
}

impl GoalScope {
    pub(crate) fn new(signal: watch::Receiver<Option<Arc<str>>>) -> Self {
        Self { signal }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.borrow().is_some()
    }

    /// The cancellation reason, if the goal was cancelled.
    pub fn reason(&self) -> Option<Arc<str>> {
        self.signal.borrow().clone()
    }

    /// Resolves once the goal is cancelled.
    pub async fn cancelled(&self) {
        let mut signal = self.signal.clone();
        // The sender lives as long as the goal, an error here means the goal
        // is gone and nobody is waiting for the body anymore.
        let _ = signal.wait_for(Option::is_some).await;
    }

    /// Early return point for long running bodies.
    pub fn check(&self) -> Result<(), GoalError> {
        match self.reason() {
            Some(reason) => Err(GoalError::Cancelled(reason)),
            None => Ok(()),
        }
    }
}
