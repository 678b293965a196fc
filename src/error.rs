use std::sync::Arc;

pub use anyhow::Error as RuntimeError;
use thiserror::Error;

use crate::name::Name;

/// Terminal failure of a goal.
///
/// Every awaiter of a goal observes the same failure, so the error is cheap
/// to clone and keeps userland errors behind an [`Arc`].
#[derive(Debug, Error, Clone)]
pub enum GoalError {
    #[error("expected a value of type {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("dependency failed: {0}")]
    DependencyFailed(Box<GoalError>),

    #[error("cancelled: {0}")]
    Cancelled(Arc<str>),

    #[error("{0}")]
    Computation(Arc<anyhow::Error>),
}

impl GoalError {
    pub fn computation(err: impl Into<anyhow::Error>) -> Self {
        Self::Computation(Arc::new(err.into()))
    }

    pub fn cancelled(reason: impl Into<Arc<str>>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Follows [`GoalError::DependencyFailed`] down to the failure that
    /// started the chain.
    pub fn root_cause(&self) -> &GoalError {
        let mut current = self;
        while let GoalError::DependencyFailed(inner) = current {
            current = inner;
        }
        current
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), GoalError::Cancelled(_))
    }

    /// Recovers a goal error carried through `anyhow`, wrapping anything
    /// else as a computation failure.
    pub(crate) fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<GoalError>() {
            Ok(err) => err,
            Err(err) => Self::Computation(Arc::new(err)),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("name token body is empty")]
    EmptyToken,

    #[error("closing bracket without matching open bracket in '{0}'")]
    UnmatchedBracket(String),

    #[error("only the name end or a separator may follow an index in '{0}'")]
    TrailingIndex(String),

    #[error("index is not closed in '{0}'")]
    UnclosedIndex(String),
}

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("expected a JSON object, found {0}")]
    NotANode(&'static str),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error, Clone)]
pub enum TreeError {
    #[error("data '{name}' has type {found}, which is not assignable to {expected}")]
    TypeMismatch {
        name: Name,
        expected: &'static str,
        found: &'static str,
    },

    #[error("a leaf can not be placed at the root of a tree")]
    EmptyName,

    #[error(transparent)]
    Name(#[from] NameError),
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("capability '{0}' not found")]
    NotFound(String),

    #[error("capability '{tag}' is not a {expected}")]
    WrongType { tag: String, expected: &'static str },
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("task '{0}' is not registered in the workspace")]
    UnknownTask(String),

    #[error("task '{task}' can not run a model built for task '{model}'")]
    ModelMismatch { task: String, model: String },

    #[error("required data '{0}' is absent")]
    MissingData(Name),

    #[error("target '{0}' is not defined")]
    UnknownTarget(String),

    #[error("dependency cycle between tasks: {0}")]
    Cycle(String),

    #[error("task '{task}', transformation into '{to}':\n{source}")]
    Transform {
        task: String,
        to: Name,
        source: TreeError,
    },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Goal(#[from] GoalError),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),

    #[error("invalid workspace configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Userland(#[from] anyhow::Error),
}

impl WorkspaceError {
    /// Whether this is one of the validation failures: a model run by the
    /// wrong task, or a declared input that does not exist.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WorkspaceError::ModelMismatch { .. } | WorkspaceError::MissingData(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause() {
        let err = GoalError::DependencyFailed(Box::new(GoalError::DependencyFailed(Box::new(
            GoalError::cancelled("stop"),
        ))));
        assert!(err.is_cancelled());
        assert!(matches!(err.root_cause(), GoalError::Cancelled(r) if &**r == "stop"));
    }

    #[test]
    fn test_from_anyhow_preserves_goal_errors() {
        let err = anyhow::Error::from(GoalError::TypeMismatch {
            expected: "i32",
            found: "String",
        });
        assert!(matches!(
            GoalError::from_anyhow(err),
            GoalError::TypeMismatch { .. }
        ));

        let err = GoalError::from_anyhow(anyhow::anyhow!("boom"));
        assert!(matches!(err, GoalError::Computation(_)));
        assert_eq!(err.to_string(), "boom");
    }
}
