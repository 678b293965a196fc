#![forbid(unsafe_code)]
//! Lazy workflow engine.
//!
//! Values are [`Data`] handles: typed, memoized and cancelable computations
//! that only run when something asks for them. Handles are organized in
//! hierarchical [`DataTree`]s and reshaped by [`action`]s, which wire new
//! computations on top of old ones without forcing anything.
//!
//! A [`Workspace`] holds a set of [`Task`]s and the root data. Running a
//! task first builds a [`TaskModel`], the task name with its configuration
//! and declared inputs, and then executes it. Outputs are cached per model,
//! so a task invoked twice with the same configuration runs once.

pub mod action;
pub mod context;
pub mod data;
pub mod error;
pub mod goal;
pub mod hash;
#[cfg(feature = "logging")]
pub mod logging;
pub mod meta;
pub mod name;
pub mod workspace;

pub use crate::action::{Action, ActionEnv, JoinAction, PipeAction, SplitAction};
pub use crate::context::{Context, Plugin};
pub use crate::data::{AnyData, Data, DataFilter, DataTree, DataTreeBuilder, DataType, Dynamic};
pub use crate::error::*;
pub use crate::goal::{Goal, GoalScope, GoalState, GoalStatus, Scheduler};
pub use crate::hash::Hash32;
pub use crate::meta::Meta;
pub use crate::name::{Name, NameToken};
pub use crate::workspace::{Task, TaskBuilder, TaskModel, Workspace, WorkspaceConfig};
