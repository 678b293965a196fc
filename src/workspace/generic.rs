use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Task, TaskModel, TaskModelBuilder, Workspace};
use crate::action::{Action, ActionEnv, JoinAction, PipeAction, SplitAction, SplitRules};
use crate::context::Context;
use crate::data::{AnyData, DataTree, DataType, Typed};
use crate::error::{NameError, TreeError, WorkspaceError};
use crate::name::Name;

/// Meta key holding the name of the target a task runs for.
pub const TARGET_KEY: &str = "@target";

/// Group name used by [`TaskBuilder::join`] when no target is set.
pub const ANONYMOUS: &str = "@anonymous";

type ModelFn = Arc<dyn Fn(&mut TaskModelBuilder<'_>) -> Result<(), WorkspaceError> + Send + Sync>;

type TransformFn = Arc<
    dyn Fn(&Context, &TaskModel, DataTree<AnyData>) -> Result<DataTree<AnyData>, TreeError>
        + Send
        + Sync,
>;

struct Transformation<N> {
    from: N,
    to: N,
    transform: TransformFn,
}

fn all_data(model: &mut TaskModelBuilder<'_>) -> Result<(), WorkspaceError> {
    model.data("*")?;
    Ok(())
}

/// Declarative definition of a [`GenericTask`].
///
/// Every transformation reads the input subtree at `from` (the whole input
/// when empty) and writes its output at `to` (merged into the root when
/// empty).
pub struct TaskBuilder {
    name: String,
    model: ModelFn,
    transformations: Vec<Transformation<String>>,
    terminal: bool,
    output_type: DataType,
}

impl TaskBuilder {
    /// A task reading all of the workspace data.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: Arc::new(all_data),
            transformations: Vec::new(),
            terminal: false,
            output_type: DataType::any(),
        }
    }

    /// Replaces the default input declaration.
    pub fn model<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut TaskModelBuilder<'_>) -> Result<(), WorkspaceError> + Send + Sync + 'static,
    {
        self.model = Arc::new(f);
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn output<R: ?Sized + Typed>(mut self) -> Self {
        self.output_type = R::declared();
        self
    }

    /// Arbitrary transformation of the input subtree, narrowed to `T`.
    pub fn transform<T, F>(mut self, from: &str, to: &str, f: F) -> Self
    where
        T: ?Sized + Typed,
        F: Fn(&Context, &TaskModel, DataTree<T>) -> Result<DataTree<AnyData>, TreeError>
            + Send
            + Sync
            + 'static,
    {
        self.transformations.push(Transformation {
            from: from.to_string(),
            to: to.to_string(),
            transform: Arc::new(
                move |context: &Context, model: &TaskModel, input: DataTree<AnyData>| {
                    f(context, model, input.checked_cast::<T>()?)
                },
            ),
        });
        self
    }

    /// Invokes `action` with the model configuration. A terminal action makes
    /// the whole task terminal.
    pub fn action<T, R, A>(self, from: &str, to: &str, action: A) -> Self
    where
        T: ?Sized + Typed,
        R: ?Sized + Typed,
        A: Action<T, R> + 'static,
    {
        let terminal = action.is_terminal();
        let mut this = self.transform(from, to, move |_, model, input: DataTree<T>| {
            Ok(action.invoke(&input, model.meta())?.upcast())
        });
        this.terminal |= terminal;
        this
    }

    /// Maps every leaf.
    pub fn pipe<T, R, F>(self, from: &str, to: &str, f: F) -> Self
    where
        T: ?Sized + Typed,
        R: Any + Send + Sync,
        F: Fn(&ActionEnv, Arc<T>) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.action(
            from,
            to,
            PipeAction::<T, R>::new(move |step| {
                let f = f.clone();
                step.result(move |env, value| f(env, value));
            }),
        )
    }

    /// Reduces the whole input to a single leaf named after the target.
    pub fn join<T, R, F>(self, from: &str, to: &str, f: F) -> Self
    where
        T: ?Sized + Typed,
        R: Any + Send + Sync,
        F: Fn(&ActionEnv, BTreeMap<Name, Arc<T>>) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.action(
            from,
            to,
            JoinAction::<T, R>::new(move |rules| {
                let target = rules
                    .meta()
                    .string(TARGET_KEY)
                    .filter(|target| !target.is_empty())
                    .unwrap_or(ANONYMOUS);
                let Ok(name) = Name::atom(target) else {
                    return;
                };
                let f = f.clone();
                rules.result(name, move |env, values| f(env, values));
            }),
        )
    }

    /// Splits every leaf into the fragments declared by `rules`.
    pub fn split<T, R, F>(self, from: &str, to: &str, rules: F) -> Self
    where
        T: ?Sized + Typed,
        R: Any + Send + Sync,
        F: Fn(&mut SplitRules<T, R>) + Send + Sync + 'static,
    {
        self.action(from, to, SplitAction::new(rules))
    }

    /// Parses the transformation routes.
    pub fn build(self) -> Result<GenericTask, NameError> {
        let transformations = self
            .transformations
            .into_iter()
            .map(|t| -> Result<Transformation<Name>, NameError> {
                Ok(Transformation {
                    from: Name::parse(&t.from)?,
                    to: Name::parse(&t.to)?,
                    transform: t.transform,
                })
            })
            .collect::<Result<_, NameError>>()?;

        Ok(GenericTask {
            name: self.name,
            model: self.model,
            transformations,
            terminal: self.terminal,
            output_type: self.output_type,
        })
    }
}

/// A task assembled from a model closure and a list of transformations.
pub struct GenericTask {
    name: String,
    model: ModelFn,
    transformations: Vec<Transformation<Name>>,
    terminal: bool,
    output_type: DataType,
}

impl Task for GenericTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_type(&self) -> DataType {
        self.output_type
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }

    fn build(&self, model: &mut TaskModelBuilder<'_>) -> Result<(), WorkspaceError> {
        (self.model)(model)
    }

    fn run(
        &self,
        workspace: &Workspace,
        model: &TaskModel,
        input: DataTree<AnyData>,
    ) -> Result<DataTree<AnyData>, WorkspaceError> {
        if self.transformations.is_empty() {
            tracing::warn!(task = %self.name, "no transformations present, returning input data");
            return Ok(input);
        }

        let mut builder = DataTree::builder();

        for transformation in &self.transformations {
            let Some(local) = input.node(&transformation.from) else {
                tracing::debug!(
                    task = %self.name,
                    from = %transformation.from,
                    "input subtree absent, transformation skipped"
                );
                continue;
            };

            match (transformation.transform)(workspace.context(), model, local) {
                Ok(output) => {
                    builder.set_node(&transformation.to, output);
                }
                Err(source) if workspace.config().fail_fast => {
                    return Err(WorkspaceError::Transform {
                        task: self.name.clone(),
                        to: transformation.to.clone(),
                        source,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        task = %self.name,
                        to = %transformation.to,
                        "transformation failed, output omitted: {err}"
                    );
                }
            }
        }

        Ok(builder.build())
    }
}
