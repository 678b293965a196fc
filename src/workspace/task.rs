use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::Workspace;
use crate::data::{AnyData, DataFilter, DataTree, DataType};
use crate::error::WorkspaceError;
use crate::hash::{Fingerprint, Hash32};
use crate::meta::Meta;
use crate::name::Name;

/// A named unit of work.
///
/// Running a task happens in two phases. [`Task::build`] declares the
/// inputs for a given configuration, producing a [`TaskModel`] without
/// computing anything. [`Task::run`] then turns the gathered inputs into an
/// output tree.
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    /// The declared type of the output leaves.
    fn output_type(&self) -> DataType {
        DataType::any()
    }

    /// Terminal tasks have all of their output computed before the result
    /// is handed out.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Declares the inputs of the task. Name and configuration are already
    /// set on `model`.
    fn build(&self, model: &mut TaskModelBuilder<'_>) -> Result<(), WorkspaceError>;

    /// Rejects models this task can not run.
    fn validate(&self, model: &TaskModel) -> Result<(), WorkspaceError> {
        if model.name() != self.name() {
            return Err(WorkspaceError::ModelMismatch {
                task: self.name().to_string(),
                model: model.name().to_string(),
            });
        }
        Ok(())
    }

    /// Produces the output tree from the gathered `input`.
    fn run(
        &self,
        workspace: &Workspace,
        model: &TaskModel,
        input: DataTree<AnyData>,
    ) -> Result<DataTree<AnyData>, WorkspaceError>;
}

/// Where a declared input comes from.
#[derive(Debug, Clone)]
pub enum DependencySource {
    /// A part of the workspace root data.
    Data(DataFilter),
    /// The output of another task.
    Task(Arc<TaskModel>),
}

#[derive(Debug, Clone)]
pub struct ModelDependency {
    pub source: DependencySource,
    /// Where the input is mounted in the gathered tree.
    pub placement: Name,
}

/// A concrete invocation of a task: the task name, its resolved
/// configuration and the inputs it needs.
#[derive(Debug, Clone)]
pub struct TaskModel {
    name: String,
    meta: Meta,
    dependencies: Vec<ModelDependency>,
}

impl TaskModel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn dependencies(&self) -> &[ModelDependency] {
        &self.dependencies
    }

    /// Identity of the invocation. Two models with the same task name and
    /// configuration share one result.
    pub fn fingerprint(&self) -> Hash32 {
        fingerprint(&self.name, &self.meta)
    }

    /// The task models reachable from this one, with an edge from every
    /// dependency to its dependent. Identical invocations share a node.
    pub fn graph(&self) -> DiGraph<&TaskModel, Name> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        self.add_to(&mut graph, &mut nodes);
        graph
    }

    fn add_to<'a>(
        &'a self,
        graph: &mut DiGraph<&'a TaskModel, Name>,
        nodes: &mut HashMap<Hash32, NodeIndex>,
    ) -> NodeIndex {
        let key = self.fingerprint();
        if let Some(&index) = nodes.get(&key) {
            return index;
        }

        let index = graph.add_node(self);
        nodes.insert(key, index);

        for dependency in &self.dependencies {
            if let DependencySource::Task(model) = &dependency.source {
                let source = model.add_to(graph, nodes);
                graph.add_edge(source, index, dependency.placement.clone());
            }
        }

        index
    }

    /// Execution order: every model comes after the models it depends on,
    /// this one last.
    pub fn plan(&self) -> Result<Vec<&TaskModel>, WorkspaceError> {
        let graph = self.graph();
        let order = toposort(&graph, None).map_err(|cycle| {
            WorkspaceError::Cycle(graph[cycle.node_id()].name().to_string())
        })?;

        Ok(order.into_iter().map(|index| graph[index]).collect())
    }
}

pub(super) fn fingerprint(task: &str, meta: &Meta) -> Hash32 {
    Fingerprint::default()
        .str(task)
        .json(&meta.clone().into_value())
        .finish()
}

/// Collects the declared inputs of a task model.
pub struct TaskModelBuilder<'a> {
    workspace: &'a Workspace,
    name: String,
    meta: Meta,
    /// Invocations currently being modeled, outermost first.
    ancestry: Vec<(String, Hash32)>,
    dependencies: Vec<ModelDependency>,
}

impl<'a> TaskModelBuilder<'a> {
    pub(super) fn new(
        workspace: &'a Workspace,
        name: impl Into<String>,
        meta: Meta,
        ancestry: Vec<(String, Hash32)>,
    ) -> Self {
        Self {
            workspace,
            name: name.into(),
            meta,
            ancestry,
            dependencies: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn workspace(&self) -> &Workspace {
        self.workspace
    }

    /// Root data whose names match a glob pattern, mounted at the root of
    /// the input.
    pub fn data(&mut self, pattern: &str) -> Result<&mut Self, WorkspaceError> {
        Ok(self.data_from(DataFilter::pattern(pattern)?, Name::empty()))
    }

    pub fn data_from(&mut self, filter: DataFilter, placement: Name) -> &mut Self {
        self.dependencies.push(ModelDependency {
            source: DependencySource::Data(filter),
            placement,
        });
        self
    }

    /// The output of `task` run with `meta`, mounted at `placement`. The
    /// dependency is modeled right away.
    pub fn depends_on(
        &mut self,
        task: &str,
        meta: Meta,
        placement: Name,
    ) -> Result<&mut Self, WorkspaceError> {
        let mut ancestry = self.ancestry.clone();
        ancestry.push((self.name.clone(), fingerprint(&self.name, &self.meta)));

        let model = self.workspace.model_with(task, meta, ancestry)?;
        self.dependencies.push(ModelDependency {
            source: DependencySource::Task(Arc::new(model)),
            placement,
        });
        Ok(self)
    }

    pub fn finish(self) -> TaskModel {
        TaskModel {
            name: self.name,
            meta: self.meta,
            dependencies: self.dependencies,
        }
    }
}
