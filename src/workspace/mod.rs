//! Task registry, resolution and cached execution.

mod diagnostics;
mod generic;
mod task;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Instant;

use indexmap::IndexMap;
use indicatif::ProgressStyle;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::Instrument;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::context::Context;
use crate::data::{AnyData, Data, DataTree, DataTreeBuilder, DataType, Typed};
use crate::error::{TreeError, WorkspaceError};
use crate::hash::Hash32;
use crate::meta::Meta;
use crate::name::Name;

pub use diagnostics::{Diagnostics, TaskExecution};
pub use generic::{ANONYMOUS, GenericTask, TARGET_KEY, TaskBuilder};
pub use task::{DependencySource, ModelDependency, Task, TaskModel, TaskModelBuilder};

/// Engine settings of a workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Fail the whole task when one of its transformations fails, instead
    /// of leaving that part of the output out.
    pub fail_fast: bool,
}

impl WorkspaceConfig {
    pub fn from_meta(meta: &Meta) -> Result<Self, WorkspaceError> {
        Ok(serde_json::from_value(meta.clone().into_value())?)
    }
}

type Slot = Arc<OnceCell<DataTree<AnyData>>>;

static PROGRESS: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
});

/// Owns the tasks, the root data and the result cache.
///
/// A task invocation is identified by its task name and configuration.
/// The first request for an invocation runs it, every later or concurrent
/// request gets the same output tree.
pub struct Workspace {
    context: Context,
    data: DataTree<AnyData>,
    tasks: IndexMap<String, Arc<dyn Task>>,
    targets: IndexMap<String, Meta>,
    config: WorkspaceConfig,
    cache: Mutex<HashMap<Hash32, Slot>>,
    diagnostics: Mutex<Diagnostics>,
}

impl Workspace {
    pub fn builder(context: Context) -> WorkspaceBuilder {
        WorkspaceBuilder::new(context)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn data(&self) -> &DataTree<AnyData> {
        &self.data
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn task(&self, name: &str) -> Result<Arc<dyn Task>, WorkspaceError> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| WorkspaceError::UnknownTask(name.to_string()))
    }

    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn target(&self, name: &str) -> Option<&Meta> {
        self.targets.get(name)
    }

    /// A snapshot of the collected metrics.
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolves `task` with `meta` into a model, modeling every task it
    /// depends on. Nothing is executed.
    pub fn build_model(&self, task: &str, meta: Meta) -> Result<TaskModel, WorkspaceError> {
        self.model_with(task, meta, Vec::new())
    }

    fn model_with(
        &self,
        task: &str,
        meta: Meta,
        ancestry: Vec<(String, Hash32)>,
    ) -> Result<TaskModel, WorkspaceError> {
        let key = task::fingerprint(task, &meta);

        if let Some(start) = ancestry.iter().position(|(_, k)| *k == key) {
            let mut path: Vec<_> = ancestry[start..].iter().map(|(n, _)| n.as_str()).collect();
            path.push(task);
            return Err(WorkspaceError::Cycle(path.join(" -> ")));
        }

        let definition = self.task(task)?;
        let mut builder = TaskModelBuilder::new(self, task, meta, ancestry);
        definition.build(&mut builder)?;
        Ok(builder.finish())
    }

    /// Builds and executes `task` with `meta`.
    pub async fn run(&self, task: &str, meta: Meta) -> Result<DataTree<AnyData>, WorkspaceError> {
        let model = self.build_model(task, meta)?;
        self.execute(&model).await
    }

    /// Runs `task` with the configuration of a named target.
    pub async fn run_target(
        &self,
        task: &str,
        target: &str,
    ) -> Result<DataTree<AnyData>, WorkspaceError> {
        let meta = self
            .targets
            .get(target)
            .ok_or_else(|| WorkspaceError::UnknownTarget(target.to_string()))?
            .clone()
            .with(&Name::atom(TARGET_KEY)?, target);

        self.run(task, meta).await
    }

    /// Same as [`Workspace::run`], narrowing the output to `R`.
    pub async fn run_as<R: ?Sized + Typed>(
        &self,
        task: &str,
        meta: Meta,
    ) -> Result<DataTree<R>, WorkspaceError> {
        Ok(self.run(task, meta).await?.checked_cast::<R>()?)
    }

    /// Executes `model` and every model it depends on, dependencies first.
    pub async fn execute(&self, model: &TaskModel) -> Result<DataTree<AnyData>, WorkspaceError> {
        let plan = model.plan()?;

        let span = tracing::info_span!("executing_tasks", task = model.name());
        span.pb_set_length(plan.len() as u64);
        span.pb_set_style(&PROGRESS);
        span.pb_set_message("Executing tasks...");

        async {
            let mut output = DataTree::empty();
            let mut failed = HashSet::new();
            for step in plan {
                let key = step.fingerprint();
                match self.execute_one(step, &failed).await {
                    Ok(tree) => output = tree,
                    Err(err) if !self.config.fail_fast && key != model.fingerprint() => {
                        tracing::warn!(task = step.name(), error = %err, "upstream task failed");
                        failed.insert(key);
                    }
                    Err(err) => return Err(err),
                }
                tracing::Span::current().pb_inc(1);
            }
            Ok::<_, WorkspaceError>(output)
        }
        .instrument(span)
        .await
    }

    fn slot(&self, key: Hash32) -> Slot {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }

    async fn execute_one(
        &self,
        model: &TaskModel,
        failed: &HashSet<Hash32>,
    ) -> Result<DataTree<AnyData>, WorkspaceError> {
        let key = model.fingerprint();
        let slot = self.slot(key);

        let mut computed = false;
        let output = slot
            .get_or_try_init(|| {
                computed = true;
                self.compute(model, key, failed)
            })
            .await?;

        // Requests that waited on a concurrent computation count as hits too.
        if !computed {
            tracing::info!(task = model.name(), fingerprint = %key.short(), "cache hit");
            self.diagnostics
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .hit(key);
        }

        Ok(output.clone())
    }

    async fn compute(
        &self,
        model: &TaskModel,
        key: Hash32,
        failed: &HashSet<Hash32>,
    ) -> Result<DataTree<AnyData>, WorkspaceError> {
        let task = self.task(model.name())?;
        task.validate(model)?;

        let input = self.gather(model, failed)?;
        let declared = task.output_type();

        let span = tracing::info_span!("task", name = model.name(), fingerprint = %key.short());
        span.pb_set_message(&format!("Running {}", model.name()));
        let start = Instant::now();

        let output = async {
            let output = task.run(self, model, input)?;
            if !declared.is_any() {
                check_output(&output, &declared)?;
            }
            if task.is_terminal() {
                output.collect().await?;
            }
            tracing::info!(leaves = output.len(), "task finished");
            Ok::<_, WorkspaceError>(output)
        }
        .instrument(span)
        .await?;

        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(TaskExecution {
                task: model.name().to_string(),
                fingerprint: key,
                start,
                duration: start.elapsed(),
            });

        Ok(output)
    }

    /// Collects the declared inputs of `model` into one tree. Task inputs
    /// have to be executed already. Inputs of upstream tasks in `failed`
    /// are left out.
    fn gather(
        &self,
        model: &TaskModel,
        failed: &HashSet<Hash32>,
    ) -> Result<DataTree<AnyData>, WorkspaceError> {
        let mut builder = DataTree::builder();

        for dependency in model.dependencies() {
            let tree = match &dependency.source {
                DependencySource::Data(filter) => filter
                    .apply(&self.data)
                    .ok_or_else(|| WorkspaceError::MissingData(filter.source().clone()))?,
                DependencySource::Task(upstream) if failed.contains(&upstream.fingerprint()) => {
                    tracing::warn!(
                        task = model.name(),
                        input = %dependency.placement,
                        "upstream task failed, input omitted"
                    );
                    continue;
                }
                DependencySource::Task(upstream) => self
                    .slot(upstream.fingerprint())
                    .get()
                    .cloned()
                    .ok_or_else(|| WorkspaceError::MissingData(dependency.placement.clone()))?,
            };

            builder.set_node(&dependency.placement, tree);
        }

        Ok(builder.build())
    }
}

/// Every leaf of `output` has to be assignable to `declared`.
fn check_output(output: &DataTree<AnyData>, declared: &DataType) -> Result<(), TreeError> {
    for (name, data) in output.flatten() {
        if !data.data_type().is_assignable_to(declared) {
            return Err(TreeError::TypeMismatch {
                name,
                expected: declared.name(),
                found: data.data_type().name(),
            });
        }
    }
    Ok(())
}

pub struct WorkspaceBuilder {
    context: Context,
    data: DataTreeBuilder<AnyData>,
    tasks: IndexMap<String, Arc<dyn Task>>,
    targets: IndexMap<String, Meta>,
    config: WorkspaceConfig,
}

impl WorkspaceBuilder {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            data: DataTreeBuilder::new(),
            tasks: IndexMap::new(),
            targets: IndexMap::new(),
            config: WorkspaceConfig::default(),
        }
    }

    pub fn data<T: ?Sized + Typed>(mut self, name: &Name, data: Data<T>) -> Result<Self, TreeError> {
        self.data.set(name, data.upcast())?;
        Ok(self)
    }

    /// Mounts a tree in the root data. The empty name merges it.
    pub fn data_node<T: ?Sized + Typed>(mut self, name: &Name, tree: &DataTree<T>) -> Self {
        self.data.set_node(name, tree.upcast());
        self
    }

    pub fn task(mut self, task: impl Task + 'static) -> Self {
        self.tasks.insert(task.name().to_string(), Arc::new(task));
        self
    }

    pub fn target(mut self, name: impl Into<String>, meta: Meta) -> Self {
        self.targets.insert(name.into(), meta);
        self
    }

    pub fn config(mut self, config: WorkspaceConfig) -> Self {
        self.config = config;
        self
    }

    /// Tasks provided by context plugins under the `"task"` target are added
    /// unless a task with the same name was registered directly.
    pub fn build(self) -> Workspace {
        let mut tasks = self.tasks;
        for task in self.context.content::<Arc<dyn Task>>("task").into_values() {
            let task = (*task).clone();
            tasks.entry(task.name().to_string()).or_insert(task);
        }

        Workspace {
            context: self.context,
            data: self.data.build(),
            tasks,
            targets: self.targets,
            config: self.config,
            cache: Mutex::new(HashMap::new()),
            diagnostics: Mutex::new(Diagnostics::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::action::{Action, PipeAction};
    use crate::context::Plugin;
    use crate::data::Dynamic;
    use crate::goal::GoalStatus;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn meta(value: serde_json::Value) -> Meta {
        Meta::try_from(value).unwrap()
    }

    fn numbers() -> WorkspaceBuilder {
        let mut builder = Workspace::builder(Context::builder("test").build());
        for (n, v) in [("raw.a", 1), ("raw.b", 2), ("raw.c", 3)] {
            builder = builder
                .data(&name(n), Data::from_value(v, Meta::new()))
                .unwrap();
        }
        builder
    }

    async fn values(tree: &DataTree<AnyData>) -> Vec<(String, i32)> {
        tree.checked_cast::<i32>()
            .unwrap()
            .collect()
            .await
            .unwrap()
            .into_iter()
            .map(|(n, v)| (n.to_string(), *v))
            .collect()
    }

    #[tokio::test]
    async fn test_identical_invocations_share_result() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let task = TaskBuilder::new("scale")
            .pipe("raw", "scaled", move |env, value: Arc<i32>| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(*value * env.meta.int("n").unwrap_or(1) as i32)
            })
            .build()
            .unwrap();
        let workspace = numbers().task(task).build();

        let first = workspace.run("scale", meta(json!({"n": 1}))).await.unwrap();
        let second = workspace.run("scale", meta(json!({"n": 1}))).await.unwrap();
        assert_eq!(values(&first).await, values(&second).await);
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        let diagnostics = workspace.diagnostics();
        assert_eq!(diagnostics.runs_of("scale"), 1);
        assert_eq!(diagnostics.total_hits(), 1);

        let other = workspace.run("scale", meta(json!({"n": 10}))).await.unwrap();
        assert_eq!(values(&other).await[0], ("scaled.a".to_string(), 10));
        assert_eq!(workspace.diagnostics().runs_of("scale"), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_run_once() {
        let runs = Arc::new(AtomicUsize::new(0));

        struct Counting(Arc<AtomicUsize>);

        impl Task for Counting {
            fn name(&self) -> &str {
                "counting"
            }

            fn build(&self, model: &mut TaskModelBuilder<'_>) -> Result<(), WorkspaceError> {
                model.data("raw.*")?;
                Ok(())
            }

            fn run(
                &self,
                _: &Workspace,
                _: &TaskModel,
                input: DataTree<AnyData>,
            ) -> Result<DataTree<AnyData>, WorkspaceError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(input)
            }
        }

        let workspace = Arc::new(numbers().task(Counting(runs.clone())).build());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let workspace = workspace.clone();
            handles.push(tokio::spawn(async move {
                workspace.run("counting", Meta::new()).await.map(|tree| tree.len())
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 3);
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let diagnostics = workspace.diagnostics();
        assert_eq!(diagnostics.runs_of("counting"), 1);
        assert_eq!(diagnostics.total_hits(), 7);
    }

    #[tokio::test]
    async fn test_task_dependencies() {
        let double = TaskBuilder::new("double")
            .pipe("raw", "", |_, value: Arc<i32>| Ok(*value * 2))
            .build()
            .unwrap();

        let sum = TaskBuilder::new("sum")
            .model(|model| {
                model.depends_on("double", Meta::new(), name("doubled"))?;
                Ok(())
            })
            .join("doubled", "", |_, values: BTreeMap<Name, Arc<i32>>| {
                Ok(values.values().map(|v| **v).sum::<i32>())
            })
            .build()
            .unwrap();

        let workspace = numbers()
            .task(double)
            .task(sum)
            .target("report", Meta::new())
            .build();

        let model = workspace.build_model("sum", Meta::new()).unwrap();
        let plan: Vec<_> = model.plan().unwrap().iter().map(|m| m.name().to_string()).collect();
        assert_eq!(plan, ["double", "sum"]);

        let anonymous = workspace.run("sum", Meta::new()).await.unwrap();
        assert_eq!(values(&anonymous).await, [("@anonymous".to_string(), 12)]);

        let targeted = workspace.run_target("sum", "report").await.unwrap();
        assert_eq!(values(&targeted).await, [("report".to_string(), 12)]);

        let chart = workspace.diagnostics().render_mermaid(&model);
        assert!(chart.starts_with("graph LR"));
        assert!(chart.contains("doubled"));
    }

    #[tokio::test]
    async fn test_run_as_narrows() {
        let workspace = numbers()
            .data(&name("label"), Data::from_value("text".to_string(), Meta::new()))
            .unwrap()
            .task(TaskBuilder::new("everything").build().unwrap())
            .build();

        let err = workspace.run_as::<i32>("everything", Meta::new()).await.unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::Tree(TreeError::TypeMismatch { ref name, .. }) if name.to_string() == "label"
        ));

        let strings = workspace.run_as::<String>("everything", Meta::new()).await;
        assert!(strings.is_err());
    }

    #[test]
    fn test_model_validation() {
        let workspace = numbers()
            .task(TaskBuilder::new("a").build().unwrap())
            .task(TaskBuilder::new("b").build().unwrap())
            .build();

        let model = workspace.build_model("a", Meta::new()).unwrap();
        let b = workspace.task("b").unwrap();
        let err = b.validate(&model).unwrap_err();
        assert!(err.is_validation());
        assert!(matches!(err, WorkspaceError::ModelMismatch { .. }));

        assert!(matches!(
            workspace.build_model("missing", Meta::new()),
            Err(WorkspaceError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_data() {
        let task = TaskBuilder::new("reader")
            .model(|model| {
                model.data_from(
                    crate::data::DataFilter::all().from(name("absent")),
                    Name::empty(),
                );
                Ok(())
            })
            .build()
            .unwrap();
        let workspace = numbers().task(task).build();

        let err = workspace.run("reader", Meta::new()).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::MissingData(ref n) if n.to_string() == "absent"));
    }

    #[test]
    fn test_cycle_detected() {
        let a = TaskBuilder::new("a")
            .model(|model| {
                model.depends_on("b", Meta::new(), name("b"))?;
                Ok(())
            })
            .build()
            .unwrap();
        let b = TaskBuilder::new("b")
            .model(|model| {
                model.depends_on("a", Meta::new(), name("a"))?;
                Ok(())
            })
            .build()
            .unwrap();
        let workspace = numbers().task(a).task(b).build();

        match workspace.build_model("a", Meta::new()) {
            Err(WorkspaceError::Cycle(path)) => assert_eq!(path, "a -> b -> a"),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    fn strict_and_lenient() -> TaskBuilder {
        TaskBuilder::new("mixed")
            .pipe("raw", "ok", |_, value: Arc<i32>| Ok(*value))
            .transform("", "broken", |_, _, input: DataTree<String>| Ok(input.upcast()))
    }

    #[tokio::test]
    async fn test_failed_transformation_is_omitted() {
        let workspace = numbers()
            .task(strict_and_lenient().build().unwrap())
            .build();

        let output = workspace.run("mixed", Meta::new()).await.unwrap();
        let names: Vec<_> = output.flatten().map(|(n, _)| n.to_string()).collect();
        assert_eq!(names, ["ok.a", "ok.b", "ok.c"]);
    }

    #[tokio::test]
    async fn test_fail_fast() {
        let config = WorkspaceConfig::from_meta(&meta(json!({"fail_fast": true}))).unwrap();
        let workspace = numbers()
            .config(config)
            .task(strict_and_lenient().build().unwrap())
            .build();

        let err = workspace.run("mixed", Meta::new()).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Transform { ref to, .. } if to.to_string() == "broken"));
    }

    fn failing_upstream() -> WorkspaceBuilder {
        let failing = TaskBuilder::new("failing")
            .pipe("raw", "", |_, _: Arc<i32>| -> anyhow::Result<i32> { anyhow::bail!("boom") })
            .terminal()
            .build()
            .unwrap();
        let consumer = TaskBuilder::new("consumer")
            .model(|model| {
                model.depends_on("failing", Meta::new(), name("bad"))?;
                Ok(())
            })
            .pipe("raw", "ok", |_, value: Arc<i32>| Ok(*value))
            .pipe("bad", "worse", |_, value: Arc<i32>| Ok(*value))
            .build()
            .unwrap();
        numbers().task(failing).task(consumer)
    }

    #[tokio::test]
    async fn test_failed_upstream_is_omitted() {
        let workspace = failing_upstream().build();

        let output = workspace.run("consumer", Meta::new()).await.unwrap();
        let names: Vec<_> = output.flatten().map(|(n, _)| n.to_string()).collect();
        assert_eq!(names, ["ok.a", "ok.b", "ok.c"]);
        assert_eq!(workspace.diagnostics().runs_of("failing"), 0);
    }

    #[tokio::test]
    async fn test_failed_upstream_with_fail_fast() {
        let config = WorkspaceConfig { fail_fast: true };
        let workspace = failing_upstream().config(config).build();

        let err = workspace.run("consumer", Meta::new()).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Goal(_)));
    }

    #[tokio::test]
    async fn test_declared_output_type_is_checked() {
        let workspace = numbers()
            .task(TaskBuilder::new("strings").output::<String>().build().unwrap())
            .task(TaskBuilder::new("ints").output::<i32>().build().unwrap())
            .build();

        let err = workspace.run("strings", Meta::new()).await.unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::Tree(TreeError::TypeMismatch { ref name, .. }) if name.to_string() == "raw.a"
        ));

        let output = workspace.run("ints", Meta::new()).await.unwrap();
        assert_eq!(output.len(), 3);
    }

    #[tokio::test]
    async fn test_terminal_action_makes_task_terminal() {
        struct Forced(PipeAction<i32, i32>);

        impl Action<i32, i32> for Forced {
            fn invoke(&self, tree: &DataTree<i32>, meta: &Meta) -> Result<DataTree<i32>, TreeError> {
                self.0.invoke(tree, meta)
            }

            fn is_terminal(&self) -> bool {
                true
            }
        }

        let forced = Forced(PipeAction::new(|step| step.result(|_, value| Ok(*value * 3))));
        let task = TaskBuilder::new("forced").action("raw", "", forced).build().unwrap();
        assert!(task.is_terminal());

        let workspace = numbers().task(task).build();
        let output = workspace.run("forced", Meta::new()).await.unwrap();
        assert!(output.flatten().all(|(_, d)| d.status() == GoalStatus::Completed));
        assert_eq!(values(&output).await[2], ("c".to_string(), 9));
    }

    #[tokio::test]
    async fn test_no_transformations_returns_input() {
        let workspace = numbers()
            .task(TaskBuilder::new("identity").build().unwrap())
            .build();
        let output = workspace.run("identity", Meta::new()).await.unwrap();
        assert_eq!(
            values(&output).await,
            [
                ("raw.a".to_string(), 1),
                ("raw.b".to_string(), 2),
                ("raw.c".to_string(), 3),
            ]
        );
    }

    #[tokio::test]
    async fn test_terminal_task_forces_leaves() {
        let lazy = TaskBuilder::new("lazy")
            .pipe("raw", "", |_, value: Arc<i32>| Ok(*value + 1))
            .build()
            .unwrap();
        let eager = TaskBuilder::new("eager")
            .pipe("raw", "", |_, value: Arc<i32>| Ok(*value + 1))
            .terminal()
            .build()
            .unwrap();
        let failing = TaskBuilder::new("failing")
            .pipe("raw", "", |_, _: Arc<i32>| -> anyhow::Result<i32> {
                anyhow::bail!("cannot compute")
            })
            .terminal()
            .build()
            .unwrap();
        let workspace = numbers().task(lazy).task(eager).task(failing).build();

        let output = workspace.run("lazy", Meta::new()).await.unwrap();
        assert!(output.flatten().all(|(_, d)| d.status() == GoalStatus::Pending));

        let output = workspace.run("eager", Meta::new()).await.unwrap();
        assert!(output.flatten().all(|(_, d)| d.status() == GoalStatus::Completed));

        let err = workspace.run("failing", Meta::new()).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Goal(_)));
    }

    struct Library;

    impl Plugin for Library {
        fn tag(&self) -> &str {
            "library"
        }

        fn provide(&self, target: &str) -> BTreeMap<Name, Dynamic> {
            if target != "task" {
                return BTreeMap::new();
            }
            let task: Arc<dyn Task> = Arc::new(TaskBuilder::new("provided").build().unwrap());
            BTreeMap::from([(name("provided"), Arc::new(task) as Dynamic)])
        }
    }

    #[test]
    fn test_tasks_from_plugins() {
        let context = Context::builder("plugins").plugin(Library).build();
        let workspace = Workspace::builder(context).build();
        assert_eq!(workspace.tasks().collect::<Vec<_>>(), ["provided"]);
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let workspace = numbers()
            .task(TaskBuilder::new("t").build().unwrap())
            .build();
        let err = workspace.run_target("t", "nope").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::UnknownTarget(_)));
    }
}
