use std::collections::HashMap;
use std::fmt::Write;
use std::time::{Duration, Instant};

use super::{DependencySource, TaskModel};
use crate::hash::Hash32;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub task: String,
    pub fingerprint: Hash32,
    pub start: Instant,
    pub duration: Duration,
}

/// Execution metrics collected by a workspace.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Every task execution, in the order they finished.
    pub executions: Vec<TaskExecution>,
    /// How many times a cached result was reused, per invocation.
    pub cache_hits: HashMap<Hash32, usize>,
}

impl Diagnostics {
    pub(super) fn record(&mut self, execution: TaskExecution) {
        self.executions.push(execution);
    }

    pub(super) fn hit(&mut self, fingerprint: Hash32) {
        *self.cache_hits.entry(fingerprint).or_default() += 1;
    }

    /// Number of times `task` actually ran, across all configurations.
    pub fn runs_of(&self, task: &str) -> usize {
        self.executions.iter().filter(|e| e.task == task).count()
    }

    pub fn total_hits(&self) -> usize {
        self.cache_hits.values().sum()
    }

    /// Renders the dependency graph of `model` as a Mermaid diagram.
    ///
    /// * **Green**: executed
    /// * **Blue**: reused from cache
    /// * **Grey**: not run yet
    pub fn render_mermaid(&self, model: &TaskModel) -> String {
        let mut f = String::new();
        writeln!(f, "graph LR").unwrap();

        let graph = model.graph();
        let mut reads_data = Vec::new();

        for index in graph.node_indices() {
            let node = graph[index];
            let key = node.fingerprint();
            let name = node.name().replace('"', "\\\"");

            let execution = self.executions.iter().find(|e| e.fingerprint == key);
            let (label, color) = match execution {
                Some(exec) => (format!("{:.2?}", exec.duration), "#90EE90"),
                None if self.cache_hits.contains_key(&key) => ("Cached".to_string(), "#ADD8E6"),
                None => ("Pending".to_string(), "#D3D3D3"),
            };

            writeln!(f, "    {}[\"{}\\n{}\"]", index.index(), name, label).unwrap();
            writeln!(f, "    style {} fill:{}", index.index(), color).unwrap();

            if node
                .dependencies()
                .iter()
                .any(|d| matches!(d.source, DependencySource::Data(_)))
            {
                reads_data.push(index.index());
            }
        }

        if !reads_data.is_empty() {
            writeln!(f, "    Data[(Data)]").unwrap();
            for index in reads_data {
                writeln!(f, "    Data --> {index}").unwrap();
            }
        }

        for edge in graph.edge_indices() {
            let Some((source, target)) = graph.edge_endpoints(edge) else {
                continue;
            };
            let placement = graph[edge].to_string();
            if placement.is_empty() {
                writeln!(f, "    {} --> {}", source.index(), target.index()).unwrap();
            } else {
                writeln!(
                    f,
                    "    {} -- \"{}\" --> {}",
                    source.index(),
                    placement,
                    target.index()
                )
                .unwrap();
            }
        }

        f
    }
}
