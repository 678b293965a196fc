//! Capability registry shared by workspaces.
//!
//! A [`Context`] is an immutable, cheaply cloned bag of named capabilities
//! and [`Plugin`]s. Contexts form a chain: lookups that miss in a child are
//! retried in its parent.

use std::any::{Any, type_name};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug};
use std::sync::{Arc, LazyLock};

use crate::data::Dynamic;
use crate::error::ContextError;
use crate::goal::Scheduler;
use crate::name::{Name, NameToken};

static GLOBAL: LazyLock<Context> = LazyLock::new(|| ContextBuilder::new("global").build());

/// A provider of named content.
///
/// Content is grouped by target, for instance `"task"` for task
/// definitions. Names returned by [`Plugin::provide`] are exposed under the
/// plugin tag.
pub trait Plugin: Send + Sync {
    fn tag(&self) -> &str;

    fn provide(&self, _target: &str) -> BTreeMap<Name, Dynamic> {
        BTreeMap::new()
    }
}

struct ContextInner {
    name: String,
    parent: Option<Context>,
    capabilities: HashMap<String, Dynamic>,
    plugins: Vec<Arc<dyn Plugin>>,
    scheduler: Option<Scheduler>,
}

#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Root of every context chain.
    pub fn global() -> Context {
        GLOBAL.clone()
    }

    pub fn builder(name: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(name).parent(Context::global())
    }

    /// Starts a child context of this one.
    pub fn child(&self, name: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(name).parent(self.clone())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<&Context> {
        self.inner.parent.as_ref()
    }

    /// The scheduler configured on the closest context, or the current one.
    pub fn scheduler(&self) -> Scheduler {
        self.chain()
            .find_map(|context| context.inner.scheduler.clone())
            .unwrap_or_else(Scheduler::current)
    }

    /// This context followed by its ancestors.
    fn chain(&self) -> impl Iterator<Item = &Context> {
        std::iter::successors(Some(self), |context| context.parent())
    }

    /// Looks up a capability by tag.
    pub fn resolve<T: Any + Send + Sync>(&self, tag: &str) -> Result<Arc<T>, ContextError> {
        let value = self
            .chain()
            .find_map(|context| context.inner.capabilities.get(tag))
            .ok_or_else(|| ContextError::NotFound(tag.to_string()))?;

        value
            .clone()
            .downcast::<T>()
            .map_err(|_| ContextError::WrongType {
                tag: tag.to_string(),
                expected: type_name::<T>(),
            })
    }

    pub fn plugin(&self, tag: &str) -> Option<Arc<dyn Plugin>> {
        self.chain()
            .flat_map(|context| context.inner.plugins.iter())
            .find(|plugin| plugin.tag() == tag)
            .cloned()
    }

    /// Content of type `T` provided for `target` by every plugin in the
    /// chain, named `<plugin tag>.<name>`. Plugins closer to this context
    /// shadow their ancestors.
    pub fn content<T: Any + Send + Sync>(&self, target: &str) -> BTreeMap<Name, Arc<T>> {
        let contexts: Vec<_> = self.chain().collect();
        let mut content = BTreeMap::new();

        for context in contexts.into_iter().rev() {
            for plugin in &context.inner.plugins {
                let Ok(tag) = NameToken::new(plugin.tag()) else {
                    continue;
                };
                let prefix = Name::from(tag);

                for (name, value) in plugin.provide(target) {
                    if let Ok(value) = value.downcast::<T>() {
                        content.insert(prefix.join(&name), value);
                    }
                }
            }
        }

        content
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<_> = self.inner.plugins.iter().map(|p| p.tag()).collect();
        f.debug_struct("Context")
            .field("name", &self.inner.name)
            .field("parent", &self.parent().map(Context::name))
            .field("plugins", &tags)
            .finish()
    }
}

pub struct ContextBuilder {
    name: String,
    parent: Option<Context>,
    capabilities: HashMap<String, Dynamic>,
    plugins: Vec<Arc<dyn Plugin>>,
    scheduler: Option<Scheduler>,
}

impl ContextBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            capabilities: HashMap::new(),
            plugins: Vec::new(),
            scheduler: None,
        }
    }

    pub fn parent(mut self, parent: Context) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn capability<T: Any + Send + Sync>(mut self, tag: impl Into<String>, value: T) -> Self {
        self.capabilities.insert(tag.into(), Arc::new(value));
        self
    }

    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Context {
        Context {
            inner: Arc::new(ContextInner {
                name: self.name,
                parent: self.parent,
                capabilities: self.capabilities,
                plugins: self.plugins,
                scheduler: self.scheduler,
            }),
        }
    }
}
