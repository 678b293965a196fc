use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::{Action, ActionEnv};
use crate::data::{Data, DataTree, DataTreeBuilder, Typed};
use crate::error::TreeError;
use crate::meta::Meta;
use crate::name::Name;

type JoinFn<T, R> =
    Arc<dyn Fn(&ActionEnv, BTreeMap<Name, Arc<T>>) -> anyhow::Result<R> + Send + Sync>;

/// A set of leaves reduced into a single output leaf.
pub struct JoinGroup<T: ?Sized, R> {
    /// Name of the output leaf.
    pub name: Name,
    /// Override laid over the action configuration.
    pub meta: Meta,
    members: DataTree<T>,
    result: Option<JoinFn<T, R>>,
}

impl<T: ?Sized + Typed, R> JoinGroup<T, R> {
    fn new(name: Name, members: DataTree<T>) -> Self {
        Self {
            name,
            meta: Meta::new(),
            members,
            result: None,
        }
    }

    pub fn members(&self) -> &DataTree<T> {
        &self.members
    }

    pub fn result<F>(&mut self, f: F)
    where
        F: Fn(&ActionEnv, BTreeMap<Name, Arc<T>>) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.result = Some(Arc::new(f));
    }
}

/// Grouping rules of a [`JoinAction`].
///
/// Rules are evaluated in declaration order against the whole input and
/// their groups concatenated. A leaf matched by several rules takes part in
/// each of their groups.
pub struct JoinRules<T: ?Sized, R> {
    input: DataTree<T>,
    meta: Meta,
    groups: Vec<JoinGroup<T, R>>,
}

impl<T: ?Sized + Typed, R> JoinRules<T, R> {
    /// The action configuration.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// One group per distinct value of the metadata `tag`, named after the
    /// value as a single token. Leaves without the tag, or with an empty or
    /// null one, go to `default_tag`.
    pub fn by_value<F>(&mut self, tag: &str, default_tag: &str, configure: F)
    where
        F: Fn(&mut JoinGroup<T, R>),
    {
        let mut buckets: IndexMap<String, DataTreeBuilder<T>> = IndexMap::new();

        for (name, data) in self.input.flatten() {
            let key = match data.meta().value(tag) {
                Some(Value::String(text)) if !text.is_empty() => text.clone(),
                Some(Value::String(_) | Value::Null) | None => default_tag.to_string(),
                Some(other) => other.to_string(),
            };

            // names come from a built tree and are never empty
            let _ = buckets.entry(key).or_default().set(&name, data.clone());
        }

        for (key, members) in buckets {
            let Ok(name) = Name::atom(key) else {
                tracing::debug!(tag, "join group with an empty name skipped");
                continue;
            };

            let mut group = JoinGroup::new(name, members.build());
            configure(&mut group);
            self.groups.push(group);
        }
    }

    /// A single group of the leaves matching `predicate`.
    pub fn group<P, F>(&mut self, name: Name, predicate: P, configure: F)
    where
        P: Fn(&Name, &Data<T>) -> bool,
        F: FnOnce(&mut JoinGroup<T, R>),
    {
        let mut group = JoinGroup::new(name, self.input.filter(predicate));
        configure(&mut group);
        self.groups.push(group);
    }

    /// A single group of the whole input.
    pub fn result<F>(&mut self, name: Name, f: F)
    where
        F: Fn(&ActionEnv, BTreeMap<Name, Arc<T>>) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let mut group = JoinGroup::new(name, self.input.clone());
        group.result(f);
        self.groups.push(group);
    }
}

/// Many to one reduction of groups of leaves.
pub struct JoinAction<T: ?Sized, R> {
    rules: Arc<dyn Fn(&mut JoinRules<T, R>) + Send + Sync>,
}

impl<T: ?Sized, R> Clone for JoinAction<T, R> {
    fn clone(&self) -> Self {
        Self {
            rules: self.rules.clone(),
        }
    }
}

impl<T: ?Sized, R> JoinAction<T, R> {
    pub fn new<F>(rules: F) -> Self
    where
        F: Fn(&mut JoinRules<T, R>) + Send + Sync + 'static,
    {
        Self {
            rules: Arc::new(rules),
        }
    }
}

impl<T, R> Action<T, R> for JoinAction<T, R>
where
    T: ?Sized + Typed,
    R: Any + Send + Sync,
{
    fn invoke(&self, tree: &DataTree<T>, meta: &Meta) -> Result<DataTree<R>, TreeError> {
        let mut rules = JoinRules {
            input: tree.clone(),
            meta: meta.clone(),
            groups: Vec::new(),
        };
        (self.rules)(&mut rules);

        let mut builder = DataTree::builder();

        for group in rules.groups {
            let Some(result) = group.result else {
                tracing::debug!(group = %group.name, "join group without a result");
                continue;
            };

            let name = group.name;
            let meta = Meta::overlay([meta, &group.meta]);
            let members: BTreeMap<_, _> = group
                .members
                .flatten()
                .map(|(name, data)| (name, data.clone()))
                .collect();

            let env = ActionEnv {
                name: name.clone(),
                meta: meta.clone(),
            };

            let output = Data::join(members, meta, move |values| async move {
                result(&env, values)
            });
            builder.set(&name, output)?;
        }

        Ok(builder.build())
    }
}
