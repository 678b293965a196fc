use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;

use super::{Action, ActionEnv};
use crate::data::{DataTree, Typed};
use crate::error::TreeError;
use crate::meta::Meta;
use crate::name::Name;

type SplitFn<T, R> = Arc<dyn Fn(&ActionEnv, Arc<T>) -> anyhow::Result<R> + Send + Sync>;

/// One output derived from a single input leaf.
pub struct Fragment<T: ?Sized, R> {
    /// Starts as the action configuration laid over the source leaf
    /// metadata.
    pub meta: Meta,
    result: Option<SplitFn<T, R>>,
}

impl<T: ?Sized, R> Fragment<T, R> {
    pub fn result<F>(&mut self, f: F)
    where
        F: Fn(&ActionEnv, Arc<T>) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.result = Some(Arc::new(f));
    }
}

/// Fragment rules declared for one input leaf.
pub struct SplitRules<T: ?Sized, R> {
    /// Name of the source leaf.
    pub name: Name,
    /// Metadata of the source leaf.
    pub meta: Meta,
    base: Meta,
    fragments: IndexMap<String, Fragment<T, R>>,
}

impl<T: ?Sized, R> SplitRules<T, R> {
    /// Declares the fragment `name`, placed under the source leaf name.
    /// Declaring a fragment twice replaces the first declaration.
    pub fn fragment<F>(&mut self, name: &str, rule: F)
    where
        F: FnOnce(&mut Fragment<T, R>),
    {
        let mut fragment = Fragment {
            meta: self.base.clone(),
            result: None,
        };
        rule(&mut fragment);
        self.fragments.insert(name.to_string(), fragment);
    }
}

/// One to many transformation of every leaf.
pub struct SplitAction<T: ?Sized, R> {
    rules: Arc<dyn Fn(&mut SplitRules<T, R>) + Send + Sync>,
}

impl<T: ?Sized, R> Clone for SplitAction<T, R> {
    fn clone(&self) -> Self {
        Self {
            rules: self.rules.clone(),
        }
    }
}

impl<T: ?Sized, R> SplitAction<T, R> {
    pub fn new<F>(rules: F) -> Self
    where
        F: Fn(&mut SplitRules<T, R>) + Send + Sync + 'static,
    {
        Self {
            rules: Arc::new(rules),
        }
    }
}

impl<T, R> Action<T, R> for SplitAction<T, R>
where
    T: ?Sized + Typed,
    R: Any + Send + Sync,
{
    fn invoke(&self, tree: &DataTree<T>, meta: &Meta) -> Result<DataTree<R>, TreeError> {
        let mut builder = DataTree::builder();

        for (name, data) in tree.flatten() {
            let mut rules = SplitRules {
                name: name.clone(),
                meta: data.meta().clone(),
                base: Meta::overlay([data.meta(), meta]),
                fragments: IndexMap::new(),
            };
            (self.rules)(&mut rules);

            for (fragment_name, fragment) in rules.fragments {
                let Some(result) = fragment.result else {
                    continue;
                };

                let target = name.join(&Name::parse(&fragment_name)?);
                let env = ActionEnv {
                    name: target.clone(),
                    meta: fragment.meta.clone(),
                };

                let output = data.pipe(fragment.meta, move |value| async move {
                    result(&env, value)
                });
                builder.set(&target, output)?;
            }
        }

        Ok(builder.build())
    }
}
