use std::fmt::{self, Debug};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::{AnyData, Data, DataTreeBuilder, Typed};
use crate::error::{GoalError, TreeError};
use crate::name::{Name, NameToken};

/// A child of a tree node.
pub enum DataItem<T: ?Sized> {
    Leaf(Data<T>),
    Node(DataTree<T>),
}

impl<T: ?Sized> Clone for DataItem<T> {
    fn clone(&self) -> Self {
        match self {
            DataItem::Leaf(data) => DataItem::Leaf(data.clone()),
            DataItem::Node(tree) => DataItem::Node(tree.clone()),
        }
    }
}

impl<T: ?Sized> Debug for DataItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataItem::Leaf(data) => Debug::fmt(data, f),
            DataItem::Node(tree) => Debug::fmt(tree, f),
        }
    }
}

/// Ordered hierarchy of named data.
///
/// A tree is immutable once built. Branches sit behind an [`Arc`], so a
/// subtree mounted in several trees is shared rather than copied. Every leaf
/// has a runtime type assignable to `T`.
pub struct DataTree<T: ?Sized> {
    pub(super) items: Arc<IndexMap<NameToken, DataItem<T>>>,
}

impl<T: ?Sized> Clone for DataTree<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T: ?Sized> Default for DataTree<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(IndexMap::new()),
        }
    }
}

impl<T: ?Sized + Typed> DataTree<T> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> DataTreeBuilder<T> {
        DataTreeBuilder::new()
    }

    pub(super) fn from_items(items: IndexMap<NameToken, DataItem<T>>) -> Self {
        Self {
            items: Arc::new(items),
        }
    }

    /// Direct children in insertion order.
    pub fn items(&self) -> impl Iterator<Item = (&NameToken, &DataItem<T>)> {
        self.items.iter()
    }

    /// All leaves with their full names, depth first in insertion order.
    pub fn flatten(&self) -> Flatten<'_, T> {
        Flatten {
            stack: vec![(Name::empty(), self.items.iter())],
        }
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.flatten().next().is_none()
    }

    pub fn get(&self, name: &Name) -> Option<&DataItem<T>> {
        let (last, init) = name.tokens().split_last()?;

        let mut items = &self.items;
        for token in init {
            match items.get(token)? {
                DataItem::Node(tree) => items = &tree.items,
                DataItem::Leaf(_) => return None,
            }
        }

        items.get(last)
    }

    /// The leaf at `name`.
    pub fn data(&self, name: &Name) -> Option<&Data<T>> {
        match self.get(name)? {
            DataItem::Leaf(data) => Some(data),
            DataItem::Node(_) => None,
        }
    }

    /// The branch at `name`. The empty name is this tree.
    pub fn node(&self, name: &Name) -> Option<DataTree<T>> {
        if name.is_empty() {
            return Some(self.clone());
        }

        match self.get(name)? {
            DataItem::Node(tree) => Some(tree.clone()),
            DataItem::Leaf(_) => None,
        }
    }

    /// Keeps the leaves matching `predicate`. Branches left without leaves
    /// are dropped.
    pub fn filter<F>(&self, predicate: F) -> DataTree<T>
    where
        F: Fn(&Name, &Data<T>) -> bool,
    {
        self.filter_at(&Name::empty(), &predicate)
    }

    fn filter_at(&self, prefix: &Name, predicate: &dyn Fn(&Name, &Data<T>) -> bool) -> DataTree<T> {
        let mut items = IndexMap::new();

        for (token, item) in self.items.iter() {
            let name = prefix.child(token.clone());
            match item {
                DataItem::Leaf(data) => {
                    if predicate(&name, data) {
                        items.insert(token.clone(), item.clone());
                    }
                }
                DataItem::Node(tree) => {
                    let tree = tree.filter_at(&name, predicate);
                    if !tree.items.is_empty() {
                        items.insert(token.clone(), DataItem::Node(tree));
                    }
                }
            }
        }

        DataTree::from_items(items)
    }

    /// Keeps the leaves whose metadata value under `tag` equals `value`. A
    /// leaf without the tag is treated as if it had `default`.
    pub fn filter_tagged(&self, tag: &str, value: &Value, default: &Value) -> DataTree<T> {
        self.filter(|_, data| data.meta().value(tag).unwrap_or(default) == value)
    }

    /// Narrows the tree to `R`, checking every leaf up front.
    pub fn checked_cast<R: ?Sized + Typed>(&self) -> Result<DataTree<R>, TreeError> {
        self.cast_at(&Name::empty())
    }

    fn cast_at<R: ?Sized + Typed>(&self, prefix: &Name) -> Result<DataTree<R>, TreeError> {
        let mut items = IndexMap::with_capacity(self.items.len());

        for (token, item) in self.items.iter() {
            let name = prefix.child(token.clone());
            let item = match item {
                DataItem::Leaf(data) => match data.cast::<R>() {
                    Some(data) => DataItem::Leaf(data),
                    None => {
                        return Err(TreeError::TypeMismatch {
                            name,
                            expected: R::declared().name(),
                            found: data.data_type().name(),
                        });
                    }
                },
                DataItem::Node(tree) => DataItem::Node(tree.cast_at(&name)?),
            };
            items.insert(token.clone(), item);
        }

        Ok(DataTree::from_items(items))
    }

    /// Widens the tree to untyped data. Always succeeds.
    pub fn upcast(&self) -> DataTree<AnyData> {
        let items = self
            .items
            .iter()
            .map(|(token, item)| {
                let item = match item {
                    DataItem::Leaf(data) => DataItem::Leaf(data.upcast()),
                    DataItem::Node(tree) => DataItem::Node(tree.upcast()),
                };
                (token.clone(), item)
            })
            .collect();

        DataTree::from_items(items)
    }

    /// Starts every leaf, then awaits all of them in [`DataTree::flatten`]
    /// order.
    pub async fn collect(&self) -> Result<Vec<(Name, Arc<T>)>, GoalError> {
        let leaves: Vec<_> = self.flatten().map(|(name, data)| (name, data.clone())).collect();

        for (_, data) in &leaves {
            data.start();
        }

        let mut values = Vec::with_capacity(leaves.len());
        for (name, data) in leaves {
            values.push((name, data.get().await?));
        }

        Ok(values)
    }
}

impl<T: ?Sized> Debug for DataTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.items.iter().map(|(k, v)| (k.to_string(), v)))
            .finish()
    }
}

/// Depth first iterator over the leaves of a [`DataTree`].
pub struct Flatten<'a, T: ?Sized> {
    stack: Vec<(Name, indexmap::map::Iter<'a, NameToken, DataItem<T>>)>,
}

impl<'a, T: ?Sized> Iterator for Flatten<'a, T> {
    type Item = (Name, &'a Data<T>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (prefix, iter) = self.stack.last_mut()?;

            match iter.next() {
                None => {
                    self.stack.pop();
                }
                Some((token, DataItem::Leaf(data))) => {
                    return Some((prefix.child(token.clone()), data));
                }
                Some((token, DataItem::Node(tree))) => {
                    let name = prefix.child(token.clone());
                    self.stack.push((name, tree.items.iter()));
                }
            }
        }
    }
}
