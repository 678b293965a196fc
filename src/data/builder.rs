use indexmap::IndexMap;

use super::{Data, DataItem, DataTree, NamedData, Typed};
use crate::error::TreeError;
use crate::name::{Name, NameToken};

enum Slot<T: ?Sized> {
    Leaf(Data<T>),
    /// A finished subtree, kept whole until something is written into it.
    Tree(DataTree<T>),
    Branch(IndexMap<NameToken, Slot<T>>),
}

impl<T: ?Sized + Typed> Slot<T> {
    /// Opens the slot for writing below it. Leaves standing in the way are
    /// replaced by an empty branch.
    fn branch(&mut self) -> &mut IndexMap<NameToken, Slot<T>> {
        match self {
            Slot::Branch(_) => {}
            Slot::Tree(tree) => {
                let items = tree
                    .items()
                    .map(|(token, item)| {
                        let slot = match item {
                            DataItem::Leaf(data) => Slot::Leaf(data.clone()),
                            DataItem::Node(tree) => Slot::Tree(tree.clone()),
                        };
                        (token.clone(), slot)
                    })
                    .collect();
                *self = Slot::Branch(items);
            }
            Slot::Leaf(_) => *self = Slot::Branch(IndexMap::new()),
        }

        match self {
            Slot::Branch(items) => items,
            _ => unreachable!("slot was just turned into a branch"),
        }
    }

    fn seal(self) -> Option<DataItem<T>> {
        match self {
            Slot::Leaf(data) => Some(DataItem::Leaf(data)),
            Slot::Tree(tree) => (!tree.items.is_empty()).then_some(DataItem::Node(tree)),
            Slot::Branch(items) => {
                let tree = seal(items);
                (!tree.items.is_empty()).then_some(DataItem::Node(tree))
            }
        }
    }
}

fn seal<T: ?Sized + Typed>(items: IndexMap<NameToken, Slot<T>>) -> DataTree<T> {
    DataTree::from_items(
        items
            .into_iter()
            .filter_map(|(token, slot)| Some((token, slot.seal()?)))
            .collect(),
    )
}

/// Incremental construction of a [`DataTree`].
///
/// Paths may be written in any order; intermediate branches are created on
/// demand and the last write to a path wins. [`DataTreeBuilder::build`]
/// consumes the builder, so a built tree can never change.
pub struct DataTreeBuilder<T: ?Sized> {
    root: IndexMap<NameToken, Slot<T>>,
}

impl<T: ?Sized + Typed> Default for DataTreeBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + Typed> DataTreeBuilder<T> {
    pub fn new() -> Self {
        Self {
            root: IndexMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Walks to the parent of the last token, opening branches on the way.
    fn parent(&mut self, init: &[NameToken]) -> &mut IndexMap<NameToken, Slot<T>> {
        let mut items = &mut self.root;
        for token in init {
            items = items
                .entry(token.clone())
                .or_insert_with(|| Slot::Branch(IndexMap::new()))
                .branch();
        }
        items
    }

    /// Places a leaf at `name`, replacing whatever was there.
    pub fn set(&mut self, name: &Name, data: Data<T>) -> Result<&mut Self, TreeError> {
        let Some((last, init)) = name.tokens().split_last() else {
            return Err(TreeError::EmptyName);
        };

        self.parent(init).insert(last.clone(), Slot::Leaf(data));
        Ok(self)
    }

    pub fn set_named(&mut self, named: NamedData<T>) -> Result<&mut Self, TreeError> {
        self.set(&named.name, named.data)
    }

    /// Mounts a whole tree at `name`, replacing whatever was there. The
    /// empty name merges the tree into the root instead.
    pub fn set_node(&mut self, name: &Name, tree: DataTree<T>) -> &mut Self {
        match name.tokens().split_last() {
            None => self.update(&tree),
            Some((last, init)) => {
                self.parent(init).insert(last.clone(), Slot::Tree(tree));
                self
            }
        }
    }

    /// Deep merge: every leaf of `tree` is written at its full name.
    pub fn update(&mut self, tree: &DataTree<T>) -> &mut Self {
        for (name, data) in tree.flatten() {
            if let Some((last, init)) = name.tokens().split_last() {
                self.parent(init).insert(last.clone(), Slot::Leaf(data.clone()));
            }
        }
        self
    }

    pub fn build(self) -> DataTree<T> {
        seal(self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Meta;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn value(v: i32) -> Data<i32> {
        Data::from_value(v, Meta::new())
    }

    async fn contents(tree: &DataTree<i32>) -> Vec<(String, i32)> {
        let mut values: Vec<_> = tree
            .collect()
            .await
            .unwrap()
            .into_iter()
            .map(|(n, v)| (n.to_string(), *v))
            .collect();
        values.sort();
        values
    }

    #[tokio::test]
    async fn test_set_named() {
        let mut builder = DataTreeBuilder::new();
        let data = value(4);
        builder.set_named(data.named(name("x.y"))).unwrap();
        builder.set_named(value(5).named(name("x.z"))).unwrap();
        assert!(matches!(
            builder.set_named(data.named(Name::empty())),
            Err(TreeError::EmptyName)
        ));

        let tree = builder.build();
        assert_eq!(
            contents(&tree).await,
            [("x.y".to_string(), 4), ("x.z".to_string(), 5)]
        );
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut builder = DataTreeBuilder::new();
        assert!(matches!(
            builder.set(&Name::empty(), value(1)),
            Err(TreeError::EmptyName)
        ));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let mut builder = DataTreeBuilder::new();
        builder.set(&name("a.b"), value(1)).unwrap();
        builder.set(&name("a.b"), value(2)).unwrap();
        builder.set(&name("a.b"), value(2)).unwrap();
        let tree = builder.build();
        assert_eq!(contents(&tree).await, [("a.b".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_order_independent() {
        let entries = [("x.y", 1), ("z", 2), ("x.w.v", 3)];

        let mut forward = DataTreeBuilder::new();
        for (n, v) in entries {
            forward.set(&name(n), value(v)).unwrap();
        }

        let mut backward = DataTreeBuilder::new();
        for (n, v) in entries.into_iter().rev() {
            backward.set(&name(n), value(v)).unwrap();
        }

        assert_eq!(
            contents(&forward.build()).await,
            contents(&backward.build()).await
        );
    }

    #[tokio::test]
    async fn test_set_node_and_update() {
        let mut inner = DataTreeBuilder::new();
        inner.set(&name("p"), value(1)).unwrap();
        inner.set(&name("q"), value(2)).unwrap();
        let inner = inner.build();

        let mut builder = DataTreeBuilder::new();
        builder.set_node(&name("sub"), inner.clone());
        builder.set(&name("sub.q"), value(20)).unwrap();
        builder.set_node(&Name::empty(), inner.clone());
        let tree = builder.build();

        assert_eq!(
            contents(&tree).await,
            [
                ("p".to_string(), 1),
                ("q".to_string(), 2),
                ("sub.p".to_string(), 1),
                ("sub.q".to_string(), 20),
            ]
        );
        // the mounted tree itself is untouched
        assert_eq!(contents(&inner).await.len(), 2);
    }

    #[test]
    fn test_mounted_tree_is_shared() {
        let mut inner = DataTreeBuilder::new();
        inner.set(&name("p"), value(1)).unwrap();
        let inner = inner.build();

        let mut builder = DataTreeBuilder::new();
        builder.set_node(&name("one"), inner.clone());
        builder.set_node(&name("two"), inner.clone());
        let tree = builder.build();

        let one = tree.node(&name("one")).unwrap();
        let two = tree.node(&name("two")).unwrap();
        assert!(std::sync::Arc::ptr_eq(&one.items, &two.items));
    }
}
