use glob::Pattern;

use super::{DataTree, Typed};
use crate::name::Name;

/// Selects part of a tree and moves it to a new place.
///
/// The subtree at `from` is taken, its leaves are matched against the glob
/// `pattern` (by their name relative to `from`) and the result is mounted
/// at `to`.
#[derive(Debug, Clone, Default)]
pub struct DataFilter {
    from: Name,
    pattern: Option<Pattern>,
    to: Name,
}

impl DataFilter {
    /// Everything, unchanged.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn pattern(pattern: &str) -> Result<Self, glob::PatternError> {
        Ok(Self {
            pattern: Some(Pattern::new(pattern)?),
            ..Self::default()
        })
    }

    pub fn from(mut self, from: Name) -> Self {
        self.from = from;
        self
    }

    pub fn to(mut self, to: Name) -> Self {
        self.to = to;
        self
    }

    pub fn source(&self) -> &Name {
        &self.from
    }

    pub fn target(&self) -> &Name {
        &self.to
    }

    pub fn matches(&self, name: &Name) -> bool {
        self.pattern
            .as_ref()
            .is_none_or(|pattern| pattern.matches(&name.to_string()))
    }

    /// Returns `None` when `tree` has no branch at `from`.
    pub fn apply<T: ?Sized + Typed>(&self, tree: &DataTree<T>) -> Option<DataTree<T>> {
        let source = tree.node(&self.from)?;

        let selected = match self.pattern {
            Some(_) => source.filter(|name, _| self.matches(name)),
            None => source,
        };

        if self.to.is_empty() {
            return Some(selected);
        }

        let mut builder = DataTree::builder();
        builder.set_node(&self.to, selected);
        Some(builder.build())
    }
}
