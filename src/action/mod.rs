//! Lazy transformations of whole data trees.
//!
//! An action maps a [`DataTree`] plus configuration to a new tree. Invoking
//! an action never starts a computation, it only wires up new data whose
//! goals depend on the input leaves.

mod join;
mod pipe;
mod split;

use std::marker::PhantomData;

use crate::data::{DataTree, Typed};
use crate::error::TreeError;
use crate::meta::Meta;
use crate::name::Name;

pub use join::{JoinAction, JoinGroup, JoinRules};
pub use pipe::{PipeAction, PipeStep};
pub use split::{Fragment, SplitAction, SplitRules};

/// What a result function knows about the element it is computing.
#[derive(Debug, Clone)]
pub struct ActionEnv {
    pub name: Name,
    pub meta: Meta,
}

pub trait Action<T: ?Sized + Typed, R: ?Sized + Typed>: Send + Sync {
    fn invoke(&self, tree: &DataTree<T>, meta: &Meta) -> Result<DataTree<R>, TreeError>;

    /// Terminal actions can not be evaluated lazily, their results have to
    /// be computed right away.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Feeds the output of this action into `next`. Both see the same
    /// configuration.
    fn then<B>(self, next: B) -> Then<Self, B, R>
    where
        Self: Sized,
    {
        Then {
            first: self,
            second: next,
            marker: PhantomData,
        }
    }
}

/// Sequential composition of two actions over an intermediate type `I`.
pub struct Then<A, B, I: ?Sized> {
    first: A,
    second: B,
    marker: PhantomData<fn(&I)>,
}

impl<T, I, R, A, B> Action<T, R> for Then<A, B, I>
where
    T: ?Sized + Typed,
    I: ?Sized + Typed,
    R: ?Sized + Typed,
    A: Action<T, I>,
    B: Action<I, R>,
{
    fn invoke(&self, tree: &DataTree<T>, meta: &Meta) -> Result<DataTree<R>, TreeError> {
        let intermediate = self.first.invoke(tree, meta)?;
        self.second.invoke(&intermediate, meta)
    }

    fn is_terminal(&self) -> bool {
        self.first.is_terminal() || self.second.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;

    struct Eager;

    impl Action<i32, i32> for Eager {
        fn invoke(&self, tree: &DataTree<i32>, _: &Meta) -> Result<DataTree<i32>, TreeError> {
            Ok(tree.clone())
        }

        fn is_terminal(&self) -> bool {
            true
        }
    }

    fn increment() -> PipeAction<i32, i32> {
        PipeAction::<i32, i32>::new(|step| step.result(|_, value| Ok(*value + 1)))
    }

    #[test]
    fn test_then_terminality() {
        assert!(!increment().then(increment()).is_terminal());
        assert!(increment().then(Eager).is_terminal());
        assert!(Eager.then(increment()).is_terminal());
    }

    #[tokio::test]
    async fn test_then_chains() {
        let mut builder = DataTree::builder();
        builder
            .set(&Name::parse("x").unwrap(), Data::from_value(1, Meta::new()))
            .unwrap();
        let tree = builder.build();

        let action = increment().then(increment()).then(increment());
        let out = action.invoke(&tree, &Meta::new()).unwrap();
        let values = out.collect().await.unwrap();
        assert_eq!(*values[0].1, 4);
    }
}
