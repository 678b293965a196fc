use std::any::Any;
use std::sync::Arc;

use super::{Action, ActionEnv};
use crate::data::{DataTree, Typed};
use crate::error::TreeError;
use crate::meta::Meta;
use crate::name::Name;

type PipeFn<T, R> = Arc<dyn Fn(&ActionEnv, Arc<T>) -> anyhow::Result<R> + Send + Sync>;

/// Per leaf configuration of a [`PipeAction`].
///
/// Starts out with the leaf name and the action configuration overlaid by
/// the leaf metadata. The rule may change both.
pub struct PipeStep<T: ?Sized, R> {
    pub name: Name,
    pub meta: Meta,
    result: Option<PipeFn<T, R>>,
}

impl<T: ?Sized, R> PipeStep<T, R> {
    /// Sets how the new value is computed. A step without a result produces
    /// no output.
    pub fn result<F>(&mut self, f: F)
    where
        F: Fn(&ActionEnv, Arc<T>) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.result = Some(Arc::new(f));
    }

    pub fn skip(&mut self) {
        self.result = None;
    }
}

/// One to one transformation of every leaf.
pub struct PipeAction<T: ?Sized, R> {
    rule: Arc<dyn Fn(&mut PipeStep<T, R>) + Send + Sync>,
}

impl<T: ?Sized, R> Clone for PipeAction<T, R> {
    fn clone(&self) -> Self {
        Self {
            rule: self.rule.clone(),
        }
    }
}

impl<T: ?Sized, R> PipeAction<T, R> {
    pub fn new<F>(rule: F) -> Self
    where
        F: Fn(&mut PipeStep<T, R>) + Send + Sync + 'static,
    {
        Self {
            rule: Arc::new(rule),
        }
    }
}

impl<T, R> Action<T, R> for PipeAction<T, R>
where
    T: ?Sized + Typed,
    R: Any + Send + Sync,
{
    fn invoke(&self, tree: &DataTree<T>, meta: &Meta) -> Result<DataTree<R>, TreeError> {
        let mut builder = DataTree::builder();

        for (name, data) in tree.flatten() {
            let mut step = PipeStep {
                name: name.clone(),
                meta: Meta::overlay([meta, data.meta()]),
                result: None,
            };

            (self.rule)(&mut step);

            let Some(result) = step.result else {
                continue;
            };

            let env = ActionEnv {
                name,
                meta: step.meta.clone(),
            };

            let output = data.pipe(step.meta, move |value| async move { result(&env, value) });
            builder.set(&step.name, output)?;
        }

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::data::{AnyData, Data};
    use crate::goal::GoalStatus;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn input() -> DataTree<i32> {
        let mut builder = DataTree::builder();
        for (n, v) in [("a", 1), ("b.c", 2), ("b.d", 3)] {
            let meta = Meta::new().with(&name("origin"), n);
            builder.set(&name(n), Data::from_value(v, meta)).unwrap();
        }
        builder.build()
    }

    #[tokio::test]
    async fn test_identity_round_trip() {
        let tree = input();
        let identity = PipeAction::<i32, i32>::new(|step| step.result(|_, value| Ok(*value)));
        let out = identity.invoke(&tree, &Meta::new()).unwrap();

        let before = tree.collect().await.unwrap();
        let after = out.collect().await.unwrap();
        assert_eq!(before.len(), after.len());
        for ((n1, v1), (n2, v2)) in before.iter().zip(after.iter()) {
            assert_eq!(n1, n2);
            assert_eq!(v1, v2);
        }
    }

    #[tokio::test]
    async fn test_invoke_is_lazy() {
        let source = Data::<i32>::new(Meta::new(), [], |_| async { Ok(5) });
        let mut builder = DataTree::builder();
        builder.set(&name("x"), source.clone()).unwrap();
        let tree = builder.build();

        let action = PipeAction::<i32, String>::new(|step| {
            step.result(|_, value| Ok(value.to_string()))
        });
        let out = action.invoke(&tree, &Meta::new()).unwrap();

        assert_eq!(source.status(), GoalStatus::Pending);
        let leaf = out.data(&name("x")).unwrap();
        assert_eq!(leaf.get().await.unwrap().as_str(), "5");
    }

    #[tokio::test]
    async fn test_rename_meta_and_skip() {
        let action = PipeAction::<AnyData, i32>::new(|step| {
            if step.name.starts_with(&"b".parse().unwrap()) {
                step.name = step.name.cut_first();
                step.meta.set(&"stage".parse().unwrap(), "piped");
                step.result(|env, value| {
                    let value = value.downcast_ref::<i32>().copied().unwrap_or_default();
                    Ok(value * env.meta.int("factor").unwrap_or(1) as i32)
                });
            }
        });

        let meta = Meta::new().with(&name("factor"), 10).with(&name("origin"), "action");
        let out = action.invoke(&input().upcast(), &meta).unwrap();

        let names: Vec<_> = out.flatten().map(|(n, _)| n.to_string()).collect();
        assert_eq!(names, ["c", "d"]);

        let leaf = out.data(&name("c")).unwrap();
        assert_eq!(leaf.meta().string("stage"), Some("piped"));
        // leaf meta takes priority over action configuration
        assert_eq!(leaf.meta().string("origin"), Some("b.c"));
        assert_eq!(leaf.meta().value("factor"), Some(&json!(10)));
        assert_eq!(*leaf.get().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_failed_leaf_stays_isolated() {
        let mut builder = DataTree::builder();
        builder.set(&name("a"), Data::from_value(1, Meta::new())).unwrap();
        builder
            .set(
                &name("b"),
                Data::<i32>::new(Meta::new(), [], |_| async { Err(anyhow::anyhow!("unreadable")) }),
            )
            .unwrap();
        builder.set(&name("c"), Data::from_value(3, Meta::new())).unwrap();
        let tree = builder.build();

        let action = PipeAction::<i32, i32>::new(|step| step.result(|_, value| Ok(*value * 10)));
        let out = action.invoke(&tree, &Meta::new()).unwrap();
        assert_eq!(out.len(), 3);

        assert_eq!(*out.data(&name("a")).unwrap().get().await.unwrap(), 10);
        assert_eq!(*out.data(&name("c")).unwrap().get().await.unwrap(), 30);

        let err = out.data(&name("b")).unwrap().get().await.unwrap_err();
        assert!(matches!(err, crate::error::GoalError::DependencyFailed(_)));
        assert_eq!(err.root_cause().to_string(), "unreadable");
    }
}
