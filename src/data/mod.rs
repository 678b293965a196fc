//! Typed, annotated lazy data.
//!
//! Values travel through the engine type erased as [`Dynamic`], the same
//! way task outputs do in a build graph. [`Data<T>`] puts a typed facade on
//! top, backed by a runtime [`DataType`] tag that makes narrowing casts
//! checkable without computing anything.

mod builder;
mod filter;
mod tree;

use std::any::{Any, TypeId, type_name};
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::GoalError;
use crate::goal::{Dependency, Goal, GoalScope, GoalStatus, Scheduler};
use crate::meta::Meta;
use crate::name::Name;

pub use builder::DataTreeBuilder;
pub use filter::DataFilter;
pub use tree::{DataItem, DataTree, Flatten};

/// A value of any type.
pub type AnyData = dyn Any + Send + Sync;

/// Shared, type erased value.
pub type Dynamic = Arc<AnyData>;

/// Runtime type tag of a data element.
#[derive(Clone, Copy)]
pub struct DataType {
    id: TypeId,
    name: &'static str,
}

impl DataType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// The top type, every other type is assignable to it.
    pub fn any() -> Self {
        Self {
            id: TypeId::of::<AnyData>(),
            name: "any",
        }
    }

    pub fn is_any(&self) -> bool {
        self.id == TypeId::of::<AnyData>()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_assignable_to(&self, target: &DataType) -> bool {
        target.is_any() || self.id == target.id
    }
}

impl PartialEq for DataType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DataType {}

impl Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataType({})", self.name)
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Types that can be carried by [`Data`].
///
/// Implemented for every sized `Send + Sync + 'static` type and for
/// [`AnyData`], which accepts everything.
pub trait Typed: Send + Sync + 'static {
    fn declared() -> DataType;

    /// Whether a value tagged with `ty` can be viewed as `Self`.
    fn accepts(ty: &DataType) -> bool;

    fn downcast(value: Dynamic) -> Option<Arc<Self>>;
}

impl<T: Any + Send + Sync> Typed for T {
    fn declared() -> DataType {
        DataType::of::<T>()
    }

    fn accepts(ty: &DataType) -> bool {
        ty.is_assignable_to(&Self::declared())
    }

    fn downcast(value: Dynamic) -> Option<Arc<Self>> {
        value.downcast::<T>().ok()
    }
}

impl Typed for AnyData {
    fn declared() -> DataType {
        DataType::any()
    }

    fn accepts(_: &DataType) -> bool {
        true
    }

    fn downcast(value: Dynamic) -> Option<Arc<Self>> {
        Some(value)
    }
}

/// A lazily computed value with a type tag and descriptive metadata.
///
/// Cloning is cheap. All clones share one computation.
pub struct Data<T: ?Sized> {
    goal: Goal<Dynamic>,
    ty: DataType,
    meta: Arc<Meta>,
    marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized> Clone for Data<T> {
    fn clone(&self) -> Self {
        Self {
            goal: self.goal.clone(),
            ty: self.ty,
            meta: self.meta.clone(),
            marker: PhantomData,
        }
    }
}

impl<T> Data<T>
where
    T: Any + Send + Sync,
{
    /// A data element computed by `block` once all `dependencies` completed.
    pub fn new<F, Fut>(
        meta: Meta,
        dependencies: impl IntoIterator<Item = Dependency>,
        block: F,
    ) -> Self
    where
        F: FnOnce(GoalScope) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new_in(Scheduler::current(), meta, dependencies, block)
    }

    pub fn new_in<F, Fut>(
        scheduler: Scheduler,
        meta: Meta,
        dependencies: impl IntoIterator<Item = Dependency>,
        block: F,
    ) -> Self
    where
        F: FnOnce(GoalScope) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let goal = Goal::new(scheduler, dependencies, move |scope| {
            let future = block(scope);
            async move { future.await.map(|value| Arc::new(value) as Dynamic) }
        });

        Self::from_goal(goal, DataType::of::<T>(), meta)
    }

    /// An already computed data element.
    pub fn from_value(value: T, meta: Meta) -> Self {
        Self::from_goal(
            Goal::ready(Arc::new(value) as Dynamic),
            DataType::of::<T>(),
            meta,
        )
    }
}

impl<T> Data<T>
where
    T: ?Sized + Typed,
{
    pub(crate) fn from_goal(goal: Goal<Dynamic>, ty: DataType, meta: Meta) -> Self {
        Self {
            goal,
            ty,
            meta: Arc::new(meta),
            marker: PhantomData,
        }
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// The runtime type of the value, which may be narrower than `T`.
    pub fn data_type(&self) -> &DataType {
        &self.ty
    }

    pub fn goal(&self) -> &Goal<Dynamic> {
        &self.goal
    }

    pub fn dependency(&self) -> Dependency {
        self.goal.dependency()
    }

    pub fn status(&self) -> GoalStatus {
        self.goal.status()
    }

    pub fn start(&self) {
        self.goal.start();
    }

    pub fn cancel(&self, reason: impl Into<Arc<str>>) {
        self.goal.cancel(reason);
    }

    /// Computes the value if needed and returns it.
    pub async fn get(&self) -> Result<Arc<T>, GoalError> {
        let value = self.goal.get().await?;
        T::downcast(value).ok_or(GoalError::TypeMismatch {
            expected: T::declared().name(),
            found: self.ty.name(),
        })
    }

    /// Same data with different metadata.
    pub fn with_meta(&self, meta: Meta) -> Self {
        Self::from_goal(self.goal.clone(), self.ty, meta)
    }

    pub fn upcast(&self) -> Data<AnyData> {
        Data::from_goal(self.goal.clone(), self.ty, (*self.meta).clone())
    }

    /// Narrows the declared type. Returns `None` when the runtime type is
    /// not assignable to `R`.
    pub fn cast<R: ?Sized + Typed>(&self) -> Option<Data<R>> {
        R::accepts(&self.ty).then(|| Data {
            goal: self.goal.clone(),
            ty: self.ty,
            meta: self.meta.clone(),
            marker: PhantomData,
        })
    }

    pub fn named(&self, name: Name) -> NamedData<T> {
        NamedData {
            name,
            data: self.clone(),
        }
    }

    /// Lazily transforms the value. The result depends on this data only.
    pub fn pipe<R, F, Fut>(&self, meta: Meta, f: F) -> Data<R>
    where
        R: Any + Send + Sync,
        F: FnOnce(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let source = self.clone();
        Data::new_in(
            self.goal.scheduler().clone(),
            meta,
            [self.dependency()],
            move |_| async move {
                let value = source.get().await?;
                f(value).await
            },
        )
    }

    /// Lazily combines several data elements into one.
    pub fn join<R, F, Fut>(items: BTreeMap<Name, Data<T>>, meta: Meta, f: F) -> Data<R>
    where
        R: Any + Send + Sync,
        F: FnOnce(BTreeMap<Name, Arc<T>>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let dependencies: Vec<_> = items.values().map(Data::dependency).collect();
        Data::new(meta, dependencies, move |_| async move {
            let mut values = BTreeMap::new();
            for (name, data) in items {
                values.insert(name, data.get().await?);
            }
            f(values).await
        })
    }
}

impl<T: ?Sized> Debug for Data<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Data")
            .field("type", &self.ty)
            .field("status", &self.goal.status())
            .field("meta", &self.meta)
            .finish()
    }
}

/// A data element with the label it is placed under in a tree.
#[derive(Debug)]
pub struct NamedData<T: ?Sized> {
    pub name: Name,
    pub data: Data<T>,
}

impl<T: ?Sized> Clone for NamedData<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            data: self.data.clone(),
        }
    }
}
