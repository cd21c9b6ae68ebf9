//! Registration records: what a component is called, which module owns it,
//! how it is produced and how it is torn down.

use crate::error::{BoxError, ResolveError};
use crate::view::ResolutionView;

use core::fmt;
use std::any::{type_name, Any};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

/// A resolved component. Typed access goes through `Arc::downcast`.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Owner assigned to descriptors registered without an explicit module.
pub const CORE_MODULE: &str = "core";

/// Instance reuse policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
  /// Built once per container, shared by every caller, disposed on shutdown.
  Singleton,
  /// Built once per scope, disposed when that scope closes.
  Scoped,
  /// Built on every resolution; the caller owns the result.
  Transient,
}

type SyncProducerFn = dyn Fn(&ResolutionView) -> Result<Instance, BoxError> + Send + Sync;
type AsyncProducerFn =
  dyn Fn(ResolutionView) -> BoxFuture<'static, Result<Instance, BoxError>> + Send + Sync;

/// How an instance is built: a plain constructor or an asynchronous factory.
#[derive(Clone)]
pub(crate) enum Producer {
  Sync(Arc<SyncProducerFn>),
  Async(Arc<AsyncProducerFn>),
}

impl Producer {
  pub(crate) fn produce(&self, view: ResolutionView) -> BoxFuture<'static, Result<Instance, BoxError>> {
    match self {
      Producer::Sync(f) => {
        let f = Arc::clone(f);
        Box::pin(async move { f(&view) })
      }
      Producer::Async(f) => f(view),
    }
  }
}

type SyncDisposerFn = dyn Fn(Instance) -> Result<(), BoxError> + Send + Sync;
type AsyncDisposerFn = dyn Fn(Instance) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync;

/// Teardown hook run once per constructed singleton or scoped instance.
#[derive(Clone)]
pub(crate) enum Disposer {
  Sync(Arc<SyncDisposerFn>),
  Async(Arc<AsyncDisposerFn>),
}

impl Disposer {
  pub(crate) fn dispose(&self, instance: Instance) -> BoxFuture<'static, Result<(), BoxError>> {
    match self {
      Disposer::Sync(f) => {
        let f = Arc::clone(f);
        Box::pin(async move { f(instance) })
      }
      Disposer::Async(f) => f(instance),
    }
  }
}

/// Downcasts a resolved instance, naming the component on mismatch.
pub(crate) fn downcast<T: Any + Send + Sync>(name: &str, instance: Instance) -> Result<Arc<T>, ResolveError> {
  instance.downcast::<T>().map_err(|_| ResolveError::TypeMismatch {
    name: name.to_owned(),
    expected: type_name::<T>(),
  })
}

async fn erase<T, Fut, E>(fut: Fut) -> Result<Instance, BoxError>
where
  T: Any + Send + Sync,
  Fut: Future<Output = Result<T, E>>,
  E: Into<BoxError>,
{
  fut
    .await
    .map(|value| Arc::new(value) as Instance)
    .map_err(Into::into)
}

async fn dispose_typed<T, F, Fut, E>(name: String, disposer: Arc<F>, instance: Instance) -> Result<(), BoxError>
where
  T: Any + Send + Sync,
  F: Fn(Arc<T>) -> Fut,
  Fut: Future<Output = Result<(), E>>,
  E: Into<BoxError>,
{
  let typed = downcast::<T>(&name, instance)?;
  disposer(typed).await.map_err(Into::into)
}

/// The registration unit: one named component.
///
/// Built with [`Descriptor::singleton`], [`Descriptor::scoped`] or
/// [`Descriptor::transient`] followed by [`DescriptorBuilder::factory`] or
/// [`DescriptorBuilder::constructor`], or with [`Descriptor::instance`] for a
/// value that already exists.
pub struct Descriptor {
  pub(crate) name: String,
  pub(crate) owner: String,
  pub(crate) lifetime: Lifetime,
  pub(crate) producer: Producer,
  pub(crate) tags: BTreeSet<String>,
  pub(crate) dependencies: BTreeSet<String>,
  pub(crate) disposer: Option<Disposer>,
  pub(crate) exported: bool,
}

/// First half of a descriptor: everything but the producer.
#[derive(Debug)]
pub struct DescriptorBuilder {
  name: String,
  lifetime: Lifetime,
}

impl Descriptor {
  pub fn singleton(name: impl Into<String>) -> DescriptorBuilder {
    DescriptorBuilder::new(name, Lifetime::Singleton)
  }

  pub fn scoped(name: impl Into<String>) -> DescriptorBuilder {
    DescriptorBuilder::new(name, Lifetime::Scoped)
  }

  pub fn transient(name: impl Into<String>) -> DescriptorBuilder {
    DescriptorBuilder::new(name, Lifetime::Transient)
  }

  /// A singleton whose value is already built.
  pub fn instance<T: Any + Send + Sync>(name: impl Into<String>, value: T) -> Descriptor {
    let value: Instance = Arc::new(value);
    DescriptorBuilder::new(name, Lifetime::Singleton)
      .with_producer(Producer::Sync(Arc::new(
        move |_: &ResolutionView| -> Result<Instance, BoxError> { Ok(Arc::clone(&value)) },
      )))
  }

  /// Lets modules other than the owner depend on this descriptor.
  pub fn exported(mut self) -> Self {
    self.exported = true;
    self
  }

  pub fn tag(mut self, tag: impl Into<String>) -> Self {
    self.tags.insert(tag.into());
    self
  }

  pub fn tags<I, S>(mut self, tags: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.tags.extend(tags.into_iter().map(Into::into));
    self
  }

  /// Declares a name this descriptor will request through its resolution view.
  /// Declarations are what the boundary check runs against at registration.
  pub fn depends_on(mut self, name: impl Into<String>) -> Self {
    self.dependencies.insert(name.into());
    self
  }

  pub fn depends_on_all<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.dependencies.extend(names.into_iter().map(Into::into));
    self
  }

  /// Owner used by [`Container::register`](crate::Container::register).
  /// `register_module` overrides it with the phase owner.
  pub fn owned_by(mut self, module: impl Into<String>) -> Self {
    self.owner = module.into();
    self
  }

  /// Runs `disposer` on the instance at teardown.
  pub fn on_dispose<T, F, E>(mut self, disposer: F) -> Self
  where
    T: Any + Send + Sync,
    F: Fn(&T) -> Result<(), E> + Send + Sync + 'static,
    E: Into<BoxError>,
  {
    let name = self.name.clone();
    self.disposer = Some(Disposer::Sync(Arc::new(
      move |instance: Instance| -> Result<(), BoxError> {
        let typed = downcast::<T>(&name, instance)?;
        disposer(&*typed).map_err(Into::into)
      },
    )));
    self
  }

  /// Runs an asynchronous `disposer` on the instance at teardown, e.g. to
  /// close a connection pool.
  pub fn on_dispose_async<T, F, Fut, E>(mut self, disposer: F) -> Self
  where
    T: Any + Send + Sync,
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    let name = self.name.clone();
    let disposer = Arc::new(disposer);
    self.disposer = Some(Disposer::Async(Arc::new(
      move |instance: Instance| -> BoxFuture<'static, Result<(), BoxError>> {
        Box::pin(dispose_typed(name.clone(), Arc::clone(&disposer), instance))
      },
    )));
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn owner(&self) -> &str {
    &self.owner
  }

  pub fn lifetime(&self) -> Lifetime {
    self.lifetime
  }

  pub fn is_exported(&self) -> bool {
    self.exported
  }

  pub fn has_disposer(&self) -> bool {
    self.disposer.is_some()
  }

  pub fn tag_set(&self) -> &BTreeSet<String> {
    &self.tags
  }

  pub fn dependencies(&self) -> &BTreeSet<String> {
    &self.dependencies
  }
}

impl fmt::Debug for Descriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Descriptor")
      .field("name", &self.name)
      .field("owner", &self.owner)
      .field("lifetime", &self.lifetime)
      .field("exported", &self.exported)
      .field("tags", &self.tags)
      .field("dependencies", &self.dependencies)
      .field("has_disposer", &self.disposer.is_some())
      .finish_non_exhaustive()
  }
}

impl DescriptorBuilder {
  fn new(name: impl Into<String>, lifetime: Lifetime) -> Self {
    Self {
      name: name.into(),
      lifetime,
    }
  }

  fn with_producer(self, producer: Producer) -> Descriptor {
    Descriptor {
      name: self.name,
      owner: CORE_MODULE.to_owned(),
      lifetime: self.lifetime,
      producer,
      tags: BTreeSet::new(),
      dependencies: BTreeSet::new(),
      disposer: None,
      exported: false,
    }
  }

  /// Produces the instance with an asynchronous factory. The factory may
  /// suspend, and may await other components through the view.
  pub fn factory<T, F, Fut, E>(self, factory: F) -> Descriptor
  where
    T: Any + Send + Sync,
    F: Fn(ResolutionView) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    self.with_producer(Producer::Async(Arc::new(
      move |view: ResolutionView| -> BoxFuture<'static, Result<Instance, BoxError>> {
        Box::pin(erase(factory(view)))
      },
    )))
  }

  /// Produces the instance synchronously. A constructor cannot await other
  /// components, but may capture lazy handles to them via
  /// [`ResolutionView::lazy`].
  pub fn constructor<T, F, E>(self, constructor: F) -> Descriptor
  where
    T: Any + Send + Sync,
    F: Fn(&ResolutionView) -> Result<T, E> + Send + Sync + 'static,
    E: Into<BoxError>,
  {
    self.with_producer(Producer::Sync(Arc::new(
      move |view: &ResolutionView| -> Result<Instance, BoxError> {
        constructor(view)
          .map(|value| Arc::new(value) as Instance)
          .map_err(Into::into)
      },
    )))
  }
}
