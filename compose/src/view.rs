//! The dependency-lookup handle given to producers.
//!
//! A view never resolves anything up front. [`ResolutionView::get`] resolves
//! on demand and continues the caller's resolution chain, so an eager
//! re-entry is reported as a cycle. [`ResolutionView::lazy`] returns a handle
//! that resolves only when first dereferenced, after construction has
//! finished, which is what lets two components refer to each other.

use crate::container::ContainerInner;
use crate::descriptor::{downcast, Descriptor, Instance};
use crate::error::ResolveError;
use crate::lifetime::SlotKey;
use crate::resolver::Request;
use crate::scope::{ScopeId, ScopeState};

use core::fmt;
use std::any::Any;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;

/// Handed to a producer while its component is under construction.
///
/// Holds the container weakly: a component that keeps its view (or a
/// [`LazyRef`]) does not keep the container alive.
#[derive(Clone)]
pub struct ResolutionView {
  container: Weak<ContainerInner>,
  scope: Option<Arc<ScopeState>>,
  requester: Arc<Descriptor>,
  chain: Arc<[String]>,
  building: Option<SlotKey>,
}

impl ResolutionView {
  pub(crate) fn new(
    container: Weak<ContainerInner>,
    scope: Option<Arc<ScopeState>>,
    requester: Arc<Descriptor>,
    chain: Vec<String>,
    building: Option<SlotKey>,
  ) -> Self {
    Self {
      container,
      scope,
      requester,
      chain: chain.into(),
      building,
    }
  }

  /// Name of the component being built.
  pub fn name(&self) -> &str {
    &self.requester.name
  }

  /// Module that owns the component being built.
  pub fn module(&self) -> &str {
    &self.requester.owner
  }

  /// The scope this view resolves scoped components in, if any.
  pub fn scope(&self) -> Option<ScopeId> {
    self.scope.as_ref().map(|s| s.id)
  }

  /// Names under construction in this resolution chain, outermost first.
  pub fn chain(&self) -> &[String] {
    &self.chain
  }

  /// Resolves `name` now, as part of this component's construction.
  pub async fn get(&self, name: &str) -> Result<Instance, ResolveError> {
    let inner = self.container.upgrade().ok_or(ResolveError::ShutDown)?;
    inner
      .resolve(Request {
        name,
        scope: self.scope.clone(),
        chain: &self.chain[..],
        requester: Some(&*self.requester),
        waiter: self.building.as_ref(),
      })
      .await
  }

  pub async fn get_as<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, ResolveError> {
    downcast(name, self.get(name).await?)
  }

  /// A handle to `name` that resolves on first use.
  pub fn lazy(&self, name: impl Into<String>) -> LazyRef {
    LazyRef {
      target: name.into(),
      container: self.container.clone(),
      scope: self.scope.clone(),
      requester: Arc::clone(&self.requester),
      waiter: self.building.clone(),
      cell: Arc::new(OnceCell::new()),
    }
  }
}

impl fmt::Debug for ResolutionView {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResolutionView")
      .field("name", &self.requester.name)
      .field("module", &self.requester.owner)
      .field("scope", &self.scope())
      .field("chain", &self.chain)
      .finish()
  }
}

/// A lazily-bound reference to another component.
///
/// Resolves on the first [`get`](LazyRef::get) and memoizes the instance;
/// clones share the memoized value. The boundary rules of the component that
/// created the handle still apply.
#[derive(Clone)]
pub struct LazyRef {
  target: String,
  container: Weak<ContainerInner>,
  scope: Option<Arc<ScopeState>>,
  requester: Arc<Descriptor>,
  // Slot of the creator. Only consulted while that slot is still building, so
  // a dereference during construction that would deadlock is reported as a
  // cycle instead.
  waiter: Option<SlotKey>,
  cell: Arc<OnceCell<Instance>>,
}

impl LazyRef {
  pub fn name(&self) -> &str {
    &self.target
  }

  pub fn is_resolved(&self) -> bool {
    self.cell.get().is_some()
  }

  pub async fn get(&self) -> Result<Instance, ResolveError> {
    if let Some(instance) = self.cell.get() {
      return Ok(Arc::clone(instance));
    }
    let inner = self.container.upgrade().ok_or(ResolveError::ShutDown)?;
    let waiter = self
      .waiter
      .as_ref()
      .filter(|key| self.creator_building(&inner, key));
    let instance = inner
      .resolve(Request {
        name: &self.target,
        scope: self.scope.clone(),
        chain: &[],
        requester: Some(&*self.requester),
        waiter,
      })
      .await?;
    Ok(Arc::clone(self.cell.get_or_init(|| instance)))
  }

  pub async fn get_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ResolveError> {
    downcast(&self.target, self.get().await?)
  }

  fn creator_building(&self, inner: &ContainerInner, key: &SlotKey) -> bool {
    match (&self.scope, key.scope) {
      (Some(scope), Some(id)) if scope.id == id => scope.slots.is_building(&key.name),
      (_, None) => inner.singletons.is_building(&key.name),
      _ => false,
    }
  }
}

impl fmt::Debug for LazyRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LazyRef")
      .field("target", &self.target)
      .field("resolved", &self.is_resolved())
      .finish_non_exhaustive()
  }
}
