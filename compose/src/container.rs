//! The main `Container` value and its public API.

use crate::config::ContainerConfig;
use crate::descriptor::{downcast, Descriptor, Instance};
use crate::disposal::{dispose_in_order, DisposalLedger};
use crate::error::{DisposalError, RegistrationError, ResolveError};
use crate::lifetime::{SlotTable, WaitGraph};
use crate::registry::Registry;
use crate::scope::{Scope, ScopeId, ScopeState};

use core::fmt;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

pub(crate) struct ContainerInner {
  pub(crate) registry: Registry,
  pub(crate) singletons: SlotTable,
  pub(crate) ledger: DisposalLedger,
  pub(crate) waits: WaitGraph,
  pub(crate) config: ContainerConfig,
  pub(crate) shut_down: AtomicBool,
  next_scope: AtomicU64,
}

/// The dependency composition container.
///
/// An explicit value: create one at startup, hand it to every module's
/// registration routine and to the transport layer. Clones share the same
/// registry and caches.
#[derive(Clone)]
pub struct Container {
  pub(crate) inner: Arc<ContainerInner>,
}

impl Default for Container {
  fn default() -> Self {
    Self::with_config(ContainerConfig::default())
  }
}

impl Container {
  /// Creates an empty container with default settings.
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_config(config: ContainerConfig) -> Self {
    Self {
      inner: Arc::new(ContainerInner {
        registry: Registry::default(),
        singletons: SlotTable::default(),
        ledger: DisposalLedger::default(),
        waits: WaitGraph::default(),
        config,
        shut_down: AtomicBool::new(false),
        next_scope: AtomicU64::new(0),
      }),
    }
  }

  pub fn config(&self) -> &ContainerConfig {
    &self.inner.config
  }

  // --- Registration ---

  /// Registers a single descriptor under its own [`owner`](Descriptor::owned_by).
  pub fn register(&self, descriptor: Descriptor) -> Result<(), RegistrationError> {
    let owner = descriptor.owner.clone();
    self.register_module(&owner, vec![descriptor])
  }

  /// Commits one load phase for module `owner`. The phase is all-or-nothing:
  /// on a duplicate name or a boundary violation nothing from it is registered.
  pub fn register_module<I>(&self, owner: &str, descriptors: I) -> Result<(), RegistrationError>
  where
    I: IntoIterator<Item = Descriptor>,
  {
    self
      .inner
      .registry
      .commit_phase(owner, descriptors.into_iter().collect(), self.inner.config.boundaries)
  }

  // --- Resolution ---

  /// Resolves `name` outside any scope.
  pub async fn resolve(&self, name: &str) -> Result<Instance, ResolveError> {
    self.inner.resolve_root(name, None).await
  }

  pub async fn resolve_as<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, ResolveError> {
    downcast(name, self.resolve(name).await?)
  }

  /// Resolves every descriptor carrying `tag`, keyed by name.
  ///
  /// Meant to be called once, after all load phases, by collaborators that
  /// discover components in bulk (e.g. mounting every `"endpoint"`).
  pub async fn resolve_tagged(&self, tag: &str) -> Result<BTreeMap<String, Instance>, ResolveError> {
    self.inner.resolve_tagged(tag, None).await
  }

  // --- Scopes ---

  pub fn open_scope(&self) -> Scope {
    let id = ScopeId::new(self.inner.next_scope.fetch_add(1, Ordering::Relaxed) + 1);
    debug!(scope = %id, "scope opened");
    Scope {
      state: Arc::new(ScopeState::new(id)),
      container: self.clone(),
    }
  }

  /// Closes `scope`, disposing its instances newest first. Closing an already
  /// closed scope succeeds without doing anything.
  pub async fn close_scope(&self, scope: Scope) -> Result<(), DisposalError> {
    let state = &scope.state;
    if !state.mark_closed() {
      return Ok(());
    }
    let order = state.ledger.drain_reverse();
    let result = dispose_in_order(
      &self.inner.registry,
      &state.slots,
      order,
      self.inner.config.dispose_timeout,
    )
    .await;
    match &result {
      Ok(disposed) => debug!(scope = %state.id, disposed, "scope closed"),
      Err(err) => warn!(scope = %state.id, failures = err.failures().len(), "scope closed with disposal failures"),
    }
    result.map(|_| ())
  }

  // --- Teardown ---

  /// Disposes every constructed singleton in reverse construction order.
  ///
  /// Every disposer runs even if an earlier one fails; failures are returned
  /// together. Afterwards the container refuses to resolve. A second call
  /// succeeds without doing anything.
  pub async fn shutdown(&self) -> Result<(), DisposalError> {
    if self.inner.shut_down.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    let order = self.inner.ledger.drain_reverse();
    info!(constructed = order.len(), "shutting down container");
    let result = dispose_in_order(
      &self.inner.registry,
      &self.inner.singletons,
      order,
      self.inner.config.dispose_timeout,
    )
    .await;
    match &result {
      Ok(disposed) => info!(disposed, "container shut down"),
      Err(err) => warn!(failures = err.failures().len(), "container shut down with disposal failures"),
    }
    result.map(|_| ())
  }

  pub fn is_shut_down(&self) -> bool {
    self.inner.shut_down.load(Ordering::Acquire)
  }

  // --- Introspection ---

  pub fn is_registered(&self, name: &str) -> bool {
    self.inner.registry.contains(name)
  }

  /// Whether the singleton `name` has been built and is cached.
  pub fn is_constructed(&self, name: &str) -> bool {
    self.inner.singletons.is_ready(name)
  }

  /// All registered names, sorted.
  pub fn names(&self) -> Vec<String> {
    self.inner.registry.names()
  }

  /// Names carrying `tag`, sorted, without resolving anything.
  pub fn tagged_names(&self, tag: &str) -> Vec<String> {
    self.inner.registry.tagged(tag)
  }

  /// Tags carried by `name`, sorted, or `None` if it is not registered.
  pub fn tags_of(&self, name: &str) -> Option<Vec<String>> {
    self
      .inner
      .registry
      .get(name)
      .map(|descriptor| descriptor.tags.iter().cloned().collect())
  }

  /// Singletons in the order they were first built.
  pub fn construction_order(&self) -> Vec<String> {
    self.inner.ledger.snapshot()
  }
}

impl fmt::Debug for Container {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Container")
      .field("registered", &self.inner.registry.len())
      .field("config", &self.inner.config)
      .field("shut_down", &self.is_shut_down())
      .finish_non_exhaustive()
  }
}
