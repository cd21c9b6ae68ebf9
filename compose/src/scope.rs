//! Units of work that partition scoped instances.

use crate::container::Container;
use crate::descriptor::{downcast, Instance};
use crate::disposal::DisposalLedger;
use crate::error::{DisposalError, ResolveError};
use crate::lifetime::SlotTable;

use core::fmt;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Identifier of one open (or closed) scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
  pub(crate) fn new(raw: u64) -> Self {
    Self(raw)
  }

  pub fn as_u64(&self) -> u64 {
    self.0
  }
}

impl fmt::Display for ScopeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "scope-{}", self.0)
  }
}

/// Per-scope cache and teardown order.
pub(crate) struct ScopeState {
  pub(crate) id: ScopeId,
  pub(crate) slots: SlotTable,
  pub(crate) ledger: DisposalLedger,
  closed: AtomicBool,
}

impl ScopeState {
  pub(crate) fn new(id: ScopeId) -> Self {
    Self {
      id,
      slots: SlotTable::default(),
      ledger: DisposalLedger::default(),
      closed: AtomicBool::new(false),
    }
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  /// Returns `true` only for the call that actually closed the scope.
  pub(crate) fn mark_closed(&self) -> bool {
    !self.closed.swap(true, Ordering::AcqRel)
  }
}

/// A handle to one scope, created by [`Container::open_scope`].
///
/// Handles are cheap to clone; closing through any of them closes the scope
/// for all, after which resolving through a remaining clone fails with
/// [`ResolveError::ScopeClosed`].
#[derive(Clone)]
pub struct Scope {
  pub(crate) state: Arc<ScopeState>,
  pub(crate) container: Container,
}

impl Scope {
  pub fn id(&self) -> ScopeId {
    self.state.id
  }

  pub fn is_closed(&self) -> bool {
    self.state.is_closed()
  }

  /// Resolves `name` with this scope active.
  pub async fn resolve(&self, name: &str) -> Result<Instance, ResolveError> {
    self
      .container
      .inner
      .resolve_root(name, Some(Arc::clone(&self.state)))
      .await
  }

  pub async fn resolve_as<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, ResolveError> {
    downcast(name, self.resolve(name).await?)
  }

  pub async fn resolve_tagged(&self, tag: &str) -> Result<BTreeMap<String, Instance>, ResolveError> {
    self
      .container
      .inner
      .resolve_tagged(tag, Some(Arc::clone(&self.state)))
      .await
  }

  /// Closes the scope, disposing its instances in reverse construction order.
  pub async fn close(self) -> Result<(), DisposalError> {
    let container = self.container.clone();
    container.close_scope(self).await
  }
}

impl fmt::Debug for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scope")
      .field("id", &self.state.id)
      .field("closed", &self.state.is_closed())
      .finish_non_exhaustive()
  }
}
