//! Resolution: descriptor lookup, boundary and cycle checks, and dispatch to
//! the lifetime caches.

use crate::boundary;
use crate::container::ContainerInner;
use crate::descriptor::{Descriptor, Instance, Lifetime};
use crate::disposal::{dispose_one, panic_message, DisposalLedger};
use crate::error::{BoxError, ResolveError};
use crate::lifetime::{Acquire, SlotKey, SlotTable};
use crate::pending::PendingBuild;
use crate::scope::{ScopeId, ScopeState};
use crate::view::ResolutionView;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join_all;
use futures_util::FutureExt;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// One resolution step.
pub(crate) struct Request<'a> {
  pub(crate) name: &'a str,
  /// Scope that scoped components resolve in.
  pub(crate) scope: Option<Arc<ScopeState>>,
  /// Names under construction on the way here, outermost first.
  pub(crate) chain: &'a [String],
  /// Component whose producer is asking, for the boundary check.
  pub(crate) requester: Option<&'a Descriptor>,
  /// Slot whose construction blocks on this request.
  pub(crate) waiter: Option<&'a SlotKey>,
}

#[derive(Debug, Error)]
#[error("producer panicked: {0}")]
struct ProducerPanic(String);

/// Where a built instance is cached and recorded for teardown.
enum Cache {
  Global(Arc<ContainerInner>),
  Scoped(Arc<ScopeState>),
}

impl Cache {
  fn slots(&self) -> &SlotTable {
    match self {
      Cache::Global(inner) => &inner.singletons,
      Cache::Scoped(scope) => &scope.slots,
    }
  }

  fn ledger(&self) -> &DisposalLedger {
    match self {
      Cache::Global(inner) => &inner.ledger,
      Cache::Scoped(scope) => &scope.ledger,
    }
  }

  /// What waiters get when the cache is gone by the time their build finishes.
  fn teardown_error(&self, name: &str) -> ResolveError {
    match self {
      Cache::Global(_) => ResolveError::ShutDown,
      Cache::Scoped(scope) => ResolveError::ScopeClosed {
        scope: scope.id,
        name: name.to_owned(),
      },
    }
  }

  fn scope_id(&self) -> Option<ScopeId> {
    match self {
      Cache::Global(_) => None,
      Cache::Scoped(scope) => Some(scope.id),
    }
  }
}

impl ContainerInner {
  pub(crate) async fn resolve_root(
    self: &Arc<Self>,
    name: &str,
    scope: Option<Arc<ScopeState>>,
  ) -> Result<Instance, ResolveError> {
    self
      .resolve(Request {
        name,
        scope,
        chain: &[],
        requester: None,
        waiter: None,
      })
      .await
  }

  pub(crate) async fn resolve(self: &Arc<Self>, request: Request<'_>) -> Result<Instance, ResolveError> {
    let Request {
      name,
      scope,
      chain,
      requester,
      waiter,
    } = request;

    if self.shut_down.load(Ordering::Acquire) {
      return Err(ResolveError::ShutDown);
    }
    if let Some(scope) = &scope {
      if scope.is_closed() {
        return Err(ResolveError::ScopeClosed {
          scope: scope.id,
          name: name.to_owned(),
        });
      }
    }

    let descriptor = self
      .registry
      .get(name)
      .ok_or_else(|| ResolveError::UnknownDependency { name: name.to_owned() })?;

    if let Some(requester) = requester {
      boundary::check_access(requester, &descriptor, self.config.boundaries)?;
    }

    if let Some(start) = chain.iter().position(|n| n == name) {
      let mut cycle = chain[start..].to_vec();
      cycle.push(name.to_owned());
      debug!(cycle = ?cycle, "circular dependency");
      return Err(ResolveError::CircularDependency { cycle });
    }
    if chain.len() >= self.config.max_resolution_depth {
      let mut cycle = chain.to_vec();
      cycle.push(name.to_owned());
      debug!(depth = chain.len(), "resolution depth exceeded");
      return Err(ResolveError::CircularDependency { cycle });
    }

    let mut chain = chain.to_vec();
    chain.push(name.to_owned());

    match descriptor.lifetime {
      Lifetime::Transient => {
        trace!(name = %name, "constructing transient");
        let view = ResolutionView::new(
          Arc::downgrade(self),
          scope,
          Arc::clone(&descriptor),
          chain,
          waiter.cloned(),
        );
        produce(&descriptor, view).await
      }
      // A singleton outlives every scope, so its producer never sees one.
      Lifetime::Singleton => {
        self
          .acquire(Cache::Global(Arc::clone(self)), descriptor, None, chain, waiter)
          .await
      }
      Lifetime::Scoped => {
        let scope = scope.ok_or_else(|| ResolveError::ScopeRequired { name: name.to_owned() })?;
        self
          .acquire(
            Cache::Scoped(Arc::clone(&scope)),
            descriptor,
            Some(scope),
            chain,
            waiter,
          )
          .await
      }
    }
  }

  async fn acquire(
    self: &Arc<Self>,
    cache: Cache,
    descriptor: Arc<Descriptor>,
    view_scope: Option<Arc<ScopeState>>,
    chain: Vec<String>,
    waiter: Option<&SlotKey>,
  ) -> Result<Instance, ResolveError> {
    let key = SlotKey::new(cache.scope_id(), &descriptor.name);

    let pending = match cache.slots().acquire(&descriptor.name) {
      Acquire::Ready(instance) => {
        trace!(name = %key, "cache hit");
        return Ok(instance);
      }
      Acquire::Wait(pending) => {
        trace!(name = %key, "joining in-flight construction");
        pending
      }
      Acquire::Lead(pending) => {
        let view = ResolutionView::new(
          Arc::downgrade(self),
          view_scope,
          Arc::clone(&descriptor),
          chain,
          Some(key.clone()),
        );
        let task = build(
          cache,
          descriptor,
          view,
          Arc::clone(&pending),
          self.config.dispose_timeout,
        );
        // Spawned so the producer runs to completion even if every caller
        // stops waiting.
        match tokio::runtime::Handle::try_current() {
          Ok(handle) => {
            handle.spawn(task);
          }
          Err(_) => task.await,
        }
        pending
      }
    };

    let _edge = match waiter {
      Some(waiter) => Some(
        self
          .waits
          .enter(waiter, &key)
          .map_err(|cycle| ResolveError::CircularDependency { cycle })?,
      ),
      None => None,
    };
    (&*pending).await
  }

  pub(crate) async fn resolve_tagged(
    self: &Arc<Self>,
    tag: &str,
    scope: Option<Arc<ScopeState>>,
  ) -> Result<BTreeMap<String, Instance>, ResolveError> {
    let names = self.registry.tagged(tag);
    let resolved = try_join_all(names.iter().map(|name| self.resolve_root(name, scope.clone()))).await?;
    debug!(tag = %tag, count = names.len(), "resolved tagged components");
    Ok(names.into_iter().zip(resolved).collect())
  }
}

/// Runs the producer for a cached lifetime and settles its slot.
///
/// An instance that arrives after its cache was torn down is disposed here,
/// and its waiters get the teardown error instead of the instance.
async fn build(
  cache: Cache,
  descriptor: Arc<Descriptor>,
  view: ResolutionView,
  pending: Arc<PendingBuild>,
  dispose_timeout: Option<Duration>,
) {
  let name = descriptor.name.as_str();
  let mut guard = BuildGuard {
    cache: &cache,
    name,
    pending: &pending,
    armed: true,
  };
  debug!(name = %name, scope = ?cache.scope_id(), lifetime = ?descriptor.lifetime, "constructing");

  let outcome = produce(&descriptor, view).await;
  let cached = cache.slots().finish(name, &pending, &outcome);
  let outcome = match outcome {
    Ok(instance) if !(cached && cache.ledger().record(name)) => {
      cache.slots().take(name);
      debug!(name = %name, "built after teardown; disposing");
      if let Some(disposer) = &descriptor.disposer {
        if let Err(err) = dispose_one(disposer, instance, dispose_timeout).await {
          warn!(name = %name, error = %err, "disposer failed");
        }
      }
      Err(cache.teardown_error(name))
    }
    Err(err) => {
      debug!(name = %name, error = %err, "construction failed");
      Err(err)
    }
    ok => ok,
  };
  guard.armed = false;
  pending.complete(outcome);
}

#[derive(Debug, Error)]
#[error("construction was dropped before it finished")]
struct BuildAbandoned;

/// Frees the slot and fails the waiters if a build is dropped mid-way, which
/// happens when it runs inline in a caller that stops polling.
struct BuildGuard<'a> {
  cache: &'a Cache,
  name: &'a str,
  pending: &'a Arc<PendingBuild>,
  armed: bool,
}

impl Drop for BuildGuard<'_> {
  fn drop(&mut self) {
    if !self.armed {
      return;
    }
    let outcome = Err(ResolveError::Factory {
      name: self.name.to_owned(),
      source: Arc::new(BuildAbandoned),
    });
    self.cache.slots().finish(self.name, self.pending, &outcome);
    debug!(name = %self.name, "construction abandoned");
    self.pending.complete(outcome);
  }
}

async fn produce(descriptor: &Descriptor, view: ResolutionView) -> Result<Instance, ResolveError> {
  match AssertUnwindSafe(descriptor.producer.produce(view)).catch_unwind().await {
    Ok(Ok(instance)) => Ok(instance),
    Ok(Err(err)) => Err(factory_error(&descriptor.name, err)),
    Err(payload) => Err(ResolveError::Factory {
      name: descriptor.name.clone(),
      source: Arc::new(ProducerPanic(panic_message(&*payload))),
    }),
  }
}

/// A dependency failure raised inside a producer passes through unchanged;
/// anything else is wrapped with the failing name.
fn factory_error(name: &str, err: BoxError) -> ResolveError {
  match err.downcast::<ResolveError>() {
    Ok(dependency) => *dependency,
    Err(other) => ResolveError::Factory {
      name: name.to_owned(),
      source: Arc::from(other),
    },
  }
}
