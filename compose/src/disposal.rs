//! Construction-order bookkeeping and reverse-order teardown.

use crate::descriptor::{Disposer, Instance};
use crate::error::{BoxError, DisposalError, DisposalFailure};
use crate::lifetime::SlotTable;
use crate::registry::Registry;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Names in the order their instances were first successfully built.
///
/// Draining seals the ledger: a build that completes after teardown has
/// started is refused and must dispose its own instance.
#[derive(Default)]
pub(crate) struct DisposalLedger {
  inner: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
  order: Vec<String>,
  sealed: bool,
}

impl DisposalLedger {
  /// Returns `false` once the ledger has been drained.
  pub(crate) fn record(&self, name: &str) -> bool {
    let mut inner = self.inner.lock();
    if inner.sealed {
      return false;
    }
    inner.order.push(name.to_owned());
    true
  }

  /// Seals the ledger and empties it, returning names newest first.
  pub(crate) fn drain_reverse(&self) -> Vec<String> {
    let mut inner = self.inner.lock();
    inner.sealed = true;
    let mut order = std::mem::take(&mut inner.order);
    order.reverse();
    order
  }

  pub(crate) fn snapshot(&self) -> Vec<String> {
    self.inner.lock().order.clone()
  }
}

#[derive(Debug, Error)]
enum TeardownFault {
  #[error("disposer panicked: {0}")]
  Panicked(String),
  #[error("disposer did not finish within {0:?}")]
  TimedOut(Duration),
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_owned()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_owned()
  }
}

/// Runs the disposers for `order` one at a time. Each instance is removed from
/// `slots` before its disposer runs, so no instance is disposed twice. A failing
/// disposer never stops the ones after it.
pub(crate) async fn dispose_in_order(
  registry: &Registry,
  slots: &SlotTable,
  order: Vec<String>,
  timeout: Option<Duration>,
) -> Result<usize, DisposalError> {
  let mut disposed = 0;
  let mut failures = Vec::new();

  for name in order {
    let Some(instance) = slots.take(&name) else {
      continue;
    };
    let Some(disposer) = registry.get(&name).and_then(|d| d.disposer.clone()) else {
      continue;
    };

    match dispose_one(&disposer, instance, timeout).await {
      Ok(()) => {
        debug!(name = %name, "disposed");
        disposed += 1;
      }
      Err(source) => {
        warn!(name = %name, error = %source, "disposer failed");
        failures.push(DisposalFailure { name, source });
      }
    }
  }
  slots.clear();

  if failures.is_empty() {
    Ok(disposed)
  } else {
    Err(DisposalError::new(failures))
  }
}

/// Runs one disposer, turning a panic or an overrun into an error.
pub(crate) async fn dispose_one(
  disposer: &Disposer,
  instance: Instance,
  timeout: Option<Duration>,
) -> Result<(), BoxError> {
  let run = AssertUnwindSafe(disposer.dispose(instance)).catch_unwind();
  match timeout {
    Some(limit) => match tokio::time::timeout(limit, run).await {
      Ok(result) => flatten(result),
      Err(_) => Err(Box::new(TeardownFault::TimedOut(limit))),
    },
    None => flatten(run.await),
  }
}

fn flatten(result: std::thread::Result<Result<(), BoxError>>) -> Result<(), BoxError> {
  match result {
    Ok(inner) => inner,
    Err(payload) => Err(Box::new(TeardownFault::Panicked(panic_message(&*payload)))),
  }
}
