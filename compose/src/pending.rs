//! A construction in flight, shared between the task running the producer and
//! every caller waiting on its outcome.

use crate::descriptor::Instance;
use crate::error::ResolveError;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

pub(crate) type BuildOutcome = Result<Instance, ResolveError>;

enum State {
  Building,
  Complete(BuildOutcome),
}

struct Inner {
  state: State,
  waiters: VecDeque<Waker>,
}

/// The outcome of one producer run. Awaited by reference, by any number of tasks.
pub(crate) struct PendingBuild {
  inner: Mutex<Inner>,
}

impl PendingBuild {
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Building,
        waiters: VecDeque::new(),
      }),
    }
  }

  /// Publishes the outcome and wakes every waiter. Only the first call counts.
  pub(crate) fn complete(&self, outcome: BuildOutcome) {
    let waiters = {
      let mut inner = self.inner.lock();
      if let State::Complete(_) = inner.state {
        return;
      }
      inner.state = State::Complete(outcome);
      std::mem::take(&mut inner.waiters)
    };
    for waker in waiters {
      waker.wake();
    }
  }

  #[cfg(test)]
  pub(crate) fn is_complete(&self) -> bool {
    matches!(self.inner.lock().state, State::Complete(_))
  }
}

impl Future for &PendingBuild {
  type Output = BuildOutcome;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Complete(outcome) => Poll::Ready(outcome.clone()),
      State::Building => {
        if !inner.waiters.iter().any(|w| w.will_wake(cx.waker())) {
          inner.waiters.push_back(cx.waker().clone());
        }
        Poll::Pending
      }
    }
  }
}
