//! Instance caches for singleton and scoped lifetimes.
//!
//! Each cached name has its own slot. A slot is vacant, building (one producer
//! run in flight, shared through a [`PendingBuild`]) or ready. Distinct names
//! never contend on the same lock; concurrent requests for one vacant name
//! collapse into a single producer run.

use crate::descriptor::Instance;
use crate::pending::{BuildOutcome, PendingBuild};
use crate::scope::ScopeId;

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Identifies one cache slot: a name, optionally inside a scope.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct SlotKey {
  pub(crate) scope: Option<ScopeId>,
  pub(crate) name: String,
}

impl SlotKey {
  pub(crate) fn new(scope: Option<ScopeId>, name: &str) -> Self {
    Self {
      scope,
      name: name.to_owned(),
    }
  }
}

impl fmt::Display for SlotKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.scope {
      Some(scope) => write!(f, "{}@{}", self.name, scope),
      None => f.write_str(&self.name),
    }
  }
}

enum SlotState {
  Vacant,
  Building(Arc<PendingBuild>),
  Ready(Instance),
}

/// What a caller should do after looking at a slot.
pub(crate) enum Acquire {
  /// Already built.
  Ready(Instance),
  /// Someone else is building it; await the shared outcome.
  Wait(Arc<PendingBuild>),
  /// The caller won the slot and must start the producer.
  Lead(Arc<PendingBuild>),
}

#[derive(Default)]
pub(crate) struct SlotTable {
  slots: DashMap<String, Arc<Mutex<SlotState>>>,
}

impl SlotTable {
  pub(crate) fn acquire(&self, name: &str) -> Acquire {
    let slot = match self.slots.get(name) {
      Some(slot) => Arc::clone(slot.value()),
      None => Arc::clone(
        self
          .slots
          .entry(name.to_owned())
          .or_insert_with(|| Arc::new(Mutex::new(SlotState::Vacant)))
          .value(),
      ),
    };

    let mut state = slot.lock();
    match &*state {
      SlotState::Ready(instance) => Acquire::Ready(Arc::clone(instance)),
      SlotState::Building(pending) => Acquire::Wait(Arc::clone(pending)),
      SlotState::Vacant => {
        let pending = Arc::new(PendingBuild::new());
        *state = SlotState::Building(Arc::clone(&pending));
        Acquire::Lead(pending)
      }
    }
  }

  /// Settles the slot `pending` is building. A success is cached; a failure
  /// leaves the slot vacant so a later resolution may try again. Returns
  /// whether an instance was cached. A slot that was taken away mid-build
  /// (teardown), or that belongs to another build, is left alone.
  pub(crate) fn finish(&self, name: &str, pending: &Arc<PendingBuild>, outcome: &BuildOutcome) -> bool {
    let Some(slot) = self.slots.get(name).map(|s| Arc::clone(s.value())) else {
      return false;
    };
    let mut state = slot.lock();
    match &*state {
      SlotState::Building(current) if Arc::ptr_eq(current, pending) => {}
      _ => return false,
    }
    match outcome {
      Ok(instance) => {
        *state = SlotState::Ready(Arc::clone(instance));
        true
      }
      Err(_) => {
        *state = SlotState::Vacant;
        false
      }
    }
  }

  /// Removes a name's slot, handing back the instance if it had been built.
  pub(crate) fn take(&self, name: &str) -> Option<Instance> {
    let (_, slot) = self.slots.remove(name)?;
    let mut state = slot.lock();
    match std::mem::replace(&mut *state, SlotState::Vacant) {
      SlotState::Ready(instance) => Some(instance),
      _ => None,
    }
  }

  pub(crate) fn clear(&self) {
    self.slots.clear();
  }

  pub(crate) fn is_building(&self, name: &str) -> bool {
    self
      .slots
      .get(name)
      .map(|slot| matches!(*slot.lock(), SlotState::Building(_)))
      .unwrap_or(false)
  }

  pub(crate) fn is_ready(&self, name: &str) -> bool {
    self
      .slots
      .get(name)
      .map(|slot| matches!(*slot.lock(), SlotState::Ready(_)))
      .unwrap_or(false)
  }
}

/// Who is blocked on whom among in-flight constructions.
///
/// A producer that awaits another slot's in-flight build records an edge
/// `waiter -> target` for the duration of the wait. Adding an edge that would
/// close a loop is refused, turning what would be a deadlock between tasks
/// into a cycle error.
#[derive(Default)]
pub(crate) struct WaitGraph {
  edges: Mutex<HashMap<SlotKey, Vec<SlotKey>>>,
}

impl WaitGraph {
  /// On refusal, returns the cycle as `waiter -> target -> ... -> waiter`.
  pub(crate) fn enter(&self, waiter: &SlotKey, target: &SlotKey) -> Result<WaitEdge<'_>, Vec<String>> {
    let mut edges = self.edges.lock();
    if let Some(path) = find_path(&edges, target, waiter) {
      let mut cycle = Vec::with_capacity(path.len() + 1);
      cycle.push(waiter.name.clone());
      cycle.extend(path.into_iter().map(|key| key.name));
      return Err(cycle);
    }
    edges
      .entry(waiter.clone())
      .or_default()
      .push(target.clone());
    Ok(WaitEdge {
      graph: self,
      waiter: waiter.clone(),
      target: target.clone(),
    })
  }

  fn leave(&self, waiter: &SlotKey, target: &SlotKey) {
    let mut edges = self.edges.lock();
    if let Some(targets) = edges.get_mut(waiter) {
      if let Some(pos) = targets.iter().position(|t| t == target) {
        targets.swap_remove(pos);
      }
      if targets.is_empty() {
        edges.remove(waiter);
      }
    }
  }

  #[cfg(test)]
  pub(crate) fn edge_count(&self) -> usize {
    self.edges.lock().values().map(Vec::len).sum()
  }
}

/// Depth-first search for a path `from -> ... -> to`, both ends included.
fn find_path(edges: &HashMap<SlotKey, Vec<SlotKey>>, from: &SlotKey, to: &SlotKey) -> Option<Vec<SlotKey>> {
  let mut stack = vec![vec![from.clone()]];
  let mut seen = std::collections::HashSet::new();
  while let Some(path) = stack.pop() {
    let Some(last) = path.last() else { continue };
    if last == to {
      return Some(path);
    }
    if !seen.insert(last.clone()) {
      continue;
    }
    if let Some(next) = edges.get(last) {
      for target in next {
        let mut extended = path.clone();
        extended.push(target.clone());
        stack.push(extended);
      }
    }
  }
  None
}

/// Removes its edge from the graph when dropped.
pub(crate) struct WaitEdge<'a> {
  graph: &'a WaitGraph,
  waiter: SlotKey,
  target: SlotKey,
}

impl Drop for WaitEdge<'_> {
  fn drop(&mut self) {
    self.graph.leave(&self.waiter, &self.target);
  }
}
