//! The descriptor table, filled in load phases.

use crate::boundary;
use crate::config::BoundaryMode;
use crate::descriptor::Descriptor;
use crate::error::RegistrationError;
use crate::tags::TagIndex;

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error};

/// Global name -> descriptor table.
///
/// Phases commit one at a time (serialized by `phase_lock`) and are validated
/// in full before the first insert, so a rejected phase leaves no trace.
/// Readers never take the phase lock.
#[derive(Default)]
pub(crate) struct Registry {
  descriptors: DashMap<String, Arc<Descriptor>>,
  tags: TagIndex,
  phase_lock: Mutex<()>,
}

impl Registry {
  pub(crate) fn get(&self, name: &str) -> Option<Arc<Descriptor>> {
    self.descriptors.get(name).map(|d| Arc::clone(d.value()))
  }

  pub(crate) fn contains(&self, name: &str) -> bool {
    self.descriptors.contains_key(name)
  }

  pub(crate) fn len(&self) -> usize {
    self.descriptors.len()
  }

  pub(crate) fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.descriptors.iter().map(|e| e.key().clone()).collect();
    names.sort();
    names
  }

  pub(crate) fn tagged(&self, tag: &str) -> Vec<String> {
    self.tags.names(tag)
  }

  /// Stamps `owner` on every descriptor, validates the phase and commits it.
  pub(crate) fn commit_phase(
    &self,
    owner: &str,
    mut phase: Vec<Descriptor>,
    mode: BoundaryMode,
  ) -> Result<(), RegistrationError> {
    let _phase = self.phase_lock.lock();

    for descriptor in &mut phase {
      descriptor.owner = owner.to_owned();
    }

    let result = self
      .check_duplicates(owner, &phase)
      .and_then(|()| boundary::validate_phase(&self.descriptors, &phase, mode));
    if let Err(err) = result {
      error!(module = owner, error = %err, "load phase rejected");
      return Err(err);
    }

    let count = phase.len();
    for descriptor in phase {
      self.tags.insert(&descriptor.name, &descriptor.tags);
      self
        .descriptors
        .insert(descriptor.name.clone(), Arc::new(descriptor));
    }
    debug!(module = owner, descriptors = count, "load phase committed");
    Ok(())
  }

  fn check_duplicates(&self, owner: &str, phase: &[Descriptor]) -> Result<(), RegistrationError> {
    let mut seen = HashSet::with_capacity(phase.len());
    for descriptor in phase {
      if let Some(existing) = self.descriptors.get(&descriptor.name) {
        return Err(RegistrationError::DuplicateName {
          name: descriptor.name.clone(),
          existing_module: existing.owner.clone(),
        });
      }
      if !seen.insert(descriptor.name.as_str()) {
        return Err(RegistrationError::DuplicateName {
          name: descriptor.name.clone(),
          existing_module: owner.to_owned(),
        });
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::BoxError;

  fn unit(name: &str) -> Descriptor {
    Descriptor::singleton(name).constructor(|_| Ok::<_, BoxError>(()))
  }

  #[test]
  fn duplicate_within_phase_rejects_whole_phase() {
    let registry = Registry::default();
    let err = registry
      .commit_phase("core", vec![unit("a"), unit("b"), unit("a")], BoundaryMode::Enforce)
      .unwrap_err();

    assert!(matches!(err, RegistrationError::DuplicateName { ref name, .. } if name == "a"));
    assert_eq!(registry.len(), 0);
  }

  #[test]
  fn duplicate_across_phases_names_existing_owner() {
    let registry = Registry::default();
    registry
      .commit_phase("core", vec![unit("config")], BoundaryMode::Enforce)
      .unwrap();
    let err = registry
      .commit_phase("users", vec![unit("users.repo"), unit("config")], BoundaryMode::Enforce)
      .unwrap_err();

    assert_eq!(
      err,
      RegistrationError::DuplicateName {
        name: "config".into(),
        existing_module: "core".into(),
      }
    );
    assert!(!registry.contains("users.repo"));
  }

  #[test]
  fn owner_is_stamped_and_tags_indexed() {
    let registry = Registry::default();
    registry
      .commit_phase(
        "users",
        vec![unit("users.list").owned_by("ignored").tag("endpoint")],
        BoundaryMode::Enforce,
      )
      .unwrap();

    assert_eq!(registry.get("users.list").unwrap().owner(), "users");
    assert_eq!(registry.tagged("endpoint"), vec!["users.list"]);
    assert_eq!(registry.names(), vec!["users.list"]);
  }
}
