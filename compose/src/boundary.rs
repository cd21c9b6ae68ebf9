//! Module boundary rules.
//!
//! A descriptor may depend on a descriptor owned by another module only if
//! that target is exported. At registration the rule is checked against
//! declared dependencies, in both directions: new descriptors against
//! what is already registered, and already-registered declarations against
//! the names the new phase introduces. At resolution the rule is checked
//! again for every access made through a resolution view.

use crate::config::BoundaryMode;
use crate::descriptor::Descriptor;
use crate::error::{RegistrationError, ResolveError};

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

fn crosses_boundary(requester: &Descriptor, target: &Descriptor) -> bool {
  requester.owner != target.owner && !target.exported
}

fn violation(requester: &Descriptor, target: &Descriptor) -> RegistrationError {
  RegistrationError::BoundaryViolation {
    requesting_module: requester.owner.clone(),
    requester: requester.name.clone(),
    target_module: target.owner.clone(),
    target: target.name.clone(),
  }
}

/// Validates one load phase before any of it is committed.
pub(crate) fn validate_phase(
  registered: &DashMap<String, Arc<Descriptor>>,
  phase: &[Descriptor],
  mode: BoundaryMode,
) -> Result<(), RegistrationError> {
  if mode == BoundaryMode::Off {
    return Ok(());
  }

  let incoming: HashMap<&str, &Descriptor> = phase.iter().map(|d| (d.name.as_str(), d)).collect();
  let mut violations = Vec::new();

  for requester in phase {
    for dependency in &requester.dependencies {
      if let Some(target) = incoming.get(dependency.as_str()) {
        if crosses_boundary(requester, target) {
          violations.push(violation(requester, target));
        }
      } else if let Some(target) = registered.get(dependency) {
        if crosses_boundary(requester, target.value()) {
          violations.push(violation(requester, target.value()));
        }
      }
    }
  }

  for entry in registered.iter() {
    let requester = entry.value();
    for dependency in &requester.dependencies {
      if let Some(target) = incoming.get(dependency.as_str()) {
        if crosses_boundary(requester, target) {
          violations.push(violation(requester, target));
        }
      }
    }
  }

  report(violations, mode)
}

fn report(violations: Vec<RegistrationError>, mode: BoundaryMode) -> Result<(), RegistrationError> {
  let mut violations = violations.into_iter();
  match mode {
    BoundaryMode::Enforce => match violations.next() {
      Some(first) => Err(first),
      None => Ok(()),
    },
    _ => {
      for v in violations {
        warn!(violation = %v, "module boundary crossed");
      }
      Ok(())
    }
  }
}

/// Checks one access made through a resolution view.
pub(crate) fn check_access(requester: &Descriptor, target: &Descriptor, mode: BoundaryMode) -> Result<(), ResolveError> {
  if mode == BoundaryMode::Off || !crosses_boundary(requester, target) {
    return Ok(());
  }
  let err = ResolveError::BoundaryViolation {
    requesting_module: requester.owner.clone(),
    requester: requester.name.clone(),
    target_module: target.owner.clone(),
    target: target.name.clone(),
  };
  if mode == BoundaryMode::Warn {
    warn!(violation = %err, "module boundary crossed at resolution");
    return Ok(());
  }
  Err(err)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::BoxError;

  fn owned(name: &str, owner: &str) -> Descriptor {
    Descriptor::singleton(name)
      .constructor(|_| Ok::<_, BoxError>(()))
      .owned_by(owner)
  }

  fn registered(descriptors: Vec<Descriptor>) -> DashMap<String, Arc<Descriptor>> {
    descriptors
      .into_iter()
      .map(|d| (d.name.clone(), Arc::new(d)))
      .collect()
  }

  #[test]
  fn private_target_in_other_module_is_rejected() {
    let existing = registered(vec![owned("users.repo", "users")]);
    let phase = vec![owned("orders.service", "orders").depends_on("users.repo")];

    let err = validate_phase(&existing, &phase, BoundaryMode::Enforce).unwrap_err();
    assert_eq!(
      err,
      RegistrationError::BoundaryViolation {
        requesting_module: "orders".into(),
        requester: "orders.service".into(),
        target_module: "users".into(),
        target: "users.repo".into(),
      }
    );
  }

  #[test]
  fn exported_or_same_module_targets_pass() {
    let existing = registered(vec![
      owned("users.repo", "users").exported(),
      owned("orders.db", "orders"),
    ]);
    let phase = vec![owned("orders.service", "orders").depends_on_all(["users.repo", "orders.db"])];

    assert!(validate_phase(&existing, &phase, BoundaryMode::Enforce).is_ok());
  }

  #[test]
  fn earlier_declarations_are_checked_against_new_names() {
    let existing = registered(vec![owned("orders.service", "orders").depends_on("users.repo")]);
    let phase = vec![owned("users.repo", "users")];

    assert!(validate_phase(&existing, &phase, BoundaryMode::Enforce).is_err());
    assert!(validate_phase(&existing, &phase, BoundaryMode::Warn).is_ok());
    assert!(validate_phase(&existing, &phase, BoundaryMode::Off).is_ok());
  }

  #[test]
  fn access_check_respects_mode() {
    let requester = owned("orders.service", "orders");
    let target = owned("users.repo", "users");

    assert!(matches!(
      check_access(&requester, &target, BoundaryMode::Enforce),
      Err(ResolveError::BoundaryViolation { .. })
    ));
    assert!(check_access(&requester, &target, BoundaryMode::Warn).is_ok());
    assert!(check_access(&requester, &owned("orders.db", "orders"), BoundaryMode::Enforce).is_ok());
  }
}
