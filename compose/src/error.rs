//! Error taxonomy for registration, resolution, disposal and configuration.

use crate::scope::ScopeId;

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// The failure type producers and disposers return.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A producer failure shared by every caller that waited on the same construction.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors raised while committing a load phase. Both are fatal for the phase:
/// nothing from the rejected phase is visible in the registry afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
  #[error("'{name}' is already registered by module '{existing_module}'")]
  DuplicateName {
    name: String,
    existing_module: String,
  },

  #[error(
    "'{requester}' in module '{requesting_module}' depends on '{target}', which module '{target_module}' does not export"
  )]
  BoundaryViolation {
    requesting_module: String,
    requester: String,
    target_module: String,
    target: String,
  },
}

/// Errors surfaced to the immediate caller of a resolution.
///
/// `Clone` because concurrent callers waiting on one in-flight construction all
/// receive the same outcome.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
  #[error("no descriptor is registered under '{name}'")]
  UnknownDependency { name: String },

  #[error("circular dependency: {}", .cycle.join(" -> "))]
  CircularDependency { cycle: Vec<String> },

  #[error("producer for '{name}' failed: {source}")]
  Factory {
    name: String,
    #[source]
    source: SharedError,
  },

  #[error(
    "'{requester}' in module '{requesting_module}' may not access '{target}': not exported by module '{target_module}'"
  )]
  BoundaryViolation {
    requesting_module: String,
    requester: String,
    target_module: String,
    target: String,
  },

  #[error("'{name}' is scoped and can only be resolved inside a scope")]
  ScopeRequired { name: String },

  #[error("{scope} is closed; cannot resolve '{name}'")]
  ScopeClosed { scope: ScopeId, name: String },

  #[error("the container has been shut down")]
  ShutDown,

  #[error("'{name}' does not hold a value of type {expected}")]
  TypeMismatch {
    name: String,
    expected: &'static str,
  },
}

impl ResolveError {
  /// The name of the component this error is about, when there is one.
  pub fn name(&self) -> Option<&str> {
    match self {
      ResolveError::UnknownDependency { name }
      | ResolveError::Factory { name, .. }
      | ResolveError::ScopeRequired { name }
      | ResolveError::ScopeClosed { name, .. }
      | ResolveError::TypeMismatch { name, .. } => Some(name),
      ResolveError::BoundaryViolation { target, .. } => Some(target),
      ResolveError::CircularDependency { cycle } => cycle.first().map(String::as_str),
      ResolveError::ShutDown => None,
    }
  }
}

/// One disposer that failed during teardown.
#[derive(Debug, Error)]
#[error("disposer for '{name}' failed: {source}")]
pub struct DisposalFailure {
  pub name: String,
  #[source]
  pub source: BoxError,
}

/// Aggregate of every disposer failure seen during one `shutdown` or scope close.
#[derive(Debug)]
pub struct DisposalError {
  failures: Vec<DisposalFailure>,
}

impl DisposalError {
  pub(crate) fn new(failures: Vec<DisposalFailure>) -> Self {
    Self { failures }
  }

  /// Failures in the order the disposers ran.
  pub fn failures(&self) -> &[DisposalFailure] {
    &self.failures
  }

  pub fn into_failures(self) -> Vec<DisposalFailure> {
    self.failures
  }
}

impl fmt::Display for DisposalError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} disposer(s) failed:", self.failures.len())?;
    for failure in &self.failures {
      write!(f, " [{}: {}]", failure.name, failure.source)?;
    }
    Ok(())
  }
}

impl StdError for DisposalError {}

/// Errors from loading a `ContainerConfig` or a `ConfigSource`.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("configuration file not found: {0}")]
  NotFound(String),

  #[error("failed to read configuration file: {0}")]
  Read(#[from] std::io::Error),

  #[error("failed to parse configuration: {0}")]
  Parse(String),

  #[error("invalid configuration value for '{field}': {message}")]
  Invalid { field: String, message: String },
}
