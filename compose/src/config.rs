// src/config.rs
// Container settings and the configuration-loader descriptor.

use crate::descriptor::Descriptor;
use crate::error::{BoxError, ConfigError};

use std::env;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

const CONFIG_BASE_NAME: &str = "fibre_compose";
const ENVIRONMENT_VAR: &str = "FIBRE_ENV";

/// How module boundaries are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryMode {
  /// Violations fail registration and resolution.
  #[default]
  Enforce,
  /// Violations are logged and allowed.
  Warn,
  /// No checks.
  Off,
}

// --- Raw, as written in the file ---

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
struct ContainerConfigRaw {
  #[serde(default)]
  boundaries: BoundaryMode,
  /// e.g. "5s", "250ms".
  #[serde(default)]
  dispose_timeout: Option<String>,
  #[serde(default = "default_max_resolution_depth")]
  max_resolution_depth: usize,
}

fn default_max_resolution_depth() -> usize {
  64
}

// --- Processed ---

/// Validated container settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
  pub boundaries: BoundaryMode,
  /// Upper bound on each disposer's run time. A timeout counts as a failure.
  pub dispose_timeout: Option<Duration>,
  /// Longest dependency chain a single resolution may follow.
  pub max_resolution_depth: usize,
}

impl Default for ContainerConfig {
  fn default() -> Self {
    Self {
      boundaries: BoundaryMode::Enforce,
      dispose_timeout: None,
      max_resolution_depth: default_max_resolution_depth(),
    }
  }
}

impl ContainerConfig {
  pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
    let raw: ContainerConfigRaw =
      serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Self::from_raw(raw)
  }

  pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
    let raw: ContainerConfigRaw =
      serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Self::from_raw(raw)
  }

  /// Loads settings from a `.yaml`/`.yml` or `.json` file.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    match Format::of(path) {
      Format::Json => Self::from_json_str(&text),
      Format::Yaml => Self::from_yaml_str(&text),
    }
  }

  /// Loads `fibre_compose.<environment>.yaml` from `dir`, or
  /// `fibre_compose.yaml` when there is no environment-specific file. The
  /// environment defaults to `FIBRE_ENV`.
  pub fn discover(dir: &Path, environment: Option<&str>) -> Result<Self, ConfigError> {
    let environment = match environment {
      Some(name) => Some(name.to_owned()),
      None => env::var(ENVIRONMENT_VAR).ok(),
    };
    let mut candidates = Vec::with_capacity(2);
    if let Some(name) = environment.filter(|name| !name.is_empty()) {
      candidates.push(dir.join(format!("{CONFIG_BASE_NAME}.{name}.yaml")));
    }
    candidates.push(dir.join(format!("{CONFIG_BASE_NAME}.yaml")));

    match candidates.iter().find(|path| path.is_file()) {
      Some(path) => Self::from_file(path),
      None => Err(ConfigError::NotFound(format!("none of {candidates:?} exists"))),
    }
  }

  fn from_raw(raw: ContainerConfigRaw) -> Result<Self, ConfigError> {
    let dispose_timeout = raw
      .dispose_timeout
      .as_deref()
      .map(|text| {
        humantime::parse_duration(text).map_err(|e| ConfigError::Invalid {
          field: "dispose_timeout".into(),
          message: e.to_string(),
        })
      })
      .transpose()?;

    if raw.max_resolution_depth == 0 {
      return Err(ConfigError::Invalid {
        field: "max_resolution_depth".into(),
        message: "must be at least 1".into(),
      });
    }

    Ok(Self {
      boundaries: raw.boundaries,
      dispose_timeout,
      max_resolution_depth: raw.max_resolution_depth,
    })
  }
}

#[derive(Clone, Copy)]
enum Format {
  Yaml,
  Json,
}

impl Format {
  fn of(path: &Path) -> Self {
    match path.extension().and_then(|e| e.to_str()) {
      Some("json") => Format::Json,
      _ => Format::Yaml,
    }
  }

  fn parse<T: DeserializeOwned>(self, text: &str) -> Result<T, ConfigError> {
    match self {
      Format::Yaml => serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string())),
      Format::Json => serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string())),
    }
  }
}

type Validator<T> = Arc<dyn Fn(&T) -> Result<(), String> + Send + Sync>;

/// Builds the application's configuration descriptor: an exported singleton
/// whose factory reads a YAML or JSON file, deserializes it into `T` and runs
/// the registered validations.
///
/// ```no_run
/// use fibre_compose::{ConfigSource, Container};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct AppConfig { database_url: String }
///
/// let container = Container::new();
/// container
///   .register(
///     ConfigSource::<AppConfig>::new("config", "app.yaml")
///       .validate(|c| if c.database_url.is_empty() { Err("database_url is empty".into()) } else { Ok(()) })
///       .into_descriptor(),
///   )
///   .unwrap();
/// ```
pub struct ConfigSource<T> {
  name: String,
  path: PathBuf,
  validators: Vec<Validator<T>>,
  _marker: PhantomData<fn() -> T>,
}

impl<T> ConfigSource<T>
where
  T: DeserializeOwned + Send + Sync + 'static,
{
  pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      path: path.into(),
      validators: Vec::new(),
      _marker: PhantomData,
    }
  }

  pub fn validate(mut self, check: impl Fn(&T) -> Result<(), String> + Send + Sync + 'static) -> Self {
    self.validators.push(Arc::new(check));
    self
  }

  pub fn into_descriptor(self) -> Descriptor {
    let path = Arc::new(self.path);
    let validators = Arc::new(self.validators);
    Descriptor::singleton(self.name)
      .factory(move |_view| load::<T>(Arc::clone(&path), Arc::clone(&validators)))
      .exported()
      .tag("config")
  }
}

async fn load<T: DeserializeOwned>(path: Arc<PathBuf>, validators: Arc<Vec<Validator<T>>>) -> Result<T, BoxError> {
  let text = tokio::fs::read_to_string(path.as_path())
    .await
    .map_err(ConfigError::Read)?;
  let value: T = Format::of(&path).parse(&text)?;
  for check in validators.iter() {
    check(&value).map_err(|message| ConfigError::Invalid {
      field: path.display().to_string(),
      message,
    })?;
  }
  Ok(value)
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn defaults_apply_for_empty_document() {
    let config = ContainerConfig::from_yaml_str("{}").unwrap();
    assert_eq!(config, ContainerConfig::default());
  }

  #[test]
  fn yaml_fields_are_processed() {
    let config = ContainerConfig::from_yaml_str(
      "boundaries: warn\ndispose_timeout: 250ms\nmax_resolution_depth: 8\n",
    )
    .unwrap();
    assert_eq!(
      config,
      ContainerConfig {
        boundaries: BoundaryMode::Warn,
        dispose_timeout: Some(Duration::from_millis(250)),
        max_resolution_depth: 8,
      }
    );
  }

  #[test]
  fn json_is_accepted() {
    let config = ContainerConfig::from_json_str(r#"{"boundaries":"off"}"#).unwrap();
    assert_eq!(config.boundaries, BoundaryMode::Off);
  }

  #[test]
  fn unknown_fields_and_bad_values_are_rejected() {
    assert!(matches!(
      ContainerConfig::from_yaml_str("bogus: 1"),
      Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
      ContainerConfig::from_yaml_str("dispose_timeout: soon"),
      Err(ConfigError::Invalid { ref field, .. }) if field == "dispose_timeout"
    ));
    assert!(matches!(
      ContainerConfig::from_yaml_str("max_resolution_depth: 0"),
      Err(ConfigError::Invalid { .. })
    ));
  }
}
