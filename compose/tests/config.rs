mod common;

use fibre_compose::{
  BoundaryMode, BoxError, ConfigError, ConfigSource, Container, ContainerConfig, Descriptor, ResolveError,
};
use pretty_assertions::assert_eq;
use serde::Deserialize;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[derive(Debug, Deserialize, PartialEq)]
struct AppConfig {
  database_url: String,
  workers: u16,
}

struct Database {
  url: String,
}

#[tokio::test]
async fn test_config_source_feeds_dependents() {
  common::init_tracing();
  let dir = tempdir().unwrap();
  let path = dir.path().join("app.yaml");
  fs::write(&path, "database_url: postgres://localhost/app\nworkers: 4\n").unwrap();

  let container = Container::new();
  container
    .register_module(
      "core",
      vec![ConfigSource::<AppConfig>::new("config", &path).into_descriptor()],
    )
    .unwrap();
  container
    .register_module(
      "storage",
      vec![Descriptor::singleton("db")
        .factory(|view| async move {
          let config = view.get_as::<AppConfig>("config").await?;
          Ok::<_, BoxError>(Database {
            url: config.database_url.clone(),
          })
        })
        .depends_on("config")],
    )
    .unwrap();

  let config = container.resolve_as::<AppConfig>("config").await.unwrap();
  assert_eq!(
    *config,
    AppConfig {
      database_url: "postgres://localhost/app".into(),
      workers: 4,
    }
  );
  let db = container.resolve_as::<Database>("db").await.unwrap();
  assert_eq!(db.url, "postgres://localhost/app");
  assert_eq!(container.tagged_names("config"), vec!["config"]);
}

#[tokio::test]
async fn test_config_source_reads_json() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("app.json");
  fs::write(&path, r#"{"database_url": "sqlite::memory:", "workers": 1}"#).unwrap();

  let container = Container::new();
  container
    .register(ConfigSource::<AppConfig>::new("config", &path).into_descriptor())
    .unwrap();

  let config = container.resolve_as::<AppConfig>("config").await.unwrap();
  assert_eq!(config.database_url, "sqlite::memory:");
}

#[tokio::test]
async fn test_failed_validation_is_a_factory_error() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("app.yaml");
  fs::write(&path, "database_url: ''\nworkers: 0\n").unwrap();

  let container = Container::new();
  container
    .register(
      ConfigSource::<AppConfig>::new("config", &path)
        .validate(|c| {
          if c.workers == 0 {
            Err("workers must be positive".into())
          } else {
            Ok(())
          }
        })
        .into_descriptor(),
    )
    .unwrap();

  match container.resolve("config").await.unwrap_err() {
    ResolveError::Factory { name, source } => {
      assert_eq!(name, "config");
      assert!(matches!(
        source.downcast_ref::<ConfigError>(),
        Some(ConfigError::Invalid { message, .. }) if message == "workers must be positive"
      ));
    }
    other => panic!("expected a factory error, got {other}"),
  }
  assert!(!container.is_constructed("config"));
}

#[tokio::test]
async fn test_missing_config_file_is_a_factory_error() {
  let dir = tempdir().unwrap();
  let container = Container::new();
  container
    .register(ConfigSource::<AppConfig>::new("config", dir.path().join("absent.yaml")).into_descriptor())
    .unwrap();

  match container.resolve("config").await.unwrap_err() {
    ResolveError::Factory { source, .. } => {
      assert!(matches!(source.downcast_ref::<ConfigError>(), Some(ConfigError::Read(_))));
    }
    other => panic!("expected a factory error, got {other}"),
  }
}

#[test]
fn test_discover_prefers_environment_file() {
  let dir = tempdir().unwrap();
  fs::write(dir.path().join("fibre_compose.yaml"), "max_resolution_depth: 8\n").unwrap();

  // Only the base file exists.
  let config = ContainerConfig::discover(dir.path(), Some("staging")).unwrap();
  assert_eq!(config.max_resolution_depth, 8);
  assert_eq!(config.boundaries, BoundaryMode::Enforce);

  fs::write(dir.path().join("fibre_compose.staging.yaml"), "boundaries: warn\n").unwrap();
  let config = ContainerConfig::discover(dir.path(), Some("staging")).unwrap();
  assert_eq!(config.boundaries, BoundaryMode::Warn);
  assert_eq!(config.max_resolution_depth, 64);

  let empty = tempdir().unwrap();
  assert!(matches!(
    ContainerConfig::discover(empty.path(), Some("staging")),
    Err(ConfigError::NotFound(_))
  ));
}

#[test]
fn test_container_config_from_files() {
  let dir = tempdir().unwrap();
  let json = dir.path().join("container.json");
  fs::write(&json, r#"{"boundaries": "warn", "dispose_timeout": "2s"}"#).unwrap();
  let yaml = dir.path().join("container.yml");
  fs::write(&yaml, "max_resolution_depth: 16\n").unwrap();

  let from_json = ContainerConfig::from_file(&json).unwrap();
  assert_eq!(from_json.boundaries, BoundaryMode::Warn);
  assert_eq!(from_json.dispose_timeout, Some(Duration::from_secs(2)));
  assert_eq!(from_json.max_resolution_depth, 64);

  let from_yaml = ContainerConfig::from_file(&yaml).unwrap();
  assert_eq!(from_yaml.max_resolution_depth, 16);
  assert_eq!(from_yaml.boundaries, BoundaryMode::Enforce);

  assert!(matches!(
    ContainerConfig::from_file(&dir.path().join("nope.yaml")),
    Err(ConfigError::Read(_))
  ));
}
