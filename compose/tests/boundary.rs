mod common;

use fibre_compose::{
  BoundaryMode, BoxError, Container, ContainerConfig, Descriptor, RegistrationError, ResolveError,
};
use std::sync::Arc;

struct OrderService;
struct UserService;

fn user_service() -> Descriptor {
  Descriptor::singleton("user_service").constructor(|_| Ok::<_, BoxError>(UserService))
}

fn order_service() -> Descriptor {
  Descriptor::singleton("order_service")
    .factory(|view| async move {
      view.get_as::<UserService>("user_service").await?;
      Ok::<_, BoxError>(OrderService)
    })
    .depends_on("user_service")
}

#[tokio::test]
async fn test_private_dependency_rejects_whole_phase() {
  common::init_tracing();
  let container = Container::new();
  container.register_module("users", vec![user_service()]).unwrap();

  let err = container
    .register_module(
      "orders",
      vec![
        Descriptor::instance("order_settings", ()).tag("settings"),
        order_service(),
      ],
    )
    .unwrap_err();

  assert_eq!(
    err,
    RegistrationError::BoundaryViolation {
      requesting_module: "orders".into(),
      requester: "order_service".into(),
      target_module: "users".into(),
      target: "user_service".into(),
    }
  );
  // Nothing from the rejected phase was committed.
  assert!(!container.is_registered("order_settings"));
  assert!(!container.is_registered("order_service"));
  assert!(container.tagged_names("settings").is_empty());
  assert_eq!(container.names(), vec!["user_service"]);
}

#[tokio::test]
async fn test_exported_dependency_is_accepted() {
  let container = Container::new();
  container
    .register_module("users", vec![user_service().exported()])
    .unwrap();
  container.register_module("orders", vec![order_service()]).unwrap();

  assert!(container.resolve_as::<OrderService>("order_service").await.is_ok());
}

#[tokio::test]
async fn test_late_private_target_is_rejected() {
  // The dependency is declared first; the private target arrives later.
  let container = Container::new();
  container.register_module("orders", vec![order_service()]).unwrap();

  let err = container
    .register_module("users", vec![user_service()])
    .unwrap_err();
  assert!(matches!(
    err,
    RegistrationError::BoundaryViolation { ref requester, ref target, .. }
      if requester == "order_service" && target == "user_service"
  ));
  assert!(!container.is_registered("user_service"));
}

#[tokio::test]
async fn test_same_module_may_use_private_descriptors() {
  let container = Container::new();
  container
    .register_module("users", vec![user_service(), order_service().owned_by("ignored")])
    .unwrap();

  let order = container.resolve_as::<OrderService>("order_service").await;
  assert!(order.is_ok());
}

#[tokio::test]
async fn test_undeclared_cross_module_access_fails_at_resolution() {
  let container = Container::new();
  container.register_module("users", vec![user_service()]).unwrap();
  container
    .register_module(
      "orders",
      vec![Descriptor::singleton("sneaky").factory(|view| async move {
        view.get("user_service").await?;
        Ok::<_, BoxError>(())
      })],
    )
    .unwrap();

  let err = container.resolve("sneaky").await.unwrap_err();
  match err {
    ResolveError::BoundaryViolation {
      requesting_module,
      requester,
      target_module,
      target,
    } => {
      assert_eq!(requesting_module, "orders");
      assert_eq!(requester, "sneaky");
      assert_eq!(target_module, "users");
      assert_eq!(target, "user_service");
    }
    other => panic!("expected a boundary violation, got {other}"),
  }
  // The private target itself stays reachable from outside any module.
  assert!(container.resolve("user_service").await.is_ok());
}

#[tokio::test]
async fn test_warn_mode_logs_and_proceeds() {
  common::init_tracing();
  let container = Container::with_config(ContainerConfig {
    boundaries: BoundaryMode::Warn,
    ..ContainerConfig::default()
  });
  container.register_module("users", vec![user_service()]).unwrap();
  container.register_module("orders", vec![order_service()]).unwrap();

  let order = container.resolve_as::<OrderService>("order_service").await.unwrap();
  let again = container.resolve_as::<OrderService>("order_service").await.unwrap();
  assert!(Arc::ptr_eq(&order, &again));
}

#[tokio::test]
async fn test_off_mode_skips_checks() {
  let container = Container::with_config(ContainerConfig {
    boundaries: BoundaryMode::Off,
    ..ContainerConfig::default()
  });
  container.register_module("orders", vec![order_service()]).unwrap();
  container.register_module("users", vec![user_service()]).unwrap();

  assert!(container.resolve("order_service").await.is_ok());
}

#[tokio::test]
async fn test_duplicate_within_one_phase_is_rejected() {
  let container = Container::new();
  let err = container
    .register_module(
      "core",
      vec![Descriptor::instance("twice", 1_u8), Descriptor::instance("twice", 2_u8)],
    )
    .unwrap_err();

  assert!(matches!(err, RegistrationError::DuplicateName { ref name, .. } if name == "twice"));
  assert!(!container.is_registered("twice"));
}
