//! # Fibre Compose
//!
//! A dependency composition runtime for Rust.
//!
//! Modules register named component descriptors with an explicit [`Container`]
//! in sequential load phases. Components are built lazily, on first
//! resolution, and may suspend while being built. The container manages each
//! component's lifetime, enforces which names one module may use from
//! another, and tears everything down in reverse construction order.
//!
//! ## Core Concepts
//!
//! - **Descriptor**: how to build one named component, who owns it, its
//!   [`Lifetime`], tags, declared dependencies and optional disposer.
//! - **Load phase**: [`Container::register_module`] commits all of one
//!   module's descriptors, or none of them.
//! - **Boundary**: a module may only depend on another module's descriptor
//!   if that descriptor is [exported](Descriptor::exported).
//! - **Lifetimes**: `Singleton` (built exactly once, even under concurrent
//!   first access), `Scoped` (once per [`Scope`]) and `Transient` (every time).
//! - **Resolution view**: the lazy lookup handle a producer receives.
//!   Eager lookups that loop are reported as
//!   [`ResolveError::CircularDependency`]; [`LazyRef`] handles let components
//!   refer to each other.
//! - **Teardown**: [`Container::shutdown`] and [`Container::close_scope`] run
//!   disposers newest first and aggregate failures.
//!
//! ## Quick Start
//!
//! ```
//! use fibre_compose::{BoxError, Container, Descriptor};
//!
//! struct Config {
//!   database_url: String,
//! }
//!
//! struct Database {
//!   url: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let container = Container::new();
//!
//!   // Core phase.
//!   container.register_module(
//!     "core",
//!     vec![Descriptor::instance(
//!       "config",
//!       Config { database_url: "postgres://localhost/app".into() },
//!     )
//!     .exported()],
//!   )?;
//!
//!   // Feature phase.
//!   container.register_module(
//!     "storage",
//!     vec![Descriptor::singleton("db")
//!       .factory(|view| async move {
//!         let config = view.get_as::<Config>("config").await?;
//!         Ok::<_, BoxError>(Database { url: config.database_url.clone() })
//!       })
//!       .depends_on("config")
//!       .on_dispose(|db: &Database| {
//!         println!("closing {}", db.url);
//!         Ok::<_, BoxError>(())
//!       })],
//!   )?;
//!
//!   let db = container.resolve_as::<Database>("db").await?;
//!   assert_eq!(db.url, "postgres://localhost/app");
//!
//!   container.shutdown().await?;
//!   Ok(())
//! }
//! ```

mod boundary;
pub mod config;
mod container;
mod descriptor;
mod disposal;
pub mod error;
mod lifetime;
mod pending;
mod registry;
mod resolver;
mod scope;
mod tags;
mod view;

pub use config::{BoundaryMode, ConfigSource, ContainerConfig};
pub use container::Container;
pub use descriptor::{Descriptor, DescriptorBuilder, Instance, Lifetime, CORE_MODULE};
pub use error::{
  BoxError, ConfigError, DisposalError, DisposalFailure, RegistrationError, ResolveError, SharedError,
};
pub use scope::{Scope, ScopeId};
pub use view::{LazyRef, ResolutionView};
