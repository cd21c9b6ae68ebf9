use fibre_compose::{BoxError, Container, Descriptor, Scope};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// A small service host: a core phase, two feature modules, one scope per
// simulated request, and endpoint discovery through tags.

struct Settings {
  greeting: String,
}

struct ConnectionPool {
  opened: AtomicU64,
}

struct RequestContext {
  id: u64,
}

trait Endpoint: Send + Sync {
  fn route(&self) -> &'static str;
  fn handle(&self, ctx: &RequestContext) -> String;
}

struct Hello {
  settings: Arc<Settings>,
}

impl Endpoint for Hello {
  fn route(&self) -> &'static str {
    "/hello"
  }

  fn handle(&self, ctx: &RequestContext) -> String {
    format!("{} (request {})", self.settings.greeting, ctx.id)
  }
}

struct Stats {
  pool: Arc<ConnectionPool>,
}

impl Endpoint for Stats {
  fn route(&self) -> &'static str {
    "/stats"
  }

  fn handle(&self, ctx: &RequestContext) -> String {
    let opened = self.pool.opened.fetch_add(1, Ordering::Relaxed) + 1;
    format!("connections opened: {opened} (request {})", ctx.id)
  }
}

fn core_module(container: &Container) -> Result<(), BoxError> {
  container.register_module(
    "core",
    vec![
      Descriptor::instance(
        "settings",
        Settings {
          greeting: "Hello from fibre_compose".into(),
        },
      )
      .exported(),
      Descriptor::singleton("pool")
        .factory(|_| async {
          // Stands in for a slow connection handshake.
          tokio::time::sleep(Duration::from_millis(20)).await;
          Ok::<_, BoxError>(ConnectionPool {
            opened: AtomicU64::new(0),
          })
        })
        .exported()
        .on_dispose_async(|pool: Arc<ConnectionPool>| async move {
          println!("closing pool after {} connections", pool.opened.load(Ordering::Relaxed));
          Ok::<_, BoxError>(())
        }),
    ],
  )?;
  Ok(())
}

fn http_module(container: &Container) -> Result<(), BoxError> {
  let next_request = Arc::new(AtomicU64::new(1));
  container.register_module(
    "http",
    vec![
      Descriptor::scoped("request_context")
        .constructor(move |_| {
          Ok::<_, BoxError>(RequestContext {
            id: next_request.fetch_add(1, Ordering::Relaxed),
          })
        })
        .exported()
        .on_dispose(|ctx: &RequestContext| {
          println!("request {} finished", ctx.id);
          Ok::<_, BoxError>(())
        }),
      Descriptor::singleton("endpoint.hello")
        .factory(|view| async move {
          let settings = view.get_as::<Settings>("settings").await?;
          Ok::<_, BoxError>(Arc::new(Hello { settings }) as Arc<dyn Endpoint>)
        })
        .depends_on("settings")
        .tag("endpoint"),
    ],
  )?;
  Ok(())
}

fn stats_module(container: &Container) -> Result<(), BoxError> {
  container.register_module(
    "stats",
    vec![Descriptor::singleton("endpoint.stats")
      .factory(|view| async move {
        let pool = view.get_as::<ConnectionPool>("pool").await?;
        Ok::<_, BoxError>(Arc::new(Stats { pool }) as Arc<dyn Endpoint>)
      })
      .depends_on("pool")
      .tag("endpoint")],
  )?;
  Ok(())
}

async fn serve(scope: &Scope, endpoints: &[Arc<dyn Endpoint>]) -> Result<(), BoxError> {
  let ctx = scope.resolve_as::<RequestContext>("request_context").await?;
  for endpoint in endpoints {
    println!("{} -> {}", endpoint.route(), endpoint.handle(&ctx));
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let container = Container::new();
  core_module(&container)?;
  http_module(&container)?;
  stats_module(&container)?;

  // The transport layer discovers its routes once, after every phase.
  let endpoints: Vec<Arc<dyn Endpoint>> = container
    .resolve_tagged("endpoint")
    .await?
    .into_values()
    .map(|instance| instance.downcast::<Arc<dyn Endpoint>>().map(|e| Arc::clone(&*e)))
    .collect::<Result<_, _>>()
    .map_err(|_| "endpoint has the wrong type")?;

  let requests: Vec<_> = (0..3)
    .map(|_| {
      let container = container.clone();
      let endpoints = endpoints.clone();
      tokio::spawn(async move {
        let scope = container.open_scope();
        let served = serve(&scope, &endpoints).await;
        scope.close().await?;
        served
      })
    })
    .collect();
  for request in requests {
    request.await??;
  }

  println!("constructed: {:?}", container.construction_order());
  container.shutdown().await?;
  Ok(())
}
