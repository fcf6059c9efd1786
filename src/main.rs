//! Arena Back binary entrypoint wiring REST, WebSocket and session storage layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use arena_back::{
    config::AppConfig,
    dao::{
        session_store::{SessionStore, memory::MemorySessionStore},
        storage::{StorageError, StorageResult},
    },
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};
use axum::Router;
use futures::{FutureExt, future::BoxFuture};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Document store selected with `STORE_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreBackend {
    Memory,
    #[cfg(feature = "mongo-store")]
    Mongo,
    #[cfg(feature = "couch-store")]
    Couch,
}

impl StoreBackend {
    fn from_env() -> anyhow::Result<Self> {
        let value = env::var("STORE_BACKEND").unwrap_or_else(|_| "memory".into());
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            #[cfg(feature = "mongo-store")]
            "mongo" | "mongodb" => Ok(Self::Mongo),
            #[cfg(feature = "couch-store")]
            "couch" | "couchdb" => Ok(Self::Couch),
            other => anyhow::bail!("unsupported STORE_BACKEND `{other}`"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let backend = StoreBackend::from_env()?;
    let app_state = AppState::new(config);

    info!(?backend, "starting storage supervisor");
    tokio::spawn(storage_supervisor::run(
        app_state.store().clone(),
        store_connector(backend),
    ));
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Connection factory handed to the storage supervisor.
fn store_connector(
    backend: StoreBackend,
) -> impl FnMut() -> BoxFuture<'static, StorageResult<Arc<dyn SessionStore>>> + Send + 'static {
    let memory = MemorySessionStore::new();
    move || match backend {
        StoreBackend::Memory => {
            let store: Arc<dyn SessionStore> = Arc::new(memory.clone());
            async move { Ok::<_, StorageError>(store) }.boxed()
        }
        #[cfg(feature = "mongo-store")]
        StoreBackend::Mongo => async {
            use arena_back::dao::session_store::mongodb::{MongoConfig, MongoSessionStore};

            let config = MongoConfig::from_env().await?;
            let store: Arc<dyn SessionStore> = Arc::new(MongoSessionStore::connect(config).await?);
            Ok::<_, StorageError>(store)
        }
        .boxed(),
        #[cfg(feature = "couch-store")]
        StoreBackend::Couch => async {
            use arena_back::dao::session_store::couchdb::{CouchConfig, CouchSessionStore};

            let config = CouchConfig::from_env()?;
            let store: Arc<dyn SessionStore> = Arc::new(CouchSessionStore::connect(config).await?);
            Ok::<_, StorageError>(store)
        }
        .boxed(),
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
