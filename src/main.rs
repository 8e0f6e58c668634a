//! Team coordinator binary entrypoint wiring the REST layer to the configured document store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use team_coordinator::{
    config::{AppConfig, StoreBackend},
    dao::document_store::{DocumentStore, memory::MemoryDocumentStore},
    routes,
    services::{identity::TrustedHeaderResolver, team_coordinator::TeamCoordinator},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let mongo_uri = env::var("MONGO_URI").ok().filter(|uri| !uri.is_empty());
    let mongo_db = env::var("MONGO_DB").ok().filter(|db| !db.is_empty());
    let backend = StoreBackend::from_env(mongo_uri.as_deref());

    let store = open_store(backend, mongo_uri, mongo_db).await?;
    info!(backend = backend.as_str(), "document store ready");

    let coordinator = TeamCoordinator::new(store, config.coordinator_settings());
    let app_state = AppState::new(
        coordinator,
        Arc::new(TrustedHeaderResolver::default()),
        backend.as_str(),
    );
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

/// Open the document store selected by `backend`.
async fn open_store(
    backend: StoreBackend,
    mongo_uri: Option<String>,
    mongo_db: Option<String>,
) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match backend {
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store; teams are lost on restart");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        #[cfg(feature = "mongo-store")]
        StoreBackend::Mongo => {
            use team_coordinator::dao::document_store::mongodb::{MongoConfig, MongoDocumentStore};

            let uri = mongo_uri.unwrap_or_else(|| "mongodb://localhost:27017".into());
            let mongo_config = MongoConfig::from_uri(&uri, mongo_db.as_deref())
                .await
                .context("parsing MongoDB connection string")?;
            let store = MongoDocumentStore::connect(mongo_config)
                .await
                .context("connecting to MongoDB")?;
            tokio::spawn(run_mongo_supervisor(store.clone()));
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "mongo-store"))]
        StoreBackend::Mongo => {
            let _ = (mongo_uri, mongo_db);
            anyhow::bail!("MongoDB support was not compiled in; set STORE_BACKEND=memory")
        }
    }
}

/// Ping MongoDB periodically and rebuild the client when it stops answering.
#[cfg(feature = "mongo-store")]
async fn run_mongo_supervisor(
    store: team_coordinator::dao::document_store::mongodb::MongoDocumentStore,
) {
    use std::time::Duration;

    use tokio::time::sleep;
    use tracing::warn;

    let initial_delay = Duration::from_secs(1);
    let max_delay = Duration::from_secs(10);
    let mut delay = initial_delay;

    loop {
        match store.health_check().await {
            Ok(()) => {
                delay = initial_delay;
                sleep(Duration::from_secs(5)).await;
            }
            Err(err) => {
                warn!(error = %err, "MongoDB ping failed; reconnecting");
                if let Err(err) = store.try_reconnect().await {
                    warn!(error = %err, "MongoDB reconnection attempt failed");
                } else {
                    info!("reconnected to MongoDB");
                }
                sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
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
