//! HTTP server exposing the event transports.
//!
//! # Routes
//!
//! ```text
//! POST /event/nostream            producer, answers the combined payload
//! POST /event/short | GET         producer | short-poll consumer
//! POST /event/long  | GET         producer | long-poll consumer (?timeout=secs)
//! POST /event/sse   | GET         producer answering the event stream (GET takes ?prompt=)
//! GET  /event/ws                  WebSocket; {"type":"init","payload":..} starts the producer
//! POST /event/postsse | GET ?id=  POST-SSE hand-off
//! GET  /health
//! ```
//!
//! Every `/event` route except `postsse` takes `?service=&stream=`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let server = EventServer::bind(&config).await?;
//! println!("listening on {}", server.local_addr()?);
//! server.run().await?;
//! ```

pub mod routes;
pub mod services;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use event_transport_server::{
    ConnectionRegistry, EventStreamFactory, FileQueueStore, HandoffStore, MemoryQueueStore,
    QueueStore, WsConfig,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::types::{Config, PollingConfig, QueueBackend};
use crate::error::Result;

pub use services::{EchoService, ServiceRegistry, StreamingService};

/// Shared state of the route handlers.
#[derive(Clone)]
pub struct AppState {
    pub factory: EventStreamFactory,
    pub services: Arc<ServiceRegistry>,
    pub connections: Arc<ConnectionRegistry>,
    pub handoffs: Arc<HandoffStore>,
    pub http: reqwest::Client,
    /// Base URL hand-off streams replay their POST against, without trailing slash.
    pub public_base_url: String,
    pub polling: PollingConfig,
    pub ws: WsConfig,
}

impl AppState {
    /// Builds the state for `config` with the given queue store.
    pub fn new(config: &Config, store: Arc<dyn QueueStore>, public_base_url: String) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let factory = EventStreamFactory::new(config.transport.negotiation.clone(), store)
            .with_resolver(connections.clone())
            .with_options(config.factory_options());

        Self {
            factory,
            services: Arc::new(ServiceRegistry::with_builtin()),
            connections,
            handoffs: Arc::new(HandoffStore::new(Duration::from_secs(config.handoff.ttl_secs))),
            http: reqwest::Client::new(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            polling: config.polling.clone(),
            ws: WsConfig::default(),
        }
    }

    /// Replaces the service registry.
    pub fn with_services(mut self, services: ServiceRegistry) -> Self {
        self.services = Arc::new(services);
        self
    }
}

/// Builds the router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/event/nostream", post(routes::produce_nostream))
        .route("/event/short", post(routes::produce_short).get(routes::poll_short))
        .route("/event/long", post(routes::produce_long).get(routes::poll_long))
        .route("/event/sse", post(routes::produce_sse).get(routes::sse_get))
        .route("/event/ws", get(routes::ws_handler))
        .route(
            "/event/postsse",
            post(routes::handoff_create).get(routes::handoff_stream),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// A bound, not yet running server.
pub struct EventServer {
    listener: TcpListener,
    state: AppState,
    file_store: Option<FileQueueStore>,
    purge_after: Option<Duration>,
}

impl EventServer {
    /// Binds the listener and builds the queue store for `config`.
    pub async fn bind(config: &Config) -> Result<Self> {
        let listener =
            TcpListener::bind(format!("{}:{}", config.server.host, config.server.port)).await?;
        let addr = listener.local_addr()?;

        let mut file_store = None;
        let store: Arc<dyn QueueStore> = match config.queue.backend {
            QueueBackend::File => {
                let file = FileQueueStore::new(config.queue.resolved_dir())?;
                log::info!("Queue records in {}", file.dir().display());
                file_store = Some(file.clone());
                Arc::new(file)
            }
            QueueBackend::Memory => Arc::new(MemoryQueueStore::new()),
        };

        let public_base_url = config
            .server
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", addr));
        let purge_after =
            (config.queue.max_age_secs > 0).then(|| Duration::from_secs(config.queue.max_age_secs));

        Ok(Self {
            listener,
            state: AppState::new(config, store, public_base_url),
            file_store,
            purge_after,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Replaces the service registry.
    pub fn with_services(mut self, services: ServiceRegistry) -> Self {
        self.state = self.state.with_services(services);
        self
    }

    /// Serves until the process receives Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Serves until `shutdown` completes.
    pub async fn run_until(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let maintenance = self.purge_after.map(|max_age| {
            spawn_maintenance(self.file_store.clone(), self.state.handoffs.clone(), max_age)
        });

        log::info!("Event server listening on http://{}", self.listener.local_addr()?);
        let result = axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await;

        if let Some(task) = maintenance {
            task.abort();
        }
        Ok(result?)
    }
}

/// Periodically drops stale queue records and expired hand-offs.
fn spawn_maintenance(
    file_store: Option<FileQueueStore>,
    handoffs: Arc<HandoffStore>,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    let period = (max_age / 4).clamp(Duration::from_secs(1), Duration::from_secs(300));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let expired = handoffs.purge_expired();
            if expired > 0 {
                log::debug!("Dropped {} expired hand-offs", expired);
            }
            let Some(store) = file_store.clone() else {
                continue;
            };
            match tokio::task::spawn_blocking(move || store.purge_stale(max_age)).await {
                Ok(Ok(0)) => {}
                Ok(Ok(n)) => log::info!("Purged {} stale queue records", n),
                Ok(Err(e)) => log::warn!("Queue purge failed: {}", e),
                Err(e) => log::warn!("Queue purge task failed: {}", e),
            }
        }
    })
}
