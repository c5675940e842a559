use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use gatesync_core::EventBroadcaster;
use gatesync_engine::{
    ApiKeysCacheService, ClusterManager, LocalApiKeyCache, StandaloneCluster, StaticCluster,
    SyncDependencies,
};
use gatesync_storage::{InMemoryRepository, StoreFixture};
use tower_http::trace::TraceLayer;

use crate::config::{AppConfig, ClusterRole};
use crate::handlers::{self, AppState};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/apikeys", get(handlers::diagnostics))
        .route("/apikeys/_refresh", post(handlers::trigger_refresh))
        .route("/apikeys/{key}", get(handlers::lookup_key))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http.request",
                    http.method = %req.method(),
                    http.target = %req.uri(),
                )
            }),
        )
        .with_state(state)
}

/// A gateway node: the sync service plus its diagnostics endpoint.
pub struct GatesyncNode {
    addr: SocketAddr,
    service: Arc<ApiKeysCacheService>,
    events: EventBroadcaster,
    fixture: StoreFixture,
}

impl GatesyncNode {
    pub fn build(cfg: &AppConfig) -> anyhow::Result<Self> {
        let fixture = match &cfg.storage.fixture {
            Some(path) => StoreFixture::load(path)
                .with_context(|| format!("failed to load fixture {}", path.display()))?,
            None => StoreFixture::default(),
        };
        let repository = Arc::new(InMemoryRepository::from_fixture(&fixture));

        let cluster: Arc<dyn ClusterManager> = match cfg.cluster.role {
            ClusterRole::Standalone => Arc::new(StandaloneCluster),
            ClusterRole::Master => Arc::new(StaticCluster::new(true)),
            ClusterRole::Replica => Arc::new(StaticCluster::new(false)),
        };

        let events = EventBroadcaster::new();
        let service = ApiKeysCacheService::new(
            cfg.sync.clone(),
            SyncDependencies {
                api_keys: repository.clone(),
                subscriptions: repository,
                cache: LocalApiKeyCache::new_shared(),
                cluster,
                events: events.clone(),
            },
        )?;

        tracing::info!(
            apis = fixture.apis.len(),
            api_keys = fixture.api_keys.len(),
            subscriptions = fixture.subscriptions.len(),
            role = ?cfg.cluster.role,
            "node initialized"
        );

        Ok(Self {
            addr: cfg.addr(),
            service: Arc::new(service),
            events,
            fixture,
        })
    }

    pub fn service(&self) -> &Arc<ApiKeysCacheService> {
        &self.service
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Starts the sync service and announces every fixture API as deployed.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.service.start().await?;
        for api in &self.fixture.apis {
            self.events.send_deploy(api.clone());
        }
        Ok(())
    }

    pub fn router(&self) -> Router {
        build_app(AppState {
            service: Arc::clone(&self.service),
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        self.start().await?;

        let listener = match tokio::net::TcpListener::bind(self.addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.service.stop().await;
                return Err(anyhow::Error::new(e).context(format!("failed to bind {}", self.addr)));
            }
        };
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await;

        self.service.stop().await;
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
