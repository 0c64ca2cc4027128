//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Assemble the proxy subsystems from configuration
//! - Create the Axum router that sends every path to the [`ProxyRouter`]
//! - Wire up middleware (request ID, tracing, in-flight limit)
//! - Run discovery, cache upkeep and the admin API beside the listener
//! - Drain open tunnels on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::{self, MissedTickBehavior};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::{ProxyConfig, SessionConfig, SessionMode};
use crate::discovery::{resolver, DiscoveryLoop, Directory, LocalIdentity, SrvResolver};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, trace_layer};
use crate::lifecycle::Shutdown;
use crate::load_balancer::UpstreamSelector;
use crate::proxy::{HyperForwarder, ProxyRouter};
use crate::registry::BackendRegistry;
use crate::session::cipher::CipherError;
use crate::session::{
    CachedSession, ChaChaTokenCipher, CookiePolicy, EmbeddedSession, MemorySessionCache, SessionCodec,
    SessionStore,
};

const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid session keys: {0}")]
    SessionKeys(#[from] CipherError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ProxyRouter>,
    /// Bounds in-flight requests; excess load is shed with 503.
    pub permits: Arc<Semaphore>,
}

/// HTTP server for the sticky-session proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    proxy: Arc<ProxyRouter>,
    discovery: DiscoveryLoop,
    cache: Option<MemorySessionCache>,
}

impl HttpServer {
    /// Build a server using the configured resolver and the detected local identity.
    pub fn new(config: ProxyConfig) -> Result<Self, StartupError> {
        let resolver: Arc<dyn SrvResolver> = Arc::from(resolver::from_config(&config.discovery));
        let identity = LocalIdentity::detect(config.discovery.self_hostname.as_deref());
        Self::with_discovery(config, resolver, identity)
    }

    /// Build a server with an explicit resolver and identity.
    pub fn with_discovery(
        config: ProxyConfig,
        resolver: Arc<dyn SrvResolver>,
        identity: LocalIdentity,
    ) -> Result<Self, StartupError> {
        let registry = Arc::new(BackendRegistry::from_config(&config));
        let directory = Arc::new(Directory::new());
        let (sessions, cache) = build_sessions(&config.session)?;

        let mut selector = UpstreamSelector::new(directory.clone());
        if config.discovery.strict_pin_validation {
            selector = selector.with_strict_validation(resolver.clone());
        }

        let proxy = Arc::new(
            ProxyRouter::new(
                registry.clone(),
                directory.clone(),
                Arc::new(sessions),
                Arc::new(HyperForwarder::new(&config.timeouts)),
            )
            .with_selector(selector)
            .with_debug_headers(config.observability.debug_headers),
        );

        let discovery = DiscoveryLoop::new(
            registry,
            resolver,
            directory,
            identity,
            Duration::from_secs(config.discovery.interval_secs.max(1)),
        );

        let state = AppState {
            proxy: proxy.clone(),
            permits: Arc::new(Semaphore::new(config.listener.max_connections.max(1))),
        };
        let router = Self::build_router(state);

        Ok(Self {
            router,
            config,
            proxy,
            discovery,
            cache,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(propagate_request_id_layer())
            .layer(trace_layer())
            .layer(set_request_id_layer())
    }

    /// The axum router, for in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn proxy(&self) -> &Arc<ProxyRouter> {
        &self.proxy
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run until `shutdown` fires, then drain open tunnels.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), StartupError> {
        let Self {
            router,
            config,
            proxy,
            discovery,
            cache,
        } = self;

        let addr = listener.local_addr()?;

        // Serve only after every cluster had one chance to resolve.
        discovery.refresh_all().await;
        tokio::spawn(discovery.run(shutdown.subscribe()));

        if let Some(cache) = cache {
            tokio::spawn(purge_sessions(cache, shutdown.subscribe()));
        }

        if config.admin.enabled {
            let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
            let admin = setup_admin_router(AdminState::new(proxy.clone(), &config.admin.api_key));
            let mut admin_shutdown = shutdown.subscribe();
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
            tokio::spawn(async move {
                let served = axum::serve(admin_listener, admin)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API stopped");
                }
            });
        }

        tracing::info!(
            address = %addr,
            clusters = proxy.registry().clusters().len(),
            session_mode = proxy.sessions().mode_name(),
            "HTTP server starting"
        );

        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        let mut server_shutdown = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await?;

        let drain = Duration::from_secs(config.timeouts.request_secs);
        if !proxy.connections().wait_idle(drain).await {
            tracing::warn!(
                remaining = proxy.connections().active_count(),
                "Drain deadline passed with connections still open"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the configured session strategy. Returns the in-memory cache too,
/// so the server can purge it.
fn build_sessions(config: &SessionConfig) -> Result<(SessionStore, Option<MemorySessionCache>), CipherError> {
    let codec = SessionCodec::new(Arc::new(ChaChaTokenCipher::from_encoded(&config.keys)?));
    let policy = CookiePolicy::from_config(config);

    Ok(match config.mode {
        SessionMode::Embedded => (SessionStore::Embedded(EmbeddedSession::new(codec, policy)), None),
        SessionMode::Cached => {
            let cache = MemorySessionCache::new(config.cache_capacity);
            let store = CachedSession::new(
                codec,
                policy,
                Arc::new(cache.clone()),
                Duration::from_secs(config.cache_ttl_secs),
            );
            (SessionStore::Cached(store), Some(cache))
        }
    })
}

async fn purge_sessions(cache: MemorySessionCache, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = time::interval(CACHE_PURGE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, remaining = cache.len(), "Purged expired sessions");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Every inbound request lands here.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let Ok(_permit) = state.permits.clone().try_acquire_owned() else {
        tracing::warn!("In-flight request limit reached, shedding load");
        return (StatusCode::SERVICE_UNAVAILABLE, "Proxy overloaded").into_response();
    };

    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    state.proxy.handle(request, client_addr).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::discovery::StaticResolver;
    use crate::session::cipher::generate_key;
    use tower::ServiceExt;

    fn config(mode: SessionMode) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.clusters.push(ClusterConfig {
            name: "chat".into(),
            hosts: vec!["chat.example.com".into()],
            discovery_name: "_signalr._tcp.chat.internal".into(),
            port: 5000,
            scheme: "http".into(),
            local_address: None,
            strategy: Default::default(),
        });
        config.session.mode = mode;
        config.session.keys = vec![generate_key()];
        config
    }

    fn server(config: ProxyConfig) -> HttpServer {
        HttpServer::with_discovery(config, Arc::new(StaticResolver::default()), LocalIdentity::default()).unwrap()
    }

    #[test]
    fn missing_keys_fail_startup() {
        let mut config = config(SessionMode::Embedded);
        config.session.keys.clear();
        let result = HttpServer::with_discovery(config, Arc::new(StaticResolver::default()), LocalIdentity::default());
        assert!(matches!(result, Err(StartupError::SessionKeys(CipherError::NoKeys))));
    }

    #[test]
    fn session_mode_follows_config() {
        assert_eq!(server(config(SessionMode::Embedded)).proxy().sessions().mode_name(), "embedded");
        assert_eq!(server(config(SessionMode::Cached)).proxy().sessions().mode_name(), "cached");
    }

    #[tokio::test]
    async fn unmatched_host_gets_404_with_request_id() {
        let app = server(config(SessionMode::Embedded)).router();
        let request = Request::builder()
            .uri("/hub")
            .header("host", "unknown.example.com")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn no_live_hosts_gets_503() {
        let app = server(config(SessionMode::Cached)).router();
        let request = Request::builder()
            .uri("/hub/negotiate")
            .header("host", "chat.example.com")
            .header("x-request-id", "req-1")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()["x-request-id"], "req-1");
    }
}
