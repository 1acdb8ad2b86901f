//! Gateway HTTP server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response};
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use switchyard_common::Config;
use tracing::info;

use crate::directory::{AccountDirectory, HttpAccountDirectory, HttpRoleService};
use crate::error::Error;
use crate::identity::{AccountCache, Claims, IdentityMiddleware, IdentityResolver, TokenMinter};
use crate::policy::build_selector;
use crate::proxy::{ProxyEngine, ReqwestUpstream};
use crate::routing::{DirectorTable, RoutingEngine};

/// Time in-flight requests get to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Proxy engine handling every non-health request
    pub engine: Arc<ProxyEngine>,
}

/// Build the gateway router
///
/// `/healthz` is answered locally, everything else is proxied.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .fallback(proxy_handler)
        .with_state(state)
}

/// Proxy any request through the engine
///
/// Claims are read from the request extensions, where an embedding
/// authentication layer puts them.
async fn proxy_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response<Body>, Error> {
    let claims = request.extensions().get::<Claims>().cloned();
    state.engine.handle(claims.as_ref(), request).await
}

/// Wire the proxy engine from configuration
///
/// Every configuration problem (malformed backend, unknown strategy, missing
/// secret) surfaces here, before the server binds.
pub fn build_engine(config: &Config) -> Result<ProxyEngine, Error> {
    let directory: Arc<dyn AccountDirectory> = Arc::new(
        HttpAccountDirectory::new(&config.directory)
            .map_err(|e| Error::Config(format!("directory client: {}", e)))?,
    );

    let table = DirectorTable::build(&config.policies)?;
    let selector = build_selector(&config.policy_selector, directory.clone())?;
    let routing = RoutingEngine::new(table, selector);

    let identity = if config.account_uuid.enabled {
        let roles = Arc::new(
            HttpRoleService::new(&config.roles)
                .map_err(|e| Error::Config(format!("role service client: {}", e)))?,
        );
        let cache = AccountCache::new(
            config.account_cache.size,
            Duration::from_secs(config.account_cache.ttl_secs),
        );
        let resolver = Arc::new(IdentityResolver::new(directory, cache));
        let minter = TokenMinter::new(&config.token_manager.jwt_secret)?;
        Some(IdentityMiddleware::new(resolver, roles, minter))
    } else {
        None
    };

    info!(
        policies = config.policies.len(),
        selector = %config.policy_selector.kind,
        identity = identity.is_some(),
        "Proxy engine built"
    );

    Ok(ProxyEngine::new(
        routing,
        identity,
        Arc::new(ReqwestUpstream::new()?),
    ))
}

/// Serve the gateway until ctrl-c
pub async fn start_server(config: &Config, engine: ProxyEngine) -> Result<(), Error> {
    let addr: SocketAddr = config
        .http
        .addr
        .parse()
        .map_err(|e| Error::Config(format!("invalid listen address {}: {}", config.http.addr, e)))?;

    let app = build_router(AppState {
        engine: Arc::new(engine),
    });

    match config.http.tls_paths() {
        Some((cert, key)) => {
            let tls_config = RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| Error::Config(format!("TLS config error: {}", e)))?;

            let handle = axum_server::Handle::new();
            let shutdown = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });

            info!(addr = %addr, "Starting gateway with TLS");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(|e| Error::Internal(format!("Server error: {}", e)))
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| Error::Config(format!("failed to bind {}: {}", addr, e)))?;

            info!(addr = %addr, "Starting gateway");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| Error::Internal(format!("Server error: {}", e)))
        }
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
