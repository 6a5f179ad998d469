//! Application startup and lifecycle management.

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn,
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::db;
use crate::modules::{compose_modules, Dependencies, RouteModule};
use crate::services::{
    CredentialCodec, DecisionPolicy, PgAccountStore, RedisDecisionCache, RedisJobQueue,
};

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    modules: Vec<Arc<dyn RouteModule>>,
}

impl Application {
    /// Connect every backend, compose the route modules and bind the listener.
    pub async fn build(config: GatewayConfig) -> Result<Self, AppError> {
        // Fails before anything is served when the signing key is missing.
        let codec = CredentialCodec::new(&config.jwt)?;

        let pool = db::create_pool(&config.database).await.map_err(|e| {
            tracing::error!("Failed to connect to PostgreSQL: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e))
        })?;
        db::run_migrations(&pool).await.map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e))
        })?;

        let cache = RedisDecisionCache::connect(&config.cache)
            .await
            .map_err(AppError::InternalError)?;
        let jobs = RedisJobQueue::connect(&config.queue)
            .await
            .map_err(AppError::InternalError)?;

        let modules = compose_modules(Dependencies {
            codec,
            store: Arc::new(PgAccountStore::new(pool)),
            cache: Arc::new(cache),
            jobs: Arc::new(jobs),
            policy: DecisionPolicy::from_config(&config.cache, &config.authz),
        });
        let router = build_router(&modules, &config.security.allowed_origins);

        let address = config.common.bind_address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", address, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port,
            modules = ?modules.iter().map(|m| m.name()).collect::<Vec<_>>(),
            "Gateway service ready"
        );

        Ok(Self {
            port,
            listener,
            router,
            modules,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until SIGINT/SIGTERM, then shut every module down.
    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        for module in &self.modules {
            tracing::info!(module = module.name(), "Shutting down module");
            module.shutdown().await;
        }

        Ok(())
    }
}

/// Register every module and apply the shared middleware stack.
pub fn build_router(modules: &[Arc<dyn RouteModule>], allowed_origins: &[String]) -> Router {
    let router = modules
        .iter()
        .fold(Router::new(), |router, module| module.register(router));

    router
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    path = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(allowed_origins.iter().filter_map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
        ])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
