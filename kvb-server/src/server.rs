//! # Bridge Server
//!
//! HTTP listener exposing the REST command API in front of the session pool.

use std::future::Future;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use kvb_client::SessionPool;
use kvb_common::BridgeConfig;

use crate::auth::{self, AuthGate};
use crate::routes::{self, AppState};

/// REST bridge bound to one store pool.
pub struct BridgeServer {
    config: BridgeConfig,
    pool: SessionPool,
}

impl BridgeServer {
    pub fn new(config: BridgeConfig, pool: SessionPool) -> Self {
        BridgeServer { config, pool }
    }

    /// Builds the router with every route behind the auth gate.
    pub fn router(&self) -> Router {
        build_router(self.pool.clone(), AuthGate::new(self.config.auth_token.clone()))
    }

    /// Serves until Ctrl-C, then closes the pool.
    pub async fn serve(self) -> std::io::Result<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// Serves until `shutdown` resolves. In-flight requests finish first.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        info!(
            addr = %self.config.listen_addr,
            store = %self.pool.addr(),
            token = %self.config.auth_token,
            "listening"
        );

        let router = self.router();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        self.pool.close();
        info!("server stopped");
        result
    }
}

/// Assembles routes, auth middleware and request tracing.
pub fn build_router(pool: SessionPool, gate: AuthGate) -> Router {
    let state = AppState { pool };
    Router::new()
        .route("/", post(routes::single_command))
        .route("/pipeline", post(routes::pipeline))
        .route("/multi-exec", post(routes::multi_exec))
        .route(
            "/*command",
            get(routes::path_command).post(routes::path_command),
        )
        .with_state(state)
        .layer(middleware::from_fn_with_state(gate, auth::require_token))
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
