// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use crate::configuration::AgentOptions;
use crate::constants::{CACHE_CLEAR_PATH, MAX_REQUEST_BODY_SIZE, REQUEST_TIMEOUT};
use crate::lease_cache::LeaseCache;
use crate::routes;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::put;
use axum::serve::Serve;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub options: AgentOptions,
    pub cache: Arc<LeaseCache>,
}

pub struct Application {
    port: u16,
    server: Serve<TcpListener, Router, Router>,
    shutdown: CancellationToken,
}

impl Application {
    pub async fn build(
        options: AgentOptions,
        cache: Arc<LeaseCache>,
        shutdown: CancellationToken,
    ) -> Result<Self, std::io::Error> {
        let address = format!("{}:{}", options.host, options.port);
        let listener = TcpListener::bind(address).await?;
        let host = options.host.clone();
        let server = run(listener, options, cache)?;
        let port = server.local_addr()?.port();

        tracing::info!("[agent] listening at http://{}:{}", host, port);

        Ok(Self {
            port,
            server,
            shutdown,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serves until the shutdown token is cancelled, then drains in-flight
    /// requests.
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        let shutdown = self.shutdown;
        self.server
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}

/// Builds the router: the admin endpoint, the catch-all proxy, and the
/// middleware stack.
pub fn create_router(options: AgentOptions, cache: Arc<LeaseCache>) -> Router {
    let state = Arc::new(AppState { options, cache });

    Router::new()
        .route(
            CACHE_CLEAR_PATH,
            put(routes::cache_clear).post(routes::cache_clear),
        )
        .fallback(routes::proxy)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tracing::instrument(skip(listener, cache))]
pub fn run(
    listener: TcpListener,
    options: AgentOptions,
    cache: Arc<LeaseCache>,
) -> Result<Serve<TcpListener, Router, Router>, std::io::Error> {
    let app = create_router(options, cache);
    Ok(axum::serve(listener, app))
}
