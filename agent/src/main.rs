// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use agent_cache::application::Application;
use agent_cache::configuration::AgentOptions;
use agent_cache::lease_cache::{LeaseCache, LeaseCacheConfig};
use agent_cache::upstream::HttpUpstream;
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("[agent] init");

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        // this needs to be set to remove duplicated information in the log.
        .with_current_span(false)
        // this needs to be set to false, otherwise ANSI color codes will
        // show up in a confusing manner in CloudWatch logs.
        .with_ansi(false)
        // disabling time is handy because CloudWatch will add the ingestion time.
        .without_time()
        // remove the name of the function from every log entry
        .with_target(false)
        .init();

    // get configuration options from environment variables
    let options = AgentOptions::parse();

    tracing::info!("[agent] {:?}", &options);

    options.validate()?;

    let upstream = HttpUpstream::new(&options.upstream_address, options.upstream_timeout())
        .context("failed to build the upstream client")?;

    let shutdown = CancellationToken::new();
    let cache = Arc::new(LeaseCache::new(LeaseCacheConfig {
        upstream: Arc::new(upstream),
        base_context: shutdown.child_token(),
    }));

    match options.auto_auth_token.as_deref() {
        Some(token) => cache.register_auto_auth_token(token).await?,
        None => tracing::warn!("[agent] no auto-auth token, only client tokens will be cached"),
    }

    let application = Application::build(options, cache, shutdown.clone()).await?;

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[agent] failed to listen for ctrl-c: {}", e);
            return;
        }
        tracing::info!("[agent] shutting down");
        shutdown.cancel();
    });

    application.run_until_stopped().await?;

    Ok(())
}
