// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Background renewal of cached secrets.
//!
//! Every cached record runs one worker ([`run_worker`]) for as long as the
//! record lives. The worker drives a [`Renewer`] that keeps the secret alive
//! upstream and swaps renewed responses into the record. Whatever makes the
//! worker stop, it evicts its own record on the way out.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::cachedb::{CacheDb, ContextInfo, IndexName};
use crate::constants::{RENEW_JITTER_FRACTION, RENEWED_CHANNEL_CAPACITY};
use crate::models::Secret;
use crate::protocol::{decode_response, encode_response};
use crate::upstream::{Upstream, UpstreamError};

#[derive(thiserror::Error, Debug)]
pub enum RenewalError {
    #[error("secret is not renewable")]
    NotRenewable,
    #[error("renewal failed: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("failed to store renewed response: {0}")]
    Serialize(String),
}

/// Receiving ends of a started [`Renewer`].
pub struct RenewerChannels {
    /// Every successful renewal.
    pub renewed: mpsc::Receiver<Secret>,
    /// Terminal event. `Ok` when the secret reached the end of its life
    /// without error.
    pub done: oneshot::Receiver<Result<(), RenewalError>>,
}

/// Keeps a lease or token alive upstream until it can no longer be extended.
///
/// The renewer sleeps about two thirds of the lease duration, renews with the
/// original duration as increment, and publishes the result. Once the
/// upstream stops extending the secret it waits out the remaining lifetime
/// and reports completion. A secret with a zero lease duration never expires
/// and is never renewed.
///
/// Dropping the renewer stops it.
#[derive(Debug)]
pub struct Renewer {
    upstream: Arc<dyn Upstream>,
    secret: Secret,
    cancel: CancellationToken,
}

impl Renewer {
    /// Creates a renewer that stops when `parent` is cancelled.
    pub fn new(upstream: Arc<dyn Upstream>, secret: Secret, parent: &CancellationToken) -> Self {
        Self {
            upstream,
            secret,
            cancel: parent.child_token(),
        }
    }

    pub fn start(&self) -> RenewerChannels {
        let (renewed_tx, renewed) = mpsc::channel(RENEWED_CHANNEL_CAPACITY);
        let (done_tx, done) = oneshot::channel();

        let upstream = self.upstream.clone();
        let secret = self.secret.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = renew_loop(upstream, secret, renewed_tx) => result,
            };
            // the worker may already be gone
            let _ = done_tx.send(result);
        });

        RenewerChannels { renewed, done }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Renewer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn renew_loop(
    upstream: Arc<dyn Upstream>,
    secret: Secret,
    renewed_tx: mpsc::Sender<Secret>,
) -> Result<(), RenewalError> {
    let increment = secret.ttl();
    if increment == 0 {
        std::future::pending::<()>().await;
    }
    if !secret.is_renewable() {
        return Err(RenewalError::NotRenewable);
    }

    let mut ttl = increment;
    loop {
        tokio::time::sleep(renew_sleep(ttl)).await;

        let renewed = match secret.client_token() {
            Some(token) => upstream.renew_token_as_self(token, increment).await?,
            None => upstream.renew_lease(&secret.lease_id, increment).await?,
        };
        let renewable = renewed.is_renewable();
        ttl = renewed.ttl();

        tracing::debug!("[agent] renewed secret, new ttl {}s", ttl);

        if renewed_tx.send(renewed).await.is_err() {
            return Ok(());
        }

        if !renewable || (ttl as f64) <= grace(increment) {
            tracing::debug!("[agent] secret can no longer be extended, waiting {}s", ttl);
            tokio::time::sleep(Duration::from_secs(ttl)).await;
            return Ok(());
        }
    }
}

/// Two thirds of `ttl` seconds, minus up to a tenth of that as jitter.
fn renew_sleep(ttl: u64) -> Duration {
    let base = ttl as f64 * 2.0 / 3.0;
    let jitter = base * RENEW_JITTER_FRACTION * fastrand::f64();
    Duration::from_secs_f64((base - jitter).max(0.0))
}

/// Remaining lifetime, in seconds, below which renewing is pointless: 10% of
/// the increment plus up to another 10% of jitter.
fn grace(increment: u64) -> f64 {
    let base = increment as f64 * 0.1;
    base + base * fastrand::f64()
}

/// Keeps the record identified by `ctx` in sync with its secret's upstream
/// lifetime, then evicts it.
#[tracing::instrument(skip_all, fields(id = ctx.index_id().unwrap_or_default()))]
pub(crate) async fn run_worker(
    db: CacheDb,
    ctx: ContextInfo,
    upstream: Arc<dyn Upstream>,
    secret: Secret,
) {
    let Some(id) = ctx.index_id().map(str::to_string) else {
        tracing::error!("[agent] renewal context carries no record ID");
        return;
    };

    let renewer = Renewer::new(upstream, secret, ctx.token());
    let RenewerChannels {
        mut renewed,
        mut done,
    } = renewer.start();

    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                tracing::debug!("[agent] renewal context cancelled");
                break;
            }
            _ = ctx.done() => {
                tracing::debug!("[agent] renewal stopped");
                break;
            }
            result = &mut done => {
                match result {
                    Ok(Ok(())) => tracing::debug!("[agent] secret reached end of life"),
                    Ok(Err(err)) => tracing::warn!("[agent] renewer stopped: {}", err),
                    Err(_) => tracing::debug!("[agent] renewer went away"),
                }
                break;
            }
            Some(secret) = renewed.recv() => {
                match store_renewal(&db, &id, &ctx, &secret).await {
                    Ok(true) => tracing::debug!("[agent] stored renewed response"),
                    Ok(false) => {
                        tracing::debug!("[agent] record superseded");
                        break;
                    }
                    Err(err) => {
                        tracing::error!("[agent] {}", err);
                        break;
                    }
                }
            }
        }
    }

    renewer.stop();
    if db.evict_with_context(&id, &ctx).await {
        tracing::debug!("[agent] evicted record");
    }
}

/// Keeps a record that is never renewed until its context ends, then evicts
/// it.
pub(crate) async fn run_watcher(db: CacheDb, ctx: ContextInfo) {
    let Some(id) = ctx.index_id().map(str::to_string) else {
        tracing::error!("[agent] watch context carries no record ID");
        return;
    };

    tokio::select! {
        _ = ctx.cancelled() => {}
        _ = ctx.done() => {}
    }

    db.evict_with_context(&id, &ctx).await;
}

/// Writes the renewed lifetime into the stored response. Returns false when
/// the record is gone or now belongs to another context.
async fn store_renewal(
    db: &CacheDb,
    id: &str,
    ctx: &ContextInfo,
    renewed: &Secret,
) -> Result<bool, RenewalError> {
    let current = db
        .get(IndexName::Id, &[id])
        .await
        .map_err(|err| RenewalError::Serialize(err.to_string()))?;
    let Some(current) = current.filter(|index| index.renew_ctx.same_context(ctx)) else {
        return Ok(false);
    };

    let response = merge_renewal(&current.response, renewed)?;

    db.update(id, |index| {
        if !index.renew_ctx.same_context(ctx) {
            return false;
        }
        index.response = response;
        true
    })
    .await
    .map_err(|err| RenewalError::Serialize(err.to_string()))
}

/// Returns `stored` with the lease duration and renewable flag of `renewed`.
pub(crate) fn merge_renewal(stored: &Bytes, renewed: &Secret) -> Result<Bytes, RenewalError> {
    let mut response =
        decode_response(stored).map_err(|err| RenewalError::Serialize(err.to_string()))?;
    let mut body: Map<String, Value> = serde_json::from_slice(&response.body)
        .map_err(|err| RenewalError::Serialize(err.to_string()))?;

    match renewed.auth.as_ref().filter(|auth| !auth.client_token.is_empty()) {
        Some(auth) => {
            if let Some(Value::Object(stored_auth)) = body.get_mut("auth") {
                stored_auth.insert("lease_duration".to_string(), auth.lease_duration.into());
                stored_auth.insert("renewable".to_string(), auth.renewable.into());
            }
        }
        None => {
            body.insert("lease_duration".to_string(), renewed.lease_duration.into());
            body.insert("renewable".to_string(), renewed.renewable.into());
        }
    }

    response.body = serde_json::to_vec(&body)
        .map_err(|err| RenewalError::Serialize(err.to_string()))?
        .into();

    encode_response(&response).map_err(|err| RenewalError::Serialize(err.to_string()))
}
