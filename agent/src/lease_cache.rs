// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! The lease cache.
//!
//! [`LeaseCache::send`] fingerprints a request and answers it from the cache
//! when possible. Otherwise the request goes upstream, and the response is
//! cached when it carries a renewable lease or token. Every cached record
//! runs a renewal worker whose context hangs off the context of the token
//! that created the secret:
//!
//! ```text
//! root
//!  └── base
//!       ├── token T1 (login or orphan)
//!       │    ├── lease L1 (created with T1)
//!       │    └── token T2 (child of T1)
//!       │         └── lease L2 (created with T2)
//!       └── ...
//! ```
//!
//! Cancelling a context stops the workers below it, and each worker evicts
//! its own record. Revocation requests proxied through the cache, and the
//! admin cache-clear endpoint, work by cancelling the right contexts.

use std::sync::Arc;

use axum::http::StatusCode;
use bytes::Bytes;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::cachedb::{CacheDb, ContextInfo, Index, IndexName};
use crate::classify::{Verdict, classify, parse_secret};
use crate::constants::{AUTO_AUTH_RANDOM_LENGTH, ID_LOCK_COUNT, ROOT_NAMESPACE};
use crate::errors::AppError;
use crate::fingerprint::compute_index_id;
use crate::models::CacheClearRequest;
use crate::namespace;
use crate::protocol::{decode_response, encode_response, response_age};
use crate::proxy::{SendRequest, SendResponse};
use crate::renewal::{run_watcher, run_worker};
use crate::revocation::{Revocation, derive_namespace_and_revocation_path};
use crate::upstream::Upstream;

pub struct LeaseCacheConfig {
    pub upstream: Arc<dyn Upstream>,
    /// Cancelling this token stops every renewal worker.
    pub base_context: CancellationToken,
}

/// A validated cache-clear request.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheClearInput {
    /// Every record whose request path starts with `path` in `namespace`.
    RequestPath { namespace: String, path: String },
    Token(String),
    TokenAccessor(String),
    Lease(String),
    All,
}

impl TryFrom<CacheClearRequest> for CacheClearInput {
    type Error = AppError;

    fn try_from(request: CacheClearRequest) -> Result<Self, Self::Error> {
        let CacheClearRequest {
            clear_type,
            value,
            namespace,
        } = request;

        if clear_type == "all" {
            return Ok(Self::All);
        }
        if !matches!(
            clear_type.as_str(),
            "request_path" | "token" | "token_accessor" | "lease"
        ) {
            return Err(AppError::InvalidClearType(clear_type));
        }
        if value.is_empty() {
            return Err(AppError::InvalidClearValue(clear_type));
        }

        Ok(match clear_type.as_str() {
            "request_path" => {
                let namespace = namespace::canonicalize(&namespace);
                Self::RequestPath {
                    namespace: if namespace.is_empty() {
                        ROOT_NAMESPACE.to_string()
                    } else {
                        namespace
                    },
                    path: value,
                }
            }
            "token" => Self::Token(value),
            "token_accessor" => Self::TokenAccessor(value),
            _ => Self::Lease(value),
        })
    }
}

pub struct LeaseCache {
    upstream: Arc<dyn Upstream>,
    db: CacheDb,
    root: CancellationToken,
    base: RwLock<ContextInfo>,
    id_locks: Vec<RwLock<()>>,
    auto_auth_token: RwLock<Option<String>>,
}

impl LeaseCache {
    pub fn new(config: LeaseCacheConfig) -> Self {
        let base = ContextInfo::new(&config.base_context);

        Self {
            upstream: config.upstream,
            db: CacheDb::new(),
            root: config.base_context,
            base: RwLock::new(base),
            id_locks: (0..ID_LOCK_COUNT).map(|_| RwLock::new(())).collect(),
            auto_auth_token: RwLock::new(None),
        }
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    /// Answers `request` from the cache or the upstream.
    ///
    /// Dropping the returned future before the upstream answers abandons the
    /// request without caching anything. Once the upstream has confirmed a
    /// revocation, the matching evictions run to completion on their own
    /// task even if the future is dropped.
    #[tracing::instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: SendRequest) -> Result<SendResponse, AppError> {
        let id = compute_index_id(&request)?;
        let lock = self.lock_for(&id);

        {
            let _guard = lock.read().await;
            if let Some(response) = self.cached_response(&id).await? {
                return Ok(response);
            }
        }

        let _guard = lock.write().await;
        if let Some(response) = self.cached_response(&id).await? {
            return Ok(response);
        }

        tracing::debug!("[agent] forwarding request, id: {}", id);
        let response = self.upstream.send(&request).await?;

        if self.handle_revocation_request(&request, &response).await? {
            return Ok(response);
        }

        if response.status.as_u16() >= StatusCode::MULTIPLE_CHOICES.as_u16() || !response.is_json()
        {
            return Ok(response);
        }

        let Some(secret) = parse_secret(&response.body)? else {
            tracing::debug!("[agent] pass-through response, empty body");
            return Ok(response);
        };

        let mut index = Index {
            id: id.clone(),
            namespace: namespace::from_headers(&request.headers),
            request_path: request.path.clone(),
            token: String::new(),
            token_accessor: String::new(),
            token_parent: String::new(),
            lease: String::new(),
            lease_token: String::new(),
            response: Bytes::new(),
            renew_ctx: self.base.read().await.clone(),
        };

        index.renew_ctx = match classify(&request.path, &secret)? {
            Verdict::PassThrough(reason) => {
                tracing::debug!("[agent] pass-through response, {}", reason);
                return Ok(response);
            }
            Verdict::Lease { lease_id } => {
                if self.db.get(IndexName::Lease, &[lease_id.as_str()]).await?.is_some() {
                    tracing::debug!("[agent] pass-through response, lease already cached");
                    return Ok(response);
                }
                let Some(parent) = self.db.get(IndexName::Token, &[request.token.as_str()]).await? else {
                    tracing::debug!("[agent] pass-through lease response, token not managed");
                    return Ok(response);
                };

                index.lease = lease_id;
                index.lease_token = request.token.clone();
                parent.renew_ctx.child()
            }
            Verdict::Auth {
                client_token,
                accessor,
                inherit_parent,
            } => {
                if self.db.get(IndexName::Token, &[client_token.as_str()]).await?.is_some() {
                    tracing::debug!("[agent] pass-through response, token already cached");
                    return Ok(response);
                }

                let ctx = if inherit_parent {
                    let Some(parent) = self.db.get(IndexName::Token, &[request.token.as_str()]).await?
                    else {
                        tracing::debug!(
                            "[agent] pass-through auth response, parent token not managed"
                        );
                        return Ok(response);
                    };
                    index.token_parent = request.token.clone();
                    parent.renew_ctx.child()
                } else {
                    index.renew_ctx.child()
                };

                index.token = client_token;
                index.token_accessor = accessor;
                ctx
            }
        }
        .with_index_id(&id);

        index.response = match encode_response(&response) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!("[agent] pass-through response, {:?}", err);
                return Ok(response);
            }
        };

        let ctx = index.renew_ctx.clone();
        self.db.set(index).await?;

        let upstream = self.upstream.clone_with(&request.token, &request.headers);
        tokio::spawn(run_worker(self.db.clone(), ctx, upstream, secret));

        tracing::debug!("[agent] cached response, id: {}", id);

        Ok(response)
    }

    fn lock_for(&self, id: &str) -> &RwLock<()> {
        let stripe = id
            .get(..2)
            .and_then(|prefix| usize::from_str_radix(prefix, 16).ok())
            .unwrap_or_default();
        &self.id_locks[stripe % self.id_locks.len()]
    }

    /// Stored response for `id`, unless the record is being torn down.
    async fn cached_response(&self, id: &str) -> Result<Option<SendResponse>, AppError> {
        let Some(index) = self.db.get(IndexName::Id, &[id]).await? else {
            return Ok(None);
        };
        if index.renew_ctx.is_cancelled() || index.renew_ctx.is_done() {
            return Ok(None);
        }

        let mut response = decode_response(&index.response)?;
        response.cache_meta.hit = true;
        response.cache_meta.age = response_age(&response.headers);

        tracing::debug!(
            "[agent] returning cached response, id: {}, age: {:?}",
            id,
            response.cache_meta.age
        );

        Ok(Some(response))
    }

    /// Evicts whatever a successful revocation request invalidated. Returns
    /// true when `request` was a revocation.
    #[tracing::instrument(skip_all, fields(path = %request.path))]
    pub async fn handle_revocation_request(
        &self,
        request: &SendRequest,
        response: &SendResponse,
    ) -> Result<bool, AppError> {
        if response.status != StatusCode::NO_CONTENT {
            return Ok(false);
        }

        let header_namespace = namespace::from_headers(&request.headers);
        let (_, path) = derive_namespace_and_revocation_path(&request.path, &header_namespace);
        let Some(revocation) = Revocation::parse(&path, &request.body)? else {
            return Ok(false);
        };

        tracing::debug!("[agent] handling revocation {:?}", path);

        let task = tokio::spawn(evict_revoked(
            self.db.clone(),
            revocation,
            request.token.clone(),
        ));
        task.await.map_err(|err| {
            tracing::error!("[agent] revocation eviction failed: {:?}", err);
            AppError::InternalServerError
        })??;

        Ok(true)
    }

    #[tracing::instrument(skip_all)]
    pub async fn handle_cache_clear(&self, input: CacheClearInput) -> Result<(), AppError> {
        match input {
            CacheClearInput::RequestPath { namespace, path } => {
                let indexes = self
                    .db
                    .get_by_prefix(IndexName::RequestPath, &[namespace.as_str(), path.as_str()])
                    .await?;
                for index in indexes {
                    index.renew_ctx.cancel();
                }
            }
            CacheClearInput::Token(token) => cancel_one(&self.db, IndexName::Token, &token).await?,
            CacheClearInput::TokenAccessor(accessor) => {
                cancel_one(&self.db, IndexName::TokenAccessor, &accessor).await?
            }
            CacheClearInput::Lease(lease) => cancel_one(&self.db, IndexName::Lease, &lease).await?,
            CacheClearInput::All => {
                {
                    let mut base = self.base.write().await;
                    base.cancel();
                    *base = ContextInfo::new(&self.root);
                    self.db.flush().await;
                }
                tracing::info!("[agent] cleared the cache");

                let token = self.auto_auth_token.read().await.clone();
                if let Some(token) = token {
                    self.insert_auto_auth_token(&token).await?;
                }
            }
        }

        Ok(())
    }

    /// Makes the agent's own token known to the cache so leases and child
    /// tokens created with it are cached. A previous registration of the
    /// same token, and everything derived from it, is dropped.
    pub async fn register_auto_auth_token(&self, token: &str) -> Result<(), AppError> {
        if token.is_empty() {
            return Ok(());
        }

        *self.auto_auth_token.write().await = Some(token.to_string());
        self.insert_auto_auth_token(token).await
    }

    async fn insert_auto_auth_token(&self, token: &str) -> Result<(), AppError> {
        if let Some(existing) = self.db.get(IndexName::Token, &[token]).await? {
            existing.renew_ctx.cancel();
            self.db.evict(IndexName::Id, &[existing.id.as_str()]).await?;
        }

        let id = random_string(AUTO_AUTH_RANDOM_LENGTH);
        let ctx = self.base.read().await.child().with_index_id(&id);
        let index = Index {
            id: id.clone(),
            namespace: ROOT_NAMESPACE.to_string(),
            request_path: format!("auto-auth-token/{}", random_string(AUTO_AUTH_RANDOM_LENGTH)),
            token: token.to_string(),
            token_accessor: String::new(),
            token_parent: String::new(),
            lease: String::new(),
            lease_token: String::new(),
            response: Default::default(),
            renew_ctx: ctx.clone(),
        };
        self.db.set(index).await?;

        tokio::spawn(run_watcher(self.db.clone(), ctx));

        tracing::info!("[agent] registered auto-auth token");

        Ok(())
    }
}

/// Cancels the contexts a confirmed revocation invalidated. `token` is the
/// token the revocation request was sent with.
async fn evict_revoked(db: CacheDb, revocation: Revocation, token: String) -> Result<(), AppError> {
    match revocation {
        Revocation::Token(token) => cancel_one(&db, IndexName::Token, &token).await,
        Revocation::TokenSelf if token.is_empty() => Ok(()),
        Revocation::TokenSelf => cancel_one(&db, IndexName::Token, &token).await,
        Revocation::Accessor(accessor) => {
            cancel_one(&db, IndexName::TokenAccessor, &accessor).await
        }
        Revocation::Orphan(token) => revoke_orphan(&db, &token).await,
        Revocation::Lease(lease) => cancel_one(&db, IndexName::Lease, &lease).await,
        Revocation::LeasePrefix(prefix) => revoke_lease_prefix(&db, &prefix, &token).await,
    }
}

async fn cancel_one(db: &CacheDb, name: IndexName, key: &str) -> Result<(), AppError> {
    match db.get(name, &[key]).await? {
        Some(index) => index.renew_ctx.cancel(),
        None => tracing::debug!("[agent] nothing cached for {}", name),
    }
    Ok(())
}

/// Stops the token's own worker and the workers of its leases, leaving its
/// child tokens alive and detached from it.
async fn revoke_orphan(db: &CacheDb, token: &str) -> Result<(), AppError> {
    for index in db.get_by_prefix(IndexName::LeaseToken, &[token]).await? {
        if index.lease_token == token {
            index.renew_ctx.cancel();
        }
    }

    if let Some(index) = db.get(IndexName::Token, &[token]).await? {
        index.renew_ctx.close_done();
    }

    for index in db.get_by_prefix(IndexName::TokenParent, &[token]).await? {
        if index.token_parent != token {
            continue;
        }
        db.update(&index.id, |child| {
            if child.token_parent != token {
                return false;
            }
            child.token_parent.clear();
            true
        })
        .await?;
    }

    Ok(())
}

/// Stops the workers of every lease under `prefix` that lives in the
/// requesting token's namespace.
async fn revoke_lease_prefix(db: &CacheDb, prefix: &str, token: &str) -> Result<(), AppError> {
    let (_, token_namespace) = namespace::split_id_from_string(token);

    for index in db.get_by_prefix(IndexName::Lease, &[prefix]).await? {
        let (_, lease_namespace) = namespace::split_id_from_string(&index.lease);
        if lease_namespace == token_namespace {
            index.renew_ctx.cancel();
        }
    }

    Ok(())
}

fn random_string(length: usize) -> String {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(length)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockUpstream, eventually};
    use axum::http::{HeaderMap, Method};
    use serde_json::Value;

    const T1: &str = "s.t1";

    fn handler(request: &SendRequest) -> SendResponse {
        let path = request.path.as_str();
        if crate::constants::REVOCATION_PATHS
            .iter()
            .any(|revocation| path.contains(revocation))
        {
            return SendResponse::new(StatusCode::NO_CONTENT, HeaderMap::new(), Bytes::new());
        }

        match path {
            "/v1/auth/token/create" => {
                let name = serde_json::from_slice::<Value>(&request.body)
                    .ok()
                    .and_then(|body| body["name"].as_str().map(str::to_string))
                    .unwrap_or_else(|| "t2".to_string());
                SendResponse::json(
                    StatusCode::OK,
                    format!(
                        r#"{{"auth":{{"client_token":"s.{name}","accessor":"acc-{name}","lease_duration":3600,"renewable":true,"orphan":{}}}}}"#,
                        name.starts_with("orphan")
                    ),
                )
            }
            "/v1/auth/token/renew-self" => SendResponse::json(
                StatusCode::OK,
                format!(
                    r#"{{"auth":{{"client_token":"{}","lease_duration":3600,"renewable":true}}}}"#,
                    request.token
                ),
            ),
            "/v1/sys/mounts" => SendResponse::json(StatusCode::OK, r#"{"data":{"kv/":{}}}"#),
            "/v1/sys/health" => {
                let mut headers = HeaderMap::new();
                headers.insert(
                    axum::http::header::CONTENT_TYPE,
                    axum::http::HeaderValue::from_static("text/plain"),
                );
                SendResponse::new(StatusCode::OK, headers, Bytes::from_static(b"ok"))
            }
            "/v1/kv/missing" => SendResponse::json(StatusCode::NOT_FOUND, r#"{"errors":[]}"#),
            _ if path.starts_with("/v1/kv/") => {
                let lease = path.trim_start_matches("/v1/");
                SendResponse::json(
                    StatusCode::OK,
                    format!(
                        r#"{{"lease_id":"{lease}","lease_duration":3600,"renewable":{},"data":{{"v":"x"}}}}"#,
                        !path.contains("bar")
                    ),
                )
            }
            _ => SendResponse::json(StatusCode::OK, "{}"),
        }
    }

    async fn cache() -> (LeaseCache, MockUpstream) {
        let upstream = MockUpstream::with_handler(handler);
        let cache = LeaseCache::new(LeaseCacheConfig {
            upstream: Arc::new(upstream.clone()),
            base_context: CancellationToken::new(),
        });
        cache.register_auto_auth_token(T1).await.unwrap();
        (cache, upstream)
    }

    async fn send(cache: &LeaseCache, request: SendRequest) -> SendResponse {
        cache.send(request).await.unwrap()
    }

    fn get(path: &str, token: &str) -> SendRequest {
        SendRequest::new(Method::GET, path).with_token(token)
    }

    fn post(path: &str, token: &str, body: &str) -> SendRequest {
        SendRequest::new(Method::POST, path)
            .with_token(token)
            .with_body(body.to_string())
    }

    fn calls_to(upstream: &MockUpstream, path: &str) -> usize {
        upstream
            .sent_requests()
            .iter()
            .filter(|request| request.path == path)
            .count()
    }

    async fn has(cache: &LeaseCache, name: IndexName, key: &str) -> bool {
        cache.db().get(name, &[key]).await.unwrap().is_some()
    }

    async fn evicted(cache: &LeaseCache, name: IndexName, key: &str) {
        eventually(|| async { !has(cache, name, key).await }).await;
    }

    /// T1 (auto-auth) -> T2 (child), L1 under T1, L2 under T2.
    async fn populate(cache: &LeaseCache) {
        send(cache, post("/v1/auth/token/create", T1, "{}")).await;
        send(cache, get("/v1/kv/l1", T1)).await;
        send(cache, get("/v1/kv/l2", "s.t2")).await;

        assert!(has(cache, IndexName::Token, "s.t2").await);
        assert!(has(cache, IndexName::Lease, "kv/l1").await);
        assert!(has(cache, IndexName::Lease, "kv/l2").await);
    }

    #[tokio::test]
    async fn test_cache_hit_on_repeat() {
        let (cache, upstream) = cache().await;

        let first = send(&cache, get("/v1/kv/foo", T1)).await;
        let second = send(&cache, get("/v1/kv/foo", T1)).await;

        assert_eq!(upstream.send_calls(), 1);
        assert_eq!(first.body, second.body);
        assert_eq!(first.status, second.status);
        assert!(!first.cache_meta.hit);
        assert!(second.cache_meta.hit);

        let index = cache.db().get(IndexName::Lease, &["kv/foo"]).await.unwrap().unwrap();
        assert_eq!(index.lease_token, T1);
        assert_eq!(index.namespace, "root/");
        assert_eq!(index.request_path, "/v1/kv/foo");
    }

    #[tokio::test]
    async fn test_non_renewable_pass_through() {
        let (cache, upstream) = cache().await;

        let first = send(&cache, get("/v1/kv/bar", T1)).await;
        let second = send(&cache, get("/v1/kv/bar", T1)).await;

        assert_eq!(upstream.send_calls(), 2);
        assert_eq!(first.body, second.body);
        assert!(!has(&cache, IndexName::Lease, "kv/bar").await);
    }

    #[tokio::test]
    async fn test_non_secret_pass_through() {
        let (cache, upstream) = cache().await;

        send(&cache, get("/v1/sys/mounts", T1)).await;
        send(&cache, get("/v1/sys/mounts", T1)).await;
        send(&cache, get("/v1/sys/health", T1)).await;
        send(&cache, get("/v1/sys/health", T1)).await;
        let missing = send(&cache, get("/v1/kv/missing", T1)).await;

        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert_eq!(upstream.send_calls(), 5);
        assert_eq!(cache.db().len().await, 1);
    }

    #[tokio::test]
    async fn test_lease_of_unmanaged_token_is_not_cached() {
        let (cache, upstream) = cache().await;

        send(&cache, get("/v1/kv/foo", "s.stranger")).await;
        send(&cache, get("/v1/kv/foo", "s.stranger")).await;

        assert_eq!(upstream.send_calls(), 2);
        assert!(!has(&cache, IndexName::Lease, "kv/foo").await);
    }

    #[tokio::test]
    async fn test_tokens_get_distinct_fingerprints() {
        let (cache, upstream) = cache().await;
        populate(&cache).await;

        // same path under another token goes upstream again
        send(&cache, get("/v1/kv/l1", "s.t2")).await;
        assert_eq!(calls_to(&upstream, "/v1/kv/l1"), 2);
    }

    #[tokio::test]
    async fn test_child_token_context_follows_parent() {
        let (cache, _) = cache().await;
        populate(&cache).await;

        let child = cache.db().get(IndexName::Token, &["s.t2"]).await.unwrap().unwrap();
        assert_eq!(child.token_parent, T1);
        assert_eq!(child.token_accessor, "acc-t2");

        let orphan_body = r#"{"name":"orphan1"}"#;
        send(&cache, post("/v1/auth/token/create", T1, orphan_body)).await;
        let orphan = cache
            .db()
            .get(IndexName::Token, &["s.orphan1"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(orphan.token_parent, "");

        let parent = cache.db().get(IndexName::Token, &[T1]).await.unwrap().unwrap();
        parent.renew_ctx.cancel();
        assert!(child.renew_ctx.is_cancelled());
        assert!(!orphan.renew_ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_of_unmanaged_token_is_not_cached() {
        let (cache, _) = cache().await;

        send(&cache, post("/v1/auth/token/create", "s.stranger", "{}")).await;

        assert!(!has(&cache, IndexName::Token, "s.t2").await);
    }

    #[tokio::test]
    async fn test_already_managed_token_passes_through() {
        let (cache, upstream) = cache().await;
        populate(&cache).await;
        let records = cache.db().len().await;

        send(&cache, post("/v1/auth/token/renew-self", "s.t2", "{}")).await;
        send(&cache, post("/v1/auth/token/renew-self", "s.t2", "{}")).await;

        assert_eq!(calls_to(&upstream, "/v1/auth/token/renew-self"), 2);
        assert_eq!(cache.db().len().await, records);
    }

    #[tokio::test]
    async fn test_revoke_self_cascades() {
        let (cache, _) = cache().await;
        populate(&cache).await;

        let response = send(&cache, post("/v1/auth/token/revoke-self", T1, "")).await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);

        evicted(&cache, IndexName::Token, T1).await;
        evicted(&cache, IndexName::Lease, "kv/l1").await;
        evicted(&cache, IndexName::Token, "s.t2").await;
        evicted(&cache, IndexName::Lease, "kv/l2").await;
    }

    #[tokio::test]
    async fn test_revoke_token_by_body() {
        let (cache, upstream) = cache().await;
        populate(&cache).await;

        send(&cache, post("/v1/auth/token/revoke", T1, r#"{"token":"s.t2"}"#)).await;

        evicted(&cache, IndexName::Token, "s.t2").await;
        evicted(&cache, IndexName::Lease, "kv/l2").await;
        assert!(has(&cache, IndexName::Token, T1).await);
        assert!(has(&cache, IndexName::Lease, "kv/l1").await);

        // replay goes upstream
        send(&cache, get("/v1/kv/l2", "s.t2")).await;
        assert_eq!(calls_to(&upstream, "/v1/kv/l2"), 2);
    }

    #[tokio::test]
    async fn test_revoke_accessor() {
        let (cache, _) = cache().await;
        populate(&cache).await;

        send(
            &cache,
            post("/v1/auth/token/revoke-accessor", T1, r#"{"accessor":"acc-t2"}"#),
        )
        .await;

        evicted(&cache, IndexName::Token, "s.t2").await;
        evicted(&cache, IndexName::Lease, "kv/l2").await;
        assert!(has(&cache, IndexName::Lease, "kv/l1").await);
    }

    #[tokio::test]
    async fn test_revoke_orphan_preserves_children() {
        let (cache, _) = cache().await;
        populate(&cache).await;

        send(
            &cache,
            post("/v1/auth/token/revoke-orphan", T1, r#"{"token":"s.t2"}"#),
        )
        .await;

        evicted(&cache, IndexName::Token, "s.t2").await;
        evicted(&cache, IndexName::Lease, "kv/l2").await;
        assert!(has(&cache, IndexName::Token, T1).await);
        assert!(has(&cache, IndexName::Lease, "kv/l1").await);
    }

    #[tokio::test]
    async fn test_revoke_orphan_detaches_child_tokens() {
        let (cache, _) = cache().await;
        populate(&cache).await;
        send(&cache, post("/v1/auth/token/create", T1, r#"{"name":"t3"}"#)).await;
        assert!(has(&cache, IndexName::Token, "s.t3").await);

        send(
            &cache,
            post("/v1/auth/token/revoke-orphan", T1, r#"{"token":"s.t1"}"#),
        )
        .await;

        evicted(&cache, IndexName::Token, T1).await;
        evicted(&cache, IndexName::Lease, "kv/l1").await;
        for child in ["s.t2", "s.t3"] {
            let index = cache.db().get(IndexName::Token, &[child]).await.unwrap().unwrap();
            assert_eq!(index.token_parent, "");
            assert!(!index.renew_ctx.is_cancelled());
        }
        assert!(has(&cache, IndexName::Lease, "kv/l2").await);
        assert!(!has(&cache, IndexName::TokenParent, T1).await);
    }

    #[tokio::test]
    async fn test_revoke_lease_with_namespace_header() {
        let (cache, upstream) = cache().await;
        let request = get("/v1/kv/l3", T1).with_header("x-vault-namespace", "ns1");

        send(&cache, request.clone()).await;
        let index = cache.db().get(IndexName::Lease, &["kv/l3"]).await.unwrap().unwrap();
        assert_eq!(index.namespace, "ns1/");

        let revoke = SendRequest::new(Method::PUT, "/v1/sys/leases/revoke")
            .with_token(T1)
            .with_header("x-vault-namespace", "ns1/")
            .with_body(r#"{"lease_id":"kv/l3"}"#);
        let response = send(&cache, revoke).await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);

        evicted(&cache, IndexName::Lease, "kv/l3").await;
        send(&cache, request).await;
        assert_eq!(calls_to(&upstream, "/v1/kv/l3"), 2);
    }

    #[tokio::test]
    async fn test_revoke_lease_prefix() {
        let (cache, _) = cache().await;
        send(&cache, get("/v1/kv/app/one", T1)).await;
        send(&cache, get("/v1/kv/app/two", T1)).await;
        send(&cache, get("/v1/kv/other", T1)).await;

        send(
            &cache,
            SendRequest::new(Method::PUT, "/v1/sys/leases/revoke-prefix/kv/app").with_token(T1),
        )
        .await;

        evicted(&cache, IndexName::Lease, "kv/app/one").await;
        evicted(&cache, IndexName::Lease, "kv/app/two").await;
        assert!(has(&cache, IndexName::Lease, "kv/other").await);
    }

    #[tokio::test]
    async fn test_revoke_force_respects_token_namespace() {
        let (cache, _) = cache().await;
        send(&cache, get("/v1/kv/app/one", T1)).await;

        // a token from another namespace cannot force-revoke root leases
        send(
            &cache,
            SendRequest::new(Method::PUT, "/v1/sys/leases/revoke-force/kv").with_token("s.abc.ns9"),
        )
        .await;
        assert!(has(&cache, IndexName::Lease, "kv/app/one").await);

        send(
            &cache,
            SendRequest::new(Method::PUT, "/v1/sys/leases/revoke-force/kv").with_token(T1),
        )
        .await;
        evicted(&cache, IndexName::Lease, "kv/app/one").await;
    }

    #[tokio::test]
    async fn test_malformed_revocation_body() {
        let (cache, _) = cache().await;
        populate(&cache).await;

        let err = cache
            .send(post("/v1/auth/token/revoke", T1, "not json"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::RevocationBodyError(_)));
        assert!(has(&cache, IndexName::Token, "s.t2").await);
    }

    #[tokio::test]
    async fn test_clear_request_path() {
        let (cache, _) = cache().await;
        send(&cache, get("/v1/kv/app/one", T1)).await;
        send(&cache, get("/v1/kv/app/two", T1)).await;
        send(&cache, get("/v1/kv/other", T1)).await;

        cache
            .handle_cache_clear(CacheClearInput::RequestPath {
                namespace: "root/".to_string(),
                path: "/v1/kv/app".to_string(),
            })
            .await
            .unwrap();

        evicted(&cache, IndexName::Lease, "kv/app/one").await;
        evicted(&cache, IndexName::Lease, "kv/app/two").await;
        assert!(has(&cache, IndexName::Lease, "kv/other").await);
    }

    #[tokio::test]
    async fn test_clear_lease_and_unknown_keys() {
        let (cache, _) = cache().await;
        populate(&cache).await;

        cache
            .handle_cache_clear(CacheClearInput::Token("s.unknown".to_string()))
            .await
            .unwrap();
        cache
            .handle_cache_clear(CacheClearInput::Lease("kv/l1".to_string()))
            .await
            .unwrap();

        evicted(&cache, IndexName::Lease, "kv/l1").await;
        assert!(has(&cache, IndexName::Token, T1).await);
        assert!(has(&cache, IndexName::Lease, "kv/l2").await);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (cache, upstream) = cache().await;
        populate(&cache).await;

        cache.handle_cache_clear(CacheClearInput::All).await.unwrap();

        assert!(!has(&cache, IndexName::Token, "s.t2").await);
        assert!(!has(&cache, IndexName::Lease, "kv/l1").await);
        assert!(!has(&cache, IndexName::Lease, "kv/l2").await);

        // the auto-auth token survives under the new base
        let token = cache.db().get(IndexName::Token, &[T1]).await.unwrap().unwrap();
        assert!(!token.renew_ctx.is_cancelled());

        send(&cache, get("/v1/kv/l1", T1)).await;
        assert_eq!(calls_to(&upstream, "/v1/kv/l1"), 2);
        assert!(has(&cache, IndexName::Lease, "kv/l1").await);
    }

    #[tokio::test]
    async fn test_register_auto_auth_token_replaces_previous() {
        let (cache, _) = cache().await;
        send(&cache, get("/v1/kv/foo", T1)).await;
        let old = cache.db().get(IndexName::Token, &[T1]).await.unwrap().unwrap();

        cache.register_auto_auth_token(T1).await.unwrap();

        let new = cache.db().get(IndexName::Token, &[T1]).await.unwrap().unwrap();
        assert_ne!(old.id, new.id);
        assert!(old.renew_ctx.is_cancelled());
        assert!(!new.renew_ctx.is_cancelled());
        assert_eq!(new.id.len(), AUTO_AUTH_RANDOM_LENGTH);
        evicted(&cache, IndexName::Lease, "kv/foo").await;
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_forward_once() {
        let (cache, upstream) = cache().await;
        let cache = Arc::new(cache);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { send(&cache, get("/v1/kv/foo", T1)).await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().status, StatusCode::OK);
        }

        assert_eq!(upstream.send_calls(), 1);
    }

    #[tokio::test]
    async fn test_revocation_survives_dropped_request() {
        let db = Arc::new(std::sync::Mutex::new(None::<CacheDb>));
        let held = Arc::new(std::sync::Mutex::new(None::<Box<dyn std::any::Any + Send>>));
        let upstream = MockUpstream::with_handler({
            let db = db.clone();
            let held = held.clone();
            move |request: &SendRequest| {
                if request.path == "/v1/sys/leases/revoke" {
                    // keep the table locked so the eviction has to wait
                    let guard = db.lock().unwrap().as_ref().and_then(CacheDb::try_lock_table);
                    *held.lock().unwrap() = guard;
                }
                handler(request)
            }
        });
        let cache = Arc::new(LeaseCache::new(LeaseCacheConfig {
            upstream: Arc::new(upstream.clone()),
            base_context: CancellationToken::new(),
        }));
        cache.register_auto_auth_token(T1).await.unwrap();
        *db.lock().unwrap() = Some(cache.db().clone());

        send(&cache, get("/v1/kv/foo", T1)).await;
        assert!(has(&cache, IndexName::Lease, "kv/foo").await);

        let task = tokio::spawn({
            let cache = cache.clone();
            async move {
                let revoke = SendRequest::new(Method::PUT, "/v1/sys/leases/revoke")
                    .with_token(T1)
                    .with_body(r#"{"lease_id":"kv/foo"}"#);
                cache.send(revoke).await
            }
        });
        eventually(|| {
            let held = held.clone();
            async move {
                let locked = held.lock().unwrap().is_some();
                locked
            }
        })
        .await;
        tokio::task::yield_now().await;

        // the client goes away while the eviction waits on the table
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        drop(held.lock().unwrap().take());

        evicted(&cache, IndexName::Lease, "kv/foo").await;
        let replay = send(&cache, get("/v1/kv/foo", T1)).await;
        assert!(!replay.cache_meta.hit);
        assert_eq!(calls_to(&upstream, "/v1/kv/foo"), 2);
    }

    #[test]
    fn test_clear_input_from_request() {
        let input = |clear_type: &str, value: &str, namespace: &str| {
            CacheClearInput::try_from(CacheClearRequest {
                clear_type: clear_type.to_string(),
                value: value.to_string(),
                namespace: namespace.to_string(),
            })
        };

        assert_eq!(input("all", "", "").unwrap(), CacheClearInput::All);
        assert_eq!(
            input("request_path", "/v1/kv", "").unwrap(),
            CacheClearInput::RequestPath {
                namespace: "root/".to_string(),
                path: "/v1/kv".to_string()
            }
        );
        assert_eq!(
            input("request_path", "/v1/kv", "/ns1").unwrap(),
            CacheClearInput::RequestPath {
                namespace: "ns1/".to_string(),
                path: "/v1/kv".to_string()
            }
        );
        assert_eq!(
            input("token_accessor", "acc", "").unwrap(),
            CacheClearInput::TokenAccessor("acc".to_string())
        );
        assert!(matches!(
            input("bogus", "x", ""),
            Err(AppError::InvalidClearType(_))
        ));
        assert!(matches!(
            input("lease", "", ""),
            Err(AppError::InvalidClearValue(_))
        ));
    }
}
