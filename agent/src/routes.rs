// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! HTTP route handlers for the agent.
//!
//! | Method | Path | Handler | Description |
//! |--------|------|---------|-------------|
//! | PUT, POST | `/agent/v1/cache-clear` | [`cache_clear`] | Evict cached secrets |
//! | any | any other path | [`proxy`] | Forward through the lease cache |

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};

use crate::application::AppState;
use crate::constants::TOKEN_HEADER;
use crate::errors::AppError;
use crate::lease_cache::CacheClearInput;
use crate::models::CacheClearRequest;
use crate::proxy::{SendRequest, SendResponse, end_to_end_headers};

/// Forwards a client request through the lease cache.
///
/// The client's token comes from the token header, or from the agent's own
/// token when auto-auth substitution is configured. Hop-by-hop headers are
/// dropped in both directions.
///
/// # Errors
///
/// - [`AppError::UpstreamError`] - The upstream could not be reached
/// - [`AppError::RevocationBodyError`] - A revocation succeeded upstream but its
///   body could not be read back
#[tracing::instrument(skip_all, fields(method = %method, path = %uri.path()))]
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<SendResponse, AppError> {
    let client_token = headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let token = state
        .options
        .substitute_token(client_token)
        .unwrap_or(client_token)
        .to_string();

    let mut request = SendRequest::new(method, uri.path())
        .with_token(token)
        .with_body(body);
    request.headers = end_to_end_headers(&headers);
    request.query = uri.query().map(str::to_string);

    let response = state.cache.send(request).await?;

    tracing::debug!(
        "[agent] {} response, hit: {}, age: {:?}",
        response.status,
        response.cache_meta.hit,
        response.cache_meta.age
    );

    Ok(response)
}

/// Evicts cached secrets.
///
/// # Request
///
/// ```json
/// {"type": "request_path", "value": "/v1/kv", "namespace": "ns1"}
/// ```
///
/// `type` is one of `request_path`, `token`, `token_accessor`, `lease` or
/// `all`. `value` is required for every type but `all`.
///
/// # Errors
///
/// - [`AppError::InvalidClearRequest`] - Empty or malformed body
/// - [`AppError::InvalidClearType`] - Unknown `type`
/// - [`AppError::InvalidClearValue`] - Missing `value`
#[tracing::instrument(skip_all)]
pub async fn cache_clear(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::InvalidClearRequest(
            "empty request body".to_string(),
        ));
    }

    let request: CacheClearRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!("[agent] invalid cache-clear request: {}", e);
        AppError::InvalidClearRequest(e.to_string())
    })?;

    tracing::debug!("[agent] received cache-clear request, type: {}", request.clear_type);

    let input = CacheClearInput::try_from(request)?;
    state.cache.handle_cache_clear(input).await?;

    Ok(StatusCode::OK)
}
