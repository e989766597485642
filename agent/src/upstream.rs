// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Client for the remote secrets cluster.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use reqwest::Client;
use reqwest::redirect::Policy;

use crate::constants::{NAMESPACE_HEADER, PATH_LEASE_RENEW, PATH_TOKEN_RENEW_SELF, TOKEN_HEADER};
use crate::models::{LeaseRenewRequest, Secret, TokenRenewRequest};
use crate::proxy::{SendRequest, SendResponse, end_to_end_headers};

#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(source: reqwest::Error) -> Self {
        UpstreamError::Transport(source.to_string())
    }
}

/// The remote cluster as seen by the cache.
///
/// Handles are cheap to derive with [`Upstream::clone_with`]; a derived
/// handle never affects the one it came from.
#[async_trait]
pub trait Upstream: Send + Sync + fmt::Debug {
    /// Returns a handle that authenticates with `token` and carries the
    /// namespace header found in `headers`, if any.
    fn clone_with(&self, token: &str, headers: &HeaderMap) -> Arc<dyn Upstream>;

    /// Forwards a client request. Non-success statuses are responses, not
    /// errors.
    async fn send(&self, request: &SendRequest) -> Result<SendResponse, UpstreamError>;

    /// Extends a lease using this handle's token.
    async fn renew_lease(&self, lease_id: &str, increment: u64) -> Result<Secret, UpstreamError>;

    /// Extends `token` by authenticating as the token itself.
    async fn renew_token_as_self(&self, token: &str, increment: u64)
    -> Result<Secret, UpstreamError>;
}

#[derive(Clone)]
pub struct HttpUpstream {
    client: Client,
    address: String,
    token: String,
    headers: HeaderMap,
}

impl HttpUpstream {
    pub fn new(address: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .user_agent(format!("agent-cache/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            address: address.trim_end_matches('/').to_string(),
            token: String::new(),
            headers: HeaderMap::new(),
        })
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.address, path_and_query)
    }

    fn request_headers(&self, token: &str) -> Result<HeaderMap, UpstreamError> {
        let mut headers = self.headers.clone();
        if !token.is_empty() {
            let value = HeaderValue::from_str(token)
                .map_err(|err| UpstreamError::Transport(format!("invalid token: {err}")))?;
            headers.insert(TOKEN_HEADER, value);
        }
        Ok(headers)
    }

    async fn renew<T: serde::Serialize + Sync>(
        &self,
        path: &str,
        token: &str,
        body: &T,
    ) -> Result<Secret, UpstreamError> {
        let response = self
            .client
            .request(Method::PUT, self.url(path))
            .headers(self.request_headers(token)?)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Secret::parse(&body)
            .map_err(|err| UpstreamError::InvalidResponse(err.to_string()))?
            .ok_or_else(|| UpstreamError::InvalidResponse("empty renewal response".to_string()))
    }
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for HttpUpstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpUpstream")
            .field("address", &self.address)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    fn clone_with(&self, token: &str, headers: &HeaderMap) -> Arc<dyn Upstream> {
        let mut clone = self.clone();
        clone.token = token.to_string();
        clone.headers = HeaderMap::new();
        if let Some(namespace) = headers.get(NAMESPACE_HEADER) {
            clone.headers.insert(NAMESPACE_HEADER, namespace.clone());
        }
        Arc::new(clone)
    }

    #[tracing::instrument(skip_all, fields(method = %request.method, path = %request.path))]
    async fn send(&self, request: &SendRequest) -> Result<SendResponse, UpstreamError> {
        let mut headers = end_to_end_headers(&request.headers);
        headers.remove(TOKEN_HEADER);
        if !request.token.is_empty() {
            let value = HeaderValue::from_str(&request.token)
                .map_err(|err| UpstreamError::Transport(format!("invalid token: {err}")))?;
            headers.insert(TOKEN_HEADER, value);
        }

        let response = self
            .client
            .request(request.method.clone(), self.url(&request.path_and_query()))
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        tracing::debug!("[agent] upstream responded with {}", status);

        Ok(SendResponse::new(status, headers, body))
    }

    async fn renew_lease(&self, lease_id: &str, increment: u64) -> Result<Secret, UpstreamError> {
        let body = LeaseRenewRequest {
            lease_id,
            increment,
        };
        self.renew(PATH_LEASE_RENEW, &self.token, &body).await
    }

    async fn renew_token_as_self(
        &self,
        token: &str,
        increment: u64,
    ) -> Result<Secret, UpstreamError> {
        self.renew(PATH_TOKEN_RENEW_SELF, token, &TokenRenewRequest { increment })
            .await
    }
}
