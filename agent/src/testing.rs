// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Test doubles shared by the unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};

use crate::models::{Secret, SecretAuth};
use crate::proxy::{SendRequest, SendResponse};
use crate::upstream::{Upstream, UpstreamError};

type Handler = dyn Fn(&SendRequest) -> SendResponse + Send + Sync;

/// Scripted [`Upstream`]. Clones share their script and counters.
///
/// Renewals pop scripted results first and otherwise extend the secret by
/// the requested increment.
#[derive(Clone)]
pub(crate) struct MockUpstream {
    handler: Arc<Handler>,
    sent: Arc<Mutex<Vec<SendRequest>>>,
    renewals: Arc<Mutex<VecDeque<Result<Secret, UpstreamError>>>>,
    renew_calls: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub(crate) fn new() -> Self {
        Self::with_handler(|_| SendResponse::json(StatusCode::OK, "{}"))
    }

    pub(crate) fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&SendRequest) -> SendResponse + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            sent: Arc::default(),
            renewals: Arc::default(),
            renew_calls: Arc::default(),
        }
    }

    pub(crate) fn send_calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub(crate) fn sent_requests(&self) -> Vec<SendRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn push_renewal(&self, result: Result<Secret, UpstreamError>) {
        self.renewals.lock().unwrap().push_back(result);
    }

    pub(crate) fn renew_calls(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    fn next_renewal(&self) -> Option<Result<Secret, UpstreamError>> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        self.renewals.lock().unwrap().pop_front()
    }
}

impl fmt::Debug for MockUpstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockUpstream")
            .field("send_calls", &self.send_calls())
            .field("renew_calls", &self.renew_calls())
            .finish()
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    fn clone_with(&self, _token: &str, _headers: &HeaderMap) -> Arc<dyn Upstream> {
        Arc::new(self.clone())
    }

    async fn send(&self, request: &SendRequest) -> Result<SendResponse, UpstreamError> {
        self.sent.lock().unwrap().push(request.clone());
        Ok((self.handler)(request))
    }

    async fn renew_lease(&self, lease_id: &str, increment: u64) -> Result<Secret, UpstreamError> {
        self.next_renewal().unwrap_or_else(|| {
            Ok(Secret {
                lease_id: lease_id.to_string(),
                lease_duration: increment,
                renewable: true,
                ..Default::default()
            })
        })
    }

    async fn renew_token_as_self(
        &self,
        token: &str,
        increment: u64,
    ) -> Result<Secret, UpstreamError> {
        self.next_renewal().unwrap_or_else(|| {
            Ok(Secret {
                auth: Some(SecretAuth {
                    client_token: token.to_string(),
                    accessor: String::new(),
                    policies: Vec::new(),
                    lease_duration: increment,
                    renewable: true,
                    orphan: false,
                }),
                ..Default::default()
            })
        })
    }
}

/// Polls `check` until it holds. Panics after 100 seconds, which under a
/// paused clock elapse instantly.
pub(crate) async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..1000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not met in time");
}
