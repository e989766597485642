// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Renewal contexts.
//!
//! A [`ContextInfo`] governs the lifetime of one renewal worker. It pairs a
//! node in a cancellation tree with a private "done" signal:
//!
//! - cancelling a context cancels every context derived from it, which is how
//!   revoking a token reaches its leases and child tokens;
//! - closing the done signal stops only the worker watching it, leaving
//!   derived contexts untouched (used by orphan revocation).
//!
//! The ID of the record a context belongs to is attached at spawn time so a
//! worker identifies its record without sharing mutable state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Signals {
    cancel: CancellationToken,
    done: CancellationToken,
}

#[derive(Clone, Debug)]
pub struct ContextInfo {
    signals: Arc<Signals>,
    index_id: Option<Arc<str>>,
}

impl ContextInfo {
    /// Creates a context whose cancellation follows `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            signals: Arc::new(Signals {
                cancel: parent.child_token(),
                done: CancellationToken::new(),
            }),
            index_id: None,
        }
    }

    /// Derives a child context. The child has its own done signal.
    pub fn child(&self) -> Self {
        Self::new(&self.signals.cancel)
    }

    /// Returns the same context carrying the ID of the record it governs.
    pub fn with_index_id(&self, id: &str) -> Self {
        Self {
            signals: self.signals.clone(),
            index_id: Some(Arc::from(id)),
        }
    }

    pub fn index_id(&self) -> Option<&str> {
        self.index_id.as_deref()
    }

    /// The cancellation node, for deriving tasks that must stop with this
    /// context.
    pub fn token(&self) -> &CancellationToken {
        &self.signals.cancel
    }

    /// Cancels this context and, transitively, all of its descendants.
    pub fn cancel(&self) {
        self.signals.cancel.cancel();
    }

    /// Fires the private done signal. Descendants are not affected.
    pub fn close_done(&self) {
        self.signals.done.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signals.cancel.is_cancelled()
    }

    pub fn is_done(&self) -> bool {
        self.signals.done.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.signals.cancel.cancelled().await
    }

    pub async fn done(&self) {
        self.signals.done.cancelled().await
    }

    /// True when both values refer to the same context, whatever ID they
    /// carry.
    pub fn same_context(&self, other: &ContextInfo) -> bool {
        Arc::ptr_eq(&self.signals, &other.signals)
    }
}
