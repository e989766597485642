// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use super::CacheDbError;
use super::context::ContextInfo;

/// A cached response and the identity of the secret it carries.
#[derive(Clone)]
pub struct Index {
    /// Fingerprint of the originating request.
    pub id: String,
    /// Canonical namespace of the originating request; `root/` by default.
    pub namespace: String,
    pub request_path: String,
    /// Set when the record caches an auth response.
    pub token: String,
    pub token_accessor: String,
    /// Token that created `token`, cleared when that token is orphan-revoked.
    pub token_parent: String,
    /// Set when the record caches a lease response.
    pub lease: String,
    /// Token that created `lease`.
    pub lease_token: String,
    /// Serialized HTTP response replayed on a cache hit.
    pub response: Bytes,
    pub renew_ctx: ContextInfo,
}

impl Index {
    /// Value of this record on the given index, `None` when the field is
    /// empty. The compound request-path key joins its parts with a NUL byte.
    pub(crate) fn key(&self, name: IndexName) -> Option<String> {
        let value = match name {
            IndexName::Id => self.id.clone(),
            IndexName::RequestPath => {
                if self.namespace.is_empty() || self.request_path.is_empty() {
                    return None;
                }
                return Some(join_key(&[self.namespace.as_str(), self.request_path.as_str()]));
            }
            IndexName::Token => self.token.clone(),
            IndexName::TokenAccessor => self.token_accessor.clone(),
            IndexName::TokenParent => self.token_parent.clone(),
            IndexName::Lease => self.lease.clone(),
            IndexName::LeaseToken => self.lease_token.clone(),
        };

        (!value.is_empty()).then_some(value)
    }

    pub(crate) fn validate(&self) -> Result<(), CacheDbError> {
        if self.id.is_empty() {
            return Err(CacheDbError::NilInput);
        }
        if self.namespace.is_empty() || self.request_path.is_empty() {
            return Err(CacheDbError::InvalidRecord(
                "namespace and request path must be set".to_string(),
            ));
        }
        match (self.token.is_empty(), self.lease.is_empty()) {
            (false, false) => Err(CacheDbError::InvalidRecord(
                "record cannot hold both a token and a lease".to_string(),
            )),
            (true, true) => Err(CacheDbError::InvalidRecord(
                "record must hold a token or a lease".to_string(),
            )),
            (true, false) if self.lease_token.is_empty() => Err(CacheDbError::InvalidRecord(
                "lease record must reference its token".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

// Tokens are bearer credentials and must never reach the logs
impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("request_path", &self.request_path)
            .field("token", &redacted(&self.token))
            .field("token_accessor", &self.token_accessor)
            .field("token_parent", &redacted(&self.token_parent))
            .field("lease", &self.lease)
            .field("lease_token", &redacted(&self.lease_token))
            .field("response", &format_args!("{} bytes", self.response.len()))
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() { "" } else { "[REDACTED]" }
}

pub(crate) fn join_key(parts: &[&str]) -> String {
    parts.join("\0")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexName {
    Id,
    RequestPath,
    Token,
    TokenAccessor,
    TokenParent,
    Lease,
    LeaseToken,
}

impl IndexName {
    pub const ALL: [IndexName; 7] = [
        IndexName::Id,
        IndexName::RequestPath,
        IndexName::Token,
        IndexName::TokenAccessor,
        IndexName::TokenParent,
        IndexName::Lease,
        IndexName::LeaseToken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::RequestPath => "request_path",
            Self::Token => "token",
            Self::TokenAccessor => "token_accessor",
            Self::TokenParent => "token_parent",
            Self::Lease => "lease",
            Self::LeaseToken => "lease_token",
        }
    }

    pub fn is_unique(&self) -> bool {
        matches!(
            self,
            Self::Id | Self::Token | Self::TokenAccessor | Self::Lease
        )
    }

    /// Number of key parts an exact lookup takes.
    pub fn key_parts(&self) -> usize {
        match self {
            Self::RequestPath => 2,
            _ => 1,
        }
    }

    pub(crate) fn position(&self) -> usize {
        match self {
            Self::Id => 0,
            Self::RequestPath => 1,
            Self::Token => 2,
            Self::TokenAccessor => 3,
            Self::TokenParent => 4,
            Self::Lease => 5,
            Self::LeaseToken => 6,
        }
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexName {
    type Err = CacheDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IndexName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| CacheDbError::InvalidIndex(s.to_string()))
    }
}
