// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Recognition of upstream revocation requests.
//!
//! | Path | Body field | Variant |
//! |------|------------|---------|
//! | `/v1/auth/token/revoke` | `token` | [`Revocation::Token`] |
//! | `/v1/auth/token/revoke-self` | | [`Revocation::TokenSelf`] |
//! | `/v1/auth/token/revoke-accessor` | `accessor` | [`Revocation::Accessor`] |
//! | `/v1/auth/token/revoke-orphan` | `token` | [`Revocation::Orphan`] |
//! | `/v1/sys/leases/revoke` | `lease_id` | [`Revocation::Lease`] |
//! | `/v1/sys/leases/revoke-force/<prefix>` | | [`Revocation::LeasePrefix`] |
//! | `/v1/sys/leases/revoke-prefix/<prefix>` | | [`Revocation::LeasePrefix`] |
//!
//! Paths may carry a namespace between the version prefix and the
//! revocation path, e.g. `/v1/ns1/sys/leases/revoke`.
//! [`derive_namespace_and_revocation_path`] moves it out of the path.

use serde_json::{Map, Value};

use crate::constants::{
    API_VERSION_PREFIX, PATH_LEASE_REVOKE, PATH_LEASE_REVOKE_FORCE, PATH_LEASE_REVOKE_PREFIX,
    PATH_TOKEN_REVOKE, PATH_TOKEN_REVOKE_ACCESSOR, PATH_TOKEN_REVOKE_ORPHAN,
    PATH_TOKEN_REVOKE_SELF, REVOCATION_PATHS, ROOT_NAMESPACE,
};
use crate::errors::AppError;
use crate::namespace;

/// Splits a namespace embedded in a revocation path out of the path and
/// combines it with the header namespace. `header_namespace` is canonical,
/// `root/` when the header was absent.
///
/// Paths that are not revocation paths are returned unchanged.
pub fn derive_namespace_and_revocation_path(path: &str, header_namespace: &str) -> (String, String) {
    let unversioned = path.strip_prefix(API_VERSION_PREFIX).unwrap_or(path);

    for revocation_path in REVOCATION_PATHS {
        let Some(position) = unversioned.find(revocation_path) else {
            continue;
        };
        if position == 0 {
            break;
        }

        let in_path = namespace::canonicalize(&unversioned[..position]);
        let namespace = if header_namespace == ROOT_NAMESPACE {
            in_path
        } else {
            format!("{header_namespace}{in_path}")
        };
        return (
            namespace,
            format!("{API_VERSION_PREFIX}{}", &unversioned[position..]),
        );
    }

    (
        header_namespace.to_string(),
        format!("{API_VERSION_PREFIX}{unversioned}"),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum Revocation {
    Token(String),
    /// Revocation of the requesting token.
    TokenSelf,
    Accessor(String),
    /// Revocation of a token that leaves its child tokens alive.
    Orphan(String),
    Lease(String),
    /// Revocation of every lease under a prefix. The prefix may be empty.
    LeasePrefix(String),
}

impl Revocation {
    /// Recognizes a revocation from a path already passed through
    /// [`derive_namespace_and_revocation_path`]. Returns `None` for any other
    /// path.
    pub fn parse(path: &str, body: &[u8]) -> Result<Option<Self>, AppError> {
        let revocation = match path {
            PATH_TOKEN_REVOKE => Self::Token(body_field(body, "token")?),
            PATH_TOKEN_REVOKE_SELF => Self::TokenSelf,
            PATH_TOKEN_REVOKE_ACCESSOR => Self::Accessor(body_field(body, "accessor")?),
            PATH_TOKEN_REVOKE_ORPHAN => Self::Orphan(body_field(body, "token")?),
            PATH_LEASE_REVOKE => Self::Lease(body_field(body, "lease_id")?),
            _ => match lease_prefix(path) {
                Some(prefix) => Self::LeasePrefix(prefix.to_string()),
                None => return Ok(None),
            },
        };

        Ok(Some(revocation))
    }
}

fn lease_prefix(path: &str) -> Option<&str> {
    [PATH_LEASE_REVOKE_FORCE, PATH_LEASE_REVOKE_PREFIX]
        .into_iter()
        .find_map(|base| path.strip_prefix(base))
        .and_then(|rest| {
            if rest.is_empty() {
                Some(rest)
            } else {
                rest.strip_prefix('/')
            }
        })
}

fn body_field(body: &[u8], field: &str) -> Result<String, AppError> {
    let json: Map<String, Value> = serde_json::from_slice(body)
        .map_err(|err| AppError::RevocationBodyError(err.to_string()))?;

    match json.get(field) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value.clone()),
        Some(Value::String(_)) => Err(AppError::RevocationBodyError(format!(
            "{field} in the request body is empty"
        ))),
        Some(_) => Err(AppError::RevocationBodyError(format!(
            "expected {field} in the request body to be a string"
        ))),
        None => Err(AppError::RevocationBodyError(format!(
            "failed to get {field} from request body"
        ))),
    }
}
