// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use crate::constants::PATH_TOKEN_CREATE;
use crate::errors::AppError;
use crate::models::Secret;

/// What the cache does with a successful JSON response.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Returned to the client without being cached, with the reason.
    PassThrough(&'static str),
    /// A renewable lease, cached under the requesting token.
    Lease { lease_id: String },
    /// A renewable new token.
    Auth {
        client_token: String,
        accessor: String,
        /// True when the token is a non-orphan child created through the
        /// token create endpoint, so its lifetime follows the requesting
        /// token.
        inherit_parent: bool,
    },
}

/// Parses a response body into a secret envelope.
pub fn parse_secret(body: &[u8]) -> Result<Option<Secret>, AppError> {
    Secret::parse(body).map_err(|err| AppError::ClassifyError(err.to_string()))
}

pub fn classify(request_path: &str, secret: &Secret) -> Result<Verdict, AppError> {
    if !secret.lease_id.is_empty() {
        if !secret.renewable {
            return Ok(Verdict::PassThrough("lease is not renewable"));
        }
        return Ok(Verdict::Lease {
            lease_id: secret.lease_id.clone(),
        });
    }

    let Some(auth) = secret.auth.as_ref().filter(|auth| !auth.client_token.is_empty()) else {
        return Ok(Verdict::PassThrough("response carries no lease or token"));
    };

    if !auth.renewable {
        return Ok(Verdict::PassThrough("token is not renewable"));
    }

    Ok(Verdict::Auth {
        client_token: auth.client_token.clone(),
        accessor: auth.accessor.clone(),
        inherit_parent: request_path == PATH_TOKEN_CREATE && !auth.orphan,
    })
}
