// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Request fingerprints used as cache keys.
//!
//! A request is serialized as an HTTP/1.1 request head followed by its body:
//!
//! ```text
//! GET /v1/kv/foo?version=2 HTTP/1.1\r\n
//! accept: application/json\r\n
//! \r\n
//! <body>
//! ```
//!
//! Headers are sorted by name and then value. The token header and
//! connection-scoped headers are left out. The effective token is appended
//! after the body instead, so a token substituted by the agent counts the
//! same as one the client sent. The SHA-256 of that buffer, hex encoded, is
//! the record ID.

use std::io::Write;

use sha2::{Digest, Sha256};

use crate::constants::TOKEN_HEADER;
use crate::errors::AppError;
use crate::proxy::{SendRequest, is_hop_by_hop};

pub fn compute_index_id(request: &SendRequest) -> Result<String, AppError> {
    let buf = serialize(request)?;

    let mut hasher = Sha256::new();
    hasher.update(&buf);
    hasher.update(request.token.as_bytes());

    Ok(hex::encode(hasher.finalize()))
}

fn serialize(request: &SendRequest) -> Result<Vec<u8>, AppError> {
    if !request.path.starts_with('/') {
        return Err(AppError::FingerprintError(format!(
            "invalid request path {:?}",
            request.path
        )));
    }

    let mut headers: Vec<(&str, &[u8])> = request
        .headers
        .iter()
        .filter(|(name, _)| name.as_str() != TOKEN_HEADER && !is_hop_by_hop(name.as_str()))
        .map(|(name, value)| (name.as_str(), value.as_bytes()))
        .collect();
    headers.sort_unstable();

    let mut buf = Vec::with_capacity(request.body.len() + 256);
    write!(
        buf,
        "{} {} HTTP/1.1\r\n",
        request.method,
        request.path_and_query()
    )
    .map_err(|err| AppError::FingerprintError(err.to_string()))?;

    for (name, value) in headers {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value);
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(&request.body);

    Ok(buf)
}
