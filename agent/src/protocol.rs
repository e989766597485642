// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Wire format of cached responses.
//!
//! A cached response is stored exactly as it would travel on an HTTP/1.1
//! connection:
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! content-type: application/json\r\n
//! content-length: 42\r\n
//! \r\n
//! {"lease_id": ...}
//! ```
//!
//! Connection-scoped headers are dropped when encoding and `content-length`
//! is always recomputed from the body.
//!
//! # Size Limits
//!
//! Responses larger than [`MAX_CACHED_RESPONSE_SIZE`] are rejected in both
//! directions.

use std::io::Write;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::constants::{MAX_CACHED_RESPONSE_SIZE, MAX_RESPONSE_HEADERS};
use crate::proxy::{SendResponse, is_hop_by_hop};

/// Serializes a response with its status line, headers and body.
pub fn encode_response(response: &SendResponse) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(response.body.len() + 256);

    write!(
        buf,
        "HTTP/1.1 {} {}\r\n",
        response.status.as_u16(),
        response.status.canonical_reason().unwrap_or("")
    )
    .map_err(|err| anyhow!("failed to write status line: {:?}", err))?;

    for (name, value) in &response.headers {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        buf.extend_from_slice(name.as_str().as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    write!(buf, "content-length: {}\r\n\r\n", response.body.len())
        .map_err(|err| anyhow!("failed to write headers: {:?}", err))?;
    buf.extend_from_slice(&response.body);

    if buf.len() > MAX_CACHED_RESPONSE_SIZE {
        bail!(
            "response size {} exceeds maximum allowed size {}",
            buf.len(),
            MAX_CACHED_RESPONSE_SIZE
        );
    }

    Ok(Bytes::from(buf))
}

/// Parses bytes produced by [`encode_response`].
pub fn decode_response(bytes: &Bytes) -> Result<SendResponse> {
    if bytes.len() > MAX_CACHED_RESPONSE_SIZE {
        bail!(
            "response size {} exceeds maximum allowed size {}",
            bytes.len(),
            MAX_CACHED_RESPONSE_SIZE
        );
    }

    let mut header_buf = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut parsed = httparse::Response::new(&mut header_buf);
    let offset = match parsed
        .parse(bytes)
        .map_err(|err| anyhow!("failed to parse response head: {:?}", err))?
    {
        httparse::Status::Complete(offset) => offset,
        httparse::Status::Partial => bail!("incomplete response head"),
    };

    let code = parsed.code.ok_or_else(|| anyhow!("missing status code"))?;
    let status = StatusCode::from_u16(code)
        .map_err(|err| anyhow!("invalid status code {}: {:?}", code, err))?;

    let mut headers = HeaderMap::with_capacity(parsed.headers.len());
    for h in parsed.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|err| anyhow!("invalid header name {:?}: {:?}", h.name, err))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|err| anyhow!("invalid value for header {:?}: {:?}", h.name, err))?;
        headers.append(name, value);
    }

    let body = bytes.slice(offset..);
    if let Some(length) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok())
        && length != body.len()
    {
        bail!(
            "body length {} does not match content-length {}",
            body.len(),
            length
        );
    }

    Ok(SendResponse::new(status, headers, body))
}

/// Time elapsed since the response's `Date` header.
pub fn response_age(headers: &HeaderMap) -> Option<Duration> {
    let date = headers.get(header::DATE)?.to_str().ok()?;
    let date = DateTime::parse_from_rfc2822(date).ok()?;
    (Utc::now() - date.with_timezone(&Utc)).to_std().ok()
}
