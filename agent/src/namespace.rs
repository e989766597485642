// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Namespace helpers.
//!
//! Namespaces are path prefixes on the upstream. Inside the cache they are
//! always stored in canonical form (`ns1/`, `ns1/ns2/`), and the default
//! namespace is the literal [`ROOT_NAMESPACE`].

use axum::http::HeaderMap;

use crate::constants::{NAMESPACE_HEADER, ROOT_NAMESPACE};

const TOKEN_PREFIXES: [&str; 4] = ["hvs.", "hvb.", "s.", "b."];

/// Strips a leading `/` and guarantees a single trailing `/`.
pub fn canonicalize(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }

    format!("{trimmed}/")
}

/// Returns the canonical namespace carried by the namespace header, or the
/// root placeholder if the header is absent or empty.
pub fn from_headers(headers: &HeaderMap) -> String {
    headers
        .get(NAMESPACE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(canonicalize)
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| ROOT_NAMESPACE.to_string())
}

/// Splits a token or lease identifier into its body and the ID of the
/// namespace it was issued in.
///
/// Tokens look like `s.<body>.<nsid>`; leases look like
/// `<mount path>/<body>.<nsid>`. Identifiers issued in the root namespace
/// carry no suffix and yield an empty namespace ID.
pub fn split_id_from_string(input: &str) -> (String, String) {
    let mut prefix = "";
    let mut rest = input;

    if let Some(token_prefix) = TOKEN_PREFIXES.iter().find(|p| input.starts_with(**p)) {
        prefix = *token_prefix;
        rest = &input[token_prefix.len()..];
    } else if let Some(slash) = input.rfind('/')
        && slash > 0
    {
        if slash == input.len() - 1 {
            return (input.to_string(), String::new());
        }
        prefix = &input[..=slash];
        rest = &input[slash + 1..];
    }

    match rest.rfind('.') {
        Some(dot) if dot != rest.len() - 1 => {
            (format!("{prefix}{}", &rest[..dot]), rest[dot + 1..].to_string())
        }
        _ => (format!("{prefix}{rest}"), String::new()),
    }
}
