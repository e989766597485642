// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Agent Cache
//!
//! A caching reverse proxy that sits between local clients and a remote
//! secrets cluster.
//!
//! ## Architecture
//!
//! ```text
//! Client -> HTTP API -> LeaseCache (this crate) -> Upstream cluster
//!                            |
//!                            +-> CacheDb (indexed responses)
//!                            +-> renewal workers (one per cached secret)
//! ```
//!
//! Responses that carry a renewable lease or token are cached under a
//! fingerprint of the request and kept alive by a background worker that
//! renews the secret upstream. Revocations proxied through the agent, and the
//! admin cache-clear endpoint, evict the affected records along with
//! everything derived from them.
//!
//! ## Modules
//!
//! - [`application`]: HTTP server setup with Axum, timeouts, and body limits
//! - [`cachedb`]: In-memory multi-index table of cached responses
//! - [`classify`]: Decides whether a response is cached
//! - [`configuration`]: CLI argument parsing with clap
//! - [`constants`]: Paths, header names, and limits
//! - [`errors`]: Application error types with HTTP response mapping
//! - [`fingerprint`]: Request fingerprints used as cache keys
//! - [`lease_cache`]: The caching orchestrator
//! - [`models`]: Upstream secret envelope and admin request types
//! - [`namespace`]: Namespace canonicalization and ID splitting
//! - [`protocol`]: Wire format of a cached HTTP response
//! - [`proxy`]: Request and response types passed through the cache
//! - [`renewal`]: Lease and token renewal workers
//! - [`revocation`]: Recognition of upstream revocation requests
//! - [`routes`]: HTTP route handlers (proxy, cache-clear)
//! - [`upstream`]: Client for the remote cluster
//!
//! ## Usage
//!
//! ```bash
//! agent-cache --port 8100 --upstream-address https://vault:8200 \
//!     --use-auto-auth-token --auto-auth-token "$TOKEN"
//! ```
//!
//! ## Security Considerations
//!
//! - Tokens are redacted from every `Debug` implementation and never logged
//! - Token material in parsed auth responses is zeroized on drop
//! - Request bodies are limited to 32 MiB and requests time out after 90 seconds

pub mod application;
pub mod cachedb;
pub mod classify;
pub mod configuration;
pub mod constants;
pub mod errors;
pub mod fingerprint;
pub mod lease_cache;
pub mod models;
pub mod namespace;
pub mod protocol;
pub mod proxy;
pub mod renewal;
pub mod revocation;
pub mod routes;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;
