// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

/// Path of the admin cache-clear endpoint served by the agent itself.
pub const CACHE_CLEAR_PATH: &str = "/agent/v1/cache-clear";

pub const TOKEN_HEADER: &str = "x-vault-token";
pub const NAMESPACE_HEADER: &str = "x-vault-namespace";

/// Stand-in for the default namespace. The index table skips empty values,
/// so the default namespace is never stored as "".
pub const ROOT_NAMESPACE: &str = "root/";

pub const API_VERSION_PREFIX: &str = "/v1";

pub const PATH_TOKEN_CREATE: &str = "/v1/auth/token/create";
pub const PATH_TOKEN_REVOKE: &str = "/v1/auth/token/revoke";
pub const PATH_TOKEN_REVOKE_SELF: &str = "/v1/auth/token/revoke-self";
pub const PATH_TOKEN_REVOKE_ACCESSOR: &str = "/v1/auth/token/revoke-accessor";
pub const PATH_TOKEN_REVOKE_ORPHAN: &str = "/v1/auth/token/revoke-orphan";
pub const PATH_TOKEN_RENEW_SELF: &str = "/v1/auth/token/renew-self";
pub const PATH_LEASE_RENEW: &str = "/v1/sys/leases/renew";
pub const PATH_LEASE_REVOKE: &str = "/v1/sys/leases/revoke";
pub const PATH_LEASE_REVOKE_FORCE: &str = "/v1/sys/leases/revoke-force";
pub const PATH_LEASE_REVOKE_PREFIX: &str = "/v1/sys/leases/revoke-prefix";

/// Revocation paths with the version prefix removed, in match order.
pub const REVOCATION_PATHS: [&str; 7] = [
    "/auth/token/revoke",
    "/auth/token/revoke-self",
    "/auth/token/revoke-accessor",
    "/auth/token/revoke-orphan",
    "/sys/leases/revoke",
    "/sys/leases/revoke-force",
    "/sys/leases/revoke-prefix",
];

/// Headers that only make sense on a single connection. They are neither
/// fingerprinted, forwarded, nor replayed from the cache.
pub const HOP_BY_HOP_HEADERS: [&str; 10] = [
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
];

pub const MAX_REQUEST_BODY_SIZE: usize = 32 * 1024 * 1024; // 32 MB
pub const MAX_CACHED_RESPONSE_SIZE: usize = 32 * 1024 * 1024; // 32 MB
pub const MAX_RESPONSE_HEADERS: usize = 128;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Number of striped locks used to coalesce identical requests.
pub const ID_LOCK_COUNT: usize = 256;

pub const RENEWED_CHANNEL_CAPACITY: usize = 4;
/// Jitter subtracted from the renewal sleep, as a fraction of the sleep.
pub const RENEW_JITTER_FRACTION: f64 = 0.1;

/// Length of the random identity fields of an auto-auth token record.
pub const AUTO_AUTH_RANDOM_LENGTH: usize = 5;
