// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use zeroize::ZeroizeOnDrop;

/// The secret envelope returned by the upstream API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default, deserialize_with = "null_as_default")]
    pub request_id: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub lease_id: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub lease_duration: u64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub renewable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<SecretAuth>,
}

impl Secret {
    /// Parses a response body. An empty body carries no secret.
    pub fn parse(body: &[u8]) -> Result<Option<Secret>, serde_json::Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let secret: Option<Secret> = serde_json::from_slice(body)?;
        Ok(secret)
    }

    /// Client token carried by the auth block, if any.
    pub fn client_token(&self) -> Option<&str> {
        self.auth
            .as_ref()
            .map(|auth| auth.client_token.as_str())
            .filter(|token| !token.is_empty())
    }

    /// Lifetime of the secret in seconds: the token TTL for auth responses,
    /// the lease duration otherwise.
    pub fn ttl(&self) -> u64 {
        match &self.auth {
            Some(auth) if !auth.client_token.is_empty() => auth.lease_duration,
            _ => self.lease_duration,
        }
    }

    /// Whether the upstream is willing to extend this secret.
    pub fn is_renewable(&self) -> bool {
        match &self.auth {
            Some(auth) if !auth.client_token.is_empty() => auth.renewable,
            _ => self.renewable,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretAuth {
    #[serde(default, deserialize_with = "null_as_default")]
    pub client_token: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub accessor: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub policies: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub lease_duration: u64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub renewable: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub orphan: bool,
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for SecretAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretAuth")
            .field("client_token", &"[REDACTED]")
            .field("accessor", &self.accessor)
            .field("policies", &self.policies)
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .field("orphan", &self.orphan)
            .finish()
    }
}

/// Body of the admin cache-clear endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheClearRequest {
    #[serde(default, rename = "type")]
    pub clear_type: String,

    #[serde(default)]
    pub value: String,

    #[serde(default)]
    pub namespace: String,
}

/// Reads an explicit `null` as the field's default value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Serialize)]
pub(crate) struct LeaseRenewRequest<'a> {
    pub lease_id: &'a str,
    pub increment: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct TokenRenewRequest {
    pub increment: u64,
}
