// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::errors::AppError;

#[derive(Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct AgentOptions {
    #[arg(long, default_value = "127.0.0.1", env("AGENT_HTTP_HOST"))]
    pub host: String,
    #[arg(long, default_value = "8100", env("AGENT_HTTP_PORT"))]
    pub port: u16,
    #[arg(long, default_value = "https://127.0.0.1:8200", env("AGENT_UPSTREAM_ADDR"))]
    pub upstream_address: String,
    #[arg(long, default_value = "60", env("AGENT_UPSTREAM_TIMEOUT_SECS"))]
    pub upstream_timeout_secs: u64,
    #[arg(long, default_value = "false", env("AGENT_USE_AUTO_AUTH_TOKEN"), action = ArgAction::SetTrue)]
    pub use_auto_auth_token: bool,
    #[arg(long, default_value = "false", env("AGENT_FORCE_AUTO_AUTH_TOKEN"), action = ArgAction::SetTrue)]
    pub force_auto_auth_token: bool,
    #[arg(long, env("AGENT_AUTO_AUTH_TOKEN"), hide_env_values = true)]
    pub auto_auth_token: Option<String>,
}

impl AgentOptions {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let has_token = self
            .auto_auth_token
            .as_deref()
            .is_some_and(|token| !token.is_empty());

        if (self.use_auto_auth_token || self.force_auto_auth_token) && !has_token {
            return Err(AppError::ConfigError(
                "using the auto-auth token requires --auto-auth-token".to_string(),
            ));
        }
        if self.upstream_address.is_empty() {
            return Err(AppError::ConfigError(
                "--upstream-address must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Token to send upstream for a request that carried `client_token`.
    /// Returns `None` when the client's token stays as is.
    pub fn substitute_token(&self, client_token: &str) -> Option<&str> {
        let token = self.auto_auth_token.as_deref()?;
        if self.force_auto_auth_token || (self.use_auto_auth_token && client_token.is_empty()) {
            return Some(token);
        }
        None
    }
}

impl Default for AgentOptions {
    fn default() -> Self {
        AgentOptions {
            host: "127.0.0.1".to_string(),
            port: 8100,
            upstream_address: "https://127.0.0.1:8200".to_string(),
            upstream_timeout_secs: 60,
            use_auto_auth_token: false,
            force_auto_auth_token: false,
            auto_auth_token: None,
        }
    }
}

impl fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("upstream_address", &self.upstream_address)
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .field("use_auto_auth_token", &self.use_auto_auth_token)
            .field("force_auto_auth_token", &self.force_auto_auth_token)
            .field(
                "auto_auth_token",
                &self.auto_auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}
