// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::cachedb::CacheDbError;
use crate::upstream::UpstreamError;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AppError {
    #[error("failed to compute request fingerprint: {0}")]
    FingerprintError(String),
    #[error("upstream request failed: {0}")]
    UpstreamError(String),
    #[error("failed to parse upstream response: {0}")]
    ClassifyError(String),
    #[error("failed to cache response: {0}")]
    CacheStoreError(String),
    #[error("invalid cache-clear type: {0}")]
    InvalidClearType(String),
    #[error("cache-clear value is required for type {0}")]
    InvalidClearValue(String),
    #[error("invalid cache-clear request: {0}")]
    InvalidClearRequest(String),
    #[error("invalid revocation request body: {0}")]
    RevocationBodyError(String),
    #[error("internal server error")]
    InternalServerError,
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidClearType(_) | Self::InvalidClearValue(_) | Self::InvalidClearRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::FingerprintError(_)
            | Self::UpstreamError(_)
            | Self::ClassifyError(_)
            | Self::CacheStoreError(_)
            | Self::RevocationBodyError(_)
            | Self::InternalServerError
            | Self::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({"errors": [self.to_string()]}));

        (status, body).into_response()
    }
}

impl From<CacheDbError> for AppError {
    fn from(source: CacheDbError) -> Self {
        tracing::error!("[agent] {:?}", source);
        AppError::CacheStoreError(source.to_string())
    }
}

impl From<UpstreamError> for AppError {
    fn from(source: UpstreamError) -> Self {
        tracing::error!("[agent] {:?}", source);
        AppError::UpstreamError(source.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(_source: anyhow::Error) -> Self {
        tracing::error!("{:?}", _source);
        AppError::InternalServerError
    }
}
