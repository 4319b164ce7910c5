// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes surfaced across the dispatch API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchError {
    /// A coordinate lies outside `[0,N) x [0,M)`.
    InvalidCoordinate,
    /// Spiral search exhausted `MAX_SEARCH_RADIUS` without locking a driver.
    NoDriverFound,
    /// The caller tried to mutate a ride whose state forbids it.
    StateConflict,
    /// The request body or path was malformed.
    BadRequest,
    /// Bearer/query auth failed.
    Unauthorized,
    /// No ride/driver exists for the given id.
    NotFound,
    /// The substrate is unreachable after retry with backoff.
    SubstrateUnavailable,
    /// An unexpected internal failure.
    Internal,
}

impl DispatchError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidCoordinate | Self::BadRequest | Self::StateConflict => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::NoDriverFound => 409,
            Self::SubstrateUnavailable => 503,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCoordinate => "INVALID_COORDINATE",
            Self::NoDriverFound => "NO_DRIVER_FOUND",
            Self::StateConflict => "STATE_CONFLICT",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::SubstrateUnavailable => "SUBSTRATE_UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for DispatchError {}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Retry a fallible substrate operation with capped exponential backoff.
///
/// Starts at 200ms, doubles each attempt, caps at 5s, gives up after 5
/// attempts and returns the last error.
pub async fn retry_with_backoff<T, E, F, Fut>(mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    const MAX_ATTEMPTS: u32 = 5;
    const START: std::time::Duration = std::time::Duration::from_millis(200);
    const CAP: std::time::Duration = std::time::Duration::from_secs(5);

    let mut delay = START;
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(e);
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(CAP);
            }
        }
    }
}
