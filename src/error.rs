// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::fmt;

/// Error taxonomy for the device fabric core.
///
/// Validation/NotFound/Gone are HTTP-visible. Conflict/Transient/Fatal are
/// handled by the component that raises them (suppressed-and-logged,
/// retried, or escalated to a critical log) and never escape as a response
/// to an unrelated caller; they implement `IntoResponse` only so a handler
/// can flatten a mixed `Result` without a second match.
#[derive(Debug)]
pub enum FabricError {
    Validation(String),
    NotFound(String),
    Gone(String),
    Conflict(String),
    Transient(String),
    Fatal(String),
}

impl FabricError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Gone(_) => StatusCode::GONE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Gone(_) => "GONE",
            Self::Conflict(_) => "CONFLICT",
            Self::Transient(_) => "TRANSIENT",
            Self::Fatal(_) => "FATAL",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Validation(m)
            | Self::NotFound(m)
            | Self::Gone(m)
            | Self::Conflict(m)
            | Self::Transient(m)
            | Self::Fatal(m) => m,
        }
    }

    pub fn to_response_body(&self) -> DeviceErrorResponse {
        DeviceErrorResponse { success: false, error: self.message().to_string() }
    }
}

impl fmt::Display for FabricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.as_str(), self.message())
    }
}

impl std::error::Error for FabricError {}

impl From<sqlx::Error> for FabricError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".into()),
            other => Self::Transient(other.to_string()),
        }
    }
}

/// Shape of the `{success:false, error:"..."}` body returned to device HTTP callers.
#[derive(Debug, Serialize)]
pub struct DeviceErrorResponse {
    pub success: bool,
    pub error: String,
}

impl IntoResponse for FabricError {
    fn into_response(self) -> axum::response::Response {
        let status = self.http_status();
        (status, Json(self.to_response_body())).into_response()
    }
}

pub type FabricResult<T> = Result<T, FabricError>;
