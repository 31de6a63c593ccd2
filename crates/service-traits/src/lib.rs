//! Service trait interfaces for the control plane.
//!
//! Each trait has a `Noop` implementation that returns empty/default responses,
//! allowing the gateway to run standalone before the session stack is wired in.

use {async_trait::async_trait, serde_json::Value};

/// Error type returned by service methods.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Caller error: bad params, failed validation, protected resource.
    #[error("{message}")]
    InvalidRequest { message: String },
    #[error("{message}")]
    Message { message: String },
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
}

impl ServiceError {
    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_request(message: impl std::fmt::Display) -> Self {
        Self::InvalidRequest {
            message: message.to_string(),
        }
    }
}

impl From<String> for ServiceError {
    fn from(value: String) -> Self {
        Self::message(value)
    }
}

impl From<&str> for ServiceError {
    fn from(value: &str) -> Self {
        Self::message(value)
    }
}

impl From<ServiceError> for switchboard_protocol::ErrorShape {
    fn from(err: ServiceError) -> Self {
        use switchboard_protocol::error_codes;
        match err {
            ServiceError::InvalidRequest { message } => {
                Self::new(error_codes::INVALID_REQUEST, message)
            },
            other => Self::new(error_codes::UNAVAILABLE, other.to_string()),
        }
    }
}

pub type ServiceResult<T = Value> = Result<T, ServiceError>;

// ── Sessions ────────────────────────────────────────────────────────────────

#[async_trait]
pub trait SessionService: Send + Sync {
    async fn list(&self, params: Value) -> ServiceResult;
    async fn preview(&self, params: Value) -> ServiceResult;
    async fn patch(&self, params: Value) -> ServiceResult;
    async fn reset(&self, params: Value) -> ServiceResult;
    async fn delete(&self, params: Value) -> ServiceResult;
    async fn compact(&self, params: Value) -> ServiceResult;
}

pub struct NoopSessionService;

#[async_trait]
impl SessionService for NoopSessionService {
    async fn list(&self, _p: Value) -> ServiceResult {
        Ok(serde_json::json!({ "count": 0, "sessions": [] }))
    }

    async fn preview(&self, _p: Value) -> ServiceResult {
        Ok(serde_json::json!({ "lines": [] }))
    }

    async fn patch(&self, _p: Value) -> ServiceResult {
        Err("session store not configured".into())
    }

    async fn reset(&self, _p: Value) -> ServiceResult {
        Err("session store not configured".into())
    }

    async fn delete(&self, _p: Value) -> ServiceResult {
        Err("session store not configured".into())
    }

    async fn compact(&self, _p: Value) -> ServiceResult {
        Ok(serde_json::json!({ "compacted": false, "reason": "session store not configured" }))
    }
}
