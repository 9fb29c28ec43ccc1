//! Error types for the Gatehouse platform

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatehouseError {
    #[error("{message}")]
    InvalidInput { message: String },

    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    Unauthorized { message: String },

    #[error("{message}")]
    Forbidden { message: String },

    #[error("Upstream error: {message}")]
    Upstream { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatehouseError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code carried by this error at the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Unauthorized { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::Upstream { .. } => 502,
            Self::Storage { .. } | Self::Internal { .. } => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatehouseError>;

/// Wire shape for error responses: `{ "error": { "message": ..., "code": ... } }`
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub code: u16,
}

impl From<&GatehouseError> for ApiError {
    fn from(err: &GatehouseError) -> Self {
        Self {
            message: err.to_string(),
            code: err.status_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatehouseError::invalid_input("x").status_code(), 400);
        assert_eq!(GatehouseError::unauthorized("x").status_code(), 401);
        assert_eq!(GatehouseError::forbidden("x").status_code(), 403);
        assert_eq!(GatehouseError::not_found("x").status_code(), 404);
        assert_eq!(GatehouseError::storage("x").status_code(), 500);
    }

    #[test]
    fn test_message_passthrough() {
        let err = GatehouseError::forbidden("Invalid code");
        assert_eq!(err.to_string(), "Invalid code");
    }
}
