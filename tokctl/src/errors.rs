use crate::allotment::AllotmentError;
use crate::billing::PurchaseError;
use crate::db::errors::DbError;
use crate::payment_providers::PaymentError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error as ThisError;
use utoipa::ToSchema;

/// Message shared by every ownership failure, so callers cannot probe for other users' agents
pub const AGENT_ACCESS_DENIED: &str = "Agent not found or access denied";

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Caller may not act on this resource
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Internal failure the customer needs to hear about, e.g. paid but not credited.
    /// `message` is shown, `detail` is only logged.
    #[error("{message} ({detail})")]
    SupportRequired { message: String, detail: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Body of every failed request
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest { message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Internal { .. } | Error::SupportRequired { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation(_) => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation(_) | DbError::CheckViolation(_) => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Forbidden { message } => message.clone(),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} {id} not found"),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::SupportRequired { message, .. } => message.clone(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation(_) => "Resource already exists".to_string(),
                DbError::ForeignKeyViolation(_) => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation(_) => "Invalid data provided".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::SupportRequired { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = ErrorBody {
            success: false,
            error: self.user_message(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<PurchaseError> for Error {
    fn from(err: PurchaseError) -> Self {
        match err {
            PurchaseError::AgentNotAccessible => Error::Forbidden {
                message: AGENT_ACCESS_DENIED.to_string(),
            },
            PurchaseError::Database(db_err) => Error::Database(db_err),
            other => Error::BadRequest {
                message: other.to_string(),
            },
        }
    }
}

impl From<AllotmentError> for Error {
    fn from(err: AllotmentError) -> Self {
        match err {
            AllotmentError::InvalidAmount(_) | AllotmentError::ModelUnavailable(_) => Error::BadRequest {
                message: err.to_string(),
            },
            AllotmentError::ModelNotFound(model) => Error::NotFound {
                resource: "AI model".to_string(),
                id: model,
            },
            AllotmentError::BalanceNotFound(model) => Error::NotFound {
                resource: "Token balance for model".to_string(),
                id: model,
            },
            AllotmentError::AgentNotFound | AllotmentError::NotAgentOwner => Error::Forbidden {
                message: AGENT_ACCESS_DENIED.to_string(),
            },
            AllotmentError::TokenAmountOverflow => Error::SupportRequired {
                message: "Token balance limit reached. Please contact support.".to_string(),
                detail: err.to_string(),
            },
            AllotmentError::Database(db_err) => Error::Database(db_err),
        }
    }
}

impl From<PaymentError> for Error {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidSignature => Error::BadRequest {
                message: "Invalid payment signature".to_string(),
            },
            other => Error::Internal {
                operation: format!("talk to the payment gateway: {other}"),
            },
        }
    }
}
