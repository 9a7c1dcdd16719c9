//! Shared types for the studyboard console
//!
//! - `kind` - the ten resource kinds
//! - `model` - entities and the `Resource` / `DependentResource` / `Ordered` traits
//! - `paging` - paginated list queries and the canonical `Page` envelope
//! - `keys` - structured cache keys
//!
//! [`ClientError`] is the error type of every client and cache operation.

use serde::{Deserialize, Serialize};

pub mod keys;
pub mod kind;
pub mod model;
pub mod paging;

pub use keys::{QueryKey, QueryKeys};
pub use kind::{ResourceKind, UnknownKindError};
pub use model::{
    ApiKey, ConstructItem, DependentResource, FieldValidation, Fields, NewApiKey,
    NewConstructItem, NewNamed, NewPageContent, NewScaleLevel, NewStudyCondition, OrderPosition,
    Ordered, Ordering, PageContent, Resource, ResourceBase, ResourceSummary,
    Scale, ScaleLevel, Step, Study, StudyCondition, SurveyConstruct, SurveyPage,
};
pub use paging::{Page, PageEnvelope, PageQuery, Sort, SortDirection};

/// Identity-provider conditions that need a dedicated UI flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthErrorKind {
    ConsentRequired,
    LoginRequired,
}

/// Structured error type for client and cache operations.
///
/// Cloneable so a single failed in-flight request can be handed to every
/// caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Authentication required ({kind:?}): {message}")]
    Authentication { kind: AuthErrorKind, message: String },

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Unexpected response: {message}")]
    Decode { message: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ClientError {
    pub fn transport(message: impl Into<String>) -> Self {
        ClientError::Transport {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        ClientError::Decode {
            message: message.into(),
        }
    }

    /// Builds the error for a non-2xx response.
    ///
    /// The message comes from the JSON body's `message` or `error` field when
    /// present, otherwise it is `API Error: {status}` followed by the raw body.
    pub fn from_response(status: u16, path: &str, body: &str) -> Self {
        let parsed = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                ["message", "error"].iter().find_map(|field| {
                    value
                        .get(field)
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                })
            });

        let message = match parsed {
            Some(message) => message,
            None if body.trim().is_empty() => format!("API Error: {}", status),
            None => format!("API Error: {} {}", status, body),
        };

        if let Some(kind) = Self::classify_auth(&message) {
            return ClientError::Authentication { kind, message };
        }
        if status == 404 {
            return ClientError::NotFound {
                path: path.to_string(),
            };
        }
        ClientError::Api { status, message }
    }

    /// Recognizes identity-provider conditions by their message text
    pub fn classify_auth(message: &str) -> Option<AuthErrorKind> {
        if message.contains("consent_required") || message.contains("Consent required") {
            Some(AuthErrorKind::ConsentRequired)
        } else if message.contains("login_required") || message.contains("Login required") {
            Some(AuthErrorKind::LoginRequired)
        } else {
            None
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::NotFound { .. } => Some(404),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
