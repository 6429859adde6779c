//! Graph API error decoding.
//!
//! Responses with HTTP status >= 400 carry a JSON body of the form
//! `{"error": {"code": "...", "message": "..."}}`. The code string is the
//! part worth dispatching on: `nameAlreadyExists`, `itemNotFound`,
//! `resourceModified` and friends.

use serde::Deserialize;
use thiserror::Error;

use nimbus_core::errors::FsError;
use nimbus_core::ports::{HttpResponse, TransportError};

/// JSON shape of a Graph error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Errors from Graph API operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The server could not be reached at all.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server answered with an error status.
    #[error("HTTP {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// A 2xx body that did not parse as the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),

    /// Token acquisition or refresh failed.
    #[error("authentication failure: {0}")]
    Auth(String),
}

impl GraphError {
    /// Builds an [`GraphError::Api`] from a non-success response,
    /// decoding the standard error body when present.
    pub fn from_response(resp: &HttpResponse) -> Self {
        match serde_json::from_slice::<ErrorBody>(&resp.body) {
            Ok(body) => Self::Api {
                status: resp.status,
                code: body.error.code,
                message: body.error.message,
            },
            Err(_) => Self::Api {
                status: resp.status,
                code: String::new(),
                message: resp.body_text(),
            },
        }
    }

    /// The HTTP status, for API errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The Graph error code string, for API errors.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Whether the server refused because the name is already taken.
    pub fn is_name_exists(&self) -> bool {
        self.code() == Some("nameAlreadyExists")
    }

    /// Whether the item was concurrently modified (simple-upload retry).
    pub fn is_resource_modified(&self) -> bool {
        self.code() == Some("resourceModified")
    }
}

impl From<TransportError> for GraphError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err.0)
    }
}

impl From<GraphError> for FsError {
    fn from(err: GraphError) -> Self {
        match &err {
            GraphError::Api { status: 404, .. } => FsError::NotFound,
            GraphError::Api { code, message, .. } if code == "nameAlreadyExists" => {
                FsError::AlreadyExists(message.clone())
            }
            GraphError::Api { status: 403, message, .. } => {
                FsError::Permission(message.clone())
            }
            _ => FsError::RemoteIo(err.to_string()),
        }
    }
}
