//! Raw HTTP transport port.
//!
//! Implementations carry bytes; they do not add authentication or decode
//! bodies. Callers supply every header (including `Authorization`) and
//! interpret the status code. Any HTTP status, including 4xx/5xx, is an
//! `Ok` response; `Err` is reserved for transport failures (DNS,
//! connection reset, timeout), which the upload manager and the delta
//! synchronizer treat very differently from server-side errors.

use async_trait::async_trait;
use thiserror::Error;

/// HTTP methods used against the Graph API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        write!(f, "{name}")
    }
}

/// A raw HTTP response: status code plus undecoded body bytes.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body decoded as UTF-8, lossily, for error reporting.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A failure to reach the server at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("transport failure: {0}")]
pub struct TransportError(pub String);

/// Authenticated-agnostic HTTP transport.
///
/// The five convenience methods all funnel into [`HttpClient::request`];
/// fakes only need to implement that one method.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, TransportError>;

    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, TransportError> {
        self.request(Method::Get, url, headers, None).await
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, TransportError> {
        self.request(Method::Post, url, headers, Some(body)).await
    }

    async fn put(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, TransportError> {
        self.request(Method::Put, url, headers, Some(body)).await
    }

    async fn patch(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, TransportError> {
        self.request(Method::Patch, url, headers, Some(body)).await
    }

    async fn delete(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, TransportError> {
        self.request(Method::Delete, url, headers, None).await
    }
}
