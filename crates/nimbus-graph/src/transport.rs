//! `reqwest`-backed implementation of the transport port.
//!
//! The only production [`HttpClient`]. Redirects are followed (content
//! downloads bounce through a pre-signed URL), and any response - success
//! or error status - is returned as `Ok`; only failures to reach the
//! server at all become [`TransportError`]s.

use async_trait::async_trait;
use tracing::trace;

use nimbus_core::ports::{HttpClient, HttpResponse, Method, TransportError};

/// Production HTTP transport over a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl HttpClient for ReqwestTransport {
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, TransportError> {
        trace!(%method, %url, "sending request");

        let mut builder = self.client.request(to_reqwest_method(method), url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if let Some(bytes) = body {
            builder = builder.body(bytes);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError(e.to_string()))?
            .to_vec();

        trace!(%url, status, bytes = body.len(), "received response");
        Ok(HttpResponse { status, body })
    }
}
