//! Authenticated, typed Graph API client.
//!
//! `GraphClient` composes the [`HttpClient`] transport port with an
//! [`AuthProvider`] and exposes the drive operations the filesystem
//! consumes. Every request attaches a bearer token except the chunk PUTs
//! of a resumable upload session, whose URLs are pre-authenticated and
//! reject an `Authorization` header. `POST`/`PATCH` bodies are JSON;
//! content PUTs go out as `text/plain`; `PATCH` additionally sends
//! `If-Match: *`.
//!
//! A 401 triggers one token refresh and a single retry; everything else
//! is surfaced to the caller as a [`GraphError`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use nimbus_core::ports::{AuthProvider, HttpClient, HttpResponse, Method};
use nimbus_core::types::ItemId;

use crate::error::GraphError;
use crate::item::{Drive, DriveItem, DriveItemList, UploadSessionInfo};

/// Base URL for Microsoft Graph API v1.0.
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_PLAIN: &str = "text/plain";

/// Typed Graph API client over the transport and auth ports.
pub struct GraphClient {
    http: Arc<dyn HttpClient>,
    auth: Arc<dyn AuthProvider>,
    base_url: String,
}

impl GraphClient {
    pub fn new(http: Arc<dyn HttpClient>, auth: Arc<dyn AuthProvider>) -> Self {
        Self::with_base_url(http, auth, GRAPH_BASE_URL)
    }

    /// Creates a client against a custom base URL (useful for testing).
    pub fn with_base_url(
        http: Arc<dyn HttpClient>,
        auth: Arc<dyn AuthProvider>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            auth,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolves a path to a full URL; absolute URLs (cursor links, upload
    /// session URLs) pass through untouched.
    fn resolve(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        }
    }

    /// Sends one request, attaching auth and content-type headers.
    ///
    /// On a 401 the token is refreshed once and the request replayed.
    async fn send(
        &self,
        method: Method,
        path_or_url: &str,
        content_type: Option<&str>,
        extra_headers: &[(String, String)],
        body: Option<Vec<u8>>,
        authorized: bool,
    ) -> Result<HttpResponse, GraphError> {
        let url = self.resolve(path_or_url);
        let mut refreshed = false;
        loop {
            let mut headers: Vec<(String, String)> = Vec::new();
            if authorized {
                let token = self
                    .auth
                    .access_token()
                    .await
                    .map_err(|e| GraphError::Auth(e.to_string()))?;
                headers.push(("Authorization".to_string(), format!("bearer {token}")));
            }
            if let Some(ct) = content_type {
                headers.push(("Content-Type".to_string(), ct.to_string()));
            }
            headers.extend_from_slice(extra_headers);

            let resp = self
                .http
                .request(method, &url, &headers, body.clone())
                .await?;

            if resp.status == 401 && authorized && !refreshed {
                debug!(%url, "401 from server, refreshing token and retrying");
                self.auth
                    .refresh()
                    .await
                    .map_err(|e| GraphError::Auth(e.to_string()))?;
                refreshed = true;
                continue;
            }
            return Ok(resp);
        }
    }

    /// Checks the status and decodes the body as JSON.
    fn decode<T: DeserializeOwned>(resp: HttpResponse) -> Result<T, GraphError> {
        if !resp.is_success() {
            return Err(GraphError::from_response(&resp));
        }
        serde_json::from_slice(&resp.body).map_err(|e| GraphError::Decode(e.to_string()))
    }

    /// Checks the status, discarding the body.
    fn expect_success(resp: HttpResponse) -> Result<(), GraphError> {
        if !resp.is_success() {
            return Err(GraphError::from_response(&resp));
        }
        Ok(())
    }

    /// Percent-encodes the characters that would break a `:/name:` path
    /// segment in an item-by-path endpoint.
    fn escape_segment(name: &str) -> String {
        name.replace('%', "%25").replace('#', "%23").replace('?', "%3F")
    }

    // ========================================================================
    // Drive metadata
    // ========================================================================

    /// `GET /me/drive` - drive identity, type and quota.
    pub async fn get_drive(&self) -> Result<Drive, GraphError> {
        let resp = self
            .send(Method::Get, "/me/drive", None, &[], None, true)
            .await?;
        Self::decode(resp)
    }

    /// `GET /me/drive/root` - the root item.
    pub async fn get_root(&self) -> Result<DriveItem, GraphError> {
        let resp = self
            .send(Method::Get, "/me/drive/root", None, &[], None, true)
            .await?;
        Self::decode(resp)
    }

    /// `GET /me/drive/items/{id}` - a single item by id.
    pub async fn get_item(&self, id: &ItemId) -> Result<DriveItem, GraphError> {
        let path = format!("/me/drive/items/{id}");
        let resp = self.send(Method::Get, &path, None, &[], None, true).await?;
        Self::decode(resp)
    }

    /// `GET /me/drive/items/{parent}:/{name}` - a child by name.
    pub async fn get_child_by_name(
        &self,
        parent: &ItemId,
        name: &str,
    ) -> Result<DriveItem, GraphError> {
        let path = format!(
            "/me/drive/items/{parent}:/{}",
            Self::escape_segment(name)
        );
        let resp = self.send(Method::Get, &path, None, &[], None, true).await?;
        Self::decode(resp)
    }

    /// `GET /me/drive/items/{id}/children` - the full child listing,
    /// following `@odata.nextLink` pagination.
    pub async fn list_children(&self, id: &ItemId) -> Result<Vec<DriveItem>, GraphError> {
        let mut items = Vec::new();
        let mut link = format!("/me/drive/items/{id}/children");
        loop {
            let resp = self.send(Method::Get, &link, None, &[], None, true).await?;
            let page: DriveItemList = Self::decode(resp)?;
            items.extend(page.value);
            match page.next_link {
                Some(next) => link = next,
                None => break,
            }
        }
        debug!(id = %id, children = items.len(), "listed children");
        Ok(items)
    }

    // ========================================================================
    // Content transfer
    // ========================================================================

    /// `GET /me/drive/items/{id}/content` - raw file bytes.
    pub async fn get_content(&self, id: &ItemId) -> Result<Vec<u8>, GraphError> {
        let path = format!("/me/drive/items/{id}/content");
        let resp = self.send(Method::Get, &path, None, &[], None, true).await?;
        if !resp.is_success() {
            return Err(GraphError::from_response(&resp));
        }
        debug!(id = %id, bytes = resp.body.len(), "downloaded content");
        Ok(resp.body)
    }

    /// `PUT /me/drive/items/{id}/content` - simple upload by id.
    pub async fn put_content(
        &self,
        id: &ItemId,
        data: &[u8],
    ) -> Result<DriveItem, GraphError> {
        let path = format!("/me/drive/items/{id}/content");
        let resp = self
            .send(
                Method::Put,
                &path,
                Some(CONTENT_TYPE_PLAIN),
                &[],
                Some(data.to_vec()),
                true,
            )
            .await?;
        Self::decode(resp)
    }

    /// `PUT /me/drive/items/{parent}:/{name}:/content` - simple upload
    /// addressed by parent and name. Creates the item server-side, which
    /// makes this double as local-id promotion (a zero-byte body).
    pub async fn put_content_by_name(
        &self,
        parent: &ItemId,
        name: &str,
        data: &[u8],
    ) -> Result<DriveItem, GraphError> {
        let path = format!(
            "/me/drive/items/{parent}:/{}:/content",
            Self::escape_segment(name)
        );
        let resp = self
            .send(
                Method::Put,
                &path,
                Some(CONTENT_TYPE_PLAIN),
                &[],
                Some(data.to_vec()),
                true,
            )
            .await?;
        Self::decode(resp)
    }

    // ========================================================================
    // Namespace mutation
    // ========================================================================

    /// `POST /me/drive/items/{parent}/children` - create a folder.
    pub async fn create_folder(
        &self,
        parent: &ItemId,
        name: &str,
    ) -> Result<DriveItem, GraphError> {
        let path = format!("/me/drive/items/{parent}/children");
        let body = json!({ "name": name, "folder": {} });
        let resp = self
            .send(
                Method::Post,
                &path,
                Some(CONTENT_TYPE_JSON),
                &[],
                Some(body.to_string().into_bytes()),
                true,
            )
            .await?;
        Self::decode(resp)
    }

    /// `PATCH /me/drive/items/{id}` - rename and/or move an item.
    pub async fn move_item(
        &self,
        id: &ItemId,
        new_parent: &ItemId,
        new_name: &str,
    ) -> Result<DriveItem, GraphError> {
        let path = format!("/me/drive/items/{id}");
        let body = json!({
            "parentReference": { "id": new_parent.as_str() },
            "name": new_name,
        });
        let headers = [("If-Match".to_string(), "*".to_string())];
        let resp = self
            .send(
                Method::Patch,
                &path,
                Some(CONTENT_TYPE_JSON),
                &headers,
                Some(body.to_string().into_bytes()),
                true,
            )
            .await?;
        Self::decode(resp)
    }

    /// `DELETE /me/drive/items/{id}`.
    pub async fn delete_item(&self, id: &ItemId) -> Result<(), GraphError> {
        let path = format!("/me/drive/items/{id}");
        let resp = self
            .send(Method::Delete, &path, None, &[], None, true)
            .await?;
        Self::expect_success(resp)
    }

    // ========================================================================
    // Resumable upload sessions
    // ========================================================================

    /// `POST /me/drive/items/{id}/createUploadSession`.
    ///
    /// The conflict behavior is `replace`: the session overwrites the item
    /// the local write targeted.
    pub async fn create_upload_session(
        &self,
        id: &ItemId,
    ) -> Result<UploadSessionInfo, GraphError> {
        let path = format!("/me/drive/items/{id}/createUploadSession");
        let body = json!({
            "item": { "@microsoft.graph.conflictBehavior": "replace" }
        });
        let resp = self
            .send(
                Method::Post,
                &path,
                Some(CONTENT_TYPE_JSON),
                &[],
                Some(body.to_string().into_bytes()),
                true,
            )
            .await?;
        Self::decode(resp)
    }

    /// `PUT <uploadUrl>` - one chunk of a resumable session.
    ///
    /// Returns the raw response so the upload manager can drive its retry
    /// state machine off the status code. The session URL is
    /// pre-authenticated: no `Authorization` header is sent (the server
    /// rejects the request otherwise).
    pub async fn upload_chunk(
        &self,
        upload_url: &str,
        chunk: &[u8],
        offset: u64,
        total: u64,
    ) -> Result<HttpResponse, GraphError> {
        let range_end = offset + chunk.len() as u64 - 1;
        let headers = [
            ("Content-Length".to_string(), chunk.len().to_string()),
            (
                "Content-Range".to_string(),
                format!("bytes {offset}-{range_end}/{total}"),
            ),
        ];
        debug!(offset, len = chunk.len(), total, "uploading chunk");
        let resp = self
            .send(
                Method::Put,
                upload_url,
                None,
                &headers,
                Some(chunk.to_vec()),
                false,
            )
            .await?;
        Ok(resp)
    }

    /// `DELETE <uploadUrl>` - cancel a resumable session.
    pub async fn cancel_upload_session(&self, upload_url: &str) -> Result<(), GraphError> {
        let resp = self
            .send(Method::Delete, upload_url, None, &[], None, true)
            .await?;
        Self::expect_success(resp)
    }

    /// `GET` on a delta path or cursor URL, undecoded.
    pub(crate) async fn get_raw(&self, path_or_url: &str) -> Result<HttpResponse, GraphError> {
        self.send(Method::Get, path_or_url, None, &[], None, true)
            .await
    }

    /// Decodes a raw response; shared with the delta module.
    pub(crate) fn decode_json<T: DeserializeOwned>(resp: HttpResponse) -> Result<T, GraphError> {
        Self::decode(resp)
    }
}
