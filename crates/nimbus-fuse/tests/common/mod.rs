//! Shared test harness: a scripted in-memory HTTP fake and a mount
//! context wired entirely from fakes.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

use nimbus_cache::ContentStore;
use nimbus_core::config::Config;
use nimbus_core::ports::{HttpClient, HttpResponse, Method, StaticToken, TransportError};
use nimbus_core::types::{DriveType, ItemId};
use nimbus_fuse::cache::MetadataCache;
use nimbus_fuse::context::FsContext;
use nimbus_fuse::inode::{Inode, InodeState};
use nimbus_fuse::vfs::Vfs;
use nimbus_graph::item::DriveItem;
use nimbus_graph::GraphClient;

/// Base URL the test GraphClient is configured with.
pub const BASE: &str = "https://graph.test/v1.0";

/// Root item id every test context starts with.
pub const ROOT_ID: &str = "root-id";

pub fn url(path: &str) -> String {
    format!("{BASE}{path}")
}

/// One request as the fake saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Scripted HTTP fake: responses are enqueued per (method, url) and
/// replayed in order; unmatched requests get a Graph-style 404.
pub struct FakeHttp {
    routes: Mutex<HashMap<(Method, String), VecDeque<Result<HttpResponse, TransportError>>>>,
    log: Mutex<Vec<Recorded>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Enqueues a response for the next request to (method, url).
    pub fn respond(&self, method: Method, url: impl Into<String>, status: u16, body: &str) {
        self.routes
            .lock()
            .entry((method, url.into()))
            .or_default()
            .push_back(Ok(HttpResponse {
                status,
                body: body.as_bytes().to_vec(),
            }));
    }

    /// Enqueues a transport failure for the next request to (method, url).
    pub fn fail(&self, method: Method, url: impl Into<String>) {
        self.routes
            .lock()
            .entry((method, url.into()))
            .or_default()
            .push_back(Err(TransportError("connection refused".to_string())));
    }

    /// Every request the fake has seen, in order.
    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().clone()
    }

    /// Requests filtered by method and URL substring.
    pub fn requests_matching(&self, method: Method, url_part: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.url.contains(url_part))
            .collect()
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, TransportError> {
        self.log.lock().push(Recorded {
            method,
            url: url.to_string(),
            headers: headers.to_vec(),
            body,
        });
        let scripted = self
            .routes
            .lock()
            .get_mut(&(method, url.to_string()))
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or_else(|| {
            Ok(HttpResponse {
                status: 404,
                body: br#"{"error":{"code":"itemNotFound","message":"no scripted response"}}"#
                    .to_vec(),
            })
        })
    }
}

// ============================================================================
// Graph JSON builders
// ============================================================================

pub fn file_json(id: &str, parent: &str, name: &str, size: u64) -> Value {
    json!({
        "id": id,
        "name": name,
        "size": size,
        "parentReference": { "id": parent },
        "file": {}
    })
}

pub fn file_json_hashed(
    id: &str,
    parent: &str,
    name: &str,
    size: u64,
    mtime: &str,
    sha1: Option<&str>,
    quick_xor: Option<&str>,
) -> Value {
    let mut hashes = serde_json::Map::new();
    if let Some(h) = sha1 {
        hashes.insert("sha1Hash".to_string(), json!(h));
    }
    if let Some(h) = quick_xor {
        hashes.insert("quickXorHash".to_string(), json!(h));
    }
    json!({
        "id": id,
        "name": name,
        "size": size,
        "lastModifiedDateTime": mtime,
        "parentReference": { "id": parent },
        "file": { "hashes": Value::Object(hashes) }
    })
}

pub fn dir_json(id: &str, parent: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "size": 0,
        "parentReference": { "id": parent },
        "folder": { "childCount": 0 }
    })
}

pub fn deleted_json(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "deleted": { "state": "deleted" }
    })
}

pub fn children_page(items: &[Value]) -> String {
    json!({ "value": items }).to_string()
}

pub fn delta_page_json(items: &[Value], next: Option<&str>, delta: Option<&str>) -> String {
    let mut page = serde_json::Map::new();
    page.insert("value".to_string(), json!(items));
    if let Some(link) = next {
        page.insert("@odata.nextLink".to_string(), json!(link));
    }
    if let Some(link) = delta {
        page.insert("@odata.deltaLink".to_string(), json!(link));
    }
    Value::Object(page).to_string()
}

// ============================================================================
// Test context
// ============================================================================

pub struct TestFs {
    pub vfs: Vfs,
    pub ctx: Arc<FsContext>,
    pub http: Arc<FakeHttp>,
    pub root: ItemId,
    _tmp: TempDir,
}

pub fn test_fs() -> TestFs {
    test_fs_with_drive(DriveType::Personal)
}

pub fn test_fs_with_drive(drive: DriveType) -> TestFs {
    let tmp = tempfile::tempdir().unwrap();
    let http = Arc::new(FakeHttp::new());
    let graph = GraphClient::with_base_url(
        Arc::clone(&http) as Arc<dyn HttpClient>,
        Arc::new(StaticToken::new("test-token")),
        BASE,
    );
    let store = ContentStore::open(tmp.path().join("nimbus.db")).unwrap();
    let cache = MetadataCache::new();
    cache.set_root(Arc::new(Inode::new(InodeState::new_dir(
        ItemId::new(ROOT_ID),
        ItemId::new(""),
        "root",
        0o755,
    ))));
    let ctx = FsContext::from_parts(graph, store, cache, Config::default(), drive);
    TestFs {
        vfs: Vfs::new(Arc::clone(&ctx)),
        ctx,
        http,
        root: ItemId::new(ROOT_ID),
        _tmp: tmp,
    }
}

impl TestFs {
    /// Installs a server-known item (file or folder) under a cached
    /// parent, as if a previous traversal had materialized it.
    pub fn seed_remote(&self, item: &Value) -> ItemId {
        let drive_item: DriveItem = serde_json::from_value(item.clone()).unwrap();
        let parent = ItemId::new(drive_item.parent_id().unwrap().to_string());
        let node = self
            .ctx
            .cache
            .insert_child(&parent, InodeState::from_drive_item(&drive_item))
            .unwrap();
        let id = node.read().id.clone();
        id
    }

    /// Checks the structural invariants of the whole metadata graph.
    pub fn assert_graph_invariants(&self) {
        for state in self.ctx.cache.snapshot_states() {
            // Every non-root inode is linked from its parent
            if state.id != self.ctx.cache.root_id() {
                let parent = self
                    .ctx
                    .cache
                    .get(&state.parent_id)
                    .unwrap_or_else(|| panic!("missing parent of {}", state.id));
                let pstate = parent.read();
                let children = pstate
                    .children
                    .as_ref()
                    .unwrap_or_else(|| panic!("parent of {} has unknown children", state.id));
                assert!(
                    children.contains(&state.id),
                    "{} not in its parent's child list",
                    state.id
                );
            }
            // Subdir counts and case-folded uniqueness per directory
            if let Some(children) = &state.children {
                let mut dirs = 0;
                let mut names: Vec<String> = Vec::new();
                for child_id in children {
                    let child = self.ctx.cache.get(child_id).expect("dangling child id");
                    let cstate = child.read();
                    assert_eq!(cstate.parent_id, state.id);
                    if cstate.is_dir() {
                        dirs += 1;
                    }
                    let folded = cstate.name.to_ascii_lowercase();
                    assert!(
                        !names.contains(&folded),
                        "case-folded duplicate under {}: {}",
                        state.id,
                        cstate.name
                    );
                    names.push(folded);
                }
                assert_eq!(state.subdir_count, dirs, "subdir_count of {}", state.id);
            }
            // Dirty content is always present in memory
            if state.has_changes {
                assert!(state.data.is_some(), "{} dirty without data", state.id);
            }
        }
    }
}
