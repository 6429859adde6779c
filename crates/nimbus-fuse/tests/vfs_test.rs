//! Integration tests for the VFS handler surface, driven through the
//! scripted HTTP fake.

mod common;

use common::*;

use nimbus_core::errors::FsError;
use nimbus_core::ports::Method;
use nimbus_core::types::ItemId;
use nimbus_fuse::vfs::SetAttr;

// ============================================================================
// Lookup, readdir, materialization
// ============================================================================

#[tokio::test]
async fn test_lookup_materializes_children_once() {
    let fs = test_fs();
    fs.seed_remote(&dir_json("dir-1", ROOT_ID, "docs"));
    fs.http.respond(
        Method::Get,
        url("/me/drive/items/dir-1/children"),
        200,
        &children_page(&[file_json("f-1", "dir-1", "a.txt", 3)]),
    );

    let node = fs
        .vfs
        .lookup(&ItemId::new("dir-1"), "a.txt")
        .await
        .unwrap();
    assert_eq!(node.read().name, "a.txt");

    // A second lookup is served from the cache
    fs.vfs.lookup(&ItemId::new("dir-1"), "a.txt").await.unwrap();
    assert_eq!(
        fs.http.requests_matching(Method::Get, "/children").len(),
        1
    );
    fs.assert_graph_invariants();
}

#[tokio::test]
async fn test_lookup_is_case_insensitive() {
    let fs = test_fs();
    fs.seed_remote(&file_json("f-1", ROOT_ID, "File.txt", 3));

    let node = fs.vfs.lookup(&fs.root, "file.TXT").await.unwrap();
    // Case is preserved in storage
    assert_eq!(node.read().name, "File.txt");
}

#[tokio::test]
async fn test_lookup_missing_is_not_found() {
    let fs = test_fs();
    let err = fs.vfs.lookup(&fs.root, "nope.txt").await.unwrap_err();
    assert_eq!(err, FsError::NotFound);
}

#[tokio::test]
async fn test_lookup_rejects_ignored_names_without_network() {
    let fs = test_fs();
    for name in [".Trash", ".Trash-1000", ".DS_Store", "autorun.inf", "BDMV"] {
        let err = fs.vfs.lookup(&fs.root, name).await.unwrap_err();
        assert_eq!(err, FsError::NotFound, "{name}");
    }
    assert!(fs.http.requests().is_empty());
}

#[tokio::test]
async fn test_readdir_lists_children_with_modes() {
    let fs = test_fs();
    fs.seed_remote(&file_json("f-1", ROOT_ID, "a.txt", 3));
    fs.seed_remote(&dir_json("d-1", ROOT_ID, "sub"));

    let entries = fs.vfs.readdir(&fs.root).await.unwrap();
    assert_eq!(entries.len(), 2);
    let file = entries.iter().find(|e| e.name == "a.txt").unwrap();
    let dir = entries.iter().find(|e| e.name == "sub").unwrap();
    assert_eq!(file.mode & libc::S_IFMT, libc::S_IFREG);
    assert_eq!(dir.mode & libc::S_IFMT, libc::S_IFDIR);
    assert_ne!(file.ino, dir.ino);
}

#[tokio::test]
async fn test_get_by_path_walks_segments() {
    let fs = test_fs();
    fs.seed_remote(&dir_json("dir-1", ROOT_ID, "docs"));
    fs.http.respond(
        Method::Get,
        url("/me/drive/items/dir-1/children"),
        200,
        &children_page(&[file_json("f-9", "dir-1", "deep.txt", 1)]),
    );

    let node = fs.vfs.get_by_path("/docs/deep.txt").await.unwrap();
    assert_eq!(node.read().id, ItemId::new("f-9"));

    let root = fs.vfs.get_by_path("/").await.unwrap();
    assert_eq!(root.read().id, fs.root);
}

// ============================================================================
// getattr / setattr
// ============================================================================

#[tokio::test]
async fn test_getattr_file_and_dir() {
    let fs = test_fs();
    fs.seed_remote(&file_json("f-1", ROOT_ID, "a.txt", 42));
    fs.seed_remote(&dir_json("d-1", ROOT_ID, "sub"));

    let file = fs.vfs.getattr(&ItemId::new("f-1")).unwrap();
    assert_eq!(file.size, 42);
    assert_eq!(file.nlink, 1);
    assert_eq!(file.mode & 0o7777, 0o644);

    let dir = fs.vfs.getattr(&ItemId::new("d-1")).unwrap();
    assert_eq!(dir.size, 4096);
    assert_eq!(dir.nlink, 2);

    // Root now has one subdirectory
    let root = fs.vfs.getattr(&fs.root).unwrap();
    assert_eq!(root.nlink, 3);

    assert_eq!(fs.vfs.getattr(&ItemId::new("ghost")), Err(FsError::NotFound));
}

#[tokio::test]
async fn test_setattr_applies_mtime_mode_size() {
    let fs = test_fs();
    let node = fs.vfs.create(&fs.root, "t.txt", 0o644).await.unwrap();
    let id = node.read().id.clone();
    fs.vfs.write(&id, 0, b"hello world").unwrap();

    let attr = fs
        .vfs
        .setattr(
            &id,
            SetAttr {
                mtime: Some(1_700_000_000),
                mode: Some(0o600),
                size: Some(5),
            },
        )
        .await
        .unwrap();

    assert_eq!(attr.mtime, 1_700_000_000);
    assert_eq!(attr.mode & 0o7777, 0o600);
    assert_eq!(attr.mode & libc::S_IFMT, libc::S_IFREG);
    assert_eq!(attr.size, 5);
    assert_eq!(fs.vfs.read(&id, 0, 64).await.unwrap(), b"hello");
}

#[tokio::test]
async fn test_setattr_size_extends_with_zeros() {
    let fs = test_fs();
    let node = fs.vfs.create(&fs.root, "t.txt", 0o644).await.unwrap();
    let id = node.read().id.clone();
    fs.vfs.write(&id, 0, b"ab").unwrap();

    fs.vfs
        .setattr(&id, SetAttr { size: Some(5), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(fs.vfs.read(&id, 0, 64).await.unwrap(), b"ab\0\0\0");
    assert!(node.read().has_changes);
}

// ============================================================================
// Read / write boundaries
// ============================================================================

#[tokio::test]
async fn test_write_then_read_without_network() {
    let fs = test_fs();
    let node = fs.vfs.create(&fs.root, "w.txt", 0o644).await.unwrap();
    let id = node.read().id.clone();

    fs.vfs.write(&id, 0, b"hello\n").unwrap();
    assert_eq!(fs.vfs.read(&id, 0, 6).await.unwrap(), b"hello\n");
    assert!(fs.http.requests().is_empty());
    fs.assert_graph_invariants();
}

#[tokio::test]
async fn test_read_past_eof_is_invalid_argument() {
    let fs = test_fs();
    let node = fs.vfs.create(&fs.root, "r.txt", 0o644).await.unwrap();
    let id = node.read().id.clone();
    fs.vfs.write(&id, 0, b"12345").unwrap();

    let err = fs.vfs.read(&id, 6, 1).await.unwrap_err();
    assert!(matches!(err, FsError::InvalidArgument(_)));

    // Reading exactly at EOF returns nothing, not an error
    assert_eq!(fs.vfs.read(&id, 5, 10).await.unwrap(), b"");
}

#[tokio::test]
async fn test_read_truncates_at_eof() {
    let fs = test_fs();
    let node = fs.vfs.create(&fs.root, "r.txt", 0o644).await.unwrap();
    let id = node.read().id.clone();
    fs.vfs.write(&id, 0, b"12345").unwrap();

    // off + len > size returns size - off bytes
    assert_eq!(fs.vfs.read(&id, 3, 10).await.unwrap(), b"45");
}

#[tokio::test]
async fn test_write_past_eof_zero_pads_like_truncate() {
    let fs = test_fs();

    let via_write = fs.vfs.create(&fs.root, "a.txt", 0o644).await.unwrap();
    let id_a = via_write.read().id.clone();
    fs.vfs.write(&id_a, 0, b"xy").unwrap();
    fs.vfs.write(&id_a, 5, b"Z").unwrap();

    let via_truncate = fs.vfs.create(&fs.root, "b.txt", 0o644).await.unwrap();
    let id_b = via_truncate.read().id.clone();
    fs.vfs.write(&id_b, 0, b"xy").unwrap();
    fs.vfs
        .setattr(&id_b, SetAttr { size: Some(5), ..Default::default() })
        .await
        .unwrap();
    fs.vfs.write(&id_b, 5, b"Z").unwrap();

    let a = fs.vfs.read(&id_a, 0, 16).await.unwrap();
    let b = fs.vfs.read(&id_b, 0, 16).await.unwrap();
    assert_eq!(a, b"xy\0\0\0Z");
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_overwrite_in_place_keeps_size() {
    let fs = test_fs();
    let node = fs.vfs.create(&fs.root, "o.txt", 0o644).await.unwrap();
    let id = node.read().id.clone();
    fs.vfs.write(&id, 0, b"abcdef").unwrap();
    fs.vfs.write(&id, 1, b"XY").unwrap();

    assert_eq!(fs.vfs.read(&id, 0, 16).await.unwrap(), b"aXYdef");
    assert_eq!(node.read().size, 6);
}

// ============================================================================
// Flush and the content store
// ============================================================================

#[tokio::test]
async fn test_flush_spills_to_store_and_drops_data() {
    let fs = test_fs();
    let node = fs.vfs.create(&fs.root, "w.txt", 0o644).await.unwrap();
    let id = node.read().id.clone();
    fs.vfs.write(&id, 0, b"hello\n").unwrap();

    fs.vfs.flush(&id).await.unwrap();

    assert!(node.read().data.is_none());
    assert_eq!(fs.ctx.store.get(&id).unwrap(), Some(b"hello\n".to_vec()));
    // No network was touched: the upload session is only queued
    assert!(fs.http.requests().is_empty());

    // A read after flush faults the blob back in via hash validation
    assert_eq!(fs.vfs.read(&id, 0, 6).await.unwrap(), b"hello\n");
    assert!(fs.http.requests().is_empty());
}

#[tokio::test]
async fn test_open_refetches_on_hash_mismatch() {
    let fs = test_fs();
    let id = fs.seed_remote(&file_json_hashed(
        "f-1",
        ROOT_ID,
        "doc.txt",
        7,
        "2025-06-15T10:30:00Z",
        Some("AAF4C61DDCC5E8A2DABEDE0F3B482CD9AEA9434D"), // sha1("hello")
        None,
    ));
    // The cached blob does not match the recorded hash
    fs.ctx.store.put(&id, b"corrupt").unwrap();
    fs.http.respond(
        Method::Get,
        url("/me/drive/items/f-1/content"),
        200,
        "hello",
    );

    fs.vfs.open(&id).await.unwrap();
    assert_eq!(fs.vfs.read(&id, 0, 16).await.unwrap(), b"hello");
    // The refetched content replaced the corrupt blob
    assert_eq!(fs.ctx.store.get(&id).unwrap(), Some(b"hello".to_vec()));
    assert_eq!(
        fs.http.requests_matching(Method::Get, "/content").len(),
        1
    );
}

#[tokio::test]
async fn test_open_trusts_matching_cached_blob() {
    let fs = test_fs();
    let id = fs.seed_remote(&file_json_hashed(
        "f-1",
        ROOT_ID,
        "doc.txt",
        5,
        "2025-06-15T10:30:00Z",
        Some("AAF4C61DDCC5E8A2DABEDE0F3B482CD9AEA9434D"),
        None,
    ));
    fs.ctx.store.put(&id, b"hello").unwrap();

    fs.vfs.open(&id).await.unwrap();
    assert_eq!(fs.vfs.read(&id, 0, 5).await.unwrap(), b"hello");
    // Nothing was fetched
    assert!(fs.http.requests().is_empty());
}

// ============================================================================
// create / unlink / rmdir
// ============================================================================

#[tokio::test]
async fn test_create_unlink_create_yields_fresh_inode() {
    let fs = test_fs();
    let first = fs.vfs.create(&fs.root, "n.txt", 0o644).await.unwrap();
    let first_id = first.read().id.clone();
    fs.vfs.write(&first_id, 0, b"old").unwrap();
    fs.vfs.flush(&first_id).await.unwrap();

    fs.vfs.unlink(&fs.root, "n.txt").await.unwrap();
    assert_eq!(fs.ctx.store.get(&first_id).unwrap(), None);

    let second = fs.vfs.create(&fs.root, "n.txt", 0o644).await.unwrap();
    let second_id = second.read().id.clone();
    assert_ne!(first_id, second_id);
    // No stale cache resurrection
    assert_eq!(fs.vfs.read(&second_id, 0, 16).await.unwrap(), b"");
    // Local-only lifecycle: the server never heard about any of it
    assert!(fs.http.requests().is_empty());
    fs.assert_graph_invariants();
}

#[tokio::test]
async fn test_create_exact_duplicate_is_already_exists() {
    let fs = test_fs();
    fs.vfs.create(&fs.root, "dup.txt", 0o644).await.unwrap();
    let err = fs.vfs.create(&fs.root, "dup.txt", 0o644).await.unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_case_collision_adopts_existing_inode() {
    let fs = test_fs();
    let first = fs.vfs.create(&fs.root, "case.txt", 0o644).await.unwrap();
    let first_id = first.read().id.clone();
    fs.vfs.write(&first_id, 0, b"NTFS is bad").unwrap();

    // The second create succeeds and reuses the same inode
    let second = fs.vfs.create(&fs.root, "CASE.txt", 0o644).await.unwrap();
    let second_id = second.read().id.clone();
    assert_eq!(first_id, second_id);
    fs.vfs.write(&second_id, 0, b"yep").unwrap();

    // Any casing resolves to the adopted inode
    let via_lookup = fs.vfs.lookup(&fs.root, "Case.TXT").await.unwrap();
    let id = via_lookup.read().id.clone();
    assert_eq!(fs.vfs.read(&id, 0, 16).await.unwrap(), b"yep");

    // Exactly one entry, displaying the later-written casing
    let entries = fs.vfs.readdir(&fs.root).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "CASE.txt");
    fs.assert_graph_invariants();
}

#[tokio::test]
async fn test_unlink_remote_file_deletes_server_side() {
    let fs = test_fs();
    let id = fs.seed_remote(&file_json("f-1", ROOT_ID, "gone.txt", 4));
    fs.ctx.store.put(&id, b"data").unwrap();
    fs.http
        .respond(Method::Delete, url("/me/drive/items/f-1"), 204, "");

    fs.vfs.unlink(&fs.root, "gone.txt").await.unwrap();

    assert_eq!(
        fs.http.requests_matching(Method::Delete, "/items/f-1").len(),
        1
    );
    assert!(fs.ctx.cache.get(&id).is_none());
    assert_eq!(fs.ctx.store.get(&id).unwrap(), None);
    assert_eq!(
        fs.vfs.lookup(&fs.root, "gone.txt").await.unwrap_err(),
        FsError::NotFound
    );
}

#[tokio::test]
async fn test_rmdir_refuses_non_empty_directory() {
    let fs = test_fs();
    fs.seed_remote(&dir_json("d-1", ROOT_ID, "full"));
    fs.http.respond(
        Method::Get,
        url("/me/drive/items/d-1/children"),
        200,
        &children_page(&[file_json("f-1", "d-1", "inner.txt", 1)]),
    );

    let err = fs.vfs.rmdir(&fs.root, "full").await.unwrap_err();
    assert!(matches!(err, FsError::NotEmpty(_)));
    assert!(fs.ctx.cache.get(&ItemId::new("d-1")).is_some());
}

#[tokio::test]
async fn test_rmdir_empty_directory() {
    let fs = test_fs();
    fs.seed_remote(&dir_json("d-1", ROOT_ID, "empty"));
    fs.http.respond(
        Method::Get,
        url("/me/drive/items/d-1/children"),
        200,
        &children_page(&[]),
    );
    fs.http
        .respond(Method::Delete, url("/me/drive/items/d-1"), 204, "");

    fs.vfs.rmdir(&fs.root, "empty").await.unwrap();
    assert!(fs.ctx.cache.get(&ItemId::new("d-1")).is_none());
    assert_eq!(fs.ctx.cache.root().unwrap().read().subdir_count, 0);
}

#[tokio::test]
async fn test_mkdir_creates_on_server_first() {
    let fs = test_fs();
    fs.http.respond(
        Method::Post,
        url("/me/drive/items/root-id/children"),
        201,
        &dir_json("d-new", ROOT_ID, "fresh").to_string(),
    );

    let node = fs.vfs.mkdir(&fs.root, "fresh", 0o755).await.unwrap();
    // The directory has a remote id immediately
    assert_eq!(node.read().id, ItemId::new("d-new"));
    assert!(!node.read().id.is_local());

    let posts = fs.http.requests_matching(Method::Post, "/children");
    assert_eq!(posts.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(posts[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(body["name"], "fresh");
    assert!(body["folder"].is_object());
    fs.assert_graph_invariants();
}

// ============================================================================
// rename
// ============================================================================

#[tokio::test]
async fn test_rename_within_parent_promotes_local_file() {
    let fs = test_fs();
    let node = fs.vfs.create(&fs.root, "start.txt", 0o644).await.unwrap();
    let local_id = node.read().id.clone();
    assert!(local_id.is_local());

    // Promotion: zero-byte PUT by parent path
    fs.http.respond(
        Method::Put,
        url("/me/drive/items/root-id:/start.txt:/content"),
        201,
        &file_json("srv-1", ROOT_ID, "start.txt", 0).to_string(),
    );
    fs.http.respond(
        Method::Patch,
        url("/me/drive/items/srv-1"),
        200,
        &file_json("srv-1", ROOT_ID, "end.txt", 0).to_string(),
    );

    fs.vfs
        .rename(&fs.root, "start.txt", &fs.root, "end.txt")
        .await
        .unwrap();

    // The promotion uploaded an empty placeholder
    let put = &fs.http.requests_matching(Method::Put, ":/start.txt:/content")[0];
    assert_eq!(put.body.as_deref(), Some(&[][..]));

    let state = node.read();
    assert_eq!(state.id, ItemId::new("srv-1"));
    assert_eq!(state.name, "end.txt");
    assert_eq!(state.parent_id, fs.root);
    // The kernel inode number survived the promotion
    assert_eq!(
        fs.ctx.cache.ino_for(&ItemId::new("srv-1")),
        fs.ctx.cache.ino_for(&ItemId::new("srv-1"))
    );
    fs.assert_graph_invariants();
}

#[tokio::test]
async fn test_rename_across_parents_updates_both_child_lists() {
    let fs = test_fs();
    fs.seed_remote(&dir_json("d-1", ROOT_ID, "src"));
    fs.seed_remote(&dir_json("d-2", ROOT_ID, "dst"));
    fs.seed_remote(&file_json("f-1", "d-1", "mv.txt", 9));
    // Destination listing is materialized before the move
    fs.http.respond(
        Method::Get,
        url("/me/drive/items/d-2/children"),
        200,
        &children_page(&[]),
    );
    // Source listing for the lookup
    fs.http.respond(
        Method::Get,
        url("/me/drive/items/d-1/children"),
        200,
        &children_page(&[file_json("f-1", "d-1", "mv.txt", 9)]),
    );
    fs.http.respond(
        Method::Patch,
        url("/me/drive/items/f-1"),
        200,
        &file_json("f-1", "d-2", "mv.txt", 9).to_string(),
    );

    fs.vfs
        .rename(&ItemId::new("d-1"), "mv.txt", &ItemId::new("d-2"), "mv.txt")
        .await
        .unwrap();

    let patch = &fs.http.requests_matching(Method::Patch, "/items/f-1")[0];
    let body: serde_json::Value = serde_json::from_slice(patch.body.as_ref().unwrap()).unwrap();
    assert_eq!(body["parentReference"]["id"], "d-2");
    assert_eq!(patch.header("If-Match"), Some("*"));

    let d1 = fs.ctx.cache.get(&ItemId::new("d-1")).unwrap();
    let d2 = fs.ctx.cache.get(&ItemId::new("d-2")).unwrap();
    assert!(d1.read().children.as_ref().unwrap().is_empty());
    assert_eq!(d2.read().children.as_ref().unwrap().len(), 1);
    fs.assert_graph_invariants();
}

#[tokio::test]
async fn test_rename_onto_case_folded_sibling_is_conflict() {
    let fs = test_fs();
    fs.seed_remote(&file_json("f-1", ROOT_ID, "one.txt", 1));
    fs.seed_remote(&file_json("f-2", ROOT_ID, "two.txt", 1));

    let err = fs
        .vfs
        .rename(&fs.root, "one.txt", &fs.root, "TWO.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::Conflict(_)));
    // Local state unchanged, nothing was sent
    assert!(fs.http.requests_matching(Method::Patch, "/items").is_empty());
    assert_eq!(
        fs.ctx.cache.get(&ItemId::new("f-1")).unwrap().read().name,
        "one.txt"
    );
}

#[tokio::test]
async fn test_rename_remote_failure_leaves_local_state_unchanged() {
    let fs = test_fs();
    fs.seed_remote(&file_json("f-1", ROOT_ID, "keep.txt", 1));
    fs.http.respond(
        Method::Patch,
        url("/me/drive/items/f-1"),
        503,
        r#"{"error":{"code":"serviceNotAvailable","message":"try later"}}"#,
    );

    let err = fs
        .vfs
        .rename(&fs.root, "keep.txt", &fs.root, "lost.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::RemoteIo(_)));
    assert_eq!(
        fs.ctx.cache.get(&ItemId::new("f-1")).unwrap().read().name,
        "keep.txt"
    );
}

#[tokio::test]
async fn test_rename_into_local_parent_is_bad_descriptor() {
    let fs = test_fs();
    fs.seed_remote(&file_json("f-1", ROOT_ID, "mv.txt", 1));
    // A directory the server does not know about (never happens through
    // mkdir, which is server-first, but the handler must refuse it)
    let mut local_dir = nimbus_fuse::inode::InodeState::new_dir(
        nimbus_core::types::ItemId::local(),
        fs.root.clone(),
        "limbo",
        0o755,
    );
    local_dir.parent_id = fs.root.clone();
    let local_dir_id = local_dir.id.clone();
    fs.ctx.cache.insert_child(&fs.root, local_dir).unwrap();

    let err = fs
        .vfs
        .rename(&fs.root, "mv.txt", &local_dir_id, "mv.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::BadDescriptor(_)));
}

// ============================================================================
// Offline behavior
// ============================================================================

#[tokio::test]
async fn test_offline_refuses_namespace_mutations() {
    let fs = test_fs();
    fs.seed_remote(&file_json("f-1", ROOT_ID, "a.txt", 1));
    fs.seed_remote(&dir_json("d-1", ROOT_ID, "sub"));
    fs.ctx.set_offline(true);

    let offline = FsError::offline();
    assert_eq!(
        fs.vfs.create(&fs.root, "new.txt", 0o644).await.unwrap_err(),
        offline
    );
    assert_eq!(
        fs.vfs.mkdir(&fs.root, "newdir", 0o755).await.unwrap_err(),
        offline
    );
    assert_eq!(
        fs.vfs
            .rename(&fs.root, "a.txt", &fs.root, "b.txt")
            .await
            .unwrap_err(),
        offline
    );
    assert_eq!(fs.vfs.unlink(&fs.root, "a.txt").await.unwrap_err(), offline);
    assert_eq!(fs.vfs.rmdir(&fs.root, "sub").await.unwrap_err(), offline);
    assert!(fs.http.requests().is_empty());
}

#[tokio::test]
async fn test_offline_reads_from_cache_still_work() {
    let fs = test_fs();
    let id = fs.seed_remote(&file_json_hashed(
        "f-1",
        ROOT_ID,
        "doc.txt",
        5,
        "2025-06-15T10:30:00Z",
        Some("AAF4C61DDCC5E8A2DABEDE0F3B482CD9AEA9434D"),
        None,
    ));
    fs.ctx.store.put(&id, b"hello").unwrap();
    fs.ctx.set_offline(true);

    assert_eq!(fs.vfs.read(&id, 0, 5).await.unwrap(), b"hello");
    assert!(fs.http.requests().is_empty());
}

#[tokio::test]
async fn test_offline_writes_are_absorbed_silently() {
    let fs = test_fs();
    let node = fs.vfs.create(&fs.root, "w.txt", 0o644).await.unwrap();
    let id = node.read().id.clone();
    fs.ctx.set_offline(true);

    fs.vfs.write(&id, 0, b"offline data").unwrap();
    // fsync succeeds but keeps the changes local
    fs.vfs.fsync(&id).await.unwrap();
    assert!(node.read().has_changes);
    assert_eq!(fs.ctx.uploads.pending(), 0);
    assert!(fs.http.requests().is_empty());
}

// ============================================================================
// statfs
// ============================================================================

#[tokio::test]
async fn test_statfs_reports_quota_blocks() {
    let fs = test_fs();
    fs.http.respond(
        Method::Get,
        url("/me/drive"),
        200,
        r#"{"id": "d1", "driveType": "personal",
            "quota": {"total": 10737418240, "used": 4294967296, "remaining": 6442450944}}"#,
    );

    let st = fs.vfs.statfs().await.unwrap();
    assert_eq!(st.bsize, 4096);
    assert_eq!(st.blocks, 10737418240 / 4096);
    assert_eq!(st.bfree, 6442450944 / 4096);
    assert_eq!(st.bavail, st.bfree);
    // Personal drives get the fake fixed file budget
    assert_eq!(st.files, 100_000);
    assert!(st.ffree < 100_000);
    assert_eq!(st.namelen, 255);
}

#[tokio::test]
async fn test_statfs_serves_cached_quota_when_unreachable() {
    let fs = test_fs();
    fs.http.respond(
        Method::Get,
        url("/me/drive"),
        200,
        r#"{"id": "d1", "driveType": "personal",
            "quota": {"total": 8192, "used": 4096, "remaining": 4096}}"#,
    );
    fs.vfs.statfs().await.unwrap();

    fs.http.fail(Method::Get, url("/me/drive"));
    let st = fs.vfs.statfs().await.unwrap();
    assert_eq!(st.blocks, 2);
    assert_eq!(st.bfree, 1);
    // Only the delta synchronizer toggles the offline flag
    assert!(!fs.ctx.is_offline());
}
