#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use common::{flat_fixture, flat_fixture_limited, seed_file, stored_bytes};
use storefs::FsError;
use storefs::fs::ops::{NodeOps as _, StreamOps as _};
use storefs::fs::{AttrChanges, NodeKind, NodePerms, ROOT_NODE, Whence};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_read_round_trip_survives_reopen() {
    let (fs, _store, nodes) = flat_fixture(1024);
    let file = fs
        .mknod(ROOT_NODE, "a.txt", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();

    let mut stream = nodes.new_stream(file);
    fs.open(&mut stream).await.unwrap();
    assert_eq!(fs.write(&stream, 0, b"hello world").await.unwrap(), 11);
    assert_eq!(&fs.read(&stream, 0, 64).await.unwrap()[..], b"hello world");
    fs.close(&mut stream).await.unwrap();

    let mut reopened = nodes.new_stream(file);
    fs.open(&mut reopened).await.unwrap();
    assert_eq!(&fs.read(&reopened, 6, 64).await.unwrap()[..], b"world");
    fs.close(&mut reopened).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_opens_share_one_backing_handle() {
    let (fs, store, nodes) = flat_fixture(1024);
    let file = fs
        .mknod(ROOT_NODE, "shared.bin", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();

    let mut s1 = nodes.new_stream(file);
    let mut s2 = nodes.new_stream(file);
    let (r1, r2) = tokio::join!(fs.open(&mut s1), fs.open(&mut s2));
    r1.unwrap();
    r2.unwrap();

    assert_eq!(store.open_count(), 1, "one physical open backs both streams");
    assert_eq!(fs.stream_refcount(file), Some(2));

    fs.close(&mut s1).await.unwrap();
    assert_eq!(fs.stream_refcount(file), Some(1));
    assert!(fs.has_cached_handle("/shared.bin"), "handle stays open");

    fs.close(&mut s2).await.unwrap();
    assert_eq!(fs.stream_refcount(file), None);
    assert!(!fs.has_cached_handle("/shared.bin"), "cache entry evicted");
    assert!(!store.is_open(&storefs::fs::flat::codec::encode("/shared.bin")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mknod_defers_store_creation_to_first_open() {
    let (fs, store, nodes) = flat_fixture(1024);
    let file = fs
        .mknod(ROOT_NODE, "lazy.txt", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();
    assert!(!store.contains(&storefs::fs::flat::codec::encode("/lazy.txt")));

    // The unwritten file is still visible in the tree.
    let entries = fs.readdir(ROOT_NODE).await.unwrap();
    assert!(entries.contains(&"lazy.txt".to_owned()));
    assert_eq!(fs.lookup(ROOT_NODE, "lazy.txt").await.unwrap(), file);

    let mut stream = nodes.new_stream(file);
    fs.open(&mut stream).await.unwrap();
    assert!(store.contains(&storefs::fs::flat::codec::encode("/lazy.txt")));
    fs.close(&mut stream).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mknod_rejects_unsupported_kinds() {
    let (fs, _store, _nodes) = flat_fixture(1024);
    let err = fs
        .mknod(ROOT_NODE, "tty0", NodeKind::CharDevice, NodePerms::ALL_RWX)
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lookup_resolves_files_and_infers_directories() {
    let (fs, store, _nodes) = flat_fixture(4096);
    seed_file(&store, "/docs/readme.md", b"# hi").await;
    seed_file(&store, "/docs/sub/deep.txt", b"x").await;

    let docs = fs.lookup(ROOT_NODE, "docs").await.unwrap();
    assert_eq!(fs.getattr(docs).await.unwrap().kind, NodeKind::Directory);

    let readme = fs.lookup(docs, "readme.md").await.unwrap();
    let attr = fs.getattr(readme).await.unwrap();
    assert_eq!(attr.kind, NodeKind::File);
    assert_eq!(attr.size, 4);

    // The namespace is case-insensitive; a different spelling resolves
    // to the same node.
    assert_eq!(fs.lookup(ROOT_NODE, "DOCS").await.unwrap(), docs);

    let err = fs.lookup(ROOT_NODE, "missing").await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn readdir_strips_prefixes_to_immediate_components() {
    let (fs, store, _nodes) = flat_fixture(4096);
    seed_file(&store, "/a/x", b"1").await;
    seed_file(&store, "/a/y", b"2").await;
    seed_file(&store, "/a/sub/z", b"3").await;
    seed_file(&store, "/b", b"4").await;

    let entries = fs.readdir(ROOT_NODE).await.unwrap();
    assert_eq!(entries, vec![".", "..", "a", "b"]);

    let a = fs.lookup(ROOT_NODE, "a").await.unwrap();
    let entries = fs.readdir(a).await.unwrap();
    assert_eq!(entries, vec![".", "..", "sub", "x", "y"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rename_moves_backing_entry_and_replaces_destination() {
    let (fs, store, nodes) = flat_fixture(4096);
    let a = fs
        .mknod(ROOT_NODE, "a.txt", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();
    let b = fs
        .mknod(ROOT_NODE, "b.txt", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();
    for (node, data) in [(a, b"hello" as &[u8]), (b, b"bye")] {
        let mut s = nodes.new_stream(node);
        fs.open(&mut s).await.unwrap();
        fs.write(&s, 0, data).await.unwrap();
        fs.close(&mut s).await.unwrap();
    }

    fs.rename(a, ROOT_NODE, "b.txt").await.unwrap();

    // The destination's prior content is gone, replaced by the source's.
    assert_eq!(stored_bytes(&store, "/b.txt").unwrap(), b"hello");
    assert_eq!(stored_bytes(&store, "/a.txt"), None);
    assert_eq!(fs.lookup(ROOT_NODE, "b.txt").await.unwrap(), a);
    let err = fs.lookup(ROOT_NODE, "a.txt").await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rename_repoints_live_streams_to_the_new_handle() {
    let (fs, store, nodes) = flat_fixture(4096);
    let file = fs
        .mknod(ROOT_NODE, "old.log", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();

    let mut stream = nodes.new_stream(file);
    fs.open(&mut stream).await.unwrap();
    fs.write(&stream, 0, b"abc").await.unwrap();

    fs.rename(file, ROOT_NODE, "new.log").await.unwrap();

    // The stream keeps working, now against the renamed entry.
    fs.write(&stream, 3, b"def").await.unwrap();
    assert_eq!(&fs.read(&stream, 0, 16).await.unwrap()[..], b"abcdef");
    assert_eq!(fs.stream_refcount(file), Some(1));
    assert!(fs.has_cached_handle("/new.log"));
    assert!(!fs.has_cached_handle("/old.log"));
    fs.close(&mut stream).await.unwrap();

    assert_eq!(stored_bytes(&store, "/new.log").unwrap(), b"abcdef");
    assert_eq!(stored_bytes(&store, "/old.log"), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rename_of_unwritten_file_is_purely_in_memory() {
    let (fs, store, _nodes) = flat_fixture(1024);
    let file = fs
        .mknod(ROOT_NODE, "ghost.txt", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();

    fs.rename(file, ROOT_NODE, "renamed.txt").await.unwrap();

    assert!(!store.contains(&storefs::fs::flat::codec::encode("/ghost.txt")));
    assert!(!store.contains(&storefs::fs::flat::codec::encode("/renamed.txt")));
    assert_eq!(fs.lookup(ROOT_NODE, "renamed.txt").await.unwrap(), file);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unlink_of_open_file_is_busy() {
    let (fs, _store, nodes) = flat_fixture(1024);
    let file = fs
        .mknod(ROOT_NODE, "pinned.txt", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();
    let mut stream = nodes.new_stream(file);
    fs.open(&mut stream).await.unwrap();
    fs.write(&stream, 0, b"data").await.unwrap();

    let err = fs.unlink(ROOT_NODE, "pinned.txt").await.unwrap_err();
    assert_eq!(err.errno(), libc::EBUSY);
    // The failed unlink must not have detached the node.
    assert_eq!(fs.lookup(ROOT_NODE, "pinned.txt").await.unwrap(), file);

    fs.close(&mut stream).await.unwrap();
    fs.unlink(ROOT_NODE, "pinned.txt").await.unwrap();
    let err = fs.lookup(ROOT_NODE, "pinned.txt").await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rmdir_requires_an_empty_directory() {
    let (fs, _store, nodes) = flat_fixture(1024);
    let dir = fs
        .mknod(ROOT_NODE, "d", NodeKind::Directory, NodePerms::ALL_RWX)
        .await
        .unwrap();
    let file = fs
        .mknod(dir, "f", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();
    let mut stream = nodes.new_stream(file);
    fs.open(&mut stream).await.unwrap();
    fs.write(&stream, 0, b"x").await.unwrap();
    fs.close(&mut stream).await.unwrap();

    let err = fs.rmdir(ROOT_NODE, "d").await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOTEMPTY);

    fs.unlink(dir, "f").await.unwrap();
    fs.rmdir(ROOT_NODE, "d").await.unwrap();
    let err = fs.lookup(ROOT_NODE, "d").await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rmdir_sees_unwritten_children() {
    let (fs, _store, _nodes) = flat_fixture(1024);
    let dir = fs
        .mknod(ROOT_NODE, "d", NodeKind::Directory, NodePerms::ALL_RWX)
        .await
        .unwrap();
    fs.mknod(dir, "lazy", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();

    let err = fs.rmdir(ROOT_NODE, "d").await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOTEMPTY);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quota_exceeded_write_requests_capacity_once_and_retries() {
    let (fs, store, nodes) = flat_fixture(8);
    let file = fs
        .mknod(ROOT_NODE, "big.bin", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();
    let mut stream = nodes.new_stream(file);
    fs.open(&mut stream).await.unwrap();

    let payload = [7u8; 64];
    assert_eq!(fs.write(&stream, 0, &payload).await.unwrap(), 64);
    assert_eq!(store.capacity_requests(), 1, "exactly one growth request");
    assert_eq!(&fs.read(&stream, 0, 64).await.unwrap()[..], &payload[..]);
    fs.close(&mut stream).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quota_failure_after_retry_propagates() {
    let (fs, store, nodes) = flat_fixture_limited(8, 8);
    let file = fs
        .mknod(ROOT_NODE, "big.bin", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();
    let mut stream = nodes.new_stream(file);
    fs.open(&mut stream).await.unwrap();

    let err = fs.write(&stream, 0, &[7u8; 64]).await.unwrap_err();
    assert!(matches!(err, FsError::QuotaExceeded), "got {err:?}");
    assert_eq!(store.capacity_requests(), 1, "retry happens exactly once");
    // Nothing was silently truncated.
    assert_eq!(fs.getattr(file).await.unwrap().size, 0);
    fs.close(&mut stream).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn setattr_size_truncates_through_a_transient_handle() {
    let (fs, store, nodes) = flat_fixture(1024);
    let file = fs
        .mknod(ROOT_NODE, "t.txt", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();
    let mut stream = nodes.new_stream(file);
    fs.open(&mut stream).await.unwrap();
    fs.write(&stream, 0, b"hello world").await.unwrap();
    fs.close(&mut stream).await.unwrap();

    fs.setattr(
        file,
        AttrChanges {
            size: Some(5),
            ..AttrChanges::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(fs.getattr(file).await.unwrap().size, 5);
    assert_eq!(stored_bytes(&store, "/t.txt").unwrap(), b"hello");
    // No handle may linger from the transient operations.
    assert!(!fs.has_cached_handle("/t.txt"));
    assert!(!store.is_open(&storefs::fs::flat::codec::encode("/t.txt")));

    // Growing zero-fills.
    fs.setattr(
        file,
        AttrChanges {
            size: Some(8),
            ..AttrChanges::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(stored_bytes(&store, "/t.txt").unwrap(), b"hello\0\0\0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn setattr_size_over_quota_requests_capacity_once() {
    let (fs, store, _nodes) = flat_fixture_limited(4, 4);
    let file = fs
        .mknod(ROOT_NODE, "t.txt", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();

    let err = fs
        .setattr(
            file,
            AttrChanges {
                size: Some(64),
                ..AttrChanges::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::QuotaExceeded), "got {err:?}");
    assert_eq!(store.capacity_requests(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn setattr_applies_mode_and_timestamp_verbatim() {
    let (fs, _store, _nodes) = flat_fixture(1024);
    let file = fs
        .mknod(ROOT_NODE, "m.txt", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();

    let mtime = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1234);
    fs.setattr(
        file,
        AttrChanges {
            perms: Some(NodePerms::OWNER_RWX),
            mtime: Some(mtime),
            size: None,
        },
    )
    .await
    .unwrap();

    let attr = fs.getattr(file).await.unwrap();
    assert_eq!(attr.perms, NodePerms::OWNER_RWX);
    assert_eq!(attr.mtime, mtime);
    assert_eq!(attr.atime, mtime);
    assert_eq!(attr.ctime, mtime);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn getattr_reports_fixed_fields_and_block_counts() {
    let (fs, store, _nodes) = flat_fixture(8192);
    seed_file(&store, "/blocky.bin", &[1u8; 5000]).await;
    let file = fs.lookup(ROOT_NODE, "blocky.bin").await.unwrap();

    let attr = fs.getattr(file).await.unwrap();
    assert_eq!(attr.size, 5000);
    assert_eq!(attr.blksize, 4096);
    assert_eq!(attr.blocks, 2);
    assert_eq!(attr.nlink, 1);
    assert_eq!(attr.uid, 0);
    assert_eq!(attr.gid, 0);
    assert_eq!(attr.dev, 1);

    let root = fs.getattr(ROOT_NODE).await.unwrap();
    assert_eq!(root.kind, NodeKind::Directory);
    assert_eq!(root.size, 4096);
    assert_eq!(root.blocks, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn llseek_resolves_all_origins() {
    let (fs, _store, nodes) = flat_fixture(1024);
    let file = fs
        .mknod(ROOT_NODE, "hundred.bin", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();
    let mut stream = nodes.new_stream(file);
    fs.open(&mut stream).await.unwrap();
    fs.write(&stream, 0, &[9u8; 100]).await.unwrap();

    assert_eq!(fs.llseek(&mut stream, 10, Whence::Set).await.unwrap(), 10);
    assert_eq!(fs.llseek(&mut stream, 5, Whence::Current).await.unwrap(), 15);
    assert_eq!(fs.llseek(&mut stream, -10, Whence::End).await.unwrap(), 90);

    let err = fs.llseek(&mut stream, -200, Whence::End).await.unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
    // A failed seek leaves the position untouched.
    assert_eq!(stream.position, 90);

    fs.close(&mut stream).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fsync_without_a_bound_handle_is_ebadf() {
    let (fs, _store, nodes) = flat_fixture(1024);
    let file = fs
        .mknod(ROOT_NODE, "f.txt", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();

    let unopened = nodes.new_stream(file);
    let err = fs.fsync(&unopened).await.unwrap_err();
    assert_eq!(err.errno(), libc::EBADF);

    let mut stream = nodes.new_stream(file);
    fs.open(&mut stream).await.unwrap();
    fs.fsync(&stream).await.unwrap();
    fs.close(&mut stream).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsupported_operations_map_to_their_errnos() {
    let (fs, _store, nodes) = flat_fixture(1024);
    let file = fs
        .mknod(ROOT_NODE, "f.txt", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();
    let stream = nodes.new_stream(file);

    let err = fs.symlink(ROOT_NODE, "link", "/f.txt").await.unwrap_err();
    assert_eq!(err.errno(), libc::EOPNOTSUPP);
    let err = fs.readlink(file).await.unwrap_err();
    assert_eq!(err.errno(), libc::EOPNOTSUPP);
    let err = fs.mmap(&stream).await.unwrap_err();
    assert_eq!(err.errno(), libc::EOPNOTSUPP);
    let err = fs.msync(&stream).await.unwrap_err();
    assert_eq!(err.errno(), libc::EOPNOTSUPP);
    let err = fs.munmap(&stream).await.unwrap_err();
    assert_eq!(err.errno(), libc::EOPNOTSUPP);
    let err = fs.ioctl(&stream).await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOTTY);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_clamps_to_end_of_file() {
    let (fs, _store, nodes) = flat_fixture(1024);
    let file = fs
        .mknod(ROOT_NODE, "short.txt", NodeKind::File, NodePerms::ALL_RWX)
        .await
        .unwrap();
    let mut stream = nodes.new_stream(file);
    fs.open(&mut stream).await.unwrap();
    fs.write(&stream, 0, b"abc").await.unwrap();

    assert_eq!(&fs.read(&stream, 0, 100).await.unwrap()[..], b"abc");
    assert_eq!(&fs.read(&stream, 2, 100).await.unwrap()[..], b"c");
    assert!(fs.read(&stream, 50, 100).await.unwrap().is_empty());
    fs.close(&mut stream).await.unwrap();
}
