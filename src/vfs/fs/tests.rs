//! Filesystem tests - separated from the main implementation.
//!
//! Everything runs against the in-memory backend so the full
//! mutate → flush → remount → replay cycle is exercised without S3.

use crate::objstore::client::{ObjectBackend, ObjectClient};
use crate::objstore::memory::MemoryBackend;
use crate::vfs::error::FsError;
use crate::vfs::fs::{Caller, ObjectFs};
use crate::vfs::inode::{FileKind, ROOT_INUM, Timespec};
use crate::vfs::pager::LogConfig;

fn caller() -> Caller {
    Caller {
        uid: 1000,
        gid: 1000,
    }
}

async fn mount(store: &MemoryBackend) -> ObjectFs<MemoryBackend> {
    ObjectFs::mount(
        ObjectClient::new(store.clone()),
        "fs",
        LogConfig::default(),
    )
    .await
    .expect("mount")
}

#[tokio::test]
async fn empty_mount_has_only_root() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    let root = fs.getattr("/").await.unwrap();
    assert_eq!(root.ino, ROOT_INUM);
    assert_eq!(root.kind, FileKind::Dir);
    assert_eq!(root.mode & 0o7777, 0o755);
    assert_eq!(root.nlink, 1);

    assert!(fs.readdir("/").await.unwrap().is_empty());
    // Mounting alone writes nothing.
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn write_fsync_remount() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.mkdir("/a", 0o700, &caller()).await.unwrap();
    fs.create("/a/x", 0o644, &caller()).await.unwrap();
    fs.write("/a/x", 0, b"hello").await.unwrap();
    fs.sync().await.unwrap();

    let keys = store.list_objects("fs.").await.unwrap();
    assert_eq!(keys, vec!["fs.00000000"]);

    let fs = mount(&store).await;
    let attr = fs.getattr("/a/x").await.unwrap();
    assert_eq!(attr.size, 5);
    assert_eq!(attr.kind, FileKind::File);
    assert_eq!(attr.uid, 1000);
    assert_eq!(fs.read("/a/x", 0, 5).await.unwrap(), b"hello");

    // Allocator resumed past the replayed inodes: root=1, /a=2, /a/x=3.
    let fresh = fs.create("/a/y", 0o644, &caller()).await.unwrap();
    assert_eq!(fresh.ino, 4);
}

#[tokio::test]
async fn overwrite_reads_back_patchwork() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.create("/f", 0o644, &caller()).await.unwrap();
    fs.write("/f", 0, b"aaaaa").await.unwrap();
    fs.write("/f", 1, b"BB").await.unwrap();
    assert_eq!(fs.read("/f", 0, 5).await.unwrap(), b"aBBaa");

    // The same patchwork must survive replay.
    fs.sync().await.unwrap();
    let fs = mount(&store).await;
    assert_eq!(fs.read("/f", 0, 5).await.unwrap(), b"aBBaa");
}

#[tokio::test]
async fn truncate_shrinks_file_and_extents() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.create("/f", 0o644, &caller()).await.unwrap();
    fs.write("/f", 0, &[b'x'; 8192]).await.unwrap();
    fs.truncate("/f", 3072).await.unwrap();

    assert_eq!(fs.getattr("/f").await.unwrap().size, 3072);
    let out = fs.read("/f", 0, 10240).await.unwrap();
    assert_eq!(out.len(), 3072);
    assert!(out.iter().all(|b| *b == b'x'));

    fs.sync().await.unwrap();
    let fs = mount(&store).await;
    assert_eq!(fs.getattr("/f").await.unwrap().size, 3072);
    assert_eq!(fs.read("/f", 0, 10240).await.unwrap().len(), 3072);
}

#[tokio::test]
async fn rename_across_directories() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.mkdir("/a", 0o755, &caller()).await.unwrap();
    fs.mkdir("/b", 0o755, &caller()).await.unwrap();
    fs.create("/a/f", 0o644, &caller()).await.unwrap();
    fs.write("/a/f", 0, b"z").await.unwrap();

    fs.rename("/a/f", "/b/g").await.unwrap();

    assert!(fs.readdir("/a").await.unwrap().is_empty());
    let names: Vec<String> = fs
        .readdir("/b")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["g"]);
    assert_eq!(fs.read("/b/g", 0, 1).await.unwrap(), b"z");

    // Renaming onto an existing name is refused.
    fs.create("/a/f2", 0o644, &caller()).await.unwrap();
    let err = fs.rename("/a/f2", "/b/g").await.unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists { .. }));

    fs.sync().await.unwrap();
    let fs = mount(&store).await;
    assert!(fs.getattr("/a/f").await.is_err());
    assert_eq!(fs.read("/b/g", 0, 1).await.unwrap(), b"z");
}

#[tokio::test]
async fn symlink_roundtrip() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.symlink("/target", "/l", &caller()).await.unwrap();
    assert_eq!(fs.readlink("/l").await.unwrap(), "/target");

    let attr = fs.getattr("/l").await.unwrap();
    assert_eq!(attr.kind, FileKind::Symlink);
    assert_eq!(attr.mode & libc::S_IFMT as u32, libc::S_IFLNK as u32);

    fs.sync().await.unwrap();
    let fs = mount(&store).await;
    assert_eq!(fs.readlink("/l").await.unwrap(), "/target");
}

#[tokio::test]
async fn holes_read_as_zeros() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.create("/f", 0o644, &caller()).await.unwrap();
    fs.write("/f", 4096, b"data").await.unwrap();

    let out = fs.read("/f", 0, 8192).await.unwrap();
    assert_eq!(out.len(), 4100);
    assert!(out[..4096].iter().all(|b| *b == 0));
    assert_eq!(&out[4096..], b"data");
}

#[tokio::test]
async fn grow_truncate_only_changes_size() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.create("/f", 0o644, &caller()).await.unwrap();
    fs.write("/f", 0, b"abcd").await.unwrap();
    fs.truncate("/f", 100).await.unwrap();

    assert_eq!(fs.getattr("/f").await.unwrap().size, 100);
    let out = fs.read("/f", 0, 200).await.unwrap();
    assert_eq!(out.len(), 100);
    assert_eq!(&out[..4], b"abcd");
    assert!(out[4..].iter().all(|b| *b == 0));
}

#[tokio::test]
async fn removal_contracts() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.mkdir("/d", 0o755, &caller()).await.unwrap();
    fs.create("/d/f", 0o644, &caller()).await.unwrap();

    let err = fs.unlink("/d").await.unwrap_err();
    assert!(matches!(err, FsError::IsADirectory { .. }));

    let err = fs.rmdir("/d").await.unwrap_err();
    assert!(matches!(err, FsError::DirectoryNotEmpty { .. }));

    let err = fs.rmdir("/d/f").await.unwrap_err();
    assert!(matches!(err, FsError::NotADirectory { .. }));

    fs.unlink("/d/f").await.unwrap();
    let err = fs.getattr("/d/f").await.unwrap_err();
    assert!(matches!(err, FsError::NotFound { .. }));
    fs.rmdir("/d").await.unwrap();
    assert!(fs.readdir("/").await.unwrap().is_empty());
}

#[tokio::test]
async fn create_family_error_paths() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.create("/f", 0o644, &caller()).await.unwrap();
    let err = fs.create("/f", 0o644, &caller()).await.unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists { .. }));

    let err = fs.mkdir("/missing/d", 0o755, &caller()).await.unwrap_err();
    assert!(matches!(err, FsError::NotFound { .. }));

    // A file is not a valid parent component.
    let err = fs.create("/f/child", 0o644, &caller()).await.unwrap_err();
    assert!(matches!(err, FsError::NotADirectory { .. }));

    // Directories are made with mkdir, not mknod.
    let err = fs
        .mknod("/dev0", libc::S_IFDIR as u32 | 0o755, 0, &caller())
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::InvalidArgument { .. }));
}

#[tokio::test]
async fn mknod_creates_special_files() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.mknod("/fifo", libc::S_IFIFO as u32 | 0o644, 0, &caller())
        .await
        .unwrap();
    let attr = fs.getattr("/fifo").await.unwrap();
    assert_eq!(attr.kind, FileKind::Other);

    // Special files carry no data path.
    let err = fs.read("/fifo", 0, 1).await.unwrap_err();
    assert!(matches!(err, FsError::InvalidArgument { .. }));

    fs.sync().await.unwrap();
    let fs = mount(&store).await;
    assert_eq!(fs.getattr("/fifo").await.unwrap().kind, FileKind::Other);
}

#[tokio::test]
async fn read_spans_buffer_and_store() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.create("/f", 0o644, &caller()).await.unwrap();
    fs.write("/f", 0, b"first").await.unwrap();
    // Unflushed: served straight from the data buffer.
    assert_eq!(fs.read("/f", 0, 5).await.unwrap(), b"first");

    fs.sync().await.unwrap();
    // Flushed: served by ranged GETs against the sealed object.
    assert_eq!(fs.read("/f", 0, 5).await.unwrap(), b"first");

    // A second write lands in the next object; reads stitch both.
    fs.write("/f", 5, b"second").await.unwrap();
    assert_eq!(fs.read("/f", 0, 11).await.unwrap(), b"firstsecond");
}

#[tokio::test]
async fn chmod_and_utimens_flush_via_inode_records() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.create("/f", 0o644, &caller()).await.unwrap();
    fs.chmod("/f", 0o600).await.unwrap();
    let stamp = Timespec {
        sec: 1_600_000_000,
        nsec: 42,
    };
    fs.utimens("/f", Some(stamp)).await.unwrap();
    fs.sync().await.unwrap();

    let fs = mount(&store).await;
    let attr = fs.getattr("/f").await.unwrap();
    assert_eq!(attr.mode & 0o7777, 0o600);
    assert_eq!(attr.kind, FileKind::File);
    assert_eq!(attr.mtime, stamp);
}

#[tokio::test]
async fn sync_without_changes_writes_nothing() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.sync().await.unwrap();
    assert!(store.is_empty().await);

    fs.create("/f", 0o644, &caller()).await.unwrap();
    fs.sync().await.unwrap();
    let count = store.len().await;

    fs.sync().await.unwrap();
    assert_eq!(store.len().await, count);
}

#[tokio::test]
async fn tiny_thresholds_split_the_log_across_objects() {
    let store = MemoryBackend::new();
    let cfg = LogConfig {
        meta_threshold: 96,
        data_threshold: 64,
    };
    let fs = ObjectFs::mount(ObjectClient::new(store.clone()), "fs", cfg)
        .await
        .unwrap();

    fs.mkdir("/a", 0o755, &caller()).await.unwrap();
    fs.mkdir("/a/b", 0o755, &caller()).await.unwrap();
    for i in 0..4 {
        let path = format!("/a/b/f{i}");
        fs.create(&path, 0o644, &caller()).await.unwrap();
        fs.write(&path, 0, format!("payload-{i}-{}", "x".repeat(40)).as_bytes())
            .await
            .unwrap();
    }
    fs.rename("/a/b/f0", "/a/g").await.unwrap();
    fs.unlink("/a/b/f1").await.unwrap();
    fs.truncate("/a/b/f2", 4).await.unwrap();
    fs.sync().await.unwrap();

    // The point of the tiny thresholds: state is scattered over many
    // objects and replay must stitch it back together.
    assert!(store.len().await > 1, "expected several log objects");

    let fs = mount(&store).await;
    assert_eq!(
        fs.read("/a/g", 0, 64).await.unwrap(),
        format!("payload-0-{}", "x".repeat(40)).as_bytes()
    );
    assert!(fs.getattr("/a/b/f1").await.is_err());
    assert_eq!(fs.getattr("/a/b/f2").await.unwrap().size, 4);
    assert_eq!(fs.read("/a/b/f2", 0, 64).await.unwrap(), b"payl");
    let names: Vec<String> = fs
        .readdir("/a/b")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["f2", "f3"]);
}

#[tokio::test]
async fn unlink_drops_data_before_the_name() {
    let store = MemoryBackend::new();
    let fs = mount(&store).await;

    fs.create("/f", 0o644, &caller()).await.unwrap();
    fs.write("/f", 0, b"doomed").await.unwrap();
    fs.unlink("/f").await.unwrap();
    fs.sync().await.unwrap();

    // Replay must apply TRUNC(0) then DELETE without tripping a
    // consistency check.
    let fs = mount(&store).await;
    assert!(fs.getattr("/f").await.is_err());
    assert!(fs.readdir("/").await.unwrap().is_empty());
}
