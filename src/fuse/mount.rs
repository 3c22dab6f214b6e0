//! Mount helpers for starting/stopping FUSE.
//!
//! Only supported on Unix-like systems; on Linux we prefer the
//! unprivileged path via fusermount3. Thin wrappers over the rfuse3 raw
//! Session API.

use std::num::NonZeroU32;
use std::path::Path;

use rfuse3::MountOptions;

use crate::objstore::client::ObjectBackend;
use crate::vfs::fs::ObjectFs;

fn default_mount_options() -> MountOptions {
    let mut mo = MountOptions::default();
    mo.fs_name("slatefs");
    // Kernel-side permission checking; the core does not enforce modes.
    mo.default_permissions(true);
    // Writes above this size would be split by the kernel anyway.
    mo.max_write(NonZeroU32::new(1024 * 1024).unwrap());
    mo
}

/// Mount a filesystem instance on `mount_point` using unprivileged mode
/// when available (requires fusermount3 in PATH).
#[cfg(target_os = "linux")]
pub async fn mount_unprivileged<B>(
    fs: ObjectFs<B>,
    mount_point: impl AsRef<Path>,
) -> std::io::Result<rfuse3::raw::MountHandle>
where
    B: ObjectBackend + 'static,
{
    let opts = default_mount_options();
    let session = rfuse3::raw::Session::new(opts);
    session.mount_with_unprivileged(fs, mount_point).await
}

/// Fallback stub for non-Linux targets.
#[cfg(not(target_os = "linux"))]
pub async fn mount_unprivileged<B>(
    _fs: ObjectFs<B>,
    _mount_point: impl AsRef<Path>,
) -> std::io::Result<rfuse3::raw::MountHandle>
where
    B: ObjectBackend + 'static,
{
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}
