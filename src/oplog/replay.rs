//! Replay: apply a parsed record stream to the in-memory model.
//!
//! Records are applied in emission order; objects are applied in ascending
//! index order. Any inconsistency aborts the replay of the object and the
//! mount fails closed.

use crate::oplog::record::{InodeRecord, LogRecord};
use crate::vfs::extent::Extent;
use crate::vfs::inode::{Inode, InodeAttr, InodeBody, InodeTable, Timespec};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("record references unknown inode {0}")]
    UnknownInode(u32),

    #[error("inode {0} is not a directory")]
    NotADirectory(u32),

    #[error("inode {0} is not a regular file")]
    NotAFile(u32),

    #[error("inode {0} is not a symlink")]
    NotASymlink(u32),

    #[error("truncate of inode {inum} to {new_size} exceeds size {size}")]
    TruncateBeyondEof { inum: u32, size: i64, new_size: i64 },

    #[error("directory {parent} has no entry {name:?} for inode {inum}")]
    MissingEntry {
        parent: u32,
        name: String,
        inum: u32,
    },

    #[error("directory {parent} already has an entry {name:?}")]
    EntryExists { parent: u32, name: String },
}

/// Apply every record of one object (identified by `index`) to `table`.
pub fn replay_object(
    table: &mut InodeTable,
    index: u32,
    records: &[LogRecord],
) -> Result<(), ReplayError> {
    for rec in records {
        match rec {
            LogRecord::Inode(r) => apply_inode(table, r),
            LogRecord::Trunc { inum, new_size } => apply_trunc(table, *inum, *new_size)?,
            LogRecord::Delete { parent, inum, name } => {
                apply_delete(table, *parent, *inum, name)?
            }
            LogRecord::Symlink { inum, target } => apply_symlink(table, *inum, target)?,
            LogRecord::Rename {
                inum,
                src_parent,
                dst_parent,
                src_name,
                dst_name,
            } => apply_rename(table, *inum, *src_parent, *dst_parent, src_name, dst_name)?,
            LogRecord::Data(r) => {
                let file = table
                    .get_mut(r.inum)
                    .ok_or(ReplayError::UnknownInode(r.inum))?;
                let extents = file.extents_mut().ok_or(ReplayError::NotAFile(r.inum))?;
                extents.update(
                    r.file_offset as u64,
                    Extent {
                        objnum: index,
                        offset: r.obj_offset,
                        len: r.len,
                    },
                );
                file.attr.size = r.size;
            }
            LogRecord::Create { parent, inum, name } => {
                let dir = table
                    .get_mut(*parent)
                    .ok_or(ReplayError::UnknownInode(*parent))?;
                let entries = dir
                    .entries_mut()
                    .ok_or(ReplayError::NotADirectory(*parent))?;
                entries.insert(name.clone(), *inum);
                table.observe_inum(*inum);
            }
            LogRecord::Null { .. } => {}
        }
    }
    Ok(())
}

fn apply_inode(table: &mut InodeTable, r: &InodeRecord) {
    let mtime = Timespec {
        sec: r.mtime_sec,
        nsec: r.mtime_nsec,
    };
    match table.get_mut(r.inum) {
        Some(inode) => {
            // Attribute refresh for an inode we already know; the kind and
            // payload are untouched, and so is the size.
            inode.attr.mode = r.mode;
            inode.attr.uid = r.uid;
            inode.attr.gid = r.gid;
            inode.attr.rdev = r.rdev;
            inode.attr.mtime = mtime;
        }
        None => {
            table.insert(Inode {
                attr: InodeAttr {
                    inum: r.inum,
                    mode: r.mode,
                    uid: r.uid,
                    gid: r.gid,
                    rdev: r.rdev,
                    size: 0,
                    mtime,
                },
                body: InodeBody::for_mode(r.mode),
            });
        }
    }
}

fn apply_trunc(table: &mut InodeTable, inum: u32, new_size: i64) -> Result<(), ReplayError> {
    let file = table.get_mut(inum).ok_or(ReplayError::UnknownInode(inum))?;
    if file.attr.size < new_size {
        return Err(ReplayError::TruncateBeyondEof {
            inum,
            size: file.attr.size,
            new_size,
        });
    }
    let extents = file.extents_mut().ok_or(ReplayError::NotAFile(inum))?;
    extents.truncate(new_size as u64);
    file.attr.size = new_size;
    Ok(())
}

// The emitter guarantees the directory was emptied (or the file fully
// truncated) before the delete record.
fn apply_delete(
    table: &mut InodeTable,
    parent: u32,
    inum: u32,
    name: &str,
) -> Result<(), ReplayError> {
    if !table.contains(inum) {
        return Err(ReplayError::UnknownInode(inum));
    }
    let dir = table
        .get_mut(parent)
        .ok_or(ReplayError::UnknownInode(parent))?;
    let entries = dir
        .entries_mut()
        .ok_or(ReplayError::NotADirectory(parent))?;
    entries.remove(name);
    table.remove(inum);
    Ok(())
}

fn apply_symlink(table: &mut InodeTable, inum: u32, target: &str) -> Result<(), ReplayError> {
    let inode = table.get_mut(inum).ok_or(ReplayError::UnknownInode(inum))?;
    match &mut inode.body {
        InodeBody::Symlink { target: t } => {
            *t = target.to_string();
            Ok(())
        }
        _ => Err(ReplayError::NotASymlink(inum)),
    }
}

fn apply_rename(
    table: &mut InodeTable,
    inum: u32,
    src_parent: u32,
    dst_parent: u32,
    src_name: &str,
    dst_name: &str,
) -> Result<(), ReplayError> {
    {
        let src = table
            .get(src_parent)
            .ok_or(ReplayError::UnknownInode(src_parent))?;
        let entries = src
            .entries()
            .ok_or(ReplayError::NotADirectory(src_parent))?;
        if entries.get(src_name) != Some(&inum) {
            return Err(ReplayError::MissingEntry {
                parent: src_parent,
                name: src_name.to_string(),
                inum,
            });
        }
        let dst = table
            .get(dst_parent)
            .ok_or(ReplayError::UnknownInode(dst_parent))?;
        let dst_entries = dst
            .entries()
            .ok_or(ReplayError::NotADirectory(dst_parent))?;
        if dst_entries.contains_key(dst_name) {
            return Err(ReplayError::EntryExists {
                parent: dst_parent,
                name: dst_name.to_string(),
            });
        }
    }
    table
        .get_mut(src_parent)
        .unwrap()
        .entries_mut()
        .unwrap()
        .remove(src_name);
    table
        .get_mut(dst_parent)
        .unwrap()
        .entries_mut()
        .unwrap()
        .insert(dst_name.to_string(), inum);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::record::DataRecord;
    use crate::vfs::inode::{FileKind, ROOT_INUM};

    fn inode_rec(inum: u32, mode: u32) -> LogRecord {
        LogRecord::Inode(InodeRecord {
            inum,
            mode,
            uid: 0,
            gid: 0,
            rdev: 0,
            mtime_sec: 100,
            mtime_nsec: 0,
        })
    }

    fn dir_mode() -> u32 {
        libc::S_IFDIR as u32 | 0o755
    }

    fn file_mode() -> u32 {
        libc::S_IFREG as u32 | 0o644
    }

    fn seeded_table() -> InodeTable {
        let mut t = InodeTable::new();
        t.ensure_root();
        t
    }

    #[test]
    fn create_and_data_rebuild_a_file() {
        let mut t = seeded_table();
        let recs = vec![
            inode_rec(2, file_mode()),
            LogRecord::Create {
                parent: ROOT_INUM,
                inum: 2,
                name: "f".into(),
            },
            LogRecord::Data(DataRecord {
                inum: 2,
                obj_offset: 0,
                file_offset: 0,
                size: 5,
                len: 5,
            }),
        ];
        replay_object(&mut t, 7, &recs).unwrap();

        let f = t.get(2).unwrap();
        assert_eq!(f.kind(), FileKind::File);
        assert_eq!(f.attr.size, 5);
        let (base, e) = f.extents().unwrap().lookup(0).unwrap();
        assert_eq!((base, e.objnum, e.offset, e.len), (0, 7, 0, 5));
        assert_eq!(t.next_inum(), 3);
        assert_eq!(t.get(ROOT_INUM).unwrap().entries().unwrap()["f"], 2);
    }

    #[test]
    fn trunc_beyond_size_fails_closed() {
        let mut t = seeded_table();
        replay_object(
            &mut t,
            0,
            &[
                inode_rec(2, file_mode()),
                LogRecord::Create {
                    parent: ROOT_INUM,
                    inum: 2,
                    name: "f".into(),
                },
            ],
        )
        .unwrap();

        let err = replay_object(
            &mut t,
            1,
            &[LogRecord::Trunc {
                inum: 2,
                new_size: 10,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, ReplayError::TruncateBeyondEof { .. }));
    }

    #[test]
    fn delete_removes_entry_and_inode() {
        let mut t = seeded_table();
        replay_object(
            &mut t,
            0,
            &[
                inode_rec(2, dir_mode()),
                LogRecord::Create {
                    parent: ROOT_INUM,
                    inum: 2,
                    name: "d".into(),
                },
                LogRecord::Delete {
                    parent: ROOT_INUM,
                    inum: 2,
                    name: "d".into(),
                },
            ],
        )
        .unwrap();
        assert!(!t.contains(2));
        assert!(t.get(ROOT_INUM).unwrap().entries().unwrap().is_empty());

        let err = replay_object(
            &mut t,
            1,
            &[LogRecord::Delete {
                parent: ROOT_INUM,
                inum: 9,
                name: "ghost".into(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, ReplayError::UnknownInode(9)));
    }

    #[test]
    fn rename_moves_between_directories() {
        let mut t = seeded_table();
        replay_object(
            &mut t,
            0,
            &[
                inode_rec(2, dir_mode()),
                LogRecord::Create {
                    parent: ROOT_INUM,
                    inum: 2,
                    name: "a".into(),
                },
                inode_rec(3, dir_mode()),
                LogRecord::Create {
                    parent: ROOT_INUM,
                    inum: 3,
                    name: "b".into(),
                },
                inode_rec(4, file_mode()),
                LogRecord::Create {
                    parent: 2,
                    inum: 4,
                    name: "f".into(),
                },
                LogRecord::Rename {
                    inum: 4,
                    src_parent: 2,
                    dst_parent: 3,
                    src_name: "f".into(),
                    dst_name: "g".into(),
                },
            ],
        )
        .unwrap();

        assert!(t.get(2).unwrap().entries().unwrap().is_empty());
        assert_eq!(t.get(3).unwrap().entries().unwrap()["g"], 4);
    }

    #[test]
    fn rename_onto_existing_name_fails() {
        let mut t = seeded_table();
        replay_object(
            &mut t,
            0,
            &[
                inode_rec(2, file_mode()),
                LogRecord::Create {
                    parent: ROOT_INUM,
                    inum: 2,
                    name: "a".into(),
                },
                inode_rec(3, file_mode()),
                LogRecord::Create {
                    parent: ROOT_INUM,
                    inum: 3,
                    name: "b".into(),
                },
            ],
        )
        .unwrap();

        let err = replay_object(
            &mut t,
            1,
            &[LogRecord::Rename {
                inum: 2,
                src_parent: ROOT_INUM,
                dst_parent: ROOT_INUM,
                src_name: "a".into(),
                dst_name: "b".into(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, ReplayError::EntryExists { .. }));
    }

    #[test]
    fn symlink_record_sets_target() {
        let mut t = seeded_table();
        replay_object(
            &mut t,
            0,
            &[
                inode_rec(2, libc::S_IFLNK as u32 | 0o777),
                LogRecord::Symlink {
                    inum: 2,
                    target: "/target".into(),
                },
                LogRecord::Create {
                    parent: ROOT_INUM,
                    inum: 2,
                    name: "l".into(),
                },
            ],
        )
        .unwrap();
        match &t.get(2).unwrap().body {
            InodeBody::Symlink { target } => assert_eq!(target, "/target"),
            other => panic!("expected symlink, got {other:?}"),
        }
    }

    #[test]
    fn inode_refresh_keeps_size_and_kind() {
        let mut t = seeded_table();
        replay_object(
            &mut t,
            0,
            &[
                inode_rec(2, file_mode()),
                LogRecord::Create {
                    parent: ROOT_INUM,
                    inum: 2,
                    name: "f".into(),
                },
                LogRecord::Data(DataRecord {
                    inum: 2,
                    obj_offset: 0,
                    file_offset: 0,
                    size: 9,
                    len: 9,
                }),
                inode_rec(2, libc::S_IFREG as u32 | 0o600),
            ],
        )
        .unwrap();
        let f = t.get(2).unwrap();
        assert_eq!(f.attr.size, 9);
        assert_eq!(f.attr.mode & 0o7777, 0o600);
        assert_eq!(f.kind(), FileKind::File);
    }
}
