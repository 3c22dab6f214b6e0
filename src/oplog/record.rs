//! Log-record codec.
//!
//! Each record is a 2-byte framing header (low 4 bits: type tag, high 12
//! bits: payload length) followed by a fixed-layout payload. Variable-length
//! names and symlink targets trail the fixed part and are accounted for in
//! the length field. All multi-byte integers are little-endian.

use thiserror::Error;

/// Framing header size in bytes.
pub const FRAME_LEN: usize = 2;

/// Largest payload expressible in the 12-bit length field.
pub const MAX_PAYLOAD: usize = 0xfff;

/// Directory-entry and symlink names carry a u8 length on the wire.
pub const NAME_MAX: usize = 255;

const TAG_INODE: u8 = 1;
const TAG_TRUNC: u8 = 2;
const TAG_DELETE: u8 = 3;
const TAG_SYMLINK: u8 = 4;
const TAG_RENAME: u8 = 5;
const TAG_DATA: u8 = 6;
const TAG_CREATE: u8 = 7;
const TAG_NULL: u8 = 8;

const INODE_LEN: usize = 36;
const TRUNC_LEN: usize = 12;
const DATA_LEN: usize = 28;
const CREATE_FIXED: usize = 9;
const DELETE_FIXED: usize = 9;
const SYMLINK_FIXED: usize = 5;
const RENAME_FIXED: usize = 14;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("truncated record stream: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unknown record tag {0}")]
    UnknownTag(u8),

    #[error("record payload length {have} does not match tag (expected {expect})")]
    BadPayloadLength { expect: usize, have: usize },

    #[error("name is not valid utf-8")]
    BadName,

    #[error("name of {0} bytes exceeds the wire limit")]
    NameTooLong(usize),

    #[error("bad object magic {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported object version {0}")]
    BadVersion(u32),

    #[error("unsupported object kind {0}")]
    BadObjectKind(u32),

    #[error("object header length {0} is shorter than the header itself")]
    BadHeaderLength(u32),
}

/// Inode attribute payload. `size` is intentionally absent: file sizes are
/// reconstructed from `Data` and `Trunc` records during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeRecord {
    pub inum: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub mtime_sec: i64,
    pub mtime_nsec: i64,
}

/// File-data payload. `obj_offset` is relative to the start of the enclosing
/// object's data section; `size` is the file size after the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRecord {
    pub inum: u32,
    pub obj_offset: u32,
    pub file_offset: i64,
    pub size: i64,
    pub len: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Inode(InodeRecord),
    Trunc {
        inum: u32,
        new_size: i64,
    },
    Delete {
        parent: u32,
        inum: u32,
        name: String,
    },
    Symlink {
        inum: u32,
        target: String,
    },
    Rename {
        inum: u32,
        src_parent: u32,
        dst_parent: u32,
        src_name: String,
        dst_name: String,
    },
    Data(DataRecord),
    Create {
        parent: u32,
        inum: u32,
        name: String,
    },
    /// Padding; payload bytes are ignored.
    Null {
        pad: usize,
    },
}

impl LogRecord {
    fn tag(&self) -> u8 {
        match self {
            LogRecord::Inode(_) => TAG_INODE,
            LogRecord::Trunc { .. } => TAG_TRUNC,
            LogRecord::Delete { .. } => TAG_DELETE,
            LogRecord::Symlink { .. } => TAG_SYMLINK,
            LogRecord::Rename { .. } => TAG_RENAME,
            LogRecord::Data(_) => TAG_DATA,
            LogRecord::Create { .. } => TAG_CREATE,
            LogRecord::Null { .. } => TAG_NULL,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            LogRecord::Inode(_) => INODE_LEN,
            LogRecord::Trunc { .. } => TRUNC_LEN,
            LogRecord::Delete { name, .. } => DELETE_FIXED + name.len(),
            LogRecord::Symlink { target, .. } => SYMLINK_FIXED + target.len(),
            LogRecord::Rename {
                src_name, dst_name, ..
            } => RENAME_FIXED + src_name.len() + dst_name.len(),
            LogRecord::Data(_) => DATA_LEN,
            LogRecord::Create { name, .. } => CREATE_FIXED + name.len(),
            LogRecord::Null { pad } => *pad,
        }
    }

    /// Total encoded size, framing header included.
    pub fn encoded_len(&self) -> usize {
        FRAME_LEN + self.payload_len()
    }

    /// Append the framed record to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let len = self.payload_len();
        debug_assert!(len <= MAX_PAYLOAD);
        let frame = ((len as u16) << 4) | self.tag() as u16;
        out.extend_from_slice(&frame.to_le_bytes());

        match self {
            LogRecord::Inode(r) => {
                out.extend_from_slice(&r.inum.to_le_bytes());
                out.extend_from_slice(&r.mode.to_le_bytes());
                out.extend_from_slice(&r.uid.to_le_bytes());
                out.extend_from_slice(&r.gid.to_le_bytes());
                out.extend_from_slice(&r.rdev.to_le_bytes());
                out.extend_from_slice(&r.mtime_sec.to_le_bytes());
                out.extend_from_slice(&r.mtime_nsec.to_le_bytes());
            }
            LogRecord::Trunc { inum, new_size } => {
                out.extend_from_slice(&inum.to_le_bytes());
                out.extend_from_slice(&new_size.to_le_bytes());
            }
            LogRecord::Delete { parent, inum, name } => {
                out.extend_from_slice(&parent.to_le_bytes());
                out.extend_from_slice(&inum.to_le_bytes());
                out.push(name.len() as u8);
                out.extend_from_slice(name.as_bytes());
            }
            LogRecord::Symlink { inum, target } => {
                out.extend_from_slice(&inum.to_le_bytes());
                out.push(target.len() as u8);
                out.extend_from_slice(target.as_bytes());
            }
            LogRecord::Rename {
                inum,
                src_parent,
                dst_parent,
                src_name,
                dst_name,
            } => {
                out.extend_from_slice(&inum.to_le_bytes());
                out.extend_from_slice(&src_parent.to_le_bytes());
                out.extend_from_slice(&dst_parent.to_le_bytes());
                out.push(src_name.len() as u8);
                out.push(dst_name.len() as u8);
                out.extend_from_slice(src_name.as_bytes());
                out.extend_from_slice(dst_name.as_bytes());
            }
            LogRecord::Data(r) => {
                out.extend_from_slice(&r.inum.to_le_bytes());
                out.extend_from_slice(&r.obj_offset.to_le_bytes());
                out.extend_from_slice(&r.file_offset.to_le_bytes());
                out.extend_from_slice(&r.size.to_le_bytes());
                out.extend_from_slice(&r.len.to_le_bytes());
            }
            LogRecord::Create { parent, inum, name } => {
                out.extend_from_slice(&parent.to_le_bytes());
                out.extend_from_slice(&inum.to_le_bytes());
                out.push(name.len() as u8);
                out.extend_from_slice(name.as_bytes());
            }
            LogRecord::Null { pad } => {
                out.resize(out.len() + pad, 0);
            }
        }
    }

    /// Decode one framed record from the front of `buf`, returning the
    /// record and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(LogRecord, usize), WireError> {
        if buf.len() < FRAME_LEN {
            return Err(WireError::Truncated {
                need: FRAME_LEN,
                have: buf.len(),
            });
        }
        let frame = u16::from_le_bytes([buf[0], buf[1]]);
        let tag = (frame & 0xf) as u8;
        let len = (frame >> 4) as usize;
        if buf.len() < FRAME_LEN + len {
            return Err(WireError::Truncated {
                need: FRAME_LEN + len,
                have: buf.len(),
            });
        }
        let payload = &buf[FRAME_LEN..FRAME_LEN + len];

        let rec = match tag {
            TAG_INODE => {
                expect_len(payload, INODE_LEN)?;
                let mut c = Cursor::new(payload);
                LogRecord::Inode(InodeRecord {
                    inum: c.u32(),
                    mode: c.u32(),
                    uid: c.u32(),
                    gid: c.u32(),
                    rdev: c.u32(),
                    mtime_sec: c.i64(),
                    mtime_nsec: c.i64(),
                })
            }
            TAG_TRUNC => {
                expect_len(payload, TRUNC_LEN)?;
                let mut c = Cursor::new(payload);
                LogRecord::Trunc {
                    inum: c.u32(),
                    new_size: c.i64(),
                }
            }
            TAG_DELETE => {
                let mut c = Cursor::new(payload);
                let parent = c.try_u32()?;
                let inum = c.try_u32()?;
                let namelen = c.try_u8()? as usize;
                expect_len(payload, DELETE_FIXED + namelen)?;
                LogRecord::Delete {
                    parent,
                    inum,
                    name: c.name(namelen)?,
                }
            }
            TAG_SYMLINK => {
                let mut c = Cursor::new(payload);
                let inum = c.try_u32()?;
                let tlen = c.try_u8()? as usize;
                expect_len(payload, SYMLINK_FIXED + tlen)?;
                LogRecord::Symlink {
                    inum,
                    target: c.name(tlen)?,
                }
            }
            TAG_RENAME => {
                let mut c = Cursor::new(payload);
                let inum = c.try_u32()?;
                let src_parent = c.try_u32()?;
                let dst_parent = c.try_u32()?;
                let n1 = c.try_u8()? as usize;
                let n2 = c.try_u8()? as usize;
                expect_len(payload, RENAME_FIXED + n1 + n2)?;
                LogRecord::Rename {
                    inum,
                    src_parent,
                    dst_parent,
                    src_name: c.name(n1)?,
                    dst_name: c.name(n2)?,
                }
            }
            TAG_DATA => {
                expect_len(payload, DATA_LEN)?;
                let mut c = Cursor::new(payload);
                LogRecord::Data(DataRecord {
                    inum: c.u32(),
                    obj_offset: c.u32(),
                    file_offset: c.i64(),
                    size: c.i64(),
                    len: c.u32(),
                })
            }
            TAG_CREATE => {
                let mut c = Cursor::new(payload);
                let parent = c.try_u32()?;
                let inum = c.try_u32()?;
                let namelen = c.try_u8()? as usize;
                expect_len(payload, CREATE_FIXED + namelen)?;
                LogRecord::Create {
                    parent,
                    inum,
                    name: c.name(namelen)?,
                }
            }
            TAG_NULL => LogRecord::Null { pad: len },
            other => return Err(WireError::UnknownTag(other)),
        };
        Ok((rec, FRAME_LEN + len))
    }

    /// Decode a complete record stream. The stream must terminate exactly at
    /// the end of `buf`.
    pub fn decode_stream(buf: &[u8]) -> Result<Vec<LogRecord>, WireError> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let (rec, used) = LogRecord::decode(&buf[pos..])?;
            out.push(rec);
            pos += used;
        }
        Ok(out)
    }
}

fn expect_len(payload: &[u8], expect: usize) -> Result<(), WireError> {
    if payload.len() != expect {
        return Err(WireError::BadPayloadLength {
            expect,
            have: payload.len(),
        });
    }
    Ok(())
}

/// Little-endian field reader over a payload slice. The infallible accessors
/// are used once the payload length has been validated against the layout.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn i64(&mut self) -> i64 {
        let v = i64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn try_u32(&mut self) -> Result<u32, WireError> {
        if self.buf.len() < self.pos + 4 {
            return Err(WireError::Truncated {
                need: self.pos + 4,
                have: self.buf.len(),
            });
        }
        Ok(self.u32())
    }

    fn try_u8(&mut self) -> Result<u8, WireError> {
        if self.buf.len() < self.pos + 1 {
            return Err(WireError::Truncated {
                need: self.pos + 1,
                have: self.buf.len(),
            });
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    fn name(&mut self, len: usize) -> Result<String, WireError> {
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::BadName)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(rec: LogRecord) {
        let mut buf = Vec::new();
        rec.encode_into(&mut buf);
        assert_eq!(buf.len(), rec.encoded_len());

        let (decoded, used) = LogRecord::decode(&buf).expect("decode");
        assert_eq!(used, buf.len());
        assert_eq!(decoded, rec);

        let mut again = Vec::new();
        decoded.encode_into(&mut again);
        assert_eq!(again, buf, "re-encode must be bit-identical");
    }

    #[test]
    fn roundtrip_every_kind() {
        roundtrip(LogRecord::Inode(InodeRecord {
            inum: 7,
            mode: 0o100644,
            uid: 1000,
            gid: 1000,
            rdev: 0,
            mtime_sec: 1_700_000_000,
            mtime_nsec: 123_456_789,
        }));
        roundtrip(LogRecord::Trunc {
            inum: 7,
            new_size: 4096,
        });
        roundtrip(LogRecord::Delete {
            parent: 1,
            inum: 7,
            name: "notes.txt".into(),
        });
        roundtrip(LogRecord::Symlink {
            inum: 9,
            target: "/etc/hosts".into(),
        });
        roundtrip(LogRecord::Rename {
            inum: 7,
            src_parent: 1,
            dst_parent: 4,
            src_name: "a".into(),
            dst_name: "bb".into(),
        });
        roundtrip(LogRecord::Data(DataRecord {
            inum: 7,
            obj_offset: 512,
            file_offset: 8192,
            size: 8197,
            len: 5,
        }));
        roundtrip(LogRecord::Create {
            parent: 1,
            inum: 7,
            name: "notes.txt".into(),
        });
        roundtrip(LogRecord::Null { pad: 6 });
    }

    #[test]
    fn frame_packs_tag_low_and_length_high() {
        let mut buf = Vec::new();
        LogRecord::Trunc {
            inum: 1,
            new_size: 0,
        }
        .encode_into(&mut buf);
        let frame = u16::from_le_bytes([buf[0], buf[1]]);
        assert_eq!(frame & 0xf, 2);
        assert_eq!(frame >> 4, 12);
    }

    #[test]
    fn fixed_payload_sizes() {
        let inode = LogRecord::Inode(InodeRecord {
            inum: 0,
            mode: 0,
            uid: 0,
            gid: 0,
            rdev: 0,
            mtime_sec: 0,
            mtime_nsec: 0,
        });
        assert_eq!(inode.encoded_len(), 2 + 36);
        let data = LogRecord::Data(DataRecord {
            inum: 0,
            obj_offset: 0,
            file_offset: 0,
            size: 0,
            len: 0,
        });
        assert_eq!(data.encoded_len(), 2 + 28);
    }

    #[test]
    fn stream_terminates_exactly() {
        let mut buf = Vec::new();
        LogRecord::Create {
            parent: 1,
            inum: 2,
            name: "d".into(),
        }
        .encode_into(&mut buf);
        LogRecord::Null { pad: 3 }.encode_into(&mut buf);

        let recs = LogRecord::decode_stream(&buf).expect("stream");
        assert_eq!(recs.len(), 2);

        // A trailing byte is a framing error, not a silent skip.
        buf.push(0xaa);
        assert!(LogRecord::decode_stream(&buf).is_err());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut buf = Vec::new();
        LogRecord::Trunc {
            inum: 1,
            new_size: 99,
        }
        .encode_into(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(matches!(
            LogRecord::decode(&buf),
            Err(WireError::Truncated { .. })
        ));
    }
}
