//! Object framing: the 20-byte header that precedes every record stream,
//! and the key scheme objects are stored under.

use crate::oplog::record::WireError;

/// `"OBFS"` read as a little-endian u32.
pub const OBJECT_MAGIC: u32 = 0x5346_424F;

pub const OBJECT_VERSION: u32 = 1;

/// Header size in bytes: magic, version, kind, header_length, index.
pub const OBJECT_HEADER_LEN: usize = 20;

/// Suffix reserved for future read-optimized checkpoint objects.
pub const CHECKPOINT_SUFFIX: &str = ".ck";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// A log object: header, record stream, file data.
    Data = 1,
    /// Reserved. The loader skips checkpoint keys; the replay engine
    /// rejects checkpoint headers.
    Checkpoint = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub kind: ObjectKind,
    /// Total bytes from object start to the end of the record stream.
    /// File data begins at this absolute offset.
    pub header_len: u32,
    pub index: u32,
}

impl ObjectHeader {
    pub fn encode(&self) -> [u8; OBJECT_HEADER_LEN] {
        let mut out = [0u8; OBJECT_HEADER_LEN];
        out[0..4].copy_from_slice(&OBJECT_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&OBJECT_VERSION.to_le_bytes());
        out[8..12].copy_from_slice(&(self.kind as u32).to_le_bytes());
        out[12..16].copy_from_slice(&self.header_len.to_le_bytes());
        out[16..20].copy_from_slice(&self.index.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<ObjectHeader, WireError> {
        if buf.len() < OBJECT_HEADER_LEN {
            return Err(WireError::Truncated {
                need: OBJECT_HEADER_LEN,
                have: buf.len(),
            });
        }
        let word = |i: usize| u32::from_le_bytes(buf[i..i + 4].try_into().unwrap());
        let magic = word(0);
        if magic != OBJECT_MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        let version = word(4);
        if version != OBJECT_VERSION {
            return Err(WireError::BadVersion(version));
        }
        let kind = match word(8) {
            1 => ObjectKind::Data,
            2 => ObjectKind::Checkpoint,
            other => return Err(WireError::BadObjectKind(other)),
        };
        let header_len = word(12);
        if (header_len as usize) < OBJECT_HEADER_LEN {
            return Err(WireError::BadHeaderLength(header_len));
        }
        Ok(ObjectHeader {
            kind,
            header_len,
            index: word(16),
        })
    }
}

/// Backing-store key for log object `index`.
pub fn object_key(prefix: &str, index: u32) -> String {
    format!("{prefix}.{index:08x}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedKey {
    Data(u32),
    Checkpoint(u32),
}

/// Parse a listed key back into its object index. Returns `None` for keys
/// that do not follow the `<prefix>.<8-hex>[.ck]` scheme.
pub fn parse_object_key(prefix: &str, key: &str) -> Option<ParsedKey> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('.')?;
    let (hex, checkpoint) = match rest.strip_suffix(CHECKPOINT_SUFFIX) {
        Some(hex) => (hex, true),
        None => (rest, false),
    };
    if hex.len() != 8 {
        return None;
    }
    let index = u32::from_str_radix(hex, 16).ok()?;
    Some(if checkpoint {
        ParsedKey::Checkpoint(index)
    } else {
        ParsedKey::Data(index)
    })
}
