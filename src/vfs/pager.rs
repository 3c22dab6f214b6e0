//! The packager: accumulates log records in a metadata buffer and file
//! bytes in a data buffer, and seals both into one immutable object.
//!
//! Offsets handed out by [`Pager::append_data`] are relative to the start
//! of the data buffer, which is exactly the object's data section once the
//! object is assembled as header | records | data.

use crate::oplog::object::{OBJECT_HEADER_LEN, ObjectHeader, ObjectKind};
use crate::oplog::record::LogRecord;
use bytes::Bytes;
use std::collections::BTreeSet;

/// Flush thresholds. A mutation that pushes either buffer past its
/// threshold triggers a flush of the whole object.
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    pub meta_threshold: usize,
    pub data_threshold: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            meta_threshold: 64 * 1024,
            data_threshold: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug)]
pub struct Pager {
    meta: Vec<u8>,
    data: Vec<u8>,
    dirty: BTreeSet<u32>,
    this_index: u32,
    cfg: LogConfig,
}

impl Pager {
    pub fn new(cfg: LogConfig) -> Pager {
        Pager {
            meta: Vec::new(),
            data: Vec::new(),
            dirty: BTreeSet::new(),
            this_index: 0,
            cfg,
        }
    }

    /// Index of the object currently being assembled.
    pub fn this_index(&self) -> u32 {
        self.this_index
    }

    pub fn set_index(&mut self, index: u32) {
        self.this_index = index;
    }

    /// Current length of the data section; the object-relative offset the
    /// next data append will land at.
    pub fn data_offset(&self) -> usize {
        self.data.len()
    }

    pub fn meta_len(&self) -> usize {
        self.meta.len()
    }

    /// Read back a slice of the unflushed data section.
    pub fn data_slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    pub fn push_record(&mut self, rec: &LogRecord) {
        rec.encode_into(&mut self.meta);
    }

    /// Reserve the next region of the data section and copy `bytes` in,
    /// returning its object-relative offset.
    pub fn append_data(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(bytes);
        offset
    }

    pub fn mark_dirty(&mut self, inum: u32) {
        self.dirty.insert(inum);
    }

    pub fn unmark_dirty(&mut self, inum: u32) {
        self.dirty.remove(&inum);
    }

    /// Drain the dirty set for the INODE sweep that precedes sealing.
    pub fn take_dirty(&mut self) -> BTreeSet<u32> {
        std::mem::take(&mut self.dirty)
    }

    pub fn over_threshold(&self) -> bool {
        self.meta.len() > self.cfg.meta_threshold || self.data.len() > self.cfg.data_threshold
    }

    /// Nothing buffered and no attribute changes pending.
    pub fn is_clean(&self) -> bool {
        self.meta.is_empty() && self.data.is_empty() && self.dirty.is_empty()
    }

    /// Close the current object: build its header, hand back the three
    /// regions for a vectored PUT, reset both buffers, and advance the
    /// index. The dirty set must already have been drained into records.
    pub fn seal(&mut self) -> (u32, Vec<Bytes>) {
        debug_assert!(self.dirty.is_empty());
        let header = ObjectHeader {
            kind: ObjectKind::Data,
            header_len: (OBJECT_HEADER_LEN + self.meta.len()) as u32,
            index: self.this_index,
        };
        let parts = vec![
            Bytes::copy_from_slice(&header.encode()),
            Bytes::from(std::mem::take(&mut self.meta)),
            Bytes::from(std::mem::take(&mut self.data)),
        ];
        let index = self.this_index;
        self.this_index += 1;
        (index, parts)
    }

    /// Drop all buffered state without writing it (unmount teardown).
    pub fn reset(&mut self) {
        self.meta.clear();
        self.data.clear();
        self.dirty.clear();
        self.this_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::object::ObjectHeader;

    #[test]
    fn seal_produces_header_meta_data_regions() {
        let mut p = Pager::new(LogConfig::default());
        p.set_index(5);
        p.push_record(&LogRecord::Trunc {
            inum: 2,
            new_size: 0,
        });
        let off = p.append_data(b"hello");
        assert_eq!(off, 0);
        assert_eq!(p.data_offset(), 5);

        let (index, parts) = p.seal();
        assert_eq!(index, 5);
        assert_eq!(p.this_index(), 6);
        assert_eq!(parts.len(), 3);

        let hdr = ObjectHeader::decode(&parts[0]).unwrap();
        assert_eq!(hdr.index, 5);
        assert_eq!(hdr.header_len as usize, OBJECT_HEADER_LEN + parts[1].len());
        assert_eq!(&parts[2][..], b"hello");

        // buffers reset for the next object
        assert_eq!(p.meta_len(), 0);
        assert_eq!(p.data_offset(), 0);
    }

    #[test]
    fn threshold_trips_on_either_buffer() {
        let cfg = LogConfig {
            meta_threshold: 8,
            data_threshold: 8,
        };
        let mut p = Pager::new(cfg);
        assert!(!p.over_threshold());
        p.append_data(&[0u8; 9]);
        assert!(p.over_threshold());

        let mut p = Pager::new(cfg);
        p.push_record(&LogRecord::Trunc {
            inum: 1,
            new_size: 0,
        });
        assert!(p.over_threshold());
    }

    #[test]
    fn clean_tracks_buffers_and_dirty_set() {
        let mut p = Pager::new(LogConfig::default());
        assert!(p.is_clean());
        p.mark_dirty(3);
        assert!(!p.is_clean());
        p.take_dirty();
        assert!(p.is_clean());
    }
}
