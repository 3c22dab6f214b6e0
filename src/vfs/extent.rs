//! Per-file extent map: a sparse index from file offset to a contiguous run
//! of bytes inside one log object.
//!
//! Invariants:
//! - Entries never overlap: for keys k1 < k2, `k1 + map[k1].len <= k2`.
//! - An entry adjacent to its predecessor in the same object may be
//!   coalesced; coalescing is opportunistic, not required.

use std::collections::BTreeMap;
use std::ops::Bound;

/// A contiguous run of file bytes backed by one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// Index of the object holding the bytes.
    pub objnum: u32,
    /// Offset within the object's data section.
    pub offset: u32,
    /// Length in bytes.
    pub len: u32,
}

#[derive(Debug, Default, Clone)]
pub struct ExtentMap {
    map: BTreeMap<u64, Extent>,
}

impl ExtentMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &Extent)> {
        self.map.iter().map(|(k, v)| (*k, v))
    }

    /// Entries at or after `offset`, in ascending order, starting with the
    /// entry covering `offset` when one exists.
    pub fn iter_from(&self, offset: u64) -> impl Iterator<Item = (u64, &Extent)> {
        let start = match self.lookup(offset) {
            Some((base, _)) => base,
            None => offset,
        };
        self.map.range(start..).map(|(k, v)| (*k, v))
    }

    /// The entry covering `offset` if one exists, else the lowest entry with
    /// base > `offset`, else `None`.
    pub fn lookup(&self, offset: u64) -> Option<(u64, &Extent)> {
        if let Some((base, e)) = self.map.range(..=offset).next_back()
            && base + e.len as u64 > offset
        {
            return Some((*base, e));
        }
        self.map
            .range((Bound::Excluded(offset), Bound::Unbounded))
            .next()
            .map(|(k, v)| (*k, v))
    }

    /// Install `e` at file offset `offset`, overwriting anything previously
    /// mapped in `[offset, offset + e.len)`.
    pub fn update(&mut self, offset: u64, e: Extent) {
        if self.map.is_empty() {
            self.map.insert(offset, e);
            return;
        }

        // Extending the last entry with contiguous bytes of the same object.
        let (&last_base, last) = self.map.iter().next_back().unwrap();
        if offset == last_base + last.len as u64
            && e.objnum == last.objnum
            && e.offset == last.offset + last.len
        {
            self.map.get_mut(&last_base).unwrap().len += e.len;
            return;
        }

        let end = offset + e.len as u64;

        // Drop entries fully contained in the overwritten range.
        let contained: Vec<u64> = self
            .map
            .range(offset..)
            .take_while(|(k, v)| **k + v.len as u64 <= end)
            .map(|(k, _)| *k)
            .collect();
        for k in contained {
            self.map.remove(&k);
        }

        // Trim an entry that starts inside the range but runs past its end.
        if let Some((&k, &v)) = self.map.range(offset..end).next() {
            let cut = (end - k) as u32;
            self.map.remove(&k);
            self.map.insert(
                end,
                Extent {
                    objnum: v.objnum,
                    offset: v.offset + cut,
                    len: v.len - cut,
                },
            );
        }

        // The predecessor may be bisected or left-overlapped.
        if let Some((&k, &v)) = self.map.range(..offset).next_back() {
            let v_end = k + v.len as u64;
            if v_end > end {
                // Bisect: keep a head below `offset` and a tail above `end`.
                self.map.get_mut(&k).unwrap().len = (offset - k) as u32;
                let cut = (end - k) as u32;
                self.map.insert(
                    end,
                    Extent {
                        objnum: v.objnum,
                        offset: v.offset + cut,
                        len: v.len - cut,
                    },
                );
            } else if v_end > offset {
                self.map.get_mut(&k).unwrap().len = (offset - k) as u32;
            }
        }

        self.map.insert(offset, e);
    }

    /// Delete the entry starting exactly at `offset`.
    pub fn erase(&mut self, offset: u64) {
        self.map.remove(&offset);
    }

    /// Drop or shrink entries so that no mapped byte lies at or beyond
    /// `new_size`.
    pub fn truncate(&mut self, new_size: u64) {
        loop {
            let Some((base, _)) = self.lookup(new_size) else {
                break;
            };
            if base < new_size {
                self.map.get_mut(&base).unwrap().len = (new_size - base) as u32;
            } else {
                self.erase(base);
            }
        }
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        let mut prev_end = 0u64;
        for (base, e) in self.iter() {
            assert!(base >= prev_end, "overlap at {base}");
            assert!(e.len > 0, "zero-length extent at {base}");
            prev_end = base + e.len as u64;
        }
    }
}
