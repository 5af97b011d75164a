//! Group Buffer
//!
//! Holds the N blocks of the one group a file handle is currently writing.
//! Data blocks are merged from caller writes; blocks of a group that already
//! exists on the stripes must be filled from there before a partial write
//! lands on them, so parity is never computed over garbage.

use crate::ec::geometry::StripeGeometry;
use std::ops::Range;

/// Per data block bookkeeping
#[derive(Debug, Clone, Default)]
struct BlockSlot {
    /// Written byte ranges, sorted and non-overlapping
    written: Vec<Range<usize>>,
    /// Content is complete: fully written or filled from the stripes
    populated: bool,
}

impl BlockSlot {
    fn covers(&self, range: &Range<usize>) -> bool {
        self.written
            .iter()
            .any(|w| w.start <= range.start && w.end >= range.end)
    }

    fn insert(&mut self, range: Range<usize>) {
        let mut merged = range;
        let mut kept = Vec::with_capacity(self.written.len() + 1);
        for w in self.written.drain(..) {
            if w.end < merged.start || w.start > merged.end {
                kept.push(w);
            } else {
                merged = merged.start.min(w.start)..merged.end.max(w.end);
            }
        }
        kept.push(merged);
        kept.sort_by_key(|r| r.start);
        self.written = kept;
    }
}

/// In-memory image of one group
#[derive(Debug)]
pub struct GroupBuffer {
    group: u64,
    block_len: usize,
    data_blocks: usize,
    /// N blocks in local order
    blocks: Vec<Vec<u8>>,
    slots: Vec<BlockSlot>,
    /// Group already has content on the stripes
    persisted: bool,
}

impl GroupBuffer {
    /// Empty buffer for `group`; a persisted group needs fills before merges
    pub fn new(geometry: &StripeGeometry, group: u64, persisted: bool) -> Self {
        let block_len = geometry.block_len();
        Self {
            group,
            block_len,
            data_blocks: geometry.data_blocks(),
            blocks: vec![vec![0u8; block_len]; geometry.total_blocks()],
            slots: vec![BlockSlot::default(); geometry.data_blocks()],
            persisted,
        }
    }

    pub fn group(&self) -> u64 {
        self.group
    }

    /// Whether a write of `range` into `block` must be preceded by a fill
    pub fn needs_fill(&self, block: usize, range: &Range<usize>) -> bool {
        let full = range.start == 0 && range.end >= self.block_len;
        self.persisted && !self.slots[block].populated && !full
    }

    /// Whether `block` can be served from memory as is
    pub fn is_readable(&self, block: usize) -> bool {
        !self.persisted || self.slots[block].populated
    }

    /// Merge stored content into `block` without clobbering written bytes
    pub fn fill_block(&mut self, block: usize, content: &[u8]) {
        let slot = &mut self.slots[block];
        if slot.populated {
            return;
        }
        let target = &mut self.blocks[block];
        let mut pos = 0usize;
        for w in &slot.written {
            if pos < w.start {
                target[pos..w.start].copy_from_slice(&content[pos..w.start]);
            }
            pos = w.end;
        }
        if pos < self.block_len {
            target[pos..].copy_from_slice(&content[pos..self.block_len]);
        }
        slot.populated = true;
    }

    /// Copy caller bytes into `block` at `offset`
    pub fn add_data(&mut self, block: usize, offset: usize, data: &[u8]) {
        let range = offset..offset + data.len();
        self.blocks[block][range.clone()].copy_from_slice(data);

        let slot = &mut self.slots[block];
        if !slot.covers(&range) {
            slot.insert(range);
        }
        if slot.covers(&(0..self.block_len)) {
            slot.populated = true;
        }
    }

    /// All D data blocks are populated
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|s| s.populated)
    }

    /// Data blocks that still have to be read from the stripes before encoding
    pub fn unfilled_blocks(&self) -> Vec<usize> {
        if !self.persisted {
            return Vec::new();
        }
        (0..self.data_blocks)
            .filter(|&b| !self.slots[b].populated)
            .collect()
    }

    /// Copy `out.len()` bytes of `block` starting at `offset`
    pub fn read(&self, block: usize, offset: usize, out: &mut [u8]) {
        out.copy_from_slice(&self.blocks[block][offset..offset + out.len()]);
    }

    /// Zero every data byte at or after `offset_in_group`
    pub fn zero_from(&mut self, offset_in_group: u64) {
        let block_len = self.block_len as u64;
        for b in 0..self.data_blocks {
            let start = b as u64 * block_len;
            if start + block_len <= offset_in_group {
                continue;
            }
            let from = offset_in_group.saturating_sub(start) as usize;
            self.blocks[b][from..].iter_mut().for_each(|x| *x = 0);
        }
    }

    /// All N local-order blocks, parity last
    pub fn blocks(&self) -> &[Vec<u8>] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [Vec<u8>] {
        &mut self.blocks
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> StripeGeometry {
        StripeGeometry::new(8, 2, 1).unwrap()
    }

    #[test]
    fn test_new_group_completes_on_full_writes() {
        let mut buf = GroupBuffer::new(&geometry(), 0, false);
        assert!(!buf.is_complete());
        assert!(buf.unfilled_blocks().is_empty());

        buf.add_data(0, 0, &[1; 8]);
        assert!(!buf.is_complete());
        buf.add_data(1, 0, &[2; 4]);
        buf.add_data(1, 4, &[3; 4]);
        assert!(buf.is_complete());
        assert_eq!(buf.blocks()[1], vec![2, 2, 2, 2, 3, 3, 3, 3]);
    }

    #[test]
    fn test_new_group_never_needs_fill() {
        let buf = GroupBuffer::new(&geometry(), 3, false);
        assert!(!buf.needs_fill(0, &(2..3)));
        assert!(buf.is_readable(1));
    }

    #[test]
    fn test_persisted_group_partial_write_needs_fill() {
        let mut buf = GroupBuffer::new(&geometry(), 1, true);
        assert!(buf.needs_fill(0, &(5..6)));
        assert!(!buf.needs_fill(0, &(0..8)));
        assert!(!buf.is_readable(0));
        assert_eq!(buf.unfilled_blocks(), vec![0, 1]);

        buf.fill_block(0, &[9; 8]);
        assert!(!buf.needs_fill(0, &(5..6)));
        assert_eq!(buf.unfilled_blocks(), vec![1]);
    }

    #[test]
    fn test_fill_preserves_written_bytes() {
        let mut buf = GroupBuffer::new(&geometry(), 0, true);
        buf.add_data(1, 2, &[7, 7]);
        buf.add_data(1, 6, &[8]);
        buf.fill_block(1, &[1; 8]);
        assert_eq!(buf.blocks()[1], vec![1, 1, 7, 7, 1, 1, 8, 1]);
    }

    #[test]
    fn test_overlapping_writes_merge_coverage() {
        let mut buf = GroupBuffer::new(&geometry(), 0, true);
        buf.add_data(0, 0, &[1; 5]);
        buf.add_data(0, 3, &[2; 5]);
        assert!(buf.unfilled_blocks() == vec![1]);
        assert_eq!(buf.blocks()[0], vec![1, 1, 1, 2, 2, 2, 2, 2]);
    }

    #[test]
    fn test_read_from_buffer() {
        let mut buf = GroupBuffer::new(&geometry(), 0, false);
        buf.add_data(1, 2, &[4, 5, 6]);
        let mut out = [0u8; 4];
        buf.read(1, 1, &mut out);
        assert_eq!(out, [0, 4, 5, 6]);
    }

    #[test]
    fn test_zero_from() {
        let mut buf = GroupBuffer::new(&geometry(), 0, false);
        buf.add_data(0, 0, &[1; 8]);
        buf.add_data(1, 0, &[2; 8]);
        buf.zero_from(6);
        assert_eq!(buf.blocks()[0], vec![1, 1, 1, 1, 1, 1, 0, 0]);
        assert_eq!(buf.blocks()[1], vec![0; 8]);
    }
}
