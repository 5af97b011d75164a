//! Stripe Geometry
//!
//! Pure mapping between logical file offsets and the group / block / stripe
//! coordinates of the striped layout.
//!
//! ```text
//!  logical file:  | g0: b0 b1 .. b(D-1) | g1: b0 b1 .. b(D-1) | ...
//!
//!  stripe s:      [ block of g0 ][ block of g1 ][ block of g2 ] ...
//!                 0              bs             2*bs
//! ```
//!
//! Every stripe stores exactly one block per group, at `group * block_size`
//! in its own address space. Which stripe holds which local block of a group
//! is decided by the erasure scheme (`ErasureScheme::physical_stripe`), not
//! here.

use crate::error::{Error, Result};

/// Default block size (1 MiB)
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

/// Largest stripe count addressable by a GF(2^8) coding matrix
pub const MAX_STRIPES: usize = 256;

/// Layout constants of one file instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeGeometry {
    block_size: u64,
    data_blocks: usize,
    parity_blocks: usize,
}

/// One contiguous piece of a request that falls inside a single data block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    /// Group index
    pub group: u64,
    /// Local data block index within the group (0..D)
    pub block: usize,
    /// Offset inside the block
    pub offset_in_block: usize,
    /// Length of the piece
    pub len: usize,
    /// Logical file offset of the first byte
    pub file_offset: u64,
}

impl StripeGeometry {
    /// Validate and build the geometry for `data_blocks + parity_blocks` stripes
    pub fn new(block_size: u64, data_blocks: usize, parity_blocks: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::InvalidLayout("block_size must be > 0".into()));
        }
        if block_size > usize::MAX as u64 {
            return Err(Error::InvalidLayout(format!(
                "block_size {} does not fit in memory",
                block_size
            )));
        }
        if data_blocks == 0 {
            return Err(Error::InvalidLayout("at least one data stripe is required".into()));
        }
        if parity_blocks == 0 {
            return Err(Error::InvalidLayout("at least one parity stripe is required".into()));
        }
        if data_blocks + parity_blocks > MAX_STRIPES {
            return Err(Error::InvalidLayout(format!(
                "{} stripes exceed the GF(2^8) limit of {}",
                data_blocks + parity_blocks,
                MAX_STRIPES
            )));
        }

        Ok(Self {
            block_size,
            data_blocks,
            parity_blocks,
        })
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Block size as a buffer length
    pub fn block_len(&self) -> usize {
        self.block_size as usize
    }

    /// D
    pub fn data_blocks(&self) -> usize {
        self.data_blocks
    }

    /// P
    pub fn parity_blocks(&self) -> usize {
        self.parity_blocks
    }

    /// N = D + P
    pub fn total_blocks(&self) -> usize {
        self.data_blocks + self.parity_blocks
    }

    /// Logical bytes covered by one group (D * block size)
    pub fn group_size(&self) -> u64 {
        self.block_size * self.data_blocks as u64
    }

    /// `offset / (D * blockSize)`
    pub fn group_index(&self, offset: u64) -> u64 {
        offset / self.group_size()
    }

    /// `(offset / blockSize) mod D`
    pub fn data_block_in_group(&self, offset: u64) -> usize {
        ((offset / self.block_size) % self.data_blocks as u64) as usize
    }

    /// Offset inside the addressed block
    pub fn offset_in_block(&self, offset: u64) -> usize {
        (offset % self.block_size) as usize
    }

    /// First logical byte of a group
    pub fn group_start(&self, group: u64) -> u64 {
        group * self.group_size()
    }

    /// Offset of the group's block inside every stripe
    pub fn stripe_offset(&self, group: u64) -> u64 {
        group * self.block_size
    }

    /// Number of groups needed to hold `size` logical bytes
    pub fn groups_for_size(&self, size: u64) -> u64 {
        size.div_ceil(self.group_size())
    }

    /// Number of whole groups held by a stripe of `stripe_len` bytes
    pub fn groups_for_stripe_len(&self, stripe_len: u64) -> u64 {
        stripe_len.div_ceil(self.block_size)
    }

    /// Whether `offset` sits exactly on a group boundary
    pub fn is_group_aligned(&self, offset: u64) -> bool {
        offset % self.group_size() == 0
    }

    /// Split `[offset, offset + len)` into per-block pieces, in file order
    pub fn spans(&self, offset: u64, len: u64) -> Vec<BlockSpan> {
        let mut spans = Vec::new();
        let end = offset.saturating_add(len);
        let mut pos = offset;

        while pos < end {
            let offset_in_block = self.offset_in_block(pos);
            let piece = std::cmp::min(self.block_size - offset_in_block as u64, end - pos);
            spans.push(BlockSpan {
                group: self.group_index(pos),
                block: self.data_block_in_group(pos),
                offset_in_block,
                len: piece as usize,
                file_offset: pos,
            });
            pos += piece;
        }

        spans
    }
}

// =============================================================================
// Tests
// =============================================================================
