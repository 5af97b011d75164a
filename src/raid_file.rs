//! Striped File Façade
//!
//! [`RaidFile`] is one open handle on an erasure-coded file spread over N
//! stripe backends. It owns the geometry, the erasure scheme, the stripe set
//! and the single group buffer of the handle.
//!
//! # State machine
//!
//! ```text
//!   open ──► Open(Streaming | RandomAccess) ──close──► Closed
//!               │  read / write / truncate / flush / verify
//!               └──────────────────────────┘
//! ```
//!
//! # Write path
//!
//! Writes are merged into the group buffer of the group they address. When
//! the write moves to another group, or the buffered group becomes complete,
//! the group is encoded and all N blocks are written concurrently. Partial
//! writes into a group that already exists on the stripes read the affected
//! block first (read-modify-write); writes into a group that does not exist
//! yet never read.
//!
//! # Read path
//!
//! A buffered group is served from memory. Other groups are read directly
//! from their data stripes; if a stripe fails, or the group is known to be
//! degraded, the whole group is recovered from any D healthy stripes.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{booking_hint, open_stripe};
use crate::config::{FileOptions, LayoutConfig};
use crate::domain::ports::StripeBackend;
use crate::ec::geometry::{BlockSpan, StripeGeometry};
use crate::ec::group_buffer::GroupBuffer;
use crate::ec::scheme::ErasureScheme;
use crate::ec::stripe_io::{failed_stripes, StripeRead, StripeSet};
use crate::error::{Error, Result};
use crate::metrics::IoStats;

// =============================================================================
// Types
// =============================================================================

/// Write discipline of an open handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileMode {
    /// Append-only, offsets never go below the high-water mark
    Streaming,
    /// Arbitrary offsets with read-modify-write of existing groups
    RandomAccess,
}

/// Handle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Open(FileMode),
    Closed,
}

/// Outcome of a scrub pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Groups inspected
    pub groups_checked: u64,
    /// Groups with at least one unreadable stripe
    pub degraded_groups: Vec<u64>,
    /// Groups whose stored parity disagrees with their data
    pub parity_mismatches: Vec<u64>,
    /// Groups whose missing or stale blocks were rewritten
    pub repaired: Vec<u64>,
    /// Groups that could not be decoded
    pub unrecoverable: Vec<u64>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.degraded_groups.is_empty()
            && self.parity_mismatches.is_empty()
            && self.unrecoverable.is_empty()
    }
}

/// Byte range inside one data block of a group
#[derive(Debug, Clone, Copy)]
struct Piece {
    block: usize,
    offset: usize,
    len: usize,
}

impl From<&BlockSpan> for Piece {
    fn from(span: &BlockSpan) -> Self {
        Self {
            block: span.block,
            offset: span.offset_in_block,
            len: span.len,
        }
    }
}

/// Consecutive spans sharing a group
fn by_group(spans: Vec<BlockSpan>) -> Vec<(u64, Vec<BlockSpan>)> {
    let mut groups: Vec<(u64, Vec<BlockSpan>)> = Vec::new();
    for span in spans {
        match groups.last_mut() {
            Some((group, list)) if *group == span.group => list.push(span),
            _ => groups.push((span.group, vec![span])),
        }
    }
    groups
}

// =============================================================================
// RaidFile
// =============================================================================

/// One open erasure-coded file
#[derive(Debug)]
pub struct RaidFile {
    geometry: StripeGeometry,
    scheme: Arc<dyn ErasureScheme>,
    stripes: StripeSet,
    options: FileOptions,
    status: FileStatus,
    /// Logical file size
    size: u64,
    /// Groups present on the stripes
    persisted_groups: u64,
    /// Lowest offset a streaming write may start at
    write_high_water: u64,
    buffer: Option<GroupBuffer>,
    /// Physical stripes holding no valid block, per group
    degraded: BTreeMap<u64, BTreeSet<usize>>,
    stats: Arc<IoStats>,
}

impl RaidFile {
    /// Open a file over already-constructed stripe backends.
    ///
    /// The stripe count must be D + P for the configured scheme. Every stripe
    /// is stat'ed; stripes that are shorter than the longest one are marked
    /// degraded for the groups they miss.
    #[instrument(skip(stripes, options), fields(stripe_count = stripes.len(), scheme = %options.scheme))]
    pub async fn open(stripes: Vec<Arc<dyn StripeBackend>>, options: FileOptions) -> Result<Self> {
        let scheme_config = options.scheme_config(stripes.len())?;
        let geometry = options.geometry(stripes.len())?;
        let scheme = scheme_config.build()?;
        let stripes = StripeSet::new(stripes);
        let stats = Arc::new(IoStats::default());

        let outcomes = stripes.stat_all().await;
        let failed = failed_stripes(&outcomes);
        stats.record_stripe_failures(failed.len());
        if failed.len() > geometry.parity_blocks() {
            error!("Open failed: stripes {:?} unavailable", failed);
            return Err(Error::InsufficientStripes {
                group: 0,
                available: geometry.total_blocks() - failed.len(),
                required: geometry.data_blocks(),
            });
        }

        let lens: Vec<Option<u64>> = outcomes.iter().map(|o| o.result.as_ref().ok().copied()).collect();
        let extent = lens
            .iter()
            .flatten()
            .map(|&len| geometry.groups_for_stripe_len(len))
            .max()
            .unwrap_or(0);

        let mut degraded: BTreeMap<u64, BTreeSet<usize>> = BTreeMap::new();
        for (stripe, len) in lens.iter().enumerate() {
            let held = len.map(|l| l / geometry.block_size()).unwrap_or(0);
            for group in held..extent {
                degraded.entry(group).or_default().insert(stripe);
            }
        }
        for (group, set) in &degraded {
            if set.len() > geometry.parity_blocks() {
                warn!("Group {} has {} missing stripes and cannot be read", group, set.len());
            }
        }

        let size = options
            .logical_size
            .unwrap_or(extent * geometry.group_size());
        let mode = if options.streaming {
            FileMode::Streaming
        } else {
            FileMode::RandomAccess
        };

        info!(
            "Opened {} file: {}+{} stripes, block size {}, {} groups, size {}, {} degraded groups",
            scheme.kind(),
            geometry.data_blocks(),
            geometry.parity_blocks(),
            geometry.block_size(),
            extent,
            size,
            degraded.len()
        );

        Ok(Self {
            geometry,
            scheme,
            stripes,
            options,
            status: FileStatus::Open(mode),
            size,
            persisted_groups: extent,
            write_high_water: size,
            buffer: None,
            degraded,
            stats,
        })
    }

    /// Open every stripe location of a layout, then the file
    pub async fn open_layout(config: &LayoutConfig) -> Result<Self> {
        config.validate()?;
        let options = config.file_options();
        let booking = booking_hint(
            &options.booking_opaque,
            options.stripe_target_bytes(config.stripes.len()),
        );

        let opened = join_all(
            config
                .stripes
                .iter()
                .enumerate()
                .map(|(i, url)| open_stripe(i, url, booking.as_deref())),
        )
        .await;
        let stripes = opened.into_iter().collect::<Result<Vec<_>>>()?;

        Self::open(stripes, options).await
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn geometry(&self) -> &StripeGeometry {
        &self.geometry
    }

    pub fn scheme(&self) -> &dyn ErasureScheme {
        self.scheme.as_ref()
    }

    pub fn options(&self) -> &FileOptions {
        &self.options
    }

    pub fn stats(&self) -> Arc<IoStats> {
        Arc::clone(&self.stats)
    }

    /// Groups stored on the stripes
    pub fn persisted_groups(&self) -> u64 {
        self.persisted_groups
    }

    /// Groups with at least one degraded stripe
    pub fn degraded_groups(&self) -> Vec<u64> {
        self.degraded.keys().copied().collect()
    }

    /// Physical stripes degraded for `group`
    pub fn degraded_stripes(&self, group: u64) -> Vec<usize> {
        self.degraded
            .get(&group)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    fn ensure_open(&self) -> Result<FileMode> {
        match self.status {
            FileStatus::Open(mode) => Ok(mode),
            FileStatus::Closed => Err(Error::FileClosed),
        }
    }

    fn mark_degraded(&mut self, group: u64, stripes: impl IntoIterator<Item = usize>) {
        let mut stripes = stripes.into_iter().peekable();
        if stripes.peek().is_some() {
            self.degraded.entry(group).or_default().extend(stripes);
        }
    }

    fn clear_degraded(&mut self, group: u64, stripes: impl IntoIterator<Item = usize>) {
        if let Some(set) = self.degraded.get_mut(&group) {
            for stripe in stripes {
                set.remove(&stripe);
            }
            if set.is_empty() {
                self.degraded.remove(&group);
            }
        }
    }

    /// Stripes degraded below `group` that stop before its block.
    ///
    /// Writing at or past `group` would extend such a stripe over a hole the
    /// backend fills with zeros, and `open` only sees stripe lengths. These
    /// stripes must stay short until the hole is healed.
    async fn short_stripes(&mut self, group: u64) -> Vec<usize> {
        let candidates: BTreeSet<usize> = self
            .degraded
            .range(..group)
            .flat_map(|(_, set)| set.iter().copied())
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let candidates: Vec<usize> = candidates.into_iter().collect();
        let base = self.geometry.stripe_offset(group);
        let lens = self.stripes.stat_many(&candidates).await;

        let mut short = Vec::new();
        for outcome in lens {
            match outcome.result {
                Ok(len) if len >= base => {}
                Ok(len) => {
                    for missing in len / self.geometry.block_size()..group {
                        self.mark_degraded(missing, [outcome.stripe]);
                    }
                    short.push(outcome.stripe);
                }
                Err(_) => short.push(outcome.stripe),
            }
        }
        short
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Read up to `len` bytes at `offset`; the result stops at the file size.
    #[instrument(skip(self))]
    pub async fn read(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.ensure_open()?;

        let end = offset.saturating_add(len as u64).min(self.size);
        if offset >= end {
            self.stats.record_read(0);
            return Ok(Vec::new());
        }

        let mut out = vec![0u8; (end - offset) as usize];
        for (group, spans) in by_group(self.geometry.spans(offset, end - offset)) {
            let pieces: Vec<Piece> = spans.iter().map(Piece::from).collect();
            let data = self.read_group(group, &pieces).await?;
            for (span, bytes) in spans.iter().zip(data) {
                let at = (span.file_offset - offset) as usize;
                out[at..at + span.len].copy_from_slice(&bytes);
            }
        }

        self.stats.record_read(out.len() as u64);
        Ok(out)
    }

    async fn read_group(&mut self, group: u64, pieces: &[Piece]) -> Result<Vec<Vec<u8>>> {
        let needed: Vec<usize> = match &self.buffer {
            Some(buffer) if buffer.group() == group => {
                let set: BTreeSet<usize> = pieces
                    .iter()
                    .map(|p| p.block)
                    .filter(|&b| !buffer.is_readable(b))
                    .collect();
                set.into_iter().collect()
            }
            _ => return self.fetch(group, pieces).await,
        };

        if !needed.is_empty() {
            let contents = self.fetch_blocks(group, &needed).await?;
            if let Some(buffer) = self.buffer.as_mut() {
                for (&block, content) in needed.iter().zip(&contents) {
                    buffer.fill_block(block, content);
                }
            }
        }

        let Some(buffer) = self.buffer.as_ref() else {
            return self.fetch(group, pieces).await;
        };
        Ok(pieces
            .iter()
            .map(|p| {
                let mut bytes = vec![0u8; p.len];
                buffer.read(p.block, p.offset, &mut bytes);
                bytes
            })
            .collect())
    }

    /// Whole data blocks of a stored group
    async fn fetch_blocks(&mut self, group: u64, blocks: &[usize]) -> Result<Vec<Vec<u8>>> {
        let len = self.geometry.block_len();
        let pieces: Vec<Piece> = blocks
            .iter()
            .map(|&block| Piece {
                block,
                offset: 0,
                len,
            })
            .collect();
        self.fetch(group, &pieces).await
    }

    /// Stored bytes of `pieces`, recovering the group when needed
    async fn fetch(&mut self, group: u64, pieces: &[Piece]) -> Result<Vec<Vec<u8>>> {
        if group >= self.persisted_groups {
            return Ok(pieces.iter().map(|p| vec![0u8; p.len]).collect());
        }

        if !self.degraded.contains_key(&group) {
            let base = self.geometry.stripe_offset(group);
            let requests: Vec<StripeRead> = pieces
                .iter()
                .map(|p| StripeRead {
                    stripe: self.scheme.physical_stripe(group, p.block),
                    offset: base + p.offset as u64,
                    len: p.len,
                })
                .collect();

            let outcomes = self.stripes.read_many(&requests).await;
            let mut data = Vec::with_capacity(outcomes.len());
            let mut failed = BTreeSet::new();
            for outcome in outcomes {
                match outcome.result {
                    Ok(bytes) => data.push(bytes.to_vec()),
                    Err(_) => {
                        failed.insert(outcome.stripe);
                    }
                }
            }
            if failed.is_empty() {
                return Ok(data);
            }

            debug!("Group {}: direct read failed on stripes {:?}", group, failed);
            self.stats.record_stripe_failures(failed.len());
            self.mark_degraded(group, failed);
        }

        let blocks = self.recover_group(group).await?;
        Ok(pieces
            .iter()
            .map(|p| blocks[p.block][p.offset..p.offset + p.len].to_vec())
            .collect())
    }

    /// Read every healthy stripe of a group into local order
    async fn load_group(&mut self, group: u64) -> Vec<Option<Vec<u8>>> {
        let bad = self.degraded.get(&group).cloned().unwrap_or_default();
        let base = self.geometry.stripe_offset(group);
        let len = self.geometry.block_len();

        let requests: Vec<StripeRead> = (0..self.geometry.total_blocks())
            .filter(|s| !bad.contains(s))
            .map(|stripe| StripeRead {
                stripe,
                offset: base,
                len,
            })
            .collect();
        let outcomes = self.stripes.read_many(&requests).await;

        let mut blocks: Vec<Option<Vec<u8>>> = vec![None; self.geometry.total_blocks()];
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(bytes) => {
                    blocks[self.scheme.local_index(group, outcome.stripe)] = Some(bytes.to_vec());
                }
                Err(_) => failed.push(outcome.stripe),
            }
        }

        self.stats.record_stripe_failures(failed.len());
        self.mark_degraded(group, failed);
        blocks
    }

    /// Rebuild all N blocks of a stored group from its healthy stripes
    #[instrument(skip(self))]
    async fn recover_group(&mut self, group: u64) -> Result<Vec<Vec<u8>>> {
        let mut blocks = self.load_group(group).await;

        let rebuilt = match self.scheme.decode(group, &mut blocks) {
            Ok(reconstruction) => reconstruction.rebuilt,
            Err(e) => {
                self.stats.record_unrecoverable();
                error!("Group {} unrecoverable: {}", group, e);
                return Err(e);
            }
        };
        self.stats.record_recovery(rebuilt.len());

        let blocks: Vec<Vec<u8>> = blocks.into_iter().map(Option::unwrap_or_default).collect();
        debug!("Group {}: recovered blocks {:?}", group, rebuilt);

        if self.options.store_recovery && !rebuilt.is_empty() {
            self.write_back(group, &blocks, &rebuilt).await;
        }
        Ok(blocks)
    }

    /// Write rebuilt local blocks to their stripes; returns how many landed.
    ///
    /// A stripe shorter than the group's offset is missing earlier groups as
    /// well; it is left alone and marked degraded for those groups.
    async fn write_back(&mut self, group: u64, blocks: &[Vec<u8>], locals: &[usize]) -> usize {
        let base = self.geometry.stripe_offset(group);
        let targets: Vec<(usize, usize)> = locals
            .iter()
            .map(|&local| (local, self.scheme.physical_stripe(group, local)))
            .collect();

        let physical: Vec<usize> = targets.iter().map(|&(_, p)| p).collect();
        let lens = self.stripes.stat_many(&physical).await;
        let mut writable = Vec::new();
        for ((local, stripe), stat) in targets.into_iter().zip(lens) {
            match stat.result {
                Ok(len) if len >= base => writable.push((local, stripe)),
                Ok(len) => {
                    warn!(
                        "Stripe {} holds {} bytes, not writing back group {}",
                        stripe, len, group
                    );
                    for missing in len / self.geometry.block_size()..group {
                        self.mark_degraded(missing, [stripe]);
                    }
                }
                Err(_) => {}
            }
        }

        let writes: Vec<(usize, &[u8])> = writable
            .iter()
            .map(|&(local, stripe)| (stripe, blocks[local].as_slice()))
            .collect();
        let outcomes = self.stripes.write_many(base, &writes).await;

        let repaired: Vec<usize> = outcomes.iter().filter(|o| o.is_ok()).map(|o| o.stripe).collect();
        let failed = failed_stripes(&outcomes);
        if !failed.is_empty() {
            warn!("Group {}: write-back failed on stripes {:?}", group, failed);
            self.stats.record_stripe_failures(failed.len());
        }

        self.stats.record_write_backs(repaired.len());
        let count = repaired.len();
        self.clear_degraded(group, repaired);
        count
    }

    // =========================================================================
    // Write
    // =========================================================================

    /// Write `data` at `offset`
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let mode = self.ensure_open()?;
        if data.is_empty() {
            return Ok(());
        }

        let end = offset.saturating_add(data.len() as u64);
        if self.options.enforce_target_size {
            if let Some(target) = self.options.target_size {
                if end > target {
                    return Err(Error::BeyondTargetSize {
                        offset,
                        end,
                        target,
                    });
                }
            }
        }
        if mode == FileMode::Streaming && offset < self.write_high_water {
            return Err(Error::OutOfOrderWrite {
                offset,
                expected: self.write_high_water,
            });
        }

        for span in self.geometry.spans(offset, data.len() as u64) {
            self.open_group(span.group).await?;

            let range = span.offset_in_block..span.offset_in_block + span.len;
            let needs_fill = self
                .buffer
                .as_ref()
                .is_some_and(|b| b.needs_fill(span.block, &range));
            if needs_fill {
                let contents = self.fetch_blocks(span.group, &[span.block]).await?;
                self.stats.record_fill(1);
                if let (Some(buffer), Some(content)) = (self.buffer.as_mut(), contents.first()) {
                    buffer.fill_block(span.block, content);
                }
            }

            let at = (span.file_offset - offset) as usize;
            let complete = match self.buffer.as_mut() {
                Some(buffer) => {
                    buffer.add_data(span.block, span.offset_in_block, &data[at..at + span.len]);
                    buffer.is_complete()
                }
                None => false,
            };
            let accepted = span.file_offset + span.len as u64;
            self.size = self.size.max(accepted);
            self.write_high_water = self.write_high_water.max(accepted);
            if complete {
                self.flush_buffer().await?;
            }
        }

        self.stats.record_write(data.len() as u64);
        Ok(())
    }

    /// Make `group` the buffered group, flushing the previous one
    async fn open_group(&mut self, group: u64) -> Result<()> {
        if let Some(current) = self.buffer.as_ref() {
            if current.group() == group {
                return Ok(());
            }
            self.flush_buffer().await?;
        }
        let persisted = group < self.persisted_groups;
        self.buffer = Some(GroupBuffer::new(&self.geometry, group, persisted));
        Ok(())
    }

    /// Encode and write the buffered group if there is one
    #[instrument(skip(self))]
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush_buffer().await
    }

    async fn flush_buffer(&mut self) -> Result<()> {
        let Some((group, unfilled)) = self
            .buffer
            .as_ref()
            .map(|b| (b.group(), b.unfilled_blocks()))
        else {
            return Ok(());
        };

        if !unfilled.is_empty() {
            let contents = self.fetch_blocks(group, &unfilled).await?;
            self.stats.record_fill(unfilled.len());
            if let Some(buffer) = self.buffer.as_mut() {
                for (&block, content) in unfilled.iter().zip(&contents) {
                    buffer.fill_block(block, content);
                }
            }
        }

        let short = self.short_stripes(group).await;

        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(());
        };
        self.scheme.encode(buffer.blocks_mut())?;

        let base = self.geometry.stripe_offset(group);
        let writes: Vec<(usize, &[u8])> = buffer
            .blocks()
            .iter()
            .enumerate()
            .map(|(local, block)| (self.scheme.physical_stripe(group, local), block.as_slice()))
            .filter(|(stripe, _)| !short.contains(stripe))
            .collect();
        let outcomes = self.stripes.write_many(base, &writes).await;

        let mut failed = failed_stripes(&outcomes);
        self.stats.record_stripe_failures(failed.len());
        if !short.is_empty() {
            warn!(
                "Group {}: stripes {:?} miss earlier groups, leaving them short",
                group, short
            );
            failed.extend(short.iter().copied());
            failed.sort_unstable();
        }
        if failed.len() > self.geometry.parity_blocks() {
            error!("Group {} write failed on stripes {:?}", group, failed);
            return Err(Error::GroupWriteFailed { group, failed });
        }
        if !failed.is_empty() {
            warn!("Group {} written degraded, stripes {:?} failed", group, failed);
        }

        let succeeded: Vec<usize> = outcomes.iter().filter(|o| o.is_ok()).map(|o| o.stripe).collect();
        self.clear_degraded(group, succeeded);
        self.mark_degraded(group, failed);

        self.persisted_groups = self.persisted_groups.max(group + 1);
        self.buffer = None;
        self.stats.record_flush();
        debug!("Group {} flushed", group);
        Ok(())
    }

    // =========================================================================
    // Truncate
    // =========================================================================

    /// Set the logical size to `new_size`.
    ///
    /// Shrinking into the middle of a group zeroes the rest of that group and
    /// rewrites its parity before any stripe is cut. Every stripe is then set
    /// to whole blocks for the remaining groups.
    #[instrument(skip(self))]
    pub async fn truncate(&mut self, new_size: u64) -> Result<()> {
        self.ensure_open()?;
        self.flush_buffer().await?;

        let keep_groups = self.geometry.groups_for_size(new_size);
        if new_size <= self.size {
            if !self.geometry.is_group_aligned(new_size) {
                let group = self.geometry.group_index(new_size);
                if group < self.persisted_groups {
                    self.rewrite_tail(group, new_size).await?;
                }
            }
            self.degraded.retain(|&g, _| g < keep_groups);
            self.resize_stripes(keep_groups).await?;
        } else if keep_groups > self.persisted_groups {
            self.resize_stripes(keep_groups).await?;
        }

        info!("Truncated from {} to {} bytes", self.size, new_size);
        self.size = new_size;
        self.write_high_water = new_size;
        Ok(())
    }

    /// Zero a group from `new_size` on and rewrite it with fresh parity
    async fn rewrite_tail(&mut self, group: u64, new_size: u64) -> Result<()> {
        let blocks: Vec<usize> = (0..self.geometry.data_blocks()).collect();
        let contents = self.fetch_blocks(group, &blocks).await?;

        let mut buffer = GroupBuffer::new(&self.geometry, group, true);
        for (block, content) in blocks.into_iter().zip(&contents) {
            buffer.fill_block(block, content);
        }
        buffer.zero_from(new_size - self.geometry.group_start(group));

        self.buffer = Some(buffer);
        self.flush_buffer().await
    }

    /// Set every stripe to `groups` whole blocks. Stripes already shorter
    /// than that with an unhealed hole are left as they are.
    async fn resize_stripes(&mut self, groups: u64) -> Result<()> {
        let short = self.short_stripes(groups).await;
        let targets: Vec<usize> = (0..self.geometry.total_blocks())
            .filter(|stripe| !short.contains(stripe))
            .collect();
        if !short.is_empty() {
            debug!("Resize to {} groups leaves stripes {:?} short", groups, short);
        }

        let outcomes = self
            .stripes
            .truncate_many(&targets, groups * self.geometry.block_size())
            .await;
        let failed = failed_stripes(&outcomes);
        let (lo, hi) = if groups < self.persisted_groups {
            (groups, self.persisted_groups)
        } else {
            (self.persisted_groups, groups)
        };

        if failed.len() > self.geometry.parity_blocks() {
            error!("Stripe resize failed on stripes {:?}", failed);
            return Err(Error::GroupWriteFailed { group: lo, failed });
        }
        if !failed.is_empty() {
            self.stats.record_stripe_failures(failed.len());
            for group in lo..hi {
                self.mark_degraded(group, failed.iter().copied());
            }
        }

        self.persisted_groups = groups;
        Ok(())
    }

    // =========================================================================
    // Verify / Close
    // =========================================================================

    /// Scrub every stored group.
    ///
    /// Missing blocks are rebuilt and stored parity is checked against the
    /// data. With `store_recovery` set, rebuilt blocks and re-encoded parity
    /// are written back.
    #[instrument(skip(self))]
    pub async fn verify(&mut self) -> Result<VerifyReport> {
        self.ensure_open()?;
        self.flush_buffer().await?;

        let mut report = VerifyReport::default();
        let d = self.geometry.data_blocks();
        let n = self.geometry.total_blocks();

        for group in 0..self.persisted_groups {
            report.groups_checked += 1;
            let mut loaded = self.load_group(group).await;
            let missing: Vec<usize> = (0..n).filter(|&i| loaded[i].is_none()).collect();

            if let Err(e) = self.scheme.decode(group, &mut loaded) {
                warn!("Group {} unrecoverable during verify: {}", group, e);
                self.stats.record_unrecoverable();
                report.unrecoverable.push(group);
                continue;
            }
            let mut blocks: Vec<Vec<u8>> = loaded.into_iter().map(Option::unwrap_or_default).collect();

            if !missing.is_empty() {
                self.stats.record_recovery(missing.len());
                report.degraded_groups.push(group);
            }

            let mut rewrite: BTreeSet<usize> = missing.into_iter().collect();
            if !self.scheme.verify(&blocks)? {
                warn!("Group {} parity does not match its data", group);
                report.parity_mismatches.push(group);
                self.scheme.encode(&mut blocks)?;
                rewrite.extend(d..n);
            }

            if self.options.store_recovery && !rewrite.is_empty() {
                let locals: Vec<usize> = rewrite.into_iter().collect();
                if self.write_back(group, &blocks, &locals).await == locals.len() {
                    report.repaired.push(group);
                }
            }
        }

        info!(
            "Verified {} groups: {} degraded, {} parity mismatches, {} repaired, {} unrecoverable",
            report.groups_checked,
            report.degraded_groups.len(),
            report.parity_mismatches.len(),
            report.repaired.len(),
            report.unrecoverable.len()
        );
        Ok(report)
    }

    /// Flush the buffered group and close the handle; closing twice is a no-op
    #[instrument(skip(self))]
    pub async fn close(&mut self) -> Result<()> {
        if self.status == FileStatus::Closed {
            return Ok(());
        }
        self.flush_buffer().await?;
        self.status = FileStatus::Closed;
        info!("Closed file, size {} bytes", self.size);
        Ok(())
    }
}

impl Drop for RaidFile {
    fn drop(&mut self) {
        if let Some(buffer) = &self.buffer {
            warn!(
                "File dropped without close, group {} was not written",
                buffer.group()
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryStripe, StripeFault};
    use crate::ec::scheme::SchemeKind;
    use assert_matches::assert_matches;

    const BS: u64 = 16;

    fn stripes(n: usize) -> (Vec<Arc<MemoryStripe>>, Vec<Arc<dyn StripeBackend>>) {
        let mems: Vec<Arc<MemoryStripe>> = (0..n)
            .map(|i| Arc::new(MemoryStripe::new(format!("mem-{}", i))))
            .collect();
        let backends = mems
            .iter()
            .map(|m| Arc::clone(m) as Arc<dyn StripeBackend>)
            .collect();
        (mems, backends)
    }

    fn options(parity: usize) -> FileOptions {
        FileOptions {
            parity_blocks: parity,
            block_size: BS,
            ..Default::default()
        }
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
    }

    // =========================================================================
    // Open
    // =========================================================================

    #[tokio::test]
    async fn test_open_rejects_bad_stripe_count() {
        let (_mems, backends) = stripes(2);
        assert_matches!(
            RaidFile::open(backends, options(2)).await,
            Err(Error::InvalidLayout(_))
        );
    }

    #[tokio::test]
    async fn test_open_fails_when_too_many_stripes_unreachable() {
        let (mems, backends) = stripes(4);
        mems[0].set_fault(StripeFault::Unreachable);
        mems[2].set_fault(StripeFault::Unreachable);
        assert_matches!(
            RaidFile::open(backends, options(1)).await,
            Err(Error::InsufficientStripes { .. })
        );
    }

    #[tokio::test]
    async fn test_open_marks_short_stripes_degraded() {
        let (mems, backends) = stripes(4);
        {
            let mut file = RaidFile::open(backends.clone(), options(1)).await.unwrap();
            file.write(0, &pattern(3 * BS as usize * 2, 1)).await.unwrap();
            file.close().await.unwrap();
        }
        mems[1].truncate(BS).await.unwrap();

        let file = RaidFile::open(backends, options(1)).await.unwrap();
        assert_eq!(file.persisted_groups(), 2);
        assert_eq!(file.size(), 2 * 3 * BS);
        assert_eq!(file.degraded_groups(), vec![1]);
        assert_eq!(file.degraded_stripes(1), vec![1]);
    }

    // =========================================================================
    // Read / Write
    // =========================================================================

    #[tokio::test]
    async fn test_buffered_group_is_readable_before_flush() {
        let (mems, backends) = stripes(5);
        let mut file = RaidFile::open(backends, options(2)).await.unwrap();

        file.write(4, b"hello").await.unwrap();
        assert_eq!(file.read(4, 5).await.unwrap(), b"hello");
        assert_eq!(file.read(0, 4).await.unwrap(), vec![0u8; 4]);
        assert!(mems.iter().all(|m| m.write_count() == 0));

        file.close().await.unwrap();
        assert!(mems.iter().all(|m| m.write_count() == 1));
        assert_eq!(mems[0].contents().len(), BS as usize);
    }

    #[tokio::test]
    async fn test_read_clamps_to_size() {
        let (_mems, backends) = stripes(3);
        let mut file = RaidFile::open(backends, options(1)).await.unwrap();
        file.write(0, &[1u8; 10]).await.unwrap();

        assert_eq!(file.read(5, 100).await.unwrap().len(), 5);
        assert!(file.read(10, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multi_group_roundtrip() {
        let (_mems, backends) = stripes(5);
        let mut file = RaidFile::open(backends.clone(), options(2)).await.unwrap();
        let data = pattern(200, 3);
        file.write(0, &data).await.unwrap();
        file.close().await.unwrap();

        let mut reopened = RaidFile::open(
            backends,
            FileOptions {
                logical_size: Some(200),
                ..options(2)
            },
        )
        .await
        .unwrap();
        assert_eq!(reopened.read(0, 200).await.unwrap(), data);
        assert_eq!(reopened.read(47, 30).await.unwrap(), data[47..77].to_vec());
    }

    #[tokio::test]
    async fn test_degraded_read_recovers() {
        let (mems, backends) = stripes(5);
        let mut file = RaidFile::open(backends, options(2)).await.unwrap();
        let data = pattern(3 * BS as usize, 9);
        file.write(0, &data).await.unwrap();

        mems[0].set_fault(StripeFault::Unreachable);
        mems[2].set_fault(StripeFault::Corrupt);

        assert_eq!(file.read(0, data.len()).await.unwrap(), data);
        assert_eq!(file.degraded_stripes(0), vec![0, 2]);
        assert_eq!(file.stats().snapshot().recoveries, 1);
    }

    #[tokio::test]
    async fn test_unrecoverable_read_fails() {
        let (mems, backends) = stripes(4);
        let mut file = RaidFile::open(backends, options(1)).await.unwrap();
        file.write(0, &pattern(3 * BS as usize, 2)).await.unwrap();

        mems[0].set_fault(StripeFault::Unreachable);
        mems[1].set_fault(StripeFault::Unreachable);

        let err = file.read(0, 10).await.unwrap_err();
        assert!(err.is_unrecoverable());
        assert_eq!(file.stats().snapshot().unrecoverable_groups, 1);
    }

    #[tokio::test]
    async fn test_store_recovery_writes_back() {
        let (mems, backends) = stripes(5);
        let mut file = RaidFile::open(
            backends,
            FileOptions {
                store_recovery: true,
                ..options(2)
            },
        )
        .await
        .unwrap();
        let data = pattern(3 * BS as usize, 4);
        file.write(0, &data).await.unwrap();
        let original = mems[1].contents();

        mems[1].wipe();
        assert_eq!(file.read(0, data.len()).await.unwrap(), data);

        assert_eq!(mems[1].contents(), original);
        assert!(file.degraded_groups().is_empty());
        assert_eq!(file.stats().snapshot().write_backs, 1);
    }

    #[tokio::test]
    async fn test_write_back_skips_unreachable_stripe() {
        let (mems, backends) = stripes(5);
        let mut file = RaidFile::open(
            backends,
            FileOptions {
                store_recovery: true,
                ..options(2)
            },
        )
        .await
        .unwrap();
        let data = pattern(3 * BS as usize, 4);
        file.write(0, &data).await.unwrap();

        mems[4].set_fault(StripeFault::Unreachable);
        mems[0].set_fault(StripeFault::Unreachable);
        assert_eq!(file.read(0, data.len()).await.unwrap(), data);
        assert_eq!(file.degraded_stripes(0), vec![0, 4]);
        assert_eq!(file.stats().snapshot().write_backs, 0);
    }

    #[tokio::test]
    async fn test_group_write_failure_keeps_buffer() {
        let (mems, backends) = stripes(3);
        let mut file = RaidFile::open(backends, options(1)).await.unwrap();
        mems[0].set_fault(StripeFault::ReadOnly);
        mems[1].set_fault(StripeFault::ReadOnly);

        let data = pattern(2 * BS as usize, 5);
        assert_matches!(
            file.write(0, &data).await,
            Err(Error::GroupWriteFailed { group: 0, .. })
        );
        assert_eq!(file.size(), data.len() as u64);
        assert_eq!(file.read(0, data.len()).await.unwrap(), data);

        mems[0].clear_fault();
        mems[1].clear_fault();
        file.close().await.unwrap();
        assert_eq!(mems[0].contents(), data[..BS as usize].to_vec());
    }

    #[tokio::test]
    async fn test_single_stripe_write_failure_degrades_group() {
        let (mems, backends) = stripes(3);
        let mut file = RaidFile::open(backends, options(1)).await.unwrap();
        mems[2].set_fault(StripeFault::ReadOnly);

        let data = pattern(2 * BS as usize, 6);
        file.write(0, &data).await.unwrap();
        assert_eq!(file.degraded_stripes(0), vec![2]);

        mems[2].clear_fault();
        assert_eq!(file.read(0, data.len()).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_target_size_enforced() {
        let (_mems, backends) = stripes(3);
        let mut file = RaidFile::open(
            backends,
            FileOptions {
                target_size: Some(20),
                enforce_target_size: true,
                ..options(1)
            },
        )
        .await
        .unwrap();

        file.write(0, &[1; 20]).await.unwrap();
        assert_matches!(
            file.write(15, &[1; 6]).await,
            Err(Error::BeyondTargetSize { target: 20, .. })
        );
    }

    #[tokio::test]
    async fn test_streaming_allows_gaps() {
        let (_mems, backends) = stripes(3);
        let mut file = RaidFile::open(
            backends,
            FileOptions {
                streaming: true,
                ..options(1)
            },
        )
        .await
        .unwrap();

        file.write(0, &[1; 4]).await.unwrap();
        file.write(40, &[2; 4]).await.unwrap();
        assert_matches!(
            file.write(43, &[3]).await,
            Err(Error::OutOfOrderWrite {
                offset: 43,
                expected: 44
            })
        );
        let back = file.read(0, 44).await.unwrap();
        assert_eq!(&back[..4], &[1; 4]);
        assert!(back[4..40].iter().all(|&b| b == 0));
        assert_eq!(&back[40..], &[2; 4]);
    }

    // =========================================================================
    // Truncate / Close / Verify
    // =========================================================================

    #[tokio::test]
    async fn test_truncate_extends_with_zeros() {
        let (mems, backends) = stripes(3);
        let mut file = RaidFile::open(backends, options(1)).await.unwrap();
        file.write(0, &[9; 8]).await.unwrap();
        file.truncate(100).await.unwrap();

        assert_eq!(file.size(), 100);
        assert_eq!(file.persisted_groups(), 4);
        assert!(mems.iter().all(|m| m.contents().len() == 4 * BS as usize));
        let back = file.read(0, 100).await.unwrap();
        assert_eq!(&back[..8], &[9; 8]);
        assert!(back[8..].iter().all(|&b| b == 0));
        assert!(file.verify().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_extending_skips_stripe_missing_an_earlier_group() {
        let (mems, backends) = stripes(3);
        let mut file = RaidFile::open(backends, options(1)).await.unwrap();
        mems[0].set_fault(StripeFault::ReadOnly);
        let data = pattern(2 * BS as usize, 3);
        file.write(0, &data).await.unwrap();
        mems[0].clear_fault();

        file.truncate(3 * 2 * BS).await.unwrap();
        assert!(mems[0].contents().is_empty());
        assert_eq!(mems[1].contents().len(), 3 * BS as usize);
        assert_eq!(file.degraded_groups(), vec![0, 1, 2]);
        assert_eq!(file.degraded_stripes(2), vec![0]);

        file.write(5 * BS, &[7; 16]).await.unwrap();
        file.flush().await.unwrap();
        assert!(mems[0].contents().is_empty());

        let back = file.read(0, 6 * BS as usize).await.unwrap();
        assert_eq!(&back[..data.len()], &data[..]);
        assert!(back[data.len()..5 * BS as usize].iter().all(|&b| b == 0));
        assert_eq!(&back[5 * BS as usize..], &[7; 16]);
    }

    #[tokio::test]
    async fn test_truncate_inside_group_recomputes_parity() {
        let (mems, backends) = stripes(4);
        let mut file = RaidFile::open(backends, options(1)).await.unwrap();
        file.write(0, &pattern(96, 1)).await.unwrap();
        file.truncate(50).await.unwrap();

        assert_eq!(file.persisted_groups(), 2);
        assert!(mems.iter().all(|m| m.contents().len() == 2 * BS as usize));
        let back = file.read(0, 96).await.unwrap();
        assert_eq!(back, pattern(96, 1)[..50].to_vec());
        assert!(file.verify().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_closed_file_rejects_operations() {
        let (_mems, backends) = stripes(3);
        let mut file = RaidFile::open(backends, options(1)).await.unwrap();
        file.close().await.unwrap();
        file.close().await.unwrap();

        assert_eq!(file.status(), FileStatus::Closed);
        assert_matches!(file.read(0, 1).await, Err(Error::FileClosed));
        assert_matches!(file.write(0, &[1]).await, Err(Error::FileClosed));
        assert_matches!(file.truncate(0).await, Err(Error::FileClosed));
    }

    #[tokio::test]
    async fn test_verify_detects_and_repairs_parity() {
        let (mems, backends) = stripes(4);
        let mut file = RaidFile::open(
            backends,
            FileOptions {
                store_recovery: true,
                ..options(1)
            },
        )
        .await
        .unwrap();
        file.write(0, &pattern(48, 8)).await.unwrap();

        mems[3].corrupt_byte(3);
        let report = file.verify().await.unwrap();
        assert_eq!(report.parity_mismatches, vec![0]);
        assert_eq!(report.repaired, vec![0]);

        assert!(file.verify().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_verify_reports_unrecoverable() {
        let (mems, backends) = stripes(3);
        let mut file = RaidFile::open(backends, options(1)).await.unwrap();
        file.write(0, &pattern(64, 8)).await.unwrap();
        file.flush().await.unwrap();

        mems[0].set_fault(StripeFault::Unreachable);
        mems[1].set_fault(StripeFault::Corrupt);
        let report = file.verify().await.unwrap();
        assert_eq!(report.groups_checked, 2);
        assert_eq!(report.unrecoverable, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_rotating_xor_places_parity_per_group() {
        let (mems, backends) = stripes(3);
        let mut file = RaidFile::open(
            backends,
            FileOptions {
                scheme: SchemeKind::RotatingXor,
                ..options(1)
            },
        )
        .await
        .unwrap();
        let data = pattern(3 * 2 * BS as usize, 2);
        file.write(0, &data).await.unwrap();

        let bs = BS as usize;
        // group 0: parity on stripe 2
        let s0 = mems[0].contents();
        let s1 = mems[1].contents();
        let s2 = mems[2].contents();
        assert_eq!(&s0[..bs], &data[..bs]);
        for i in 0..bs {
            assert_eq!(s2[i], s0[i] ^ s1[i]);
        }
        // group 1: data block 0 on stripe 1, parity on stripe 0
        assert_eq!(&s1[bs..2 * bs], &data[2 * bs..3 * bs]);
        for i in bs..2 * bs {
            assert_eq!(s0[i], s1[i] ^ s2[i]);
        }

        mems[1].set_fault(StripeFault::Unreachable);
        assert_eq!(file.read(0, data.len()).await.unwrap(), data);
    }
}
