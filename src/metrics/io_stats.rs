//! Per-file I/O statistics
//!
//! Counters are plain atomics updated on the I/O path. A snapshot can be
//! serialised or rendered in Prometheus text format through a registry owned
//! by the caller of `to_prometheus`, never the process-global one.

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

/// Live counters of one file handle.
#[derive(Debug, Default)]
pub struct IoStats {
    /// Read calls served
    pub reads: AtomicU64,

    /// Write calls accepted
    pub writes: AtomicU64,

    /// Bytes returned to callers
    pub bytes_read: AtomicU64,

    /// Bytes accepted from callers
    pub bytes_written: AtomicU64,

    /// Groups encoded and written to the stripes
    pub groups_flushed: AtomicU64,

    /// Data blocks read back to complete a partial group (read-modify-write)
    pub blocks_filled: AtomicU64,

    /// Group reads that needed recovery
    pub degraded_reads: AtomicU64,

    /// Successful group recoveries
    pub recoveries: AtomicU64,

    /// Blocks rebuilt by recovery
    pub blocks_recovered: AtomicU64,

    /// Individual stripe operations that failed
    pub stripe_failures: AtomicU64,

    /// Recovered blocks written back to their stripes
    pub write_backs: AtomicU64,

    /// Groups found unrecoverable
    pub unrecoverable_groups: AtomicU64,
}

impl IoStats {
    pub fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.groups_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fill(&self, blocks: usize) {
        self.blocks_filled.fetch_add(blocks as u64, Ordering::Relaxed);
    }

    /// Record a group recovery that rebuilt `blocks` blocks.
    pub fn record_recovery(&self, blocks: usize) {
        self.degraded_reads.fetch_add(1, Ordering::Relaxed);
        self.recoveries.fetch_add(1, Ordering::Relaxed);
        self.blocks_recovered.fetch_add(blocks as u64, Ordering::Relaxed);
    }

    pub fn record_stripe_failures(&self, count: usize) {
        self.stripe_failures.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_write_backs(&self, count: usize) {
        self.write_backs.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_unrecoverable(&self) {
        self.degraded_reads.fetch_add(1, Ordering::Relaxed);
        self.unrecoverable_groups.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            groups_flushed: self.groups_flushed.load(Ordering::Relaxed),
            blocks_filled: self.blocks_filled.load(Ordering::Relaxed),
            degraded_reads: self.degraded_reads.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            blocks_recovered: self.blocks_recovered.load(Ordering::Relaxed),
            stripe_failures: self.stripe_failures.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            unrecoverable_groups: self.unrecoverable_groups.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of file statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoStatsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub groups_flushed: u64,
    pub blocks_filled: u64,
    pub degraded_reads: u64,
    pub recoveries: u64,
    pub blocks_recovered: u64,
    pub stripe_failures: u64,
    pub write_backs: u64,
    pub unrecoverable_groups: u64,
}

impl IoStatsSnapshot {
    /// Share of group reads that went through recovery, in percent.
    pub fn degraded_percentage(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            (self.degraded_reads as f64 / self.reads as f64) * 100.0
        }
    }

    fn counters(&self) -> [(&'static str, &'static str, u64); 12] {
        [
            ("raidio_reads_total", "Read calls served", self.reads),
            ("raidio_writes_total", "Write calls accepted", self.writes),
            ("raidio_read_bytes_total", "Bytes returned to callers", self.bytes_read),
            ("raidio_written_bytes_total", "Bytes accepted from callers", self.bytes_written),
            ("raidio_groups_flushed_total", "Groups encoded and written", self.groups_flushed),
            ("raidio_blocks_filled_total", "Blocks read back for read-modify-write", self.blocks_filled),
            ("raidio_degraded_reads_total", "Group reads that needed recovery", self.degraded_reads),
            ("raidio_recoveries_total", "Successful group recoveries", self.recoveries),
            ("raidio_blocks_recovered_total", "Blocks rebuilt by recovery", self.blocks_recovered),
            ("raidio_stripe_failures_total", "Failed stripe operations", self.stripe_failures),
            ("raidio_write_backs_total", "Recovered blocks written back", self.write_backs),
            ("raidio_unrecoverable_groups_total", "Groups found unrecoverable", self.unrecoverable_groups),
        ]
    }

    /// Register the counters in `registry`
    pub fn register(&self, registry: &Registry) -> Result<()> {
        for (name, help, value) in self.counters() {
            let counter = IntCounter::new(name, help)?;
            counter.inc_by(value);
            registry.register(Box::new(counter))?;
        }
        Ok(())
    }

    /// Render in Prometheus text exposition format
    pub fn to_prometheus(&self) -> Result<String> {
        let registry = Registry::new();
        self.register(&registry)?;

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
