//! Metrics module
//!
//! Per-file I/O counters and their Prometheus rendering.

mod io_stats;

pub use io_stats::{IoStats, IoStatsSnapshot};
