//! RaidIO - Erasure-Coded Striped File I/O
//!
//! Presents one logical file stored across N independent stripe backends:
//! D stripes of data and P stripes of Reed-Solomon parity. Any P stripes may
//! be lost or unreachable while the file stays readable.
//!
//! # Architecture
//!
//! ```text
//! RaidFile (façade) → GroupBuffer → ErasureScheme → StripeSet → StripeBackend
//! ```
//!
//! # Features
//!
//! - Reed-Solomon (Vandermonde) and rotating single-parity layouts
//! - Streaming (append-only) and random-access files
//! - Degraded reads with deterministic decode-set selection
//! - Optional write-back of recovered blocks
//! - Scrub (`verify`) with parity repair
//! - Local-file and in-memory stripe backends
//! - Prometheus text rendering of per-file statistics
//!
//! # Modules
//!
//! - [`adapters`] - Stripe backend implementations
//! - [`config`] - Layout configuration and open options
//! - [`domain`] - Port traits
//! - [`ec`] - Erasure coding components
//! - [`error`] - Error types
//! - [`metrics`] - I/O statistics
//! - [`raid_file`] - The file façade

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ec;
pub mod error;
pub mod metrics;
pub mod raid_file;

// Re-export commonly used types
pub use adapters::{LocalFileStripe, MemoryStripe, StripeFault};
pub use config::{FileOptions, LayoutConfig};
pub use domain::StripeBackend;
pub use ec::{ErasureScheme, SchemeConfig, SchemeKind, StripeGeometry};
pub use error::{Error, Result, StripeError};
pub use metrics::{IoStats, IoStatsSnapshot};
pub use raid_file::{FileMode, FileStatus, RaidFile, VerifyReport};
