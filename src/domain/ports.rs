//! Domain Ports (Port/Adapter Pattern)
//!
//! The file engine only talks to storage through the traits in this module.
//! Adapters in `crate::adapters` provide in-memory and local-file backends;
//! remote transports plug in the same way.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      File Engine                             │
//! │   RaidFile ──► StripeSet ──► StripeBackend (port, trait)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │          MemoryStripe │ LocalFileStripe │ ...               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use crate::error::StripeError;

/// Result of a single stripe operation
pub type StripeResult<T> = std::result::Result<T, StripeError>;

// =============================================================================
// Stripe Backend Port
// =============================================================================

/// One storage destination holding the blocks of one stripe.
///
/// Offsets are in the stripe's own address space. Implementations must be
/// safe to call concurrently for different stripes; calls for one stripe are
/// issued by a single file handle at a time.
///
/// # Example Implementation
///
/// ```ignore
/// struct NullStripe;
///
/// #[async_trait]
/// impl StripeBackend for NullStripe {
///     fn name(&self) -> &str { "null" }
///     async fn read(&self, _offset: u64, len: usize) -> StripeResult<Bytes> {
///         Ok(Bytes::from(vec![0u8; len]))
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait StripeBackend: Send + Sync + fmt::Debug {
    /// Location used in logs (URL or path)
    fn name(&self) -> &str;

    /// Read exactly `len` bytes at `offset`; fewer bytes is a `ShortRead`
    async fn read(&self, offset: u64, len: usize) -> StripeResult<Bytes>;

    /// Write `data` at `offset`, growing the stripe if needed
    async fn write(&self, offset: u64, data: &[u8]) -> StripeResult<()>;

    /// Set the stripe length, zero-extending when growing
    async fn truncate(&self, len: u64) -> StripeResult<()>;

    /// Current stripe length in bytes
    async fn stat(&self) -> StripeResult<u64>;
}
