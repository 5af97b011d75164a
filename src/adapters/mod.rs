//! Infrastructure Adapters
//!
//! Implementations of the [`StripeBackend`] port.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Ports (crate::domain::ports)                   │
//! │                         StripeBackend                            │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │           MemoryStripe │ LocalFileStripe                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use raidio::adapters::open_stripe;
//!
//! let stripe = open_stripe(0, "file:///data/stripe-0", Some("oss.size=4194304")).await?;
//! let len = stripe.stat().await?;
//! ```

mod local_file;
mod memory;

pub use local_file::LocalFileStripe;
pub use memory::{MemoryStripe, StripeFault};

use std::sync::Arc;

use crate::domain::ports::StripeBackend;
use crate::error::{Error, Result};

/// Open the backend for stripe `index` at `url`.
///
/// Accepts `file://` URLs and bare paths. The booking string is handed to
/// the backend untouched.
pub async fn open_stripe(
    index: usize,
    url: &str,
    booking: Option<&str>,
) -> Result<Arc<dyn StripeBackend>> {
    let path = match url.split_once("://") {
        Some(("file", rest)) => rest,
        Some((scheme, _)) => {
            return Err(Error::InvalidLayout(format!(
                "unsupported stripe URL scheme '{}' in {}",
                scheme, url
            )));
        }
        None => url,
    };
    if path.is_empty() {
        return Err(Error::InvalidLayout(format!("empty stripe path in '{}'", url)));
    }

    let stripe = LocalFileStripe::open(path, booking)
        .await
        .map_err(|source| Error::Stripe { index, source })?;
    Ok(Arc::new(stripe))
}

/// Booking hint for one stripe: `"<opaque>=<per-stripe bytes>"`
pub fn booking_hint(opaque: &str, stripe_bytes: Option<u64>) -> Option<String> {
    match stripe_bytes {
        Some(bytes) if !opaque.is_empty() => Some(format!("{}={}", opaque, bytes)),
        _ => None,
    }
}
