//! Domain Layer
//!
//! Port traits the file engine depends on.
//!
//! - **Ports** (`ports.rs`) - storage abstraction implemented by the adapters
//!
//! # Usage
//!
//! ```ignore
//! use raidio::domain::StripeBackend;
//!
//! async fn stripe_len<S: StripeBackend>(stripe: &S) -> u64 {
//!     stripe.stat().await.unwrap_or(0)
//! }
//! ```

pub mod ports;

pub use ports::{StripeBackend, StripeResult};
