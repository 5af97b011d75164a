//! Erasure Coding Module
//!
//! Everything between the file façade and the stripe backends: the GF(2^8)
//! arithmetic, the coding matrix, the offset geometry, the group buffer, the
//! decode-set search and the concurrent stripe I/O.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Erasure Coding Module                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  ┌──────────────┐    ┌──────────────┐    ┌───────────────────────────┐  │
//! │  │   Geometry   │    │ Group Buffer │    │   Stripe I/O Adapter      │  │
//! │  │  (offsets)   │    │  (one group) │    │   (join_all fan-out)      │  │
//! │  └──────────────┘    └──────────────┘    └───────────────────────────┘  │
//! │                             │                                            │
//! │                   ┌─────────┴─────────┐                                  │
//! │                   │  Erasure Scheme   │  ReedSolomon │ RotatingXor       │
//! │                   └─────────┬─────────┘                                  │
//! │              ┌──────────────┴──────────────┐                             │
//! │     ┌────────┴───────┐           ┌─────────┴────────┐                    │
//! │     │ Parity Encoder │           │  Reconstruction  │                    │
//! │     └────────┬───────┘           └─────────┬────────┘                    │
//! │              └──────────┬──────────────────┘                             │
//! │                 ┌───────┴────────┐                                       │
//! │                 │ GF(2^8) Matrix │                                       │
//! │                 └────────────────┘                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **Galois field** (`galois.rs`, `matrix.rs`): table-driven GF(2^8) and
//!   Gauss-Jordan matrix inversion
//! - **Geometry** (`geometry.rs`): offset to group / block / stripe mapping
//! - **Encoder** (`encoder.rs`): systematic coding matrix and parity
//! - **Reconstruction** (`reconstruction.rs`): decode-set search and decode
//! - **Schemes** (`scheme.rs`): placement + encode + decode per layout
//! - **Group buffer** (`group_buffer.rs`): the one group being written
//! - **Stripe I/O** (`stripe_io.rs`): concurrent per-stripe operations
//!
//! # Usage
//!
//! ```rust,ignore
//! use raidio::ec::{SchemeConfig, ErasureScheme};
//!
//! let scheme = SchemeConfig::reed_solomon(4, 2).build()?;
//!
//! let mut blocks: Vec<Vec<u8>> = vec![vec![0u8; 4096]; 6];
//! blocks[0].copy_from_slice(&[1u8; 4096]);
//! scheme.encode(&mut blocks)?;
//!
//! let mut damaged: Vec<Option<Vec<u8>>> = blocks.into_iter().map(Some).collect();
//! damaged[0] = None;
//! damaged[3] = None;
//! scheme.decode(0, &mut damaged)?;
//! ```

pub mod encoder;
pub mod galois;
pub mod geometry;
pub mod group_buffer;
pub mod matrix;
pub mod reconstruction;
pub mod scheme;
pub mod stripe_io;

#[cfg(test)]
mod proptest;

pub use encoder::{CodingMatrix, ParityEncoder};
pub use geometry::{BlockSpan, StripeGeometry, DEFAULT_BLOCK_SIZE};
pub use reconstruction::{find_decode_set, DecodeSet, Reconstruction, ReconstructionEngine};
pub use scheme::{ErasureScheme, ReedSolomonScheme, RotatingXorScheme, SchemeConfig, SchemeKind};
pub use stripe_io::{StripeOutcome, StripeSet};
