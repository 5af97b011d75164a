//! Reconstruction Engine
//!
//! Rebuilds the blocks of a group from whichever stripes are still readable.
//!
//! # Algorithm
//!
//! 1. Collect the local indices of the readable blocks (`valid`), ascending.
//! 2. Fewer than D readable blocks: the group is unrecoverable.
//! 3. Depth-first search over D-subsets of `valid` in ascending order. A
//!    partial pick is abandoned as soon as its rows are linearly dependent;
//!    a complete pick is accepted only if its D x D sub-matrix inverts. The
//!    first accepted subset is the lexicographically smallest one, so every
//!    reader of the same group rebuilds from the same decode set.
//! 4. `data = inverse * survivors`, then missing parity is re-encoded.
//!
//! The search uses an explicit stack bounded by D instead of recursion.

use crate::ec::encoder::{CodingMatrix, ParityEncoder};
use crate::ec::galois;
use crate::ec::matrix::Matrix;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, instrument};

// =============================================================================
// Decode Set
// =============================================================================

/// D surviving rows whose sub-matrix is invertible, plus that inverse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeSet {
    /// Local block indices, ascending
    pub indexes: Vec<usize>,
    /// Inverse of the coding sub-matrix restricted to `indexes`
    pub inverse: Matrix,
}

/// Prefix check applied at every partial assignment.
///
/// Rejects out-of-range or non-increasing picks and any prefix whose rows are
/// already linearly dependent, since no extension of it can be invertible.
fn valid_prefix(coding: &CodingMatrix, picked: &[usize]) -> bool {
    let Some(&last) = picked.last() else {
        return true;
    };
    if last >= coding.total_blocks() {
        return false;
    }
    if picked.windows(2).any(|w| w[0] >= w[1]) {
        return false;
    }
    coding.decode_matrix(picked).rank() == picked.len()
}

/// Acceptance check for a complete assignment: the sub-matrix must invert
fn solution(coding: &CodingMatrix, picked: &[usize]) -> Option<Matrix> {
    coding.decode_matrix(picked).invert()
}

/// Find the lexicographically smallest invertible D-subset of `valid`.
///
/// `valid` may be unsorted or contain duplicates; it is normalised first.
/// Returns `None` when fewer than D candidates exist or no subset inverts.
pub fn find_decode_set(coding: &CodingMatrix, valid: &[usize]) -> Option<DecodeSet> {
    let d = coding.data_blocks();
    let mut candidates: Vec<usize> = valid.to_vec();
    candidates.sort_unstable();
    candidates.dedup();

    if candidates.len() < d {
        return None;
    }

    // Positions into `candidates`, one per depth
    let mut stack: Vec<usize> = Vec::with_capacity(d);
    let mut next = 0usize;

    loop {
        if stack.len() == d {
            let picked: Vec<usize> = stack.iter().map(|&p| candidates[p]).collect();
            if let Some(inverse) = solution(coding, &picked) {
                return Some(DecodeSet {
                    indexes: picked,
                    inverse,
                });
            }
            next = stack.pop()? + 1;
            continue;
        }

        // Not enough candidates left to fill the remaining depths
        if next + (d - stack.len()) > candidates.len() {
            next = stack.pop()? + 1;
            continue;
        }

        stack.push(next);
        let picked: Vec<usize> = stack.iter().map(|&p| candidates[p]).collect();
        if valid_prefix(coding, &picked) {
            next += 1;
        } else {
            stack.pop();
            next += 1;
        }
    }
}

// =============================================================================
// Reconstruction Engine
// =============================================================================

/// Result of rebuilding one group
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// Decode set used
    pub decode_set: DecodeSet,
    /// Local indices that were missing and have been rebuilt
    pub rebuilt: Vec<usize>,
}

/// Linear decoder for one coding matrix; immutable and shareable
#[derive(Debug, Clone)]
pub struct ReconstructionEngine {
    coding: Arc<CodingMatrix>,
    encoder: ParityEncoder,
}

impl ReconstructionEngine {
    pub fn new(coding: Arc<CodingMatrix>) -> Self {
        Self {
            encoder: ParityEncoder::new(Arc::clone(&coding)),
            coding,
        }
    }

    pub fn coding(&self) -> &CodingMatrix {
        &self.coding
    }

    /// Rebuild every missing block of a group in place.
    ///
    /// `blocks` holds N entries in local order; `None` marks a block that
    /// could not be read. On success every entry is `Some`.
    #[instrument(skip(self, blocks))]
    pub fn reconstruct(&self, group: u64, blocks: &mut [Option<Vec<u8>>]) -> Result<Reconstruction> {
        let d = self.coding.data_blocks();
        let n = self.coding.total_blocks();
        if blocks.len() != n {
            return Err(Error::EcEncodingFailed(format!(
                "Expected {} blocks, got {}",
                n,
                blocks.len()
            )));
        }

        let valid: Vec<usize> = (0..n).filter(|&i| blocks[i].is_some()).collect();
        let missing: Vec<usize> = (0..n).filter(|&i| blocks[i].is_none()).collect();

        if valid.len() < d {
            return Err(Error::InsufficientStripes {
                group,
                available: valid.len(),
                required: d,
            });
        }

        let decode_set = find_decode_set(&self.coding, &valid).ok_or_else(|| Error::NoDecodeSet {
            group,
            valid: valid.clone(),
        })?;

        if missing.is_empty() {
            return Ok(Reconstruction {
                decode_set,
                rebuilt: missing,
            });
        }

        let block_len = decode_set
            .indexes
            .first()
            .and_then(|&i| blocks[i].as_ref())
            .map(|b| b.len())
            .unwrap_or(0);

        // data_j = sum_i inverse[j][i] * survivor_i
        let mut data: Vec<Vec<u8>> = Vec::with_capacity(d);
        for j in 0..d {
            if let Some(existing) = blocks[j].as_ref() {
                data.push(existing.clone());
                continue;
            }
            let mut out = vec![0u8; block_len];
            for (i, &src) in decode_set.indexes.iter().enumerate() {
                if let Some(survivor) = blocks[src].as_ref() {
                    galois::mul_slice_xor(decode_set.inverse.get(j, i), survivor, &mut out);
                }
            }
            data.push(out);
        }

        // Parity is re-encoded from the recovered data when any of it is missing
        if missing.iter().any(|&i| i >= d) {
            let mut full: Vec<Vec<u8>> = data.clone();
            full.extend((d..n).map(|_| vec![0u8; block_len]));
            self.encoder.compute_parity(&mut full)?;
            for &i in missing.iter().filter(|&&i| i >= d) {
                blocks[i] = Some(std::mem::take(&mut full[i]));
            }
        }

        for &j in missing.iter().filter(|&&i| i < d) {
            blocks[j] = Some(std::mem::take(&mut data[j]));
        }

        debug!(
            "Group {}: rebuilt blocks {:?} from decode set {:?}",
            group, missing, decode_set.indexes
        );

        Ok(Reconstruction {
            decode_set,
            rebuilt: missing,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
