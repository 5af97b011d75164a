//! Erasure Coding Encoder
//!
//! Builds the N x D coding matrix of a layout and computes the P parity
//! blocks of a complete group from its D data blocks.
//!
//! Rows `0..D` of the coding matrix are the identity (data blocks are stored
//! verbatim); rows `D..N` hold the parity coefficients. Recovery selects D
//! surviving rows, inverts the square sub-matrix and multiplies it with the
//! surviving blocks.

use crate::ec::galois;
use crate::ec::matrix::Matrix;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, instrument};

// =============================================================================
// Coding Matrix
// =============================================================================

/// Generator matrix of a systematic erasure code (N rows x D columns)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodingMatrix {
    matrix: Matrix,
    data_blocks: usize,
}

impl CodingMatrix {
    /// Vandermonde-derived Reed-Solomon matrix.
    ///
    /// Takes the N x D Vandermonde matrix `V` and multiplies it by the inverse
    /// of its top D x D square, so the top becomes the identity while every
    /// D-row subset stays invertible.
    pub fn reed_solomon(data_blocks: usize, parity_blocks: usize) -> Result<Self> {
        validate_counts(data_blocks, parity_blocks)?;
        let total = data_blocks + parity_blocks;

        let vandermonde = Matrix::vandermonde(total, data_blocks);
        let top = vandermonde.select_rows(&(0..data_blocks).collect::<Vec<_>>());
        let top_inv = top.invert().ok_or_else(|| {
            Error::EcEncodingFailed("Vandermonde top square is singular".to_string())
        })?;
        let matrix = vandermonde.multiply(&top_inv).ok_or_else(|| {
            Error::EcEncodingFailed("coding matrix dimension mismatch".to_string())
        })?;

        Ok(Self {
            matrix,
            data_blocks,
        })
    }

    /// Identity plus a single all-ones row: plain XOR parity
    pub fn xor_parity(data_blocks: usize) -> Result<Self> {
        Self::from_parity_rows(data_blocks, &[vec![1u8; data_blocks]])
    }

    /// Identity plus caller-provided parity rows.
    ///
    /// No invertibility property is checked; degenerate rows are allowed and
    /// surface as decode failures during recovery.
    pub fn from_parity_rows(data_blocks: usize, parity_rows: &[Vec<u8>]) -> Result<Self> {
        validate_counts(data_blocks, parity_rows.len())?;
        let total = data_blocks + parity_rows.len();

        let mut matrix = Matrix::zeros(total, data_blocks);
        for i in 0..data_blocks {
            matrix.set(i, i, 1);
        }
        for (p, row) in parity_rows.iter().enumerate() {
            if row.len() != data_blocks {
                return Err(Error::InvalidLayout(format!(
                    "parity row {} has {} coefficients, expected {}",
                    p,
                    row.len(),
                    data_blocks
                )));
            }
            for (j, &coeff) in row.iter().enumerate() {
                matrix.set(data_blocks + p, j, coeff);
            }
        }

        Ok(Self {
            matrix,
            data_blocks,
        })
    }

    /// D
    pub fn data_blocks(&self) -> usize {
        self.data_blocks
    }

    /// P
    pub fn parity_blocks(&self) -> usize {
        self.matrix.rows() - self.data_blocks
    }

    /// N
    pub fn total_blocks(&self) -> usize {
        self.matrix.rows()
    }

    /// Coefficient for (row, data column)
    pub fn coefficient(&self, row: usize, col: usize) -> u8 {
        self.matrix.get(row, col)
    }

    /// Whole N x D matrix
    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    /// Square sub-matrix made of the given rows
    pub fn decode_matrix(&self, rows: &[usize]) -> Matrix {
        self.matrix.select_rows(rows)
    }
}

fn validate_counts(data_blocks: usize, parity_blocks: usize) -> Result<()> {
    if data_blocks == 0 {
        return Err(Error::InvalidLayout(
            "data_blocks must be greater than 0".to_string(),
        ));
    }
    if parity_blocks == 0 {
        return Err(Error::InvalidLayout(
            "parity_blocks must be greater than 0".to_string(),
        ));
    }
    if data_blocks + parity_blocks > 256 {
        return Err(Error::InvalidLayout(format!(
            "total blocks (D + P = {}) must be <= 256 for GF(2^8)",
            data_blocks + parity_blocks
        )));
    }
    Ok(())
}

// =============================================================================
// Parity Encoder
// =============================================================================

/// Computes parity blocks for complete groups
#[derive(Debug, Clone)]
pub struct ParityEncoder {
    coding: Arc<CodingMatrix>,
}

impl ParityEncoder {
    pub fn new(coding: Arc<CodingMatrix>) -> Self {
        Self { coding }
    }

    pub fn coding(&self) -> &CodingMatrix {
        &self.coding
    }

    /// Compute parity in place.
    ///
    /// `blocks` holds N equally sized blocks in local order; the first D are
    /// read, the last P are overwritten.
    #[instrument(skip(self, blocks), fields(blocks = blocks.len()))]
    pub fn compute_parity(&self, blocks: &mut [Vec<u8>]) -> Result<()> {
        let block_len = self.check_blocks(blocks)?;
        let d = self.coding.data_blocks();
        let (data, parity) = blocks.split_at_mut(d);

        for (p, out) in parity.iter_mut().enumerate() {
            out.iter_mut().for_each(|b| *b = 0);
            for (j, input) in data.iter().enumerate() {
                galois::mul_slice_xor(self.coding.coefficient(d + p, j), input, out);
            }
        }

        debug!(
            "Computed {} parity blocks of {} bytes",
            self.coding.parity_blocks(),
            block_len
        );
        Ok(())
    }

    /// Recompute parity from the data blocks and compare with the stored one
    pub fn verify(&self, blocks: &[Vec<u8>]) -> Result<bool> {
        let block_len = self.check_blocks(blocks)?;
        let d = self.coding.data_blocks();
        let mut expected = vec![0u8; block_len];

        for p in 0..self.coding.parity_blocks() {
            expected.iter_mut().for_each(|b| *b = 0);
            for (j, input) in blocks[..d].iter().enumerate() {
                galois::mul_slice_xor(self.coding.coefficient(d + p, j), input, &mut expected);
            }
            if expected != blocks[d + p] {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn check_blocks(&self, blocks: &[Vec<u8>]) -> Result<usize> {
        if blocks.len() != self.coding.total_blocks() {
            return Err(Error::EcEncodingFailed(format!(
                "Expected {} blocks, got {}",
                self.coding.total_blocks(),
                blocks.len()
            )));
        }
        let block_len = blocks[0].len();
        if let Some(i) = blocks.iter().position(|b| b.len() != block_len) {
            return Err(Error::EcEncodingFailed(format!(
                "Block {} has {} bytes, expected {}",
                i,
                blocks[i].len(),
                block_len
            )));
        }
        Ok(block_len)
    }
}

// =============================================================================
// Tests
// =============================================================================
