//! Erasure Schemes
//!
//! A scheme bundles the three capabilities the file engine needs from a
//! layout: where each local block of a group lives (geometry mapping), how
//! parity is computed (encode) and how missing blocks are rebuilt (decode).
//! The concrete scheme is chosen at open time from a [`SchemeConfig`].
//!
//! Callers always go through [`ErasureScheme::physical_stripe`]; only the
//! Reed-Solomon scheme guarantees that the mapping is the identity.

use crate::ec::encoder::{CodingMatrix, ParityEncoder};
use crate::ec::galois;
use crate::ec::reconstruction::{Reconstruction, ReconstructionEngine};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Scheme Selection
// =============================================================================

/// Scheme identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemeKind {
    /// Vandermonde Reed-Solomon, D data + P parity, fixed placement
    #[default]
    ReedSolomon,
    /// Single XOR parity whose stripe rotates with the group index
    RotatingXor,
}

impl fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemeKind::ReedSolomon => write!(f, "reed-solomon"),
            SchemeKind::RotatingXor => write!(f, "rotating-xor"),
        }
    }
}

/// Tagged scheme configuration: identifier plus D/P
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeConfig {
    pub kind: SchemeKind,
    pub data_blocks: usize,
    pub parity_blocks: usize,
}

impl SchemeConfig {
    pub fn reed_solomon(data_blocks: usize, parity_blocks: usize) -> Self {
        Self {
            kind: SchemeKind::ReedSolomon,
            data_blocks,
            parity_blocks,
        }
    }

    pub fn rotating_xor(data_blocks: usize) -> Self {
        Self {
            kind: SchemeKind::RotatingXor,
            data_blocks,
            parity_blocks: 1,
        }
    }

    /// Instantiate the configured scheme
    pub fn build(&self) -> Result<Arc<dyn ErasureScheme>> {
        match self.kind {
            SchemeKind::ReedSolomon => Ok(Arc::new(ReedSolomonScheme::new(
                self.data_blocks,
                self.parity_blocks,
            )?)),
            SchemeKind::RotatingXor => {
                if self.parity_blocks != 1 {
                    return Err(Error::InvalidLayout(format!(
                        "rotating-xor supports exactly one parity stripe, got {}",
                        self.parity_blocks
                    )));
                }
                Ok(Arc::new(RotatingXorScheme::new(self.data_blocks)?))
            }
        }
    }
}

// =============================================================================
// Scheme Trait
// =============================================================================

/// Capability set of an erasure-coded layout
pub trait ErasureScheme: Send + Sync + fmt::Debug {
    fn kind(&self) -> SchemeKind;

    /// Coding matrix shared by every group
    fn coding(&self) -> &CodingMatrix;

    /// D
    fn data_blocks(&self) -> usize {
        self.coding().data_blocks()
    }

    /// P
    fn parity_blocks(&self) -> usize {
        self.coding().parity_blocks()
    }

    /// N
    fn total_blocks(&self) -> usize {
        self.coding().total_blocks()
    }

    /// Physical stripe holding local block `local` of `group`
    fn physical_stripe(&self, group: u64, local: usize) -> usize;

    /// Local block index stored on `physical` for `group`
    fn local_index(&self, group: u64, physical: usize) -> usize;

    /// Overwrite the last P of N local-order blocks with parity
    fn encode(&self, blocks: &mut [Vec<u8>]) -> Result<()>;

    /// Rebuild the `None` entries of N local-order blocks
    fn decode(&self, group: u64, blocks: &mut [Option<Vec<u8>>]) -> Result<Reconstruction>;

    /// Check stored parity against the data blocks
    fn verify(&self, blocks: &[Vec<u8>]) -> Result<bool>;
}

// =============================================================================
// Reed-Solomon
// =============================================================================

/// Reed-Solomon scheme; data on stripes `0..D`, parity on `D..N` in every group
#[derive(Debug, Clone)]
pub struct ReedSolomonScheme {
    encoder: ParityEncoder,
    engine: ReconstructionEngine,
}

impl ReedSolomonScheme {
    pub fn new(data_blocks: usize, parity_blocks: usize) -> Result<Self> {
        Ok(Self::with_coding(CodingMatrix::reed_solomon(
            data_blocks,
            parity_blocks,
        )?))
    }

    /// Use an explicit coding matrix with the identity placement
    pub fn with_coding(coding: CodingMatrix) -> Self {
        let coding = Arc::new(coding);
        Self {
            encoder: ParityEncoder::new(Arc::clone(&coding)),
            engine: ReconstructionEngine::new(coding),
        }
    }
}

impl ErasureScheme for ReedSolomonScheme {
    fn kind(&self) -> SchemeKind {
        SchemeKind::ReedSolomon
    }

    fn coding(&self) -> &CodingMatrix {
        self.encoder.coding()
    }

    fn physical_stripe(&self, _group: u64, local: usize) -> usize {
        local
    }

    fn local_index(&self, _group: u64, physical: usize) -> usize {
        physical
    }

    fn encode(&self, blocks: &mut [Vec<u8>]) -> Result<()> {
        self.encoder.compute_parity(blocks)
    }

    fn decode(&self, group: u64, blocks: &mut [Option<Vec<u8>>]) -> Result<Reconstruction> {
        self.engine.reconstruct(group, blocks)
    }

    fn verify(&self, blocks: &[Vec<u8>]) -> Result<bool> {
        self.encoder.verify(blocks)
    }
}

// =============================================================================
// Rotating XOR
// =============================================================================

/// Single-parity scheme with the parity block rotating across stripes.
///
/// Local block `l` of group `g` lives on stripe `(l + g) mod N`, so the
/// parity block of group `g` sits on stripe `(D + g) mod N`.
#[derive(Debug, Clone)]
pub struct RotatingXorScheme {
    encoder: ParityEncoder,
    engine: ReconstructionEngine,
}

impl RotatingXorScheme {
    pub fn new(data_blocks: usize) -> Result<Self> {
        let coding = Arc::new(CodingMatrix::xor_parity(data_blocks)?);
        Ok(Self {
            encoder: ParityEncoder::new(Arc::clone(&coding)),
            engine: ReconstructionEngine::new(coding),
        })
    }

    fn rotation(&self, group: u64) -> usize {
        (group % self.total_blocks() as u64) as usize
    }
}

impl ErasureScheme for RotatingXorScheme {
    fn kind(&self) -> SchemeKind {
        SchemeKind::RotatingXor
    }

    fn coding(&self) -> &CodingMatrix {
        self.encoder.coding()
    }

    fn physical_stripe(&self, group: u64, local: usize) -> usize {
        (local + self.rotation(group)) % self.total_blocks()
    }

    fn local_index(&self, group: u64, physical: usize) -> usize {
        let n = self.total_blocks();
        (physical + n - self.rotation(group)) % n
    }

    fn encode(&self, blocks: &mut [Vec<u8>]) -> Result<()> {
        let d = self.data_blocks();
        if blocks.len() != d + 1 {
            return Err(Error::EcEncodingFailed(format!(
                "Expected {} blocks, got {}",
                d + 1,
                blocks.len()
            )));
        }
        let (data, parity) = blocks.split_at_mut(d);
        let out = &mut parity[0];
        if data.iter().any(|b| b.len() != out.len()) {
            return Err(Error::EcEncodingFailed(
                "data and parity blocks differ in length".to_string(),
            ));
        }
        out.iter_mut().for_each(|b| *b = 0);
        for input in data.iter() {
            galois::xor_slice(input, out);
        }
        Ok(())
    }

    fn decode(&self, group: u64, blocks: &mut [Option<Vec<u8>>]) -> Result<Reconstruction> {
        self.engine.reconstruct(group, blocks)
    }

    fn verify(&self, blocks: &[Vec<u8>]) -> Result<bool> {
        self.encoder.verify(blocks)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn data_group(d: usize, p: usize, len: usize) -> Vec<Vec<u8>> {
        let mut blocks: Vec<Vec<u8>> = (0..d)
            .map(|i| (0..len).map(|b| (b as u8) ^ (0x40 + i as u8)).collect())
            .collect();
        blocks.extend((0..p).map(|_| vec![0u8; len]));
        blocks
    }

    #[test]
    fn test_build_reed_solomon() {
        let scheme = SchemeConfig::reed_solomon(4, 2).build().unwrap();
        assert_eq!(scheme.kind(), SchemeKind::ReedSolomon);
        assert_eq!(scheme.total_blocks(), 6);
    }

    #[test]
    fn test_build_rotating_xor_requires_single_parity() {
        let mut config = SchemeConfig::rotating_xor(3);
        assert!(config.build().is_ok());
        config.parity_blocks = 2;
        assert_matches!(config.build(), Err(Error::InvalidLayout(_)));
    }

    #[test]
    fn test_reed_solomon_mapping_is_identity_in_every_group() {
        let scheme = ReedSolomonScheme::new(3, 2).unwrap();
        for group in [0u64, 1, 7, 1 << 40] {
            for local in 0..5 {
                assert_eq!(scheme.physical_stripe(group, local), local);
                assert_eq!(scheme.local_index(group, local), local);
            }
        }
    }

    #[test]
    fn test_rotating_mapping() {
        let scheme = RotatingXorScheme::new(3).unwrap();
        // parity (local 3) moves one stripe per group
        assert_eq!(scheme.physical_stripe(0, 3), 3);
        assert_eq!(scheme.physical_stripe(1, 3), 0);
        assert_eq!(scheme.physical_stripe(2, 3), 1);
        assert_eq!(scheme.physical_stripe(4, 3), 3);

        for group in 0..9u64 {
            let mut seen = vec![false; 4];
            for local in 0..4 {
                let physical = scheme.physical_stripe(group, local);
                assert_eq!(scheme.local_index(group, physical), local);
                seen[physical] = true;
            }
            assert!(seen.iter().all(|&s| s));
        }
    }

    #[test]
    fn test_rotating_xor_encode_matches_matrix_encoder() {
        let scheme = RotatingXorScheme::new(4).unwrap();
        let mut fast = data_group(4, 1, 33);
        scheme.encode(&mut fast).unwrap();
        assert!(scheme.verify(&fast).unwrap());

        let mut slow = data_group(4, 1, 33);
        ParityEncoder::new(Arc::new(CodingMatrix::xor_parity(4).unwrap()))
            .compute_parity(&mut slow)
            .unwrap();
        assert_eq!(fast, slow);
    }

    #[test]
    fn test_scheme_decode_roundtrip() {
        for config in [SchemeConfig::reed_solomon(3, 2), SchemeConfig::rotating_xor(3)] {
            let scheme = config.build().unwrap();
            let mut blocks = data_group(3, scheme.parity_blocks(), 20);
            scheme.encode(&mut blocks).unwrap();

            let mut damaged: Vec<Option<Vec<u8>>> = blocks.iter().cloned().map(Some).collect();
            damaged[1] = None;
            scheme.decode(0, &mut damaged).unwrap();

            let rebuilt: Vec<Vec<u8>> = damaged.into_iter().map(Option::unwrap).collect();
            assert_eq!(rebuilt, blocks);
        }
    }

    #[test]
    fn test_scheme_kind_serde() {
        let kind: SchemeKind = serde_yaml::from_str("rotating-xor").unwrap();
        assert_eq!(kind, SchemeKind::RotatingXor);
        assert_eq!(SchemeKind::ReedSolomon.to_string(), "reed-solomon");
    }
}
