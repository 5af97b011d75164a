//! Property-Based Tests for Erasure Coding
//!
//! Uses proptest to check the coding layer and the file façade across a
//! wide range of layouts, erasure patterns and write sequences.
//!
//! # Test Properties
//!
//! 1. **Fault Tolerance**: any P lost blocks of a group are rebuilt exactly
//! 2. **Decode Sets**: the chosen set is deterministic and lexicographically
//!    smallest
//! 3. **Placement**: every scheme maps a group's blocks onto distinct stripes
//! 4. **File Equivalence**: a striped file reads back like a flat buffer

#![cfg(test)]

use proptest::prelude::*;
use std::sync::Arc;

use super::encoder::CodingMatrix;
use super::reconstruction::find_decode_set;
use super::scheme::{ErasureScheme, SchemeConfig, SchemeKind};
use crate::adapters::MemoryStripe;
use crate::config::FileOptions;
use crate::domain::ports::StripeBackend;
use crate::raid_file::RaidFile;

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for (D, P) layouts small enough to keep cases fast.
fn layout_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..=6, 1usize..=3)
}

/// Strategy for a group of D data blocks of equal length.
fn group_strategy(d: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    (1usize..=64).prop_flat_map(move |len| {
        prop::collection::vec(prop::collection::vec(any::<u8>(), len), d)
    })
}

/// Strategy for up to `max` distinct erased positions below `total`.
fn erasure_strategy(total: usize, max: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..total, 0..=max).prop_map(|mut positions| {
        positions.sort_unstable();
        positions.dedup();
        positions
    })
}

/// Strategy for a random-access write: (offset, payload).
fn write_strategy() -> impl Strategy<Value = (u64, Vec<u8>)> {
    (0u64..400, prop::collection::vec(any::<u8>(), 1..120))
}

fn encoded(scheme: &dyn ErasureScheme, data: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, TestCaseError> {
    let len = data[0].len();
    let mut blocks = data;
    blocks.resize(scheme.total_blocks(), vec![0u8; len]);
    scheme.encode(&mut blocks)?;
    Ok(blocks)
}

// =============================================================================
// Recovery Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: any pattern of at most P erasures is rebuilt byte for byte.
    #[test]
    fn prop_reed_solomon_recovers_any_p_erasures(
        (d, p, data, erased) in layout_strategy().prop_flat_map(|(d, p)| {
            (Just(d), Just(p), group_strategy(d), erasure_strategy(d + p, p))
        }),
    ) {
        let scheme = SchemeConfig::reed_solomon(d, p).build()?;
        let blocks = encoded(scheme.as_ref(), data)?;

        let mut damaged: Vec<Option<Vec<u8>>> = blocks.iter().cloned().map(Some).collect();
        for &i in &erased {
            damaged[i] = None;
        }

        let reconstruction = scheme.decode(0, &mut damaged)?;
        prop_assert_eq!(reconstruction.rebuilt, erased);

        let restored: Vec<Vec<u8>> = damaged.into_iter().flatten().collect();
        prop_assert_eq!(restored, blocks);
    }

    /// Property: the rotating single-parity layout survives any one loss in any group.
    #[test]
    fn prop_rotating_xor_recovers_one_erasure(
        (d, data, lost, group) in (1usize..=6).prop_flat_map(|d| {
            (Just(d), group_strategy(d), 0..d + 1, 0u64..32)
        }),
    ) {
        let scheme = SchemeConfig::rotating_xor(d).build()?;
        let blocks = encoded(scheme.as_ref(), data)?;

        let mut damaged: Vec<Option<Vec<u8>>> = blocks.iter().cloned().map(Some).collect();
        damaged[lost] = None;
        scheme.decode(group, &mut damaged)?;

        let restored: Vec<Vec<u8>> = damaged.into_iter().flatten().collect();
        prop_assert_eq!(restored, blocks);
    }

    /// Property: more than P erasures never yields data.
    #[test]
    fn prop_too_many_erasures_fails(
        (d, p) in layout_strategy(),
    ) {
        let scheme = SchemeConfig::reed_solomon(d, p).build()?;
        let blocks = encoded(scheme.as_ref(), vec![vec![7u8; 8]; d])?;

        let mut damaged: Vec<Option<Vec<u8>>> = blocks.into_iter().map(Some).collect();
        for slot in damaged.iter_mut().take(p + 1) {
            *slot = None;
        }
        prop_assert!(scheme.decode(0, &mut damaged).is_err());
    }
}

// =============================================================================
// Decode Set Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: for a Reed-Solomon matrix the first D valid rows always decode,
    /// so they are the lexicographically smallest choice.
    #[test]
    fn prop_decode_set_is_first_d_valid(
        (d, p, erased) in layout_strategy().prop_flat_map(|(d, p)| {
            (Just(d), Just(p), erasure_strategy(d + p, p))
        }),
    ) {
        let coding = CodingMatrix::reed_solomon(d, p)?;
        let valid: Vec<usize> = (0..d + p).filter(|i| !erased.contains(i)).collect();

        let set = find_decode_set(&coding, &valid).unwrap();
        prop_assert_eq!(&set.indexes[..], &valid[..d]);
    }

    /// Property: the search ignores the order and duplication of its input.
    #[test]
    fn prop_decode_set_deterministic(
        (d, p, mut valid) in layout_strategy().prop_flat_map(|(d, p)| {
            (Just(d), Just(p), prop::collection::vec(0..d + p, 0..2 * (d + p)))
        }),
    ) {
        let coding = CodingMatrix::reed_solomon(d, p)?;

        let first = find_decode_set(&coding, &valid).map(|s| s.indexes);
        valid.reverse();
        let second = find_decode_set(&coding, &valid).map(|s| s.indexes);
        prop_assert_eq!(&first, &second);

        let mut distinct = valid.clone();
        distinct.sort_unstable();
        distinct.dedup();
        prop_assert_eq!(first.is_some(), distinct.len() >= d);
    }
}

// =============================================================================
// Placement Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: local and physical indices are inverse bijections in every group.
    #[test]
    fn prop_placement_is_bijective(
        d in 1usize..=8,
        group in any::<u64>(),
        rotating in any::<bool>(),
    ) {
        let scheme = if rotating {
            SchemeConfig::rotating_xor(d).build()?
        } else {
            SchemeConfig::reed_solomon(d, 2).build()?
        };

        let mut seen = vec![false; scheme.total_blocks()];
        for local in 0..scheme.total_blocks() {
            let physical = scheme.physical_stripe(group, local);
            prop_assert!(physical < scheme.total_blocks());
            prop_assert!(!seen[physical]);
            seen[physical] = true;
            prop_assert_eq!(scheme.local_index(group, physical), local);
        }
    }
}

// =============================================================================
// File Properties
// =============================================================================

fn memory_stripes(n: usize) -> Vec<Arc<dyn StripeBackend>> {
    (0..n)
        .map(|i| Arc::new(MemoryStripe::new(format!("mem-{}", i))) as Arc<dyn StripeBackend>)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// Property: any sequence of random-access writes reads back like a flat
    /// buffer, both through the live handle and after reopening.
    #[test]
    fn prop_file_matches_flat_buffer(
        writes in prop::collection::vec(write_strategy(), 1..8),
        rotating in any::<bool>(),
    ) {
        let (scheme, parity) = if rotating {
            (SchemeKind::RotatingXor, 1)
        } else {
            (SchemeKind::ReedSolomon, 2)
        };
        let options = FileOptions {
            scheme,
            parity_blocks: parity,
            block_size: 16,
            ..Default::default()
        };
        let backends = memory_stripes(3 + parity);

        let mut model: Vec<u8> = Vec::new();
        for (offset, payload) in &writes {
            let end = *offset as usize + payload.len();
            if model.len() < end {
                model.resize(end, 0);
            }
            model[*offset as usize..end].copy_from_slice(payload);
        }

        let live = tokio_test::block_on(async {
            let mut file = RaidFile::open(backends.clone(), options.clone()).await?;
            for (offset, payload) in &writes {
                file.write(*offset, payload).await?;
            }
            let live = file.read(0, model.len() + 10).await?;
            file.close().await?;
            Ok::<_, crate::error::Error>(live)
        })?;
        prop_assert_eq!(&live, &model);

        let reopened = tokio_test::block_on(async {
            let options = FileOptions {
                logical_size: Some(model.len() as u64),
                ..options
            };
            let mut file = RaidFile::open(backends, options).await?;
            file.read(0, model.len()).await
        })?;
        prop_assert_eq!(&reopened, &model);
    }
}
