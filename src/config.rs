//! File layout configuration
//!
//! A [`LayoutConfig`] describes one striped file: the erasure scheme, the
//! ordered stripe locations and the open-time hints. It is usually loaded
//! from YAML:
//!
//! ```yaml
//! scheme: reed-solomon
//! parity: 2
//! block_size: 4096
//! stripes:
//!   - file:///data/s0
//!   - file:///data/s1
//!   - file:///data/s2
//!   - file:///data/s3
//!   - file:///data/s4
//! store_recovery: true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ec::geometry::{StripeGeometry, DEFAULT_BLOCK_SIZE};
use crate::ec::scheme::{SchemeConfig, SchemeKind};
use crate::error::{Error, Result};

/// Default booking key handed to stripe backends
pub const DEFAULT_BOOKING_OPAQUE: &str = "oss.size";

// =============================================================================
// File Options
// =============================================================================

/// Open-time parameters of one file handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOptions {
    /// Erasure scheme identifier
    pub scheme: SchemeKind,

    /// Number of parity stripes (P); D is the stripe count minus P
    pub parity_blocks: usize,

    /// Block size in bytes
    pub block_size: u64,

    /// Write reconstructed blocks back to the stripes they were missing from
    pub store_recovery: bool,

    /// Append-only file: writes must not go below the high-water mark
    pub streaming: bool,

    /// Expected final size
    pub target_size: Option<u64>,

    /// Reject writes past `target_size`
    pub enforce_target_size: bool,

    /// Allocation hint key passed to stripe backends
    pub booking_opaque: String,

    /// Logical file size known to the metadata layer
    pub logical_size: Option<u64>,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            scheme: SchemeKind::ReedSolomon,
            parity_blocks: 2,
            block_size: DEFAULT_BLOCK_SIZE,
            store_recovery: false,
            streaming: false,
            target_size: None,
            enforce_target_size: false,
            booking_opaque: DEFAULT_BOOKING_OPAQUE.to_string(),
            logical_size: None,
        }
    }
}

impl FileOptions {
    /// Scheme configuration for `stripe_count` stripes
    pub fn scheme_config(&self, stripe_count: usize) -> Result<SchemeConfig> {
        if stripe_count <= self.parity_blocks {
            return Err(Error::InvalidLayout(format!(
                "{} stripes cannot hold {} parity stripes and at least one data stripe",
                stripe_count, self.parity_blocks
            )));
        }
        Ok(SchemeConfig {
            kind: self.scheme,
            data_blocks: stripe_count - self.parity_blocks,
            parity_blocks: self.parity_blocks,
        })
    }

    /// Geometry for `stripe_count` stripes
    pub fn geometry(&self, stripe_count: usize) -> Result<StripeGeometry> {
        let scheme = self.scheme_config(stripe_count)?;
        StripeGeometry::new(self.block_size, scheme.data_blocks, scheme.parity_blocks)
    }

    /// Bytes each stripe ends up holding for the target size
    pub fn stripe_target_bytes(&self, stripe_count: usize) -> Option<u64> {
        let geometry = self.geometry(stripe_count).ok()?;
        let target = self.target_size?;
        Some(geometry.groups_for_size(target) * geometry.block_size())
    }
}

// =============================================================================
// Layout Configuration
// =============================================================================

/// Serializable description of a striped file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    #[serde(default)]
    pub scheme: SchemeKind,

    /// Parity stripe count
    pub parity: usize,

    #[serde(default = "default_block_size")]
    pub block_size: u64,

    /// Ordered stripe locations; data stripes first
    pub stripes: Vec<String>,

    #[serde(default)]
    pub store_recovery: bool,

    #[serde(default)]
    pub streaming: bool,

    #[serde(default)]
    pub target_size: Option<u64>,

    #[serde(default)]
    pub enforce_target_size: bool,

    #[serde(default = "default_booking_opaque")]
    pub booking_opaque: String,

    #[serde(default)]
    pub logical_size: Option<u64>,
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

fn default_booking_opaque() -> String {
    DEFAULT_BOOKING_OPAQUE.to_string()
}

impl LayoutConfig {
    /// Load from a YAML file and validate
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Parse YAML text and validate
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: LayoutConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the layout back as YAML.
    ///
    /// The text goes to a sibling temporary file first and is renamed over
    /// `path`, so a crash leaves either the old or the new layout.
    pub fn save_yaml_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_yaml::to_string(self)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Record the logical file size so the next open reports it exactly
    pub fn with_logical_size(self, size: u64) -> Self {
        Self {
            logical_size: Some(size),
            ..self
        }
    }

    /// Reject inconsistent layouts before any stripe is touched
    pub fn validate(&self) -> Result<()> {
        if self.stripes.is_empty() {
            return Err(Error::Config("no stripes configured".to_string()));
        }
        for (i, url) in self.stripes.iter().enumerate() {
            if url.trim().is_empty() {
                return Err(Error::Config(format!("stripe {} has an empty location", i)));
            }
            if self.stripes[..i].contains(url) {
                return Err(Error::Config(format!("stripe location {} is listed twice", url)));
            }
        }
        if self.enforce_target_size && self.target_size.is_none() {
            return Err(Error::Config(
                "enforce_target_size requires target_size".to_string(),
            ));
        }

        let options = self.file_options();
        options.scheme_config(self.stripes.len())?.build()?;
        options.geometry(self.stripes.len())?;
        Ok(())
    }

    /// Open-time options for the façade
    pub fn file_options(&self) -> FileOptions {
        FileOptions {
            scheme: self.scheme,
            parity_blocks: self.parity,
            block_size: self.block_size,
            store_recovery: self.store_recovery,
            streaming: self.streaming,
            target_size: self.target_size,
            enforce_target_size: self.enforce_target_size,
            booking_opaque: self.booking_opaque.clone(),
            logical_size: self.logical_size,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
