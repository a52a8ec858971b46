//! Runtime configuration for unification and bulk loading.
//!
//! Both structs deserialize from YAML with every field optional; CLI flags
//! override whatever the file sets.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Controls how discovered alleles collapse into unified sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnifierConfig {
    /// Alternate alleles whose best quality score is below this are dropped.
    pub min_quality: u32,
    /// Canonical alternates below this cohort frequency are dropped.
    pub min_frequency: f64,
    /// Maximum number of alternate alleles per site; extras are dropped.
    pub max_alt_alleles: usize,
    /// Drop alternates whose every observation was filtered.
    pub drop_filtered: bool,
    /// Emit sites that end up with only the reference allele.
    pub keep_monoallelic: bool,
}

impl Default for UnifierConfig {
    fn default() -> Self {
        Self {
            min_quality: 0,
            min_frequency: 0.0,
            max_alt_alleles: 32,
            drop_filtered: true,
            keep_monoallelic: false,
        }
    }
}

/// Controls the bulk loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Number of sources ingested concurrently.
    pub threads: usize,
    /// Skip malformed records instead of rejecting their source.
    pub skip_malformed: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            skip_malformed: false,
        }
    }
}

/// Load and deserialize a YAML file.
///
/// Fails on an empty path, an unreadable file, an empty document, or YAML
/// that does not match `T`.
pub fn load_yaml_file<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(Error::InvalidInput("Empty YAML file name".to_string()));
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Err(Error::InvalidInput(format!(
            "YAML file {} is empty",
            path.display()
        )));
    }
    Ok(serde_yaml::from_str(&content)?)
}
