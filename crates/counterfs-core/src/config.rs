// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration for a counterfs session

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};
use crate::fault::FaultPolicy;

/// Default size of the per-operation scratch buffer, in bytes.
pub const DEFAULT_SCRATCH_CAPACITY: usize = 80;

/// `"-2147483648\n"` plus a terminator.
pub const MIN_SCRATCH_CAPACITY: usize = 13;

/// Which counter a file created through `create` is bound to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CounterScope {
    /// Every created file owns a private counter starting at 0.
    #[default]
    PerFile,
    /// All created files share one session-wide counter, reset to 0 on every create.
    Shared,
}

/// How `lookup` treats names that exist in the parent directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LookupPolicy {
    /// Search the parent's child map.
    #[default]
    Resolve,
    /// Report every name as missing, even ones that were inserted.
    AlwaysMiss,
}

/// Session configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FsConfig {
    /// Capacity of the scratch buffer used to format reads and bound writes.
    pub scratch_capacity: usize,
    pub counter_scope: CounterScope,
    pub lookup: LookupPolicy,
    pub fault: FaultPolicy,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
            counter_scope: CounterScope::default(),
            lookup: LookupPolicy::default(),
            fault: FaultPolicy::default(),
        }
    }
}

impl FsConfig {
    /// Legacy behaviour: created files share one counter and lookups never
    /// match.
    pub fn legacy_compatible() -> Self {
        Self {
            counter_scope: CounterScope::Shared,
            lookup: LookupPolicy::AlwaysMiss,
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> FsResult<Self> {
        let config: FsConfig =
            toml::from_str(text).map_err(|e| FsError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> FsResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FsError::InvalidConfig(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> FsResult<()> {
        if self.scratch_capacity < MIN_SCRATCH_CAPACITY {
            return Err(FsError::InvalidConfig(format!(
                "scratch-capacity must be at least {MIN_SCRATCH_CAPACITY}, got {}",
                self.scratch_capacity
            )));
        }
        Ok(())
    }
}
