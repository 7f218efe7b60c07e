use serde::{Deserialize, Serialize};

use crate::error::{MetaError, MetaResult};

/// How a sequence grows its backing storage when it runs out of room.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Growth {
    /// Double the capacity (or jump straight to the requested size).
    #[default]
    Doubling,
    /// Add a fixed number of slots. Zero is rejected.
    Fixed(usize),
}

impl Growth {
    pub fn validate(self) -> MetaResult<Self> {
        match self {
            Growth::Fixed(0) => Err(MetaError::InvalidArgument(
                "fixed growth increment must be positive".into(),
            )),
            other => Ok(other),
        }
    }

    /// Capacity to allocate when `current` slots cannot hold `required`.
    pub(crate) fn next_capacity(self, current: usize, required: usize) -> usize {
        let grown = match self {
            Growth::Doubling => current.saturating_mul(2),
            Growth::Fixed(step) => current.saturating_add(step),
        };
        grown.max(required)
    }
}

/// Construction-time settings for stores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Whether keyed stores run registered procedures on lookup.
    pub allow_lazy: bool,
    /// Growth policy for sequences.
    pub growth: Growth,
    /// Initial backing capacity for sequences.
    pub initial_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            allow_lazy: true,
            growth: Growth::Doubling,
            initial_capacity: 10,
        }
    }
}

impl StoreConfig {
    /// Parse a config from TOML text. Missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> MetaResult<Self> {
        let config: StoreConfig =
            toml::from_str(text).map_err(|e| MetaError::Config(e.to_string()))?;
        config.growth.validate()?;
        Ok(config)
    }
}

/// Per-call lookup options.
///
/// New call sites pass these explicitly instead of relying on a store's
/// instance-level `allow_lazy` flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LookupOptions {
    pub allow_lazy: bool,
}

impl LookupOptions {
    pub const fn lazy() -> Self {
        Self { allow_lazy: true }
    }

    pub const fn no_lazy() -> Self {
        Self { allow_lazy: false }
    }
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self::lazy()
    }
}
