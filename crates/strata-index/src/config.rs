//! Index sizing configuration.

use serde::{Deserialize, Serialize};

/// Default maximum index file size (10 MiB).
///
/// At 8 bytes per entry this indexes roughly 1.3M records per segment,
/// far more than a size-capped segment ever accumulates.
const DEFAULT_MAX_INDEX_BYTES: u64 = 10 * 1024 * 1024;

/// Default size of the warm tail preferentially kept in cache (8 KiB).
const DEFAULT_WARM_BYTES: usize = 8 * 1024;

/// Sizing knobs for a segment index.
///
/// The same configuration applies to every index of a log; it is part of
/// the log layer's persisted settings, hence the serde derives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Upper bound on the backing file size in bytes. Pre-allocation
    /// rounds down to the largest whole number of entries.
    pub max_index_bytes: u64,

    /// Size of the index tail the two-tier search touches first, keeping
    /// the steady-state fetch path within a few cached pages.
    pub warm_bytes: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_index_bytes: DEFAULT_MAX_INDEX_BYTES,
            warm_bytes: DEFAULT_WARM_BYTES,
        }
    }
}

impl IndexConfig {
    /// Returns a config with a custom maximum index size.
    pub fn with_max_index_bytes(max_index_bytes: u64) -> Self {
        Self {
            max_index_bytes,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = IndexConfig::default();
        assert_eq!(config.max_index_bytes, 10 * 1024 * 1024);
        assert_eq!(config.warm_bytes, 8 * 1024);
    }

    #[test]
    fn with_max_index_bytes_keeps_other_defaults() {
        let config = IndexConfig::with_max_index_bytes(1024);
        assert_eq!(config.max_index_bytes, 1024);
        assert_eq!(config.warm_bytes, 8 * 1024);
    }
}
