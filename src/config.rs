//! Configuration for the tile cache core.
//!
//! This module provides a small `clap`-derived configuration struct so a
//! host application can parse cache settings the same way it parses its own
//! CLI/environment configuration. The core itself has no command-line entry
//! point (it is a library), but `CacheConfig` follows the same
//! flag-plus-env-var shape the rest of this codebase's configuration types
//! use.
//!
//! # Environment Variables
//!
//! - `TILECACHE_MAX_IMAGE_CACHE_COUNT` - steady-state capacity target (default: 1024)
//! - `TILECACHE_DEFAULT_CUTOFF` - default per-call eviction cutoff level (default: 0)

use clap::Parser;

/// Default steady-state capacity: total live + zombie records the cache
/// tries to keep at or below.
pub const DEFAULT_MAX_IMAGE_CACHE_COUNT: usize = 1024;

/// Default cutoff level: tiles at or below this level are never evicted
/// unless the caller overrides it per `cache_tile` call.
pub const DEFAULT_CUTOFF: u32 = 0;

/// Configuration for a [`crate::tile::TileCache`].
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-cache-core")]
#[command(author, version, about, long_about = None)]
pub struct CacheConfig {
    /// Steady-state capacity target: once `live + zombies` exceeds this,
    /// insertion triggers an eviction pass (zombie-preferred, then
    /// LRU-with-level-tiebreak among live tiles).
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_IMAGE_CACHE_COUNT,
        env = "TILECACHE_MAX_IMAGE_CACHE_COUNT"
    )]
    pub max_image_cache_count: usize,

    /// Default cutoff level used by `cache_tile` when the caller does not
    /// supply one: tiles at or below this level are never evicted.
    #[arg(long, default_value_t = DEFAULT_CUTOFF, env = "TILECACHE_DEFAULT_CUTOFF")]
    pub default_cutoff: u32,
}

impl CacheConfig {
    /// Validate the configuration, returning an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_image_cache_count == 0 {
            return Err("max_image_cache_count must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_image_cache_count: DEFAULT_MAX_IMAGE_CACHE_COUNT,
            default_cutoff: DEFAULT_CUTOFF,
        }
    }
}
