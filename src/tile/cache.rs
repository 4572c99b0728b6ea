//! `TileCache`: the top-level cache keyed by opaque cache keys, holding
//! `CacheRecord`s in one of two tiers (live, zombie) plus the load-order
//! list used for eviction.
//!
//! The tier split and the lock it sits behind follow the same shape
//! `io/block_cache.rs` uses for its block table: one `tokio::sync::Mutex`
//! guarding the collections (never held across a conversion, only across
//! the bookkeeping moves in and out of `live`/`zombies`), with the actual
//! payload work delegated to each `CacheRecord`'s own locks.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, trace, warn};

use crate::config::CacheConfig;
use crate::error::CacheError;

use super::contracts::{Tile, TiledImage, TileUnloadedEvent};
use super::record::CacheRecord;
use super::registry::ConversionRegistry;

/// One `cache_tile` call's worth of arguments.
pub struct CacheTileRequest {
    pub tile: Arc<dyn Tile>,
    /// Explicit cache key override; defaults to `tile.cache_key()`.
    pub key: Option<Arc<str>>,
    /// Initial payload, required only when no record exists yet for the
    /// resolved key.
    pub data: Option<Bytes>,
    pub data_type: Option<Arc<str>>,
    /// Eviction cutoff for this call: tiles at or below this level are
    /// never evicted to make room for it. Defaults to the cache's
    /// configured `default_cutoff`.
    pub cutoff: Option<u32>,
}

impl CacheTileRequest {
    pub fn new(tile: Arc<dyn Tile>) -> Self {
        Self {
            tile,
            key: None,
            data: None,
            data_type: None,
            cutoff: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_data(mut self, data: Bytes, data_type: impl Into<Arc<str>>) -> Self {
        self.data = Some(data);
        self.data_type = Some(data_type.into());
        self
    }

    pub fn with_cutoff(mut self, cutoff: u32) -> Self {
        self.cutoff = Some(cutoff);
        self
    }
}

/// Point-in-time counts, exposed for diagnostics/logging. Not a metrics
/// pipeline — just the same kind of snapshot `io/block_cache.rs` exposes
/// for its occupancy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub live_records: usize,
    pub zombie_records: usize,
    pub tiles_loaded: usize,
}

struct LoadedEntry<R: ConversionRegistry> {
    key: Arc<str>,
    record: Arc<CacheRecord<R>>,
    tile: Arc<dyn Tile>,
}

struct TileCacheInner<R: ConversionRegistry> {
    live: HashMap<Arc<str>, Arc<CacheRecord<R>>>,
    zombies: HashMap<Arc<str>, Arc<CacheRecord<R>>>,
    /// Load order; a single tile may appear more than once if it
    /// contributes payload size under more than one cache key.
    tiles_loaded: Vec<LoadedEntry<R>>,
}

impl<R: ConversionRegistry> TileCacheInner<R> {
    fn new() -> Self {
        Self {
            live: HashMap::new(),
            zombies: HashMap::new(),
            tiles_loaded: Vec::new(),
        }
    }

    fn total(&self) -> usize {
        self.live.len() + self.zombies.len()
    }
}

/// The tile cache itself. Generic over the conversion registry, shared
/// through one `Arc<R>` across every record it creates.
pub struct TileCache<R: ConversionRegistry> {
    config: CacheConfig,
    registry: Arc<R>,
    inner: AsyncMutex<TileCacheInner<R>>,
}

impl<R: ConversionRegistry> TileCache<R> {
    pub fn new(registry: Arc<R>) -> Self {
        Self::with_config(registry, CacheConfig::default())
    }

    pub fn with_config(registry: Arc<R>, config: CacheConfig) -> Self {
        Self {
            config,
            registry,
            inner: AsyncMutex::new(TileCacheInner::new()),
        }
    }

    /// Cache a tile's payload under its resolved key, creating a fresh
    /// record or reattaching to an existing live or zombie one (zombies are
    /// promoted back to `live` without losing their retained payload). Every
    /// call attempts an eviction pass while the cache sits over capacity,
    /// not only calls that create a new record — a prior insertion can leave
    /// the cache over capacity when no victim was admissible yet, and later
    /// calls are what restore the bound.
    pub async fn cache_tile(&self, request: CacheTileRequest) -> Result<(), CacheError> {
        let key = request
            .key
            .clone()
            .unwrap_or_else(|| request.tile.cache_key().into());
        if key.is_empty() {
            return Err(CacheError::ContractMisuse(
                "cache_tile called with an empty key".into(),
            ));
        }

        let mut inner = self.inner.lock().await;

        let record = if let Some(record) = inner.live.get(&key).cloned() {
            record
        } else if let Some(record) = inner.zombies.remove(&key) {
            inner.live.insert(key.clone(), record.clone());
            record
        } else {
            if request.data.is_none() {
                return Err(CacheError::ContractMisuse(format!(
                    "cache_tile called for unseen key {key} without data"
                )));
            }
            let record = Arc::new(CacheRecord::new(self.registry.clone()));
            inner.live.insert(key.clone(), record.clone());
            record
        };

        let cutoff = request.cutoff.unwrap_or(self.config.default_cutoff);
        let freed_slot = if inner.total() > self.config.max_image_cache_count {
            self.evict_one(&mut inner, cutoff).await
        } else {
            None
        };

        let data_type = match (&request.data, &request.data_type) {
            (Some(data), None) => {
                let guessed = self.registry.guess_type(data);
                warn!(key = %key, format = %guessed, "data_type missing; guessed from payload");
                Some(guessed)
            }
            (_, data_type) => data_type.clone(),
        };

        record.add_tile(request.tile.clone(), request.data, data_type);
        if key.as_ref() == request.tile.cache_key() {
            request.tile.tiled_image().set_needs_draw(true);
        }

        // A tile with no prior cache rows (`cache_size() == 0`) gets a fresh
        // `tiles_loaded` entry, reusing the slot eviction just freed instead
        // of growing the vector. A tile that already has a row is already
        // tracked there — pushing another would grow `tiles_loaded` without
        // bound across repeated `cache_tile` calls for the same tile, so
        // nothing is appended; any slot eviction freed for this call was
        // already compacted away by `unload_tile`'s removal from
        // `tiles_loaded`.
        if request.tile.cache_size() == 0 {
            let entry = LoadedEntry {
                key,
                record,
                tile: request.tile,
            };
            match freed_slot {
                Some(idx) => inner.tiles_loaded.insert(idx.min(inner.tiles_loaded.len()), entry),
                None => inner.tiles_loaded.push(entry),
            }
        }
        Ok(())
    }

    /// Decouple one tile from one cache key. `destroy` decides what happens
    /// to a record that drops to zero referring tiles: `true` destroys it
    /// outright, `false` demotes it to a zombie. Returns `false` (logged,
    /// never an `Err`) if the key has no live record or the tile wasn't
    /// actually attached to it — both are `CacheError::Inconsistency`-class
    /// conditions that never cross the public API as a hard failure.
    pub async fn unload_cache_for_tile(&self, tile: &Arc<dyn Tile>, key: &str, destroy: bool) -> bool {
        let mut inner = self.inner.lock().await;
        self.detach_one_key(&mut inner, tile, key, destroy).await
    }

    async fn detach_one_key(
        &self,
        inner: &mut TileCacheInner<R>,
        tile: &Arc<dyn Tile>,
        key: &str,
        destroy: bool,
    ) -> bool {
        let Some(record) = inner.live.get(key).cloned() else {
            let err = CacheError::Inconsistency(format!("no live record for key {key}"));
            warn!("{err}");
            return false;
        };
        if !record.remove_tile(tile) {
            let err = CacheError::Inconsistency(format!("tile not attached to record for key {key}"));
            error!("{err}");
            return false;
        }
        if record.tile_count() == 0 {
            inner.live.remove(key);
            if destroy {
                record.destroy().await;
                debug!(key = %key, "record destroyed");
            } else {
                inner.zombies.insert(key.into(), record);
                trace!(key = %key, "record demoted to zombie");
            }
        }
        true
    }

    /// Fully detach `tile` from every cache key it currently references
    /// (`tile.caches()`), unload it, and raise the `tile-unloaded` event on
    /// its viewer with `destroyed = destroy`.
    pub async fn unload_tile(&self, tile: &Arc<dyn Tile>, destroy: bool) {
        let mut inner = self.inner.lock().await;
        self.unload_tile_locked(&mut inner, tile, destroy).await;
    }

    async fn unload_tile_locked(&self, inner: &mut TileCacheInner<R>, tile: &Arc<dyn Tile>, destroy: bool) {
        for key in tile.caches() {
            self.detach_one_key(inner, tile, &key, destroy).await;
        }
        inner.tiles_loaded.retain(|e| !Arc::ptr_eq(&e.tile, tile));
        tile.unload();
        tile.tiled_image().viewer().raise_event(TileUnloadedEvent {
            tile: tile.clone(),
            tiled_image: tile.tiled_image(),
            destroyed: destroy,
        });
    }

    /// Bulk removal for one tiled-image. If it opts out of zombie retention
    /// and the cache is currently over capacity, every existing zombie is
    /// destroyed first (freeing room before this image's own tiles are
    /// evaluated) and each of the image's own tiles is destroyed rather than
    /// zombied; otherwise they're zombied as usual. Tiles that haven't
    /// finished loading are spliced out of `tiles_loaded` directly, with no
    /// detach/event bookkeeping.
    pub async fn clear_tiles_for(&self, tiled_image: &Arc<dyn TiledImage>) {
        let mut inner = self.inner.lock().await;
        let mut overflow = inner.total() > self.config.max_image_cache_count;

        if !tiled_image.zombie_cache_enabled() && overflow {
            let keys: Vec<Arc<str>> = inner.zombies.keys().cloned().collect();
            for key in keys {
                if let Some(record) = inner.zombies.remove(&key) {
                    record.destroy().await;
                }
            }
            overflow = inner.total() > self.config.max_image_cache_count;
        }

        let destroy = !tiled_image.zombie_cache_enabled() || overflow;

        let entries: Vec<Arc<dyn Tile>> = inner
            .tiles_loaded
            .iter()
            .filter(|e| Arc::ptr_eq(&e.tile.tiled_image(), tiled_image))
            .map(|e| e.tile.clone())
            .collect();

        let mut seen = std::collections::HashSet::new();
        for tile in entries {
            let ptr = Arc::as_ptr(&tile) as *const ();
            if !seen.insert(ptr) {
                continue;
            }
            if !tile.loaded() {
                inner.tiles_loaded.retain(|e| !Arc::ptr_eq(&e.tile, &tile));
                continue;
            }
            self.unload_tile_locked(&mut inner, &tile, destroy).await;
        }
    }

    /// Look up the live or zombie record for `key`, if any.
    pub async fn get_cache_record(&self, key: &str) -> Option<Arc<CacheRecord<R>>> {
        let inner = self.inner.lock().await;
        inner
            .live
            .get(key)
            .or_else(|| inner.zombies.get(key))
            .cloned()
    }

    pub async fn num_tiles_loaded(&self) -> usize {
        self.inner.lock().await.tiles_loaded.len()
    }

    pub async fn num_caches_loaded(&self) -> usize {
        self.inner.lock().await.total()
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            live_records: inner.live.len(),
            zombie_records: inner.zombies.len(),
            tiles_loaded: inner.tiles_loaded.len(),
        }
    }

    /// Evict one record to make room for an insertion. Zombies are
    /// preferred victims (arbitrary pick among them, since none has tiles
    /// to disturb); failing that, find the oldest-touched, deepest-level
    /// live tile not at/below `cutoff` and not currently being drawn, and
    /// run it through the full `unload_tile(destroy = true)` path. Returns
    /// the `tiles_loaded` index the victim occupied before removal, if the
    /// victim came from the live scan, so the caller can reuse that slot
    /// instead of growing the vector.
    async fn evict_one(&self, inner: &mut TileCacheInner<R>, cutoff: u32) -> Option<usize> {
        if let Some(key) = inner.zombies.keys().next().cloned() {
            if let Some(record) = inner.zombies.remove(&key) {
                trace!(key = %key, "evicted zombie record");
                record.destroy().await;
            }
            return None;
        }

        let victim = inner
            .tiles_loaded
            .iter()
            .enumerate()
            .filter(|(_, e)| e.tile.level() > cutoff && !e.tile.being_drawn())
            .min_by(|(_, a), (_, b)| {
                a.tile
                    .last_touch_time()
                    .cmp(&b.tile.last_touch_time())
                    .then_with(|| b.tile.level().cmp(&a.tile.level()))
            })
            .map(|(idx, e)| (idx, e.tile.clone()));

        let Some((idx, victim)) = victim else {
            warn!(cutoff, "no eviction victim available; cache over capacity");
            return None;
        };

        trace!(level = victim.level(), "evicting live tile");
        self.unload_tile_locked(inner, &victim, true).await;
        Some(idx)
    }
}
