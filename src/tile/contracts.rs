//! External collaborator contracts.
//!
//! The tile cache core never owns a viewer, a tiled image, or the tiles
//! themselves — it only ever calls back into them through these traits. This
//! mirrors how `io/range_reader.rs`'s `RangeReader` is consumed by
//! `BlockCache` without `BlockCache` knowing whether bytes come from S3, a
//! local file, or a mock: the cache core is equally agnostic about what a
//! "tile" or a "viewer" actually is.

use std::sync::Arc;

/// A region of a tiled image at a specific pyramid level.
///
/// Tiles are compared by identity (`Arc::ptr_eq`), never by value — two
/// tiles can legitimately share every field and still be distinct cache
/// references.
pub trait Tile: Send + Sync {
    /// The tile's primary cache key (used when `cache_tile` isn't given an
    /// explicit key override).
    fn cache_key(&self) -> &str;

    /// All cache keys this tile currently contributes payload size under.
    /// A tile typically has one entry here, but can reference auxiliary
    /// keys (e.g. a lower-resolution placeholder sharing an ancestor's
    /// payload).
    fn caches(&self) -> Vec<Arc<str>>;

    /// Pyramid level; higher means more detailed.
    fn level(&self) -> u32;

    /// Whether this tile is on-screen and actively being rendered this
    /// frame. Tiles being drawn are never chosen as eviction victims.
    fn being_drawn(&self) -> bool;

    /// Monotonic recency marker used to break eviction ties; lower means
    /// "touched longer ago".
    fn last_touch_time(&self) -> i64;

    /// Number of cache rows this tile has previously been recorded under.
    /// Zero means this is the tile's first `cache_tile` call.
    fn cache_size(&self) -> usize;

    /// Whether the tile has finished loading (used by `clear_tiles_for` to
    /// distinguish tiles that can be spliced out directly from ones that
    /// must go through the full unload path).
    fn loaded(&self) -> bool;

    /// The tiled image that owns this tile.
    fn tiled_image(&self) -> Arc<dyn TiledImage>;

    /// Release any resources the tile itself holds. Called once the cache
    /// has fully detached the tile from every cache key it referenced.
    fn unload(&self);
}

/// The tiled-image abstraction: owner of a set of tiles and a redraw flag.
pub trait TiledImage: Send + Sync {
    /// Mark the tiled image as needing a redraw on the next frame.
    fn set_needs_draw(&self, value: bool);

    /// Whether this tiled image opts into zombie retention: if `false`,
    /// `clear_tiles_for` destroys tiles outright instead of letting their
    /// records become zombies.
    fn zombie_cache_enabled(&self) -> bool;

    /// The viewer this tiled image is attached to, for event raising.
    fn viewer(&self) -> Arc<dyn Viewer>;
}

/// Minimal viewer contract: event emission only.
pub trait Viewer: Send + Sync {
    fn raise_event(&self, event: TileUnloadedEvent);
}

/// Payload of the `tile-unloaded` event raised on the viewer.
#[derive(Clone)]
pub struct TileUnloadedEvent {
    pub tile: Arc<dyn Tile>,
    pub tiled_image: Arc<dyn TiledImage>,
    pub destroyed: bool,
}
