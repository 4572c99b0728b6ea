//! # Tile Cache Core
//!
//! An in-process cache for tiled-image payloads, shared across every tile
//! that refers to the same underlying cache key.
//!
//! A record outlives the last tile referring to it (a "zombie") so that a
//! tile coming back on-screen a moment later can reuse its payload instead
//! of re-fetching it, while format conversion happens in place and is
//! serialized per record so a reader never observes a half-converted
//! payload.
//!
//! ## Architecture
//!
//! - [`tile::contracts`] - the external contracts this crate calls back
//!   into (`Tile`, `TiledImage`, `Viewer`) without ever owning them
//! - [`tile::registry`] - the `ConversionRegistry` contract a host
//!   application implements to teach the cache its concrete payload formats
//! - [`tile::record`] - `CacheRecord`, one payload plus its in-flight
//!   conversion state
//! - [`tile::cache`] - `TileCache`, the live/zombie tier map and eviction
//!   policy
//! - [`config`] - cache capacity and eviction configuration
//! - [`error`] - error types surfaced across the public API
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tile_cache_core::{CacheConfig, CacheTileRequest, TileCache};
//! # use tile_cache_core::tile::ConversionRegistry;
//! # async fn run<R: ConversionRegistry>(registry: Arc<R>, tile: Arc<dyn tile_cache_core::Tile>) {
//! let config = CacheConfig::default();
//! let cache = TileCache::with_config(registry, config);
//!
//! let request = CacheTileRequest::new(tile)
//!     .with_data(bytes::Bytes::from_static(b"..."), "raw");
//! cache.cache_tile(request).await.expect("cache_tile");
//! # }
//! ```

pub mod config;
pub mod error;
pub mod tile;

pub use config::CacheConfig;
pub use error::CacheError;
pub use tile::{
    CacheRecord, CacheStats, CacheTileRequest, ConversionEdge, ConversionRegistry, Tile,
    TileCache, TiledImage, TileUnloadedEvent, TransformFuture, Viewer,
};

/// Install a `tracing-subscriber` `fmt` layer filtered by `RUST_LOG`
/// (falling back to `tile_cache_core=debug` when unset).
///
/// This crate has no binary entry point of its own, so nothing calls this
/// automatically — it exists for tests and small example binaries that
/// embed the crate and want readable output without wiring up their own
/// subscriber. A host application that already installs one of its own
/// should not call this. Safe to call more than once; later calls are a
/// no-op.
pub fn init_tracing_for_tests() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tile_cache_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
