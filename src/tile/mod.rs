//! Tile payload caching: contracts, conversion registry, per-payload
//! records, and the top-level cache.

pub mod cache;
pub mod contracts;
pub mod record;
pub mod registry;

pub use cache::{CacheStats, CacheTileRequest, TileCache};
pub use contracts::{Tile, TiledImage, TileUnloadedEvent, Viewer};
pub use record::CacheRecord;
pub use registry::{ConversionEdge, ConversionRegistry, TransformFuture};
