use thiserror::Error;

/// Errors the tile cache core can encounter.
///
/// None of these cross the public API as a hard failure for anything but
/// [`CacheError::ContractMisuse`] on the handful of calls that genuinely
/// cannot proceed without it (see `cache_tile`). The other three classes are
/// logged via `tracing` and surfaced as `None`/`false`/unchanged state
/// instead of propagated.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Caller passed missing or invalid arguments: no data when creating a
    /// fresh record, an empty cache key, etc.
    #[error("contract misuse: {0}")]
    ContractMisuse(String),

    /// An operation observed state that should be impossible if callers are
    /// holding up their end of the tile/cache contract: removing a tile that
    /// was never added, looking up a cache key that isn't live.
    #[error("cache inconsistency: {0}")]
    Inconsistency(String),

    /// The conversion registry reported no path between two formats.
    #[error("no conversion path from {from} to {to}")]
    UnreachableType { from: String, to: String },

    /// An edge in a conversion path resolved to a falsy/absent value
    /// mid-chain; the record was rolled back to its original payload.
    #[error("conversion from {from} to {to} failed at edge {edge_index}")]
    MidConversionFailure {
        from: String,
        to: String,
        edge_index: usize,
    },
}
