//! `CacheRecord`: one cached payload and its outstanding conversion work.
//!
//! The concurrency split here descends directly from `io/block_cache.rs`'s
//! singleflight pattern (`Mutex` + `Notify` coordinating concurrent fetches
//! of the same block). Here the thing being coordinated is format
//! conversion rather than a fetch, and there are two locks instead of one:
//!
//! - the **fast lock** (`std::sync::Mutex<RecordState>`) guards the plain
//!   bookkeeping fields and is never held across an `.await`, so
//!   `tile_count`/`format`/`is_loaded` stay truly synchronous;
//! - the **op lock** (`tokio::sync::Mutex<()>`) is acquired for the whole
//!   duration of `set_data_as`/`transform_to`/the internal conversion
//!   helper, including every `.await` inside them. Tokio's mutex releases
//!   waiters in arrival order, which gives pending conversions and
//!   overwrites the same FIFO ordering a dedicated work queue would, without
//!   needing a separate `VecDeque` alongside it.
//!
//! `destroy()` intentionally touches only the fast lock. That is what lets
//! it cancel an in-flight conversion (by flipping `destroyed`, which the
//! conversion polls through the fast lock between edges) without itself
//! blocking on the op lock the conversion holds.

use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, warn};

use crate::error::CacheError;

use super::contracts::Tile;
use super::registry::ConversionRegistry;

/// Plain, never-suspending fields of a [`CacheRecord`].
struct RecordState {
    payload: Option<Bytes>,
    format: Option<Arc<str>>,
    loaded: bool,
    destroyed: bool,
    tiles: Vec<Arc<dyn Tile>>,
}

impl RecordState {
    fn fresh() -> Self {
        Self {
            payload: None,
            format: None,
            loaded: false,
            destroyed: false,
            tiles: Vec::new(),
        }
    }
}

/// Holds one cached payload in one current format, coordinates asynchronous
/// format conversion, and tracks the tiles currently referring to it.
///
/// Generic over the conversion registry so a `TileCache` (and every record
/// it owns) shares one registry instance without dynamic dispatch on the
/// hot path — the same shape `BlockCache<R: RangeReader>` uses for its
/// reader.
pub struct CacheRecord<R: ConversionRegistry> {
    registry: Arc<R>,
    state: StdMutex<RecordState>,
    op_lock: AsyncMutex<()>,
    ready: Notify,
}

impl<R: ConversionRegistry> CacheRecord<R> {
    /// Create a fresh, empty record.
    pub fn new(registry: Arc<R>) -> Self {
        Self {
            registry,
            state: StdMutex::new(RecordState::fresh()),
            op_lock: AsyncMutex::new(()),
            ready: Notify::new(),
        }
    }

    /// Reset a fresh or destroyed record to empty state. Must not be called
    /// on a currently loaded record — callers destroy first.
    pub fn revive(&self) {
        let mut st = self.state.lock().unwrap();
        debug_assert!(!st.loaded, "revive() called on a loaded record");
        st.tiles.clear();
        st.payload = None;
        st.format = None;
        st.loaded = false;
        st.destroyed = false;
    }

    /// Attach `tile` to this record, adopting `(data, format)` as the
    /// initial payload if the record has no payload yet. If the record
    /// already holds a payload, `data`/`format` are ignored and the tile
    /// silently inherits the existing format — cache keys are assumed
    /// content-equivalent.
    ///
    /// If `tile` is already attached, it is detached and reattached rather
    /// than left in place; net effect on `tile_count` and payload is the
    /// same either way.
    pub fn add_tile(&self, tile: Arc<dyn Tile>, data: Option<Bytes>, format: Option<Arc<str>>) {
        let mut st = self.state.lock().unwrap();
        if st.destroyed {
            return;
        }
        if let Some(pos) = st.tiles.iter().position(|t| Arc::ptr_eq(t, &tile)) {
            st.tiles.remove(pos);
        }
        let mut just_loaded = false;
        if !st.loaded {
            if let (Some(data), Some(format)) = (data, format) {
                st.payload = Some(data);
                st.format = Some(format);
                st.loaded = true;
                just_loaded = true;
            }
        }
        st.tiles.push(tile);
        drop(st);
        if just_loaded {
            self.ready.notify_waiters();
        }
    }

    /// Remove `tile` from the referring set. Returns `true` iff it was
    /// present.
    pub fn remove_tile(&self, tile: &Arc<dyn Tile>) -> bool {
        let mut st = self.state.lock().unwrap();
        if st.destroyed {
            return false;
        }
        match st.tiles.iter().position(|t| Arc::ptr_eq(t, tile)) {
            Some(pos) => {
                st.tiles.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Number of tiles currently referring to this record, or 0 if
    /// destroyed.
    pub fn tile_count(&self) -> usize {
        let st = self.state.lock().unwrap();
        if st.destroyed {
            0
        } else {
            st.tiles.len()
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().unwrap().destroyed
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().unwrap().loaded
    }

    pub fn format(&self) -> Option<Arc<str>> {
        self.state.lock().unwrap().format.clone()
    }

    /// Read-only access returning a future. `copy = true` returns a deep
    /// copy via the registry; `copy = false` shares the current payload's
    /// cheap reference-counted clone (never the exact same backing buffer
    /// a caller could mutate through, since `Bytes` is itself immutable).
    pub async fn get_data_as(&self, requested: Option<Arc<str>>, copy: bool) -> Option<Bytes> {
        // Fast path: already loaded in the requested format.
        {
            let st = self.state.lock().unwrap();
            if st.destroyed {
                return None;
            }
            if st.loaded {
                let matches = requested
                    .as_ref()
                    .map(|t| Some(t) == st.format.as_ref())
                    .unwrap_or(true);
                if matches {
                    let payload = st.payload.clone().unwrap();
                    let format = st.format.clone().unwrap();
                    drop(st);
                    return Some(if copy {
                        self.registry.copy(&payload, &format).await
                    } else {
                        payload
                    });
                }
            }
        }

        // Slow path: await whatever load/conversion is in flight, then
        // convert or copy as requested.
        let (payload, format) = self.await_ready().await?;
        match requested {
            Some(target) if target.as_ref() != format.as_ref() => {
                self.registry.convert(payload, &format, &target).await
            }
            _ if copy => Some(self.registry.copy(&payload, &format).await),
            _ => Some(payload),
        }
    }

    /// Overwrite the payload. Returns the previous payload, or `None` if
    /// the record was destroyed (the incoming `data` is released via the
    /// registry instead of stored).
    pub async fn set_data_as(&self, data: Bytes, format: Arc<str>) -> Option<Bytes> {
        let _op = self.op_lock.lock().await;
        self.overwrite_data(data, format).await
    }

    async fn overwrite_data(&self, data: Bytes, format: Arc<str>) -> Option<Bytes> {
        let (destroyed, loaded) = {
            let st = self.state.lock().unwrap();
            (st.destroyed, st.loaded)
        };
        if destroyed {
            self.registry.destroy(data, &format).await;
            return None;
        }
        if loaded {
            let (old_payload, old_format) = {
                let mut st = self.state.lock().unwrap();
                let old_payload = st.payload.replace(data.clone()).unwrap();
                let old_format = st.format.replace(format.clone()).unwrap();
                (old_payload, old_format)
            };
            self.registry.destroy(old_payload.clone(), &old_format).await;
            self.ready.notify_waiters();
            self.fire_needs_draw();
            return Some(old_payload);
        }

        // Not loaded: a load or conversion is in flight. Await it, then
        // overwrite with what it resolved to.
        let Some((old_payload, old_format)) = self.await_ready().await else {
            // Destroyed while we were waiting; release our own payload too.
            self.registry.destroy(data, &format).await;
            return None;
        };
        if self.state.lock().unwrap().destroyed {
            self.registry.destroy(old_payload, &old_format).await;
            self.registry.destroy(data, &format).await;
            return None;
        }
        {
            let mut st = self.state.lock().unwrap();
            st.payload = Some(data.clone());
            st.format = Some(format.clone());
            st.loaded = true;
        }
        self.registry.destroy(old_payload.clone(), &old_format).await;
        self.ready.notify_waiters();
        self.fire_needs_draw();
        Some(old_payload)
    }

    /// In-place conversion to `target`. If already loaded in `target`,
    /// returns the current payload immediately with no registry call.
    pub async fn transform_to(&self, target: Arc<str>) -> Option<Bytes> {
        {
            let st = self.state.lock().unwrap();
            if st.destroyed {
                return None;
            }
            if st.loaded && st.format.as_deref() == Some(target.as_ref()) {
                return st.payload.clone();
            }
        }

        let _op = self.op_lock.lock().await;

        let (loaded, current_format, destroyed) = {
            let st = self.state.lock().unwrap();
            (st.loaded, st.format.clone(), st.destroyed)
        };
        if destroyed {
            return None;
        }
        if loaded && current_format.as_deref() == Some(target.as_ref()) {
            return self.state.lock().unwrap().payload.clone();
        }
        if loaded {
            let payload = self.state.lock().unwrap().payload.clone().unwrap();
            let from = current_format.unwrap();
            return self.run_convert(from, target, payload).await;
        }

        // Not yet loaded: still funnel through the await-ready path rather
        // than short-circuiting, even though the format check above looks
        // like it could skip straight to a no-op once the load resolves.
        let (payload, format) = self.await_ready().await?;
        if format.as_ref() != target.as_ref() {
            self.run_convert(format, target, payload).await
        } else {
            Some(payload)
        }
    }

    /// Runs the registry's conversion path from `from` to `to`, destroying
    /// each intermediate as soon as the next edge has consumed it. Assumes
    /// the op lock is already held by the caller.
    async fn run_convert(&self, from: Arc<str>, to: Arc<str>, original: Bytes) -> Option<Bytes> {
        let path = self.registry.conversion_path(&from, &to);
        if path.is_empty() {
            let err = CacheError::UnreachableType {
                from: from.to_string(),
                to: to.to_string(),
            };
            warn!("{err}");
            return Some(original);
        }

        {
            let mut st = self.state.lock().unwrap();
            st.loaded = false;
            st.payload = None;
            st.format = Some(to.clone());
        }

        let mut current = original.clone();
        let mut current_format = from.clone();

        for (idx, edge) in path.iter().enumerate() {
            let next = (edge.transform)(current.clone()).await;
            match next {
                None => {
                    let err = CacheError::MidConversionFailure {
                        from: from.to_string(),
                        to: to.to_string(),
                        edge_index: idx,
                    };
                    warn!("{err}; rolling back");
                    let mut st = self.state.lock().unwrap();
                    if !st.destroyed {
                        st.payload = Some(original.clone());
                        st.format = Some(from.clone());
                        st.loaded = true;
                    }
                    drop(st);
                    self.ready.notify_waiters();
                    return Some(original);
                }
                Some(next_payload) => {
                    self.registry.destroy(current, &current_format).await;
                    let destroyed_now = self.state.lock().unwrap().destroyed;
                    if destroyed_now {
                        self.registry.destroy(next_payload, &edge.target).await;
                        self.ready.notify_waiters();
                        return None;
                    }
                    current = next_payload;
                    current_format = edge.target.clone();
                }
            }
        }

        let destroyed_now = {
            let mut st = self.state.lock().unwrap();
            if st.destroyed {
                true
            } else {
                st.payload = Some(current.clone());
                st.format = Some(to.clone());
                st.loaded = true;
                false
            }
        };
        if destroyed_now {
            self.registry.destroy(current, &to).await;
            self.ready.notify_waiters();
            return None;
        }
        self.ready.notify_waiters();
        Some(current)
    }

    /// Waits for whatever load/conversion is currently in flight to
    /// resolve. Returns `None` if the record is (or becomes) destroyed
    /// before resolving. The `notified()` future is created before the
    /// state check on each iteration, so a `notify_waiters()` landing
    /// between the check and the `.await` is not missed.
    pub async fn await_ready(&self) -> Option<(Bytes, Arc<str>)> {
        loop {
            let notified = self.ready.notified();
            {
                let st = self.state.lock().unwrap();
                if st.destroyed {
                    return None;
                }
                if st.loaded {
                    return Some((st.payload.clone().unwrap(), st.format.clone().unwrap()));
                }
            }
            notified.await;
        }
    }

    fn fire_needs_draw(&self) {
        let tiles = self.state.lock().unwrap().tiles.clone();
        for tile in tiles {
            tile.tiled_image().set_needs_draw(true);
        }
    }

    /// Release the record. Never blocks on the op lock: an in-flight
    /// conversion notices `destroyed` at its next checkpoint (a fast-lock
    /// read) and releases its own intermediate itself.
    pub async fn destroy(&self) {
        let (had_payload, payload, format) = {
            let mut st = self.state.lock().unwrap();
            st.tiles.clear();
            let had = st.loaded;
            let payload = st.payload.take();
            let format = st.format.take();
            st.loaded = false;
            st.destroyed = true;
            (had, payload, format)
        };
        self.ready.notify_waiters();
        if had_payload {
            if let (Some(payload), Some(format)) = (payload, format) {
                self.registry.destroy(payload, &format).await;
            }
        }
        debug!("cache record destroyed");
    }
}
