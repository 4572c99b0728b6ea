//! Test utilities for integration tests.
//!
//! This module provides mock implementations of the cache core's external
//! contracts (`Tile`, `TiledImage`, `Viewer`, `ConversionRegistry`) so the
//! integration tests can exercise `TileCache`/`CacheRecord` purely through
//! the public API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tile_cache_core::tile::ConversionEdge;
use tile_cache_core::{ConversionRegistry, Tile, TiledImage, TileUnloadedEvent, Viewer};

pub struct MockViewer {
    pub events: Mutex<Vec<TileUnloadedEvent>>,
}

impl MockViewer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl Viewer for MockViewer {
    fn raise_event(&self, event: TileUnloadedEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct MockTiledImage {
    needs_draw: AtomicBool,
    zombie_cache: AtomicBool,
    viewer: Arc<MockViewer>,
}

impl MockTiledImage {
    pub fn new(viewer: Arc<MockViewer>) -> Arc<Self> {
        Arc::new(Self {
            needs_draw: AtomicBool::new(false),
            zombie_cache: AtomicBool::new(true),
            viewer,
        })
    }

    pub fn without_zombie_cache(viewer: Arc<MockViewer>) -> Arc<Self> {
        let image = Self::new(viewer);
        image.zombie_cache.store(false, Ordering::SeqCst);
        image
    }

    pub fn needs_draw(&self) -> bool {
        self.needs_draw.load(Ordering::SeqCst)
    }
}

impl TiledImage for MockTiledImage {
    fn set_needs_draw(&self, value: bool) {
        self.needs_draw.store(value, Ordering::SeqCst);
    }

    fn zombie_cache_enabled(&self) -> bool {
        self.zombie_cache.load(Ordering::SeqCst)
    }

    fn viewer(&self) -> Arc<dyn Viewer> {
        self.viewer.clone()
    }
}

pub struct MockTile {
    primary_key: Arc<str>,
    level: AtomicU32,
    being_drawn: AtomicBool,
    last_touch_time: AtomicI64,
    cache_size: AtomicU32,
    loaded: AtomicBool,
    tiled_image: Arc<dyn TiledImage>,
    unloaded: AtomicBool,
}

impl MockTile {
    pub fn new(
        key: impl Into<Arc<str>>,
        level: u32,
        last_touch_time: i64,
        tiled_image: Arc<dyn TiledImage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            primary_key: key.into(),
            level: AtomicU32::new(level),
            being_drawn: AtomicBool::new(false),
            last_touch_time: AtomicI64::new(last_touch_time),
            cache_size: AtomicU32::new(0),
            loaded: AtomicBool::new(true),
            tiled_image,
            unloaded: AtomicBool::new(false),
        })
    }

    pub fn set_being_drawn(&self, value: bool) {
        self.being_drawn.store(value, Ordering::SeqCst);
    }

    pub fn bump_cache_size(&self) {
        self.cache_size.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::SeqCst)
    }
}

impl Tile for MockTile {
    fn cache_key(&self) -> &str {
        &self.primary_key
    }

    fn caches(&self) -> Vec<Arc<str>> {
        vec![self.primary_key.clone()]
    }

    fn level(&self) -> u32 {
        self.level.load(Ordering::SeqCst)
    }

    fn being_drawn(&self) -> bool {
        self.being_drawn.load(Ordering::SeqCst)
    }

    fn last_touch_time(&self) -> i64 {
        self.last_touch_time.load(Ordering::SeqCst)
    }

    fn cache_size(&self) -> usize {
        self.cache_size.load(Ordering::SeqCst) as usize
    }

    fn loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn tiled_image(&self) -> Arc<dyn TiledImage> {
        self.tiled_image.clone()
    }

    fn unload(&self) {
        self.unloaded.store(true, Ordering::SeqCst);
    }
}

/// A registry with a fixed linear conversion graph `raw -> a -> b -> c`,
/// each edge appending a marker byte, plus call counters so tests can
/// assert on exactly what got destroyed/converted.
pub struct MockRegistry {
    edges: HashMap<(Arc<str>, Arc<str>), ConversionEdge>,
    pub destroyed: Mutex<Vec<(Bytes, Arc<str>)>>,
    pub convert_calls: AtomicUsize,
    pub copy_calls: AtomicUsize,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        let mut edges = HashMap::new();
        for (from, to) in [("raw", "a"), ("a", "b"), ("b", "c")] {
            let from: Arc<str> = from.into();
            let to: Arc<str> = to.into();
            edges.insert(
                (from.clone(), to.clone()),
                ConversionEdge::new(from, to, |data| {
                    Box::pin(async move {
                        let mut v = data.to_vec();
                        v.push(b'.');
                        Some(Bytes::from(v))
                    })
                }),
            );
        }
        Arc::new(Self {
            edges,
            destroyed: Mutex::new(Vec::new()),
            convert_calls: AtomicUsize::new(0),
            copy_calls: AtomicUsize::new(0),
        })
    }

    pub fn destroy_count(&self) -> usize {
        self.destroyed.lock().unwrap().len()
    }

    pub fn was_destroyed(&self, payload: &Bytes) -> bool {
        self.destroyed.lock().unwrap().iter().any(|(p, _)| p == payload)
    }
}

#[async_trait]
impl ConversionRegistry for MockRegistry {
    fn conversion_path(&self, from: &str, to: &str) -> Vec<ConversionEdge> {
        if from == to {
            return Vec::new();
        }
        let order = ["raw", "a", "b", "c"];
        let start = order.iter().position(|f| *f == from);
        let end = order.iter().position(|f| *f == to);
        let (Some(start), Some(end)) = (start, end) else {
            return Vec::new();
        };
        if start >= end {
            return Vec::new();
        }
        let mut path = Vec::new();
        for window in order[start..=end].windows(2) {
            let key = (Arc::from(window[0]), Arc::from(window[1]));
            match self.edges.get(&key) {
                Some(edge) => path.push(edge.clone()),
                None => return Vec::new(),
            }
        }
        path
    }

    async fn convert(&self, data: Bytes, from: &str, to: &str) -> Option<Bytes> {
        self.convert_calls.fetch_add(1, Ordering::SeqCst);
        if from == to {
            return Some(data);
        }
        let path = self.conversion_path(from, to);
        let mut current = data;
        for edge in path {
            current = (edge.transform)(current).await?;
        }
        Some(current)
    }

    async fn copy(&self, data: &Bytes, _format: &str) -> Bytes {
        self.copy_calls.fetch_add(1, Ordering::SeqCst);
        Bytes::from(data.to_vec())
    }

    async fn destroy(&self, data: Bytes, format: &str) {
        self.destroyed.lock().unwrap().push((data, format.into()));
    }

    fn guess_type(&self, _data: &Bytes) -> Arc<str> {
        "raw".into()
    }
}
