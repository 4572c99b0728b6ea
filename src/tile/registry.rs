//! The conversion registry contract.
//!
//! The registry is a process-wide collaborator that knows the concrete
//! payload formats and how to move between them; the cache core treats every
//! payload as an opaque [`bytes::Bytes`] tagged with a format string. This is
//! the same relationship `io/range_reader.rs`'s `RangeReader` trait has to
//! `BlockCache`: the cache wraps and coordinates around the trait without
//! knowing what's on the other side of it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

/// A future returned by a conversion edge's transform function. Boxed
/// because edges are stored in a homogeneous `Vec` and the registry is free
/// to build them out of arbitrary async closures.
pub type TransformFuture = Pin<Box<dyn Future<Output = Option<Bytes>> + Send>>;

/// One edge in a conversion path: a single registered transform from
/// `origin` to `target`.
#[derive(Clone)]
pub struct ConversionEdge {
    pub origin: Arc<str>,
    pub target: Arc<str>,
    pub transform: Arc<dyn Fn(Bytes) -> TransformFuture + Send + Sync>,
}

impl ConversionEdge {
    pub fn new(
        origin: impl Into<Arc<str>>,
        target: impl Into<Arc<str>>,
        transform: impl Fn(Bytes) -> TransformFuture + Send + Sync + 'static,
    ) -> Self {
        Self {
            origin: origin.into(),
            target: target.into(),
            transform: Arc::new(transform),
        }
    }
}

/// External collaborator exposing format conversion, copying, and
/// destruction for opaque tile payloads.
///
/// Consumed only through this interface — the cache core never constructs
/// one of these itself in production; a host application supplies a
/// registry aware of its concrete payload formats (raw pixel buffers,
/// decoded bitmaps, GPU textures, ...).
#[async_trait]
pub trait ConversionRegistry: Send + Sync + 'static {
    /// Shortest sequence of edges from `from` to `to`, or empty if
    /// unreachable.
    fn conversion_path(&self, from: &str, to: &str) -> Vec<ConversionEdge>;

    /// One-shot convenience conversion, used by `get_data_as` when a read
    /// only needs a converted copy rather than an in-place mutation.
    async fn convert(&self, data: Bytes, from: &str, to: &str) -> Option<Bytes>;

    /// Deep copy within a format.
    async fn copy(&self, data: &Bytes, format: &str) -> Bytes;

    /// Release resources associated with a payload. Type-specific; a no-op
    /// for plain pixel buffers backed by reference-counted memory.
    async fn destroy(&self, data: Bytes, format: &str);

    /// Best-effort format tag inference for a payload whose type wasn't
    /// supplied by the caller.
    fn guess_type(&self, data: &Bytes) -> Arc<str>;
}
