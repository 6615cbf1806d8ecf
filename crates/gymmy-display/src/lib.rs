//! Display sink for composited overlays.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use futures::{stream::BoxStream, StreamExt};
use gymmy_types::frame::DecodedImage;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

/// Receives finished overlays. Scaling to the viewport is the sink's concern.
pub trait DisplaySink: Send + Sync {
    fn present(&self, image: DecodedImage);
}

/// Keeps the most recent overlay and fans it out to subscribers.
///
/// Nothing is cleared between frames: when a detection fails the previous overlay
/// simply stays current.
#[derive(Clone)]
pub struct BroadcastDisplay {
    tx: broadcast::Sender<Arc<DecodedImage>>,
    latest: Arc<Mutex<Option<Arc<DecodedImage>>>>,
    presented: Arc<AtomicU64>,
}

impl BroadcastDisplay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            latest: Arc::new(Mutex::new(None)),
            presented: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn latest(&self) -> Option<Arc<DecodedImage>> {
        self.latest.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::SeqCst)
    }

    /// Overlays presented after this call. Lagging subscribers skip what they missed.
    pub fn subscribe(&self) -> BoxStream<'static, Arc<DecodedImage>> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|image| async move { image.ok() })
            .boxed()
    }
}

impl DisplaySink for BroadcastDisplay {
    fn present(&self, image: DecodedImage) {
        let image = Arc::new(image);
        let count = self.presented.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(
            count,
            width = image.width(),
            height = image.height(),
            "overlay presented"
        );
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(image.clone());
        }
        let _ = self.tx.send(image);
    }
}
