//! Poster and logo cache.
//!
//! Two LRU tiers sit in front of the network: raw bytes keyed by URL and
//! decoded bitmaps keyed by URL plus target size. Identical concurrent
//! requests share one download and one decode.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::DynamicImage;
use lru::LruCache;
use tracing::debug;

use crate::app::{PortalError, Result};
use crate::config::LimitsConfig;
use crate::fetcher::{ConcurrencyLimiter, Fetcher, SingleFlight};

/// RGBA8 pixels ready to hand to a renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

type BitmapKey = (String, Option<(u32, u32)>);

#[derive(Clone)]
pub struct ImageCache {
    fetcher: Arc<dyn Fetcher>,
    bytes: Arc<Mutex<LruCache<String, Arc<Vec<u8>>>>>,
    bitmaps: Arc<Mutex<LruCache<BitmapKey, Arc<DecodedImage>>>>,
    byte_flights: SingleFlight<String, Arc<Vec<u8>>>,
    bitmap_flights: SingleFlight<BitmapKey, Arc<DecodedImage>>,
    downloads: ConcurrencyLimiter,
    decodes: ConcurrencyLimiter,
}

impl ImageCache {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self::with_limits(fetcher, &LimitsConfig::default())
    }

    pub fn with_limits(fetcher: Arc<dyn Fetcher>, limits: &LimitsConfig) -> Self {
        Self {
            fetcher,
            bytes: Arc::new(Mutex::new(LruCache::new(capacity(limits.image_bytes_capacity)))),
            bitmaps: Arc::new(Mutex::new(LruCache::new(capacity(limits.image_bitmap_capacity)))),
            byte_flights: SingleFlight::new(),
            bitmap_flights: SingleFlight::new(),
            downloads: ConcurrencyLimiter::new("image-download", limits.image_download.max(1)),
            decodes: ConcurrencyLimiter::new("image-decode", limits.image_decode.max(1)),
        }
    }

    /// Decoded image for `url`, downsampled to fit `target` when given.
    pub async fn image(&self, url: &str, target: Option<(u32, u32)>) -> Result<Arc<DecodedImage>> {
        let key = (url.to_string(), target);
        if let Some(hit) = lock(&self.bitmaps).get(&key).cloned() {
            return Ok(hit);
        }

        let this = self.clone();
        self.bitmap_flights
            .run(key.clone(), move || async move {
                let bytes = this.bytes(&key.0).await?;
                let _permit = this.decodes.acquire().await?;
                let decoded = tokio::task::spawn_blocking(move || decode(&bytes, target))
                    .await
                    .map_err(|e| PortalError::Image(e.to_string()))??;
                let decoded = Arc::new(decoded);
                lock(&this.bitmaps).put(key, decoded.clone());
                Ok(decoded)
            })
            .await
    }

    /// Raw bytes for `url`, downloaded at most once while cached.
    pub async fn bytes(&self, url: &str) -> Result<Arc<Vec<u8>>> {
        if let Some(hit) = lock(&self.bytes).get(url).cloned() {
            return Ok(hit);
        }

        let this = self.clone();
        let url = url.to_string();
        self.byte_flights
            .run(url.clone(), move || async move {
                let _permit = this.downloads.acquire().await?;
                debug!(url = %url, "Downloading image");
                let body = Arc::new(this.fetcher.fetch(&url).await?);
                lock(&this.bytes).put(url, body.clone());
                Ok(body)
            })
            .await
    }

    pub fn clear(&self) {
        lock(&self.bytes).clear();
        lock(&self.bitmaps).clear();
    }

    pub fn cached_bytes(&self) -> usize {
        lock(&self.bytes).len()
    }

    pub fn cached_bitmaps(&self) -> usize {
        lock(&self.bitmaps).len()
    }
}

fn capacity(configured: usize) -> NonZeroUsize {
    NonZeroUsize::new(configured).unwrap_or(NonZeroUsize::MIN)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn decode(bytes: &[u8], target: Option<(u32, u32)>) -> Result<DecodedImage> {
    let image = image::load_from_memory(bytes).map_err(|e| PortalError::Image(e.to_string()))?;
    let image = match target.and_then(|(w, h)| downsample(&image, w, h)) {
        Some(small) => small,
        None => image,
    };
    let rgba = image.to_rgba8();
    Ok(DecodedImage {
        width: rgba.width(),
        height: rgba.height(),
        pixels: rgba.into_raw(),
    })
}

/// Fits `image` inside `width` x `height`. `None` means the full decode is used.
fn downsample(image: &DynamicImage, width: u32, height: u32) -> Option<DynamicImage> {
    if width == 0 || height == 0 {
        debug!("Zero target size, keeping full decode");
        return None;
    }
    if image.width() <= width && image.height() <= height {
        return None;
    }
    let small = image.thumbnail(width, height);
    (small.width() > 0 && small.height() > 0).then_some(small)
}
