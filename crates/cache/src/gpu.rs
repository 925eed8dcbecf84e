//! GPU texture cache pinned to render frames
//!
//! Holds uploaded tile textures keyed by an arbitrary texture key. Expiry is
//! frame based: textures touched during the frame being rendered are never
//! released by that frame's expiry pass. Uploads and releases go through a
//! [`GpuBackend`] so the cache stays independent of the graphics API.

use std::any::Any;
use std::hash::Hash;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pinned::FramePinnedCache;

/// Default number of textures kept between expiry passes
pub const DEFAULT_TEXTURE_HIGH_WATER_MARK: usize = 1024;

/// Errors from the GPU backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpuError {
    /// The graphics context was lost; every handle is invalid until restore
    #[error("graphics context lost")]
    ContextLost,

    /// The backend refused or failed the upload
    #[error("texture upload failed: {0}")]
    UploadFailed(String),
}

/// GPU texture handle
///
/// Stores a type-erased backend handle with the metadata the cache needs.
pub struct GpuTexture {
    /// Opaque handle to the GPU texture (backend specific)
    handle: Box<dyn Any + Send>,

    /// Width of the texture in pixels
    pub width: u32,

    /// Height of the texture in pixels
    pub height: u32,

    /// Estimated VRAM usage in bytes
    vram_size: usize,
}

impl GpuTexture {
    /// Wrap a backend handle
    ///
    /// # Arguments
    ///
    /// * `handle` - Backend texture handle
    /// * `width` - Width in pixels
    /// * `height` - Height in pixels
    /// * `vram_size` - Estimated VRAM usage in bytes
    pub fn new<T: 'static + Send>(handle: T, width: u32, height: u32, vram_size: usize) -> Self {
        Self {
            handle: Box::new(handle),
            width,
            height,
            vram_size,
        }
    }

    /// Get the estimated VRAM size of this texture in bytes
    pub fn vram_size(&self) -> usize {
        self.vram_size
    }

    /// Get a reference to the underlying handle
    ///
    /// Returns `None` if the type doesn't match.
    pub fn handle<T: 'static>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuTexture")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("vram_size", &self.vram_size)
            .finish_non_exhaustive()
    }
}

/// Pixel data handed to a backend for upload
#[derive(Debug, Clone, Copy)]
pub struct TextureUpload<'a> {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 pixels
    pub pixels: &'a [u8],
}

/// Graphics API seam used by [`GpuResourceCache`]
pub trait GpuBackend {
    /// Upload pixels into a new texture
    fn upload(&mut self, upload: TextureUpload<'_>) -> Result<GpuTexture, GpuError>;

    /// Release a texture handle owned by this backend
    fn release(&mut self, texture: GpuTexture);

    /// Whether the context is currently lost
    fn is_context_lost(&self) -> bool;
}

/// Statistics about GPU texture cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuCacheStats {
    /// Number of textures currently in cache
    pub texture_count: usize,

    /// Total VRAM used by cached textures (bytes)
    pub vram_used: usize,

    pub uploads: u64,
    pub hits: u64,
    pub misses: u64,

    /// Textures released by frame expiry
    pub evictions: u64,

    pub context_losses: u64,
}

impl GpuCacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Frame-pinned cache of GPU textures
pub struct GpuResourceCache<K> {
    textures: FramePinnedCache<K, GpuTexture>,
    vram_used: usize,
    stats: GpuCacheStats,
    context_lost: bool,
}

impl<K> GpuResourceCache<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            textures: FramePinnedCache::new(high_water_mark),
            vram_used: 0,
            stats: GpuCacheStats::default(),
            context_lost: false,
        }
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn high_water_mark(&self) -> usize {
        self.textures.high_water_mark()
    }

    pub fn set_high_water_mark(&mut self, high_water_mark: usize) {
        self.textures.set_high_water_mark(high_water_mark);
    }

    /// Pin textures used from now on to the given frame
    pub fn begin_frame(&mut self, frame_index: u64) {
        self.textures.begin_frame(frame_index);
    }

    pub fn needs_expiry(&self) -> bool {
        self.textures.needs_expiry()
    }

    /// Check if a texture is cached without updating recency
    pub fn contains(&self, key: &K) -> bool {
        self.textures.contains_key(key)
    }

    pub fn is_context_lost(&self) -> bool {
        self.context_lost
    }

    /// Return the cached texture for `key`, uploading it first on a miss
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::ContextLost`] while the context is lost, or the
    /// backend's upload error.
    pub fn get_or_upload(
        &mut self,
        key: &K,
        backend: &mut dyn GpuBackend,
        upload: TextureUpload<'_>,
    ) -> Result<&GpuTexture, GpuError> {
        if self.context_lost || backend.is_context_lost() {
            return Err(GpuError::ContextLost);
        }

        if self.textures.contains_key(key) {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
            let texture = backend.upload(upload)?;
            self.vram_used += texture.vram_size();
            self.stats.uploads += 1;
            self.textures.set(key.clone(), texture);
            self.update_stats();
        }

        self.textures
            .get(key)
            .ok_or_else(|| GpuError::UploadFailed(format!("texture {:?} missing after upload", key)))
    }

    /// Remove a texture and release its handle
    pub fn remove(&mut self, key: &K, backend: &mut dyn GpuBackend) -> bool {
        match self.textures.remove(key) {
            Some(texture) => {
                self.release(texture, backend);
                self.update_stats();
                true
            }
            None => false,
        }
    }

    /// Remove and release every texture whose key matches `predicate`
    pub fn remove_where<F>(&mut self, predicate: F, backend: &mut dyn GpuBackend) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let removed = self.textures.remove_where(predicate);
        let count = removed.len();
        for (_, texture) in removed {
            self.release(texture, backend);
        }
        self.update_stats();
        count
    }

    /// Release least recently used textures not pinned by `current_frame`
    pub fn expire(&mut self, current_frame: u64, backend: &mut dyn GpuBackend) -> usize {
        let mut released = Vec::new();
        self.textures
            .expire(current_frame, |key, texture| released.push((key, texture)));

        let count = released.len();
        for (key, texture) in released {
            tracing::trace!(?key, "releasing expired texture");
            self.release(texture, backend);
        }
        if count > 0 {
            debug!(
                frame = current_frame,
                released = count,
                remaining = self.textures.len(),
                "expired texture cache"
            );
        }
        self.stats.evictions += count as u64;
        self.update_stats();
        count
    }

    /// Forget every texture after the context was lost
    ///
    /// Handles are invalid at this point, so nothing is handed back to the
    /// backend. Frame markers are reset with the entries.
    pub fn handle_context_lost(&mut self) {
        let dropped = self.textures.len();
        self.textures.clear();
        self.vram_used = 0;
        self.context_lost = true;
        self.stats.context_losses += 1;
        self.update_stats();
        info!(dropped, "graphics context lost, texture cache flushed");
    }

    /// Accept uploads again; textures are re-created lazily on next use
    pub fn handle_context_restored(&mut self) {
        self.context_lost = false;
        info!("graphics context restored");
    }

    /// Release every texture, e.g. on shutdown
    pub fn clear(&mut self, backend: &mut dyn GpuBackend) {
        for (_, texture) in self.textures.drain() {
            self.release(texture, backend);
        }
        self.update_stats();
    }

    /// Get current cache statistics
    pub fn stats(&self) -> GpuCacheStats {
        self.stats
    }

    fn release(&mut self, texture: GpuTexture, backend: &mut dyn GpuBackend) {
        self.vram_used = self.vram_used.saturating_sub(texture.vram_size());
        if backend.is_context_lost() {
            warn!("dropping texture without release, context is lost");
            return;
        }
        backend.release(texture);
    }

    fn update_stats(&mut self) {
        self.stats.texture_count = self.textures.len();
        self.stats.vram_used = self.vram_used;
    }
}

impl<K> Default for GpuResourceCache<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new(DEFAULT_TEXTURE_HIGH_WATER_MARK)
    }
}

/// Backend that keeps textures in main memory
///
/// Used for headless rendering and for driving the cache without a graphics
/// device. Context loss and upload failures can be simulated.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_handle: u64,
    live: usize,
    uploads: u64,
    releases: u64,
    context_lost: bool,
    fail_uploads: bool,
}

/// Handle type produced by [`HeadlessBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessTexture {
    pub id: u64,
    pub pixels: Vec<u8>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of textures uploaded and not yet released
    pub fn live_textures(&self) -> usize {
        self.live
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn releases(&self) -> u64 {
        self.releases
    }

    /// Simulate losing the context; live handles are gone with it
    pub fn lose_context(&mut self) {
        self.context_lost = true;
        self.live = 0;
    }

    pub fn restore_context(&mut self) {
        self.context_lost = false;
    }

    /// Make subsequent uploads fail
    pub fn set_fail_uploads(&mut self, fail: bool) {
        self.fail_uploads = fail;
    }
}

impl GpuBackend for HeadlessBackend {
    fn upload(&mut self, upload: TextureUpload<'_>) -> Result<GpuTexture, GpuError> {
        if self.context_lost {
            return Err(GpuError::ContextLost);
        }
        if self.fail_uploads {
            return Err(GpuError::UploadFailed("uploads disabled".to_string()));
        }

        self.next_handle += 1;
        self.uploads += 1;
        self.live += 1;
        let handle = HeadlessTexture {
            id: self.next_handle,
            pixels: upload.pixels.to_vec(),
        };
        Ok(GpuTexture::new(
            handle,
            upload.width,
            upload.height,
            upload.width as usize * upload.height as usize * 4,
        ))
    }

    fn release(&mut self, texture: GpuTexture) {
        self.releases += 1;
        self.live = self.live.saturating_sub(1);
        drop(texture);
    }

    fn is_context_lost(&self) -> bool {
        self.context_lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIXELS: [u8; 16] = [255; 16];

    fn upload() -> TextureUpload<'static> {
        TextureUpload {
            width: 2,
            height: 2,
            pixels: &PIXELS,
        }
    }

    #[test]
    fn test_get_or_upload_uploads_once() {
        let mut backend = HeadlessBackend::new();
        let mut cache: GpuResourceCache<u32> = GpuResourceCache::new(8);

        let first_id = cache
            .get_or_upload(&1, &mut backend, upload())
            .unwrap()
            .handle::<HeadlessTexture>()
            .unwrap()
            .id;
        let second_id = cache
            .get_or_upload(&1, &mut backend, upload())
            .unwrap()
            .handle::<HeadlessTexture>()
            .unwrap()
            .id;

        assert_eq!(first_id, second_id);
        assert_eq!(backend.uploads(), 1);

        let stats = cache.stats();
        assert_eq!(stats.uploads, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.vram_used, 16);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_texture_metadata() {
        let texture = GpuTexture::new(42u32, 256, 128, 256 * 128 * 4);
        assert_eq!(texture.width, 256);
        assert_eq!(texture.height, 128);
        assert_eq!(texture.vram_size(), 131072);
        assert_eq!(texture.handle::<u32>(), Some(&42));
        assert!(texture.handle::<String>().is_none());
    }

    #[test]
    fn test_remove_releases_handle() {
        let mut backend = HeadlessBackend::new();
        let mut cache: GpuResourceCache<u32> = GpuResourceCache::new(8);
        cache.get_or_upload(&1, &mut backend, upload()).unwrap();

        assert!(cache.remove(&1, &mut backend));
        assert!(!cache.remove(&1, &mut backend));
        assert_eq!(backend.releases(), 1);
        assert_eq!(backend.live_textures(), 0);
        assert_eq!(cache.stats().vram_used, 0);
    }

    #[test]
    fn test_expire_respects_current_frame() {
        let mut backend = HeadlessBackend::new();
        let mut cache: GpuResourceCache<u32> = GpuResourceCache::new(2);

        cache.begin_frame(1);
        for key in 0..4 {
            cache.get_or_upload(&key, &mut backend, upload()).unwrap();
        }
        assert_eq!(cache.expire(1, &mut backend), 0);

        cache.begin_frame(2);
        cache.get_or_upload(&3, &mut backend, upload()).unwrap();
        assert_eq!(cache.expire(2, &mut backend), 2);

        assert!(!cache.contains(&0));
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
        assert_eq!(backend.live_textures(), 2);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_context_loss_drops_without_release() {
        let mut backend = HeadlessBackend::new();
        let mut cache: GpuResourceCache<u32> = GpuResourceCache::new(8);
        cache.begin_frame(1);
        cache.get_or_upload(&1, &mut backend, upload()).unwrap();
        cache.get_or_upload(&2, &mut backend, upload()).unwrap();

        backend.lose_context();
        cache.handle_context_lost();

        assert!(cache.is_empty());
        assert_eq!(backend.releases(), 0);
        assert_eq!(cache.stats().context_losses, 1);
        assert_eq!(
            cache.get_or_upload(&1, &mut backend, upload()).unwrap_err(),
            GpuError::ContextLost
        );

        backend.restore_context();
        cache.handle_context_restored();
        cache.begin_frame(2);
        assert!(cache.get_or_upload(&1, &mut backend, upload()).is_ok());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_upload_failure_is_reported() {
        let mut backend = HeadlessBackend::new();
        backend.set_fail_uploads(true);
        let mut cache: GpuResourceCache<u32> = GpuResourceCache::new(8);

        let err = cache.get_or_upload(&1, &mut backend, upload()).unwrap_err();
        assert!(matches!(err, GpuError::UploadFailed(_)));
        assert!(!cache.contains(&1));
    }

    #[test]
    fn test_remove_where_and_clear() {
        let mut backend = HeadlessBackend::new();
        let mut cache: GpuResourceCache<u32> = GpuResourceCache::new(8);
        for key in 0..6 {
            cache.get_or_upload(&key, &mut backend, upload()).unwrap();
        }

        assert_eq!(cache.remove_where(|key| key % 2 == 0, &mut backend), 3);
        assert_eq!(cache.len(), 3);

        cache.clear(&mut backend);
        assert!(cache.is_empty());
        assert_eq!(backend.live_textures(), 0);
        assert_eq!(backend.releases(), 6);
    }
}
