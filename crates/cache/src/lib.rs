//! Tessera Cache Library
//!
//! Resource caches for the tile pipeline: a keyed LRU store with
//! high-water-mark expiry, a frame-pinned variant whose expiry never touches
//! resources used by the frame in flight, and a GPU texture cache built on it.

pub mod config;
pub mod gpu;
pub mod lru;
pub mod pinned;

pub use config::{CacheConfig, ConfigError, DEFAULT_TILE_CACHE_SIZE};
pub use gpu::{
    GpuBackend, GpuCacheStats, GpuError, GpuResourceCache, GpuTexture, HeadlessBackend,
    HeadlessTexture, TextureUpload, DEFAULT_TEXTURE_HIGH_WATER_MARK,
};
pub use lru::{LruCache, LruStats, DEFAULT_HIGH_WATER_MARK};
pub use pinned::{FramePinnedCache, PinnedCacheStats, SlotKey};
