//! Tile state machine
//!
//! A [`Tile`] moves `Idle → Loading → {Loaded | Error}`, may be found `Empty`
//! (no content), and ends up `Abort` when it stops being wanted or is
//! evicted before it finished loading. Each tile can carry an interim chain: older versions of the same
//! coordinate shown while the current one loads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::grid::TileCoord;
use crate::loader::LoadError;

/// Default cross-fade duration for newly drawable tiles
pub const DEFAULT_TRANSITION: Duration = Duration::from_millis(250);

/// Frame time added to every alpha computation so the first frame is not fully transparent
const FRAME_TIME: Duration = Duration::from_nanos(1_000_000_000 / 60);

/// Loading state of a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileState {
    /// Created, no load requested yet
    Idle,

    /// Load requested, completion pending
    Loading,

    /// Image available
    Loaded,

    /// Load failed
    Error,

    /// Known to have no content
    Empty,

    /// Dropped before its load completed
    Abort,
}

impl TileState {
    /// States that will not change without a new load
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            TileState::Loaded | TileState::Error | TileState::Empty | TileState::Abort
        )
    }
}

/// Decoded tile pixels
///
/// Pixel data is RGBA8, shared between the tile and any texture upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

impl TileImage {
    pub fn new(width: u32, height: u32, pixels: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            pixels: pixels.into(),
        }
    }

    /// Image of one repeated RGBA color
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels: Vec<u8> = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::new(width, height, pixels)
    }

    /// Get the size of the pixel data in bytes
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Check if the tile is fully opaque
    pub fn is_opaque(&self) -> bool {
        self.pixels.chunks_exact(4).all(|rgba| rgba[3] == 255)
    }
}

/// Identity of a tile consumer, used to track cross-fades independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl ConsumerId {
    /// Create a new unique consumer ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Running(Instant),
    Ended,
}

/// One tile of one source
#[derive(Debug)]
pub struct Tile {
    coord: TileCoord,
    state: TileState,
    revision: u64,
    image: Option<TileImage>,
    interim: Option<Box<Tile>>,
    transition: Duration,
    transitions: HashMap<ConsumerId, Transition>,
}

impl Tile {
    pub fn new(coord: TileCoord, revision: u64) -> Self {
        Self::with_state(coord, revision, TileState::Idle)
    }

    pub fn with_state(coord: TileCoord, revision: u64, state: TileState) -> Self {
        Self {
            coord,
            state,
            revision,
            image: None,
            interim: None,
            transition: DEFAULT_TRANSITION,
            transitions: HashMap::new(),
        }
    }

    /// Set the cross-fade duration; zero disables fading
    pub fn with_transition(mut self, transition: Duration) -> Self {
        self.transition = transition;
        self
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    /// Force a state, e.g. when an error tile is accepted as loaded
    pub fn set_state(&mut self, state: TileState) {
        self.state = state;
    }

    /// Source revision this tile was created for
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn image(&self) -> Option<&TileImage> {
        self.image.as_ref()
    }

    /// Request the load; only an idle tile transitions
    pub fn load(&mut self) -> bool {
        if self.state != TileState::Idle {
            return false;
        }
        self.state = TileState::Loading;
        true
    }

    /// Apply the outcome of a load
    ///
    /// Returns the new state, or `None` when the tile was not loading and the
    /// outcome is stale.
    pub fn finish_load(&mut self, outcome: Result<Option<TileImage>, LoadError>) -> Option<TileState> {
        if self.state != TileState::Loading {
            return None;
        }
        self.state = match outcome {
            Ok(Some(image)) => {
                self.image = Some(image);
                self.interim = None;
                TileState::Loaded
            }
            Ok(None) => TileState::Empty,
            Err(_) => TileState::Error,
        };
        Some(self.state)
    }

    /// Cancel an unfinished tile
    pub fn abort(&mut self) -> bool {
        if matches!(self.state, TileState::Idle | TileState::Loading) {
            self.state = TileState::Abort;
            true
        } else {
            false
        }
    }

    /// Drop the decoded image and interim chain
    pub fn release(&mut self) {
        self.image = None;
        self.interim = None;
    }

    /// Previous tile of the same coordinate, if any
    pub fn interim(&self) -> Option<&Tile> {
        self.interim.as_deref()
    }

    /// Keep `previous` as the interim of this tile
    ///
    /// An idle or aborted `previous` never drew anything, so its own interim
    /// is kept instead.
    pub fn set_interim(&mut self, mut previous: Tile) {
        self.interim = if matches!(previous.state, TileState::Idle | TileState::Abort) {
            previous.interim.take()
        } else {
            Some(Box::new(previous))
        };
        self.refresh_interim_chain();
    }

    /// Drop idle and aborted links and everything behind the first loaded link
    pub fn refresh_interim_chain(&mut self) {
        let mut cursor = &mut self.interim;
        loop {
            let state = match cursor.as_deref() {
                Some(tile) => tile.state,
                None => break,
            };
            match state {
                TileState::Idle | TileState::Abort => {
                    if let Some(mut skipped) = cursor.take() {
                        *cursor = skipped.interim.take();
                    }
                }
                TileState::Loaded => {
                    if let Some(loaded) = cursor.as_deref_mut() {
                        loaded.interim = None;
                    }
                    break;
                }
                _ => match cursor {
                    Some(tile) => cursor = &mut tile.interim,
                    None => break,
                },
            }
        }
    }

    /// First loaded tile of the interim chain, else this tile
    pub fn interim_tile(&self) -> &Tile {
        let mut link = self.interim.as_deref();
        while let Some(tile) = link {
            if tile.state == TileState::Loaded {
                return tile;
            }
            link = tile.interim.as_deref();
        }
        self
    }

    /// This tile or the interim link created for `revision`
    pub fn revision_mut(&mut self, revision: u64) -> Option<&mut Tile> {
        if self.revision == revision {
            return Some(self);
        }
        self.interim.as_deref_mut()?.revision_mut(revision)
    }

    /// Number of links in the interim chain
    pub fn interim_chain_len(&self) -> usize {
        let mut len = 0;
        let mut link = self.interim.as_deref();
        while let Some(tile) = link {
            len += 1;
            link = tile.interim.as_deref();
        }
        len
    }

    /// Cross-fade opacity for `consumer` at `now`
    ///
    /// The transition starts on the first query.
    pub fn alpha(&mut self, consumer: ConsumerId, now: Instant) -> f32 {
        if self.transition.is_zero() {
            return 1.0;
        }
        let start = match self.transitions.get(&consumer) {
            Some(Transition::Ended) => return 1.0,
            Some(Transition::Running(start)) => *start,
            None => {
                self.transitions.insert(consumer, Transition::Running(now));
                now
            }
        };
        let delta = now.saturating_duration_since(start) + FRAME_TIME;
        if delta >= self.transition {
            return 1.0;
        }
        let t = delta.as_secs_f64() / self.transition.as_secs_f64();
        ease_in(t) as f32
    }

    /// Whether `consumer` still has to finish a fade for this tile
    pub fn in_transition(&self, consumer: ConsumerId) -> bool {
        !self.transition.is_zero() && self.transitions.get(&consumer) != Some(&Transition::Ended)
    }

    pub fn end_transition(&mut self, consumer: ConsumerId) {
        if !self.transition.is_zero() {
            self.transitions.insert(consumer, Transition::Ended);
        }
    }
}

fn ease_in(t: f64) -> f64 {
    t.powi(3)
}
