//! Asynchronous tile loading seam
//!
//! A [`TileLoader`] receives fire-and-forget load requests together with a
//! [`LoadCompletion`]. Whoever performs the I/O calls
//! [`LoadCompletion::complete`] from any thread; the outcome travels over the
//! owning source's channel and is applied when the render loop polls.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use crate::grid::TileCoord;
use crate::source::SourceKey;
use crate::tile::TileImage;

/// Why a tile load failed
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("tile load failed: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The loader shut down before running the request
    #[error("loader is shut down")]
    Disconnected,
}

/// Result of one load: an image, `None` for a tile without content, or an error
pub type LoadOutcome = Result<Option<TileImage>, LoadError>;

/// What to load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub source: SourceKey,
    /// Wrapped tile coordinate
    pub coord: TileCoord,
    /// Source revision the tile belongs to
    pub revision: u64,
    pub pixel_ratio: f32,
}

/// A finished load as delivered to the owning source
#[derive(Debug)]
pub struct TileCompletion {
    pub coord: TileCoord,
    pub revision: u64,
    pub outcome: LoadOutcome,
}

/// One-shot handle for reporting a load outcome
#[derive(Debug)]
pub struct LoadCompletion {
    coord: TileCoord,
    revision: u64,
    sender: Sender<TileCompletion>,
}

impl LoadCompletion {
    pub(crate) fn new(coord: TileCoord, revision: u64, sender: Sender<TileCompletion>) -> Self {
        Self {
            coord,
            revision,
            sender,
        }
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    /// Report the outcome; dropped silently when the source is gone
    pub fn complete(self, outcome: LoadOutcome) {
        let completion = TileCompletion {
            coord: self.coord,
            revision: self.revision,
            outcome,
        };
        if self.sender.send(completion).is_err() {
            trace!(coord = %self.coord, "completion for a dropped source");
        }
    }
}

/// Starts tile loads without blocking
pub trait TileLoader {
    fn load(&mut self, request: LoadRequest, completion: LoadCompletion);
}

/// Loader running a closure inline
///
/// The outcome is still only applied on the next poll.
pub struct FnLoader<F> {
    fetch: F,
}

impl<F> FnLoader<F>
where
    F: FnMut(&LoadRequest) -> LoadOutcome,
{
    pub fn new(fetch: F) -> Self {
        Self { fetch }
    }
}

impl<F> TileLoader for FnLoader<F>
where
    F: FnMut(&LoadRequest) -> LoadOutcome,
{
    fn load(&mut self, request: LoadRequest, completion: LoadCompletion) {
        let outcome = (self.fetch)(&request);
        completion.complete(outcome);
    }
}

/// A request handed to an external I/O system
#[derive(Debug)]
pub struct PendingLoad {
    pub request: LoadRequest,
    pub completion: LoadCompletion,
}

/// Loader forwarding every request over a channel
///
/// The host drains the receiver returned by [`ChannelLoader::new`] and
/// completes each [`PendingLoad`] when its I/O finishes.
pub struct ChannelLoader {
    sender: Sender<PendingLoad>,
}

impl ChannelLoader {
    pub fn new() -> (Self, Receiver<PendingLoad>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl TileLoader for ChannelLoader {
    fn load(&mut self, request: LoadRequest, completion: LoadCompletion) {
        if let Err(mpsc::SendError(pending)) = self.sender.send(PendingLoad { request, completion }) {
            pending.completion.complete(Err(LoadError::Disconnected));
        }
    }
}

/// Blocking fetch function run on worker threads
pub type FetchFn = Arc<dyn Fn(&LoadRequest) -> LoadOutcome + Send + Sync>;

/// Sizing of a [`WorkerPoolLoader`]
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Fetch threads, one tile each at a time (defaults to the core count)
    pub num_workers: usize,

    /// How long an idle thread blocks on the request channel before it
    /// rechecks for shutdown
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: default_fetch_threads(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Loader running a blocking fetch function on a fixed pool of threads
///
/// Requests are served in submission order. Dropping the loader signals the
/// workers and waits for them to finish their current request.
pub struct WorkerPoolLoader {
    sender: Option<Sender<PendingLoad>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPoolLoader {
    /// Spawn the fetch threads
    ///
    /// Fails with the spawn error of the first thread that cannot start.
    pub fn new(fetch: FetchFn, config: WorkerPoolConfig) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<PendingLoad>();
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(config.num_workers);

        for id in 0..config.num_workers.max(1) {
            let receiver = receiver.clone();
            let fetch = fetch.clone();
            let shutdown = shutdown.clone();
            let poll_interval = config.poll_interval;
            let worker = thread::Builder::new()
                .name(format!("tessera-tile-loader-{}", id))
                .spawn(move || run_worker(receiver, fetch, shutdown, poll_interval))?;
            workers.push(worker);
        }

        debug!(workers = workers.len(), "started tile loader pool");
        Ok(Self {
            sender: Some(sender),
            workers,
            shutdown,
        })
    }

    /// Fetch threads in the pool
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Stop the workers and wait for them to exit
    pub fn shutdown(self) {
        drop(self);
    }
}

impl TileLoader for WorkerPoolLoader {
    fn load(&mut self, request: LoadRequest, completion: LoadCompletion) {
        let pending = PendingLoad { request, completion };
        match &self.sender {
            Some(sender) => {
                if let Err(mpsc::SendError(pending)) = sender.send(pending) {
                    pending.completion.complete(Err(LoadError::Disconnected));
                }
            }
            None => pending.completion.complete(Err(LoadError::Disconnected)),
        }
    }
}

impl Drop for WorkerPoolLoader {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("tile loader worker panicked");
            }
        }
    }
}

fn run_worker(
    receiver: Arc<Mutex<Receiver<PendingLoad>>>,
    fetch: FetchFn,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let next = match receiver.lock() {
            Ok(receiver) => receiver.recv_timeout(poll_interval),
            Err(_) => break,
        };

        match next {
            Ok(PendingLoad { request, completion }) => {
                trace!(coord = %request.coord, "loading tile");
                let outcome = fetch(&request);
                completion.complete(outcome);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Default pool size; four threads when the core count is unknown
fn default_fetch_threads() -> usize {
    thread::available_parallelism().map_or(4, |cores| cores.get())
}
