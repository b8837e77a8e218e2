use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, trace, warn};
use lru::LruCache;
use parking_lot::Mutex;

use super::{ModuleKind, TileLoad, TileModule, TileRequest, TileRequestCallback};
use crate::error::TileError;
use crate::tile_key::TileKey;
use crate::tile_source::TileSource;

/// Runs a [`TileModule`] on a pool of worker threads.
///
/// Requests wait in a bounded pending queue. When the queue is full the least recently requested
/// tile is dropped and its callback gets [`TileRequestCallback::tile_dropped`]. Workers always
/// take the most recently requested tile first, so the tiles the user is looking at right now are
/// loaded before the ones they have already scrolled past.
pub struct ModuleProvider {
    module: Arc<dyn TileModule>,
    queue: Arc<RequestQueue>,
    wake_up: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

struct RequestQueue {
    state: Mutex<QueueState>,
}

struct QueueState {
    pending: LruCache<TileKey, TileRequest>,
    /// Tiles claimed by workers, with the generation of the claimed request.
    working: HashMap<TileKey, u64>,
}

impl RequestQueue {
    fn new(size: NonZeroUsize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: LruCache::new(size),
                working: HashMap::new(),
            }),
        }
    }

    /// Returns the request pushed out of the full queue, unless a worker is already loading it.
    fn push(&self, request: TileRequest, module_name: &str) -> Option<TileRequest> {
        let key = request.key();
        let mut state = self.state.lock();
        let (dropped_key, dropped) = state.pending.push(key, request)?;
        if dropped_key == key || state.working.contains_key(&dropped_key) {
            return None;
        }

        debug!("{module_name}: pending queue is full, tile {dropped_key} is dropped");
        Some(dropped)
    }

    /// Claims the most recently requested tile that no worker is loading yet.
    fn next_tile(&self) -> Option<TileRequest> {
        let mut state = self.state.lock();
        let QueueState { pending, working } = &mut *state;
        let (key, request) = pending.iter().find(|(key, _)| !working.contains_key(*key))?;
        let request = request.clone();
        working.insert(*key, request.generation());

        Some(request)
    }

    /// Removes the finished request. A newer request for the same tile stays in the queue.
    fn finish(&self, request: &TileRequest) {
        let key = request.key();
        let generation = request.generation();
        let mut state = self.state.lock();
        if state
            .pending
            .peek(&key)
            .is_some_and(|pending| pending.generation() == generation)
        {
            state.pending.pop(&key);
        }

        if state.working.get(&key) == Some(&generation) {
            state.working.remove(&key);
        }
    }

    fn remove(&self, key: &TileKey) {
        let mut state = self.state.lock();
        state.pending.pop(key);
        state.working.remove(key);
    }

    /// Empties the queue and returns the requests no worker has claimed.
    fn clear(&self) -> Vec<TileRequest> {
        let mut state = self.state.lock();
        let QueueState { pending, working } = &mut *state;
        let dropped = pending
            .iter()
            .filter(|(key, _)| !working.contains_key(*key))
            .map(|(_, request)| request.clone())
            .collect();
        pending.clear();
        working.clear();

        dropped
    }

    fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

fn report_dropped(requests: impl IntoIterator<Item = TileRequest>) {
    for request in requests {
        if let Some(callback) = request.callback() {
            callback.tile_dropped(request);
        }
    }
}

impl ModuleProvider {
    /// Starts `threads` workers for the module. The number of workers is never larger than the
    /// pending queue size.
    pub fn new(
        module: Arc<dyn TileModule>,
        threads: usize,
        queue_size: usize,
    ) -> Result<Arc<Self>, TileError> {
        let queue_size = NonZeroUsize::new(queue_size).unwrap_or(NonZeroUsize::MIN);
        let worker_count = threads.clamp(1, queue_size.get());
        let queue = Arc::new(RequestQueue::new(queue_size));
        let (sender, receiver) = crossbeam_channel::bounded(queue_size.get());

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let module = module.clone();
            let queue = queue.clone();
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-{index}", module.name()))
                .spawn(move || run_worker(&*module, &queue, receiver))
                .map_err(|err| TileError::Generic(format!("failed to start worker: {err}")))?;
            workers.push(handle);
        }

        debug!(
            "Started {worker_count} workers for tile module {}",
            module.name()
        );

        Ok(Arc::new(Self {
            module,
            queue,
            wake_up: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            worker_count,
        }))
    }

    /// Name of the module.
    pub fn name(&self) -> &str {
        self.module.name()
    }

    /// Kind of the module.
    pub fn kind(&self) -> ModuleKind {
        self.module.kind()
    }

    /// Returns true if the module needs network access.
    pub fn uses_network(&self) -> bool {
        self.module.uses_network()
    }

    /// Minimum zoom level of the module.
    pub fn min_zoom(&self) -> u32 {
        self.module.min_zoom()
    }

    /// Maximum zoom level of the module.
    pub fn max_zoom(&self) -> u32 {
        self.module.max_zoom()
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Number of requests in the pending queue, including the ones being loaded.
    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    /// Returns true if the zoom level of the tile is in the range of the module.
    pub fn is_tile_reachable(&self, key: &TileKey) -> bool {
        (self.module.min_zoom()..=self.module.max_zoom()).contains(&key.zoom)
    }

    /// Replaces the source of the module.
    pub fn set_tile_source(&self, source: Arc<TileSource>) {
        self.module.set_tile_source(source);
    }

    /// Queues the request. The result is reported to the request callback from a worker thread.
    ///
    /// Does nothing after [`ModuleProvider::detach`].
    pub fn load_tile_async(&self, request: TileRequest) {
        let dropped = {
            let wake_up = self.wake_up.lock();
            let Some(sender) = wake_up.as_ref() else {
                debug!("{}: provider is detached, request for {} is ignored", self.name(), request.key());
                return;
            };

            trace!("{}: queueing tile {}", self.name(), request.key());
            let dropped = self.queue.push(request, self.module.name());

            match sender.try_send(()) {
                Ok(()) => {}
                Err(TrySendError::Full(())) => {
                    trace!("{}: workers are busy, wake up signal skipped", self.name());
                }
                Err(TrySendError::Disconnected(())) => {
                    warn!("{}: all workers have stopped", self.name());
                }
            }

            dropped
        };

        report_dropped(dropped);
    }

    /// Removes the tile from the pending and working queues.
    pub fn remove_tile_from_queues(&self, key: &TileKey) {
        self.queue.remove(key);
    }

    /// Drops every pending request. Requests that no worker has started loading are reported with
    /// [`TileRequestCallback::tile_dropped`].
    pub fn clear_queue(&self) {
        report_dropped(self.queue.clear());
    }

    /// Drops pending requests and stops the workers. Waits for the tiles being loaded at the
    /// moment to finish.
    pub fn detach(&self) {
        self.clear_queue();
        self.wake_up.lock().take();

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = std::thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }

            if worker.join().is_err() {
                warn!("{}: worker thread panicked", self.name());
            }
        }

        debug!("Tile module {} detached", self.name());
    }
}

impl std::fmt::Debug for ModuleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleProvider")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("worker_count", &self.worker_count)
            .finish()
    }
}

fn run_worker(module: &dyn TileModule, queue: &RequestQueue, wake_up: Receiver<()>) {
    while wake_up.recv().is_ok() {
        while let Some(request) = queue.next_tile() {
            process_request(module, queue, request);
        }
    }

    trace!("{}: worker stopped", module.name());
}

fn process_request(module: &dyn TileModule, queue: &RequestQueue, request: TileRequest) {
    let key = request.key();
    let Some(callback) = request.callback() else {
        queue.finish(&request);
        return;
    };

    if !(module.min_zoom()..=module.max_zoom()).contains(&key.zoom) {
        queue.finish(&request);
        callback.tile_failed(request);
        return;
    }

    match module.load(key) {
        Ok(TileLoad::Fresh(image)) => {
            queue.finish(&request);
            callback.tile_loaded(request, image);
        }
        Ok(TileLoad::Expired(image)) => {
            queue.finish(&request);
            callback.tile_expired(request, image);
        }
        Err(err) if err.cannot_continue() => {
            warn!(
                "{}: cannot continue loading tiles ({err}), dropping pending requests",
                module.name()
            );
            let dropped = queue.clear();
            callback.tile_failed(request);
            report_dropped(dropped);
        }
        Err(err) => {
            debug!("{}: failed to load tile {key}: {err}", module.name());
            queue.finish(&request);
            callback.tile_failed(request);
        }
    }
}
