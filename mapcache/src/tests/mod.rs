//! Shared fixtures for unit tests.

use std::any::Any;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Cursor, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use image::{ImageOutputFormat, Rgba, RgbaImage};
use parking_lot::Mutex;

use crate::decoded_image::{TileImage, TileImageRef};
use crate::error::TileError;
use crate::provider::{ModuleKind, TileLoad, TileModule, TileRequest, TileRequestCallback};
use crate::tile_key::TileKey;
use crate::tile_source::TileSource;

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Encodes a solid color PNG.
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
    let mut bytes = Cursor::new(vec![]);
    image
        .write_to(&mut bytes, ImageOutputFormat::Png)
        .expect("failed to encode png");
    bytes.into_inner()
}

/// Image that counts how many times it was released.
#[derive(Debug)]
pub(crate) struct TestImage {
    id: usize,
    releases: AtomicUsize,
}

impl TestImage {
    pub(crate) fn new(id: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            releases: AtomicUsize::new(0),
        })
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl TileImage for TestImage {
    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn is_released(&self) -> bool {
        self.release_count() > 0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Returns the id of a [`TestImage`] behind the handle.
pub(crate) fn image_id(image: &TileImageRef) -> usize {
    image
        .as_any()
        .downcast_ref::<TestImage>()
        .expect("not a test image")
        .id()
}

/// What a [`TestModule`] answers for a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scripted {
    Fresh(usize),
    Expired(usize),
    NotFound,
    Fatal,
}

/// Module with scripted results that records every load call.
pub(crate) struct TestModule {
    name: String,
    kind: ModuleKind,
    zoom_range: (u32, u32),
    default: Scripted,
    results: HashMap<TileKey, Scripted>,
    source_results: HashMap<String, Scripted>,
    delay: Duration,
    calls: Mutex<Vec<TileKey>>,
    source: Mutex<Option<Arc<TileSource>>>,
}

impl TestModule {
    pub(crate) fn new(name: &str, kind: ModuleKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            zoom_range: (0, 22),
            default: Scripted::NotFound,
            results: HashMap::new(),
            source_results: HashMap::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(vec![]),
            source: Mutex::new(None),
        }
    }

    pub(crate) fn with_default(mut self, result: Scripted) -> Self {
        self.default = result;
        self
    }

    pub(crate) fn with_result(mut self, key: TileKey, result: Scripted) -> Self {
        self.results.insert(key, result);
        self
    }

    /// Result for every tile while the module is set to the named source.
    pub(crate) fn with_source_result(mut self, source: &str, result: Scripted) -> Self {
        self.source_results.insert(source.to_string(), result);
        self
    }

    pub(crate) fn with_zoom_range(mut self, min: u32, max: u32) -> Self {
        self.zoom_range = (min, max);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> Vec<TileKey> {
        self.calls.lock().clone()
    }

    pub(crate) fn source_name(&self) -> Option<String> {
        self.source.lock().as_ref().map(|s| s.name().to_string())
    }

    /// Waits until the module has been called at least `count` times.
    pub(crate) fn wait_calls(&self, count: usize) {
        wait_until(|| self.calls.lock().len() >= count);
    }
}

impl TileModule for TestModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn min_zoom(&self) -> u32 {
        self.zoom_range.0
    }

    fn max_zoom(&self) -> u32 {
        self.zoom_range.1
    }

    fn set_tile_source(&self, source: Arc<TileSource>) {
        *self.source.lock() = Some(source);
    }

    fn load(&self, key: TileKey) -> Result<TileLoad, TileError> {
        self.calls.lock().push(key);
        let by_source = self
            .source_name()
            .and_then(|name| self.source_results.get(&name).copied());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let result = self.results.get(&key).copied().or(by_source);
        match result.unwrap_or(self.default) {
            Scripted::Fresh(id) => Ok(TileLoad::Fresh(TestImage::new(id))),
            Scripted::Expired(id) => Ok(TileLoad::Expired(TestImage::new(id))),
            Scripted::NotFound => Err(TileError::NotFound),
            Scripted::Fatal => Err(TileError::HostUnreachable("test host".into())),
        }
    }
}

/// Result reported to a [`ChannelCallback`].
#[derive(Debug)]
pub(crate) enum Outcome {
    Loaded(TileKey, TileImageRef),
    Expired(TileKey, TileImageRef),
    Failed(TileKey),
    Dropped(TileKey),
}

/// Request callback forwarding results into a channel.
pub(crate) struct ChannelCallback(Sender<Outcome>);

impl ChannelCallback {
    pub(crate) fn new() -> (Arc<dyn TileRequestCallback>, Receiver<Outcome>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Arc::new(Self(sender)), receiver)
    }
}

impl TileRequestCallback for ChannelCallback {
    fn tile_loaded(&self, request: TileRequest, image: TileImageRef) {
        let _ = self.0.send(Outcome::Loaded(request.key(), image));
    }

    fn tile_expired(&self, request: TileRequest, image: TileImageRef) {
        let _ = self.0.send(Outcome::Expired(request.key(), image));
    }

    fn tile_failed(&self, request: TileRequest) {
        let _ = self.0.send(Outcome::Failed(request.key()));
    }

    fn tile_dropped(&self, request: TileRequest) {
        let _ = self.0.send(Outcome::Dropped(request.key()));
    }
}

pub(crate) const TIMEOUT: Duration = Duration::from_secs(5);

/// Polls the condition until it is true. Panics after [`TIMEOUT`].
pub(crate) fn wait_until(condition: impl Fn() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < TIMEOUT, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Minimal HTTP server answering tile requests from a fixed set of paths.
pub(crate) struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    /// Starts serving `tiles` (path to body). Unknown paths get `404`.
    pub(crate) fn start(tiles: HashMap<String, Vec<u8>>) -> Self {
        Self::start_with_headers(tiles, &[])
    }

    /// Like [`TestServer::start`], adding `headers` to every tile response.
    pub(crate) fn start_with_headers(
        tiles: HashMap<String, Vec<u8>>,
        headers: &[(&str, &str)],
    ) -> Self {
        let headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}: {value}\r\n"))
            .collect();
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
        let addr = listener.local_addr().expect("bound address");
        let requests = Arc::new(Mutex::new(vec![]));

        let log = requests.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let _ = respond(stream, &tiles, &headers, &log);
            }
        });

        Self { addr, requests }
    }

    pub(crate) fn url_template(&self) -> String {
        format!("http://{}/{{z}}/{{x}}/{{y}}.png", self.addr)
    }

    /// Paths requested so far.
    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

fn respond(
    mut stream: TcpStream,
    tiles: &HashMap<String, Vec<u8>>,
    headers: &str,
    log: &Mutex<Vec<String>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header == "\r\n" {
            break;
        }
    }

    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string();
    log.lock().push(path.clone());

    match tiles.get(&path) {
        Some(body) => {
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\n{headers}Connection: close\r\n\r\n",
                body.len()
            )?;
            stream.write_all(body)?;
        }
        None => {
            write!(
                stream,
                "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            )?;
        }
    }

    stream.flush()
}
