use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::RwLock;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, CACHE_CONTROL, EXPIRES};
use reqwest::StatusCode;

use super::expiration::ExpirationPolicy;
use super::{ModuleKind, TileLoad, TileModule, TileWriter};
use crate::config::TileCacheConfig;
use crate::error::TileError;
use crate::tile_key::TileKey;
use crate::tile_source::TileSource;

/// Tells if the device is online at the moment.
pub trait NetworkAvailability: Send + Sync {
    /// Returns true if tiles can be downloaded.
    fn is_network_available(&self) -> bool;
}

impl<T> NetworkAvailability for T
where
    T: Fn() -> bool + Send + Sync,
{
    fn is_network_available(&self) -> bool {
        self()
    }
}

/// Downloads tiles from the url of the tile source.
///
/// Downloaded tiles are saved to the disk cache if a [`TileWriter`] is set. The expiry time from
/// the `Cache-Control: max-age` or `Expires` response header is kept as the modification time of
/// the saved file.
pub struct NetworkDownloader {
    client: Client,
    expiration: ExpirationPolicy,
    source: RwLock<Arc<TileSource>>,
    writer: Option<TileWriter>,
    availability: Option<Box<dyn NetworkAvailability>>,
}

impl NetworkDownloader {
    /// Creates a downloader with the timeouts and user agent from the config.
    pub fn new(source: Arc<TileSource>, config: &TileCacheConfig) -> Result<Self, TileError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()?;

        Ok(Self {
            client,
            expiration: ExpirationPolicy::new(config),
            source: RwLock::new(source),
            writer: None,
            availability: None,
        })
    }

    /// Saves downloaded tiles with the writer.
    pub fn with_writer(mut self, writer: TileWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Checks the predicate before every download.
    pub fn with_availability(mut self, availability: impl NetworkAvailability + 'static) -> Self {
        self.availability = Some(Box::new(availability));
        self
    }

    /// Returns the tile and the time it expires at.
    fn download(
        &self,
        source: &TileSource,
        key: &TileKey,
    ) -> Result<(Bytes, SystemTime), TileError> {
        let url = source.tile_url(key)?;
        info!("Loading {url}");

        let response = self.client.get(&url).send().map_err(|err| {
            debug!("Request to {url} failed: {err}");
            TileError::from(err)
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Tile {key} does not exist on the server");
            return Err(TileError::NotFound);
        }

        if !status.is_success() {
            warn!("Unexpected response {status} for {url}");
            return Err(TileError::HttpStatus(status.as_u16()));
        }

        let expires_at = self.expires_at(response.headers());
        let bytes = response.bytes()?;
        if bytes.is_empty() {
            warn!("No content downloaded for {url}");
            return Err(TileError::IO);
        }

        Ok((bytes, expires_at))
    }

    fn expires_at(&self, headers: &HeaderMap) -> SystemTime {
        let header = move |name: HeaderName| headers.get(name).and_then(|value| value.to_str().ok());
        self.expiration
            .expiration_time(header(EXPIRES), header(CACHE_CONTROL), SystemTime::now())
    }

    fn save(
        &self,
        writer: &TileWriter,
        source: &TileSource,
        key: &TileKey,
        bytes: &Bytes,
        expires_at: SystemTime,
    ) {
        if let Err(err) = writer.save_file(source, key, &mut &bytes[..]) {
            warn!("Failed to save tile {key} to disk cache: {err}");
            return;
        }

        let modified = self.expiration.file_timestamp(expires_at);
        if let Err(err) = writer.set_modified(source, key, modified) {
            warn!("Failed to set expiry of tile {key} in disk cache: {err}");
        }
    }
}

impl TileModule for NetworkDownloader {
    fn name(&self) -> &str {
        "downloader"
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Network
    }

    fn min_zoom(&self) -> u32 {
        self.source.read().min_zoom()
    }

    fn max_zoom(&self) -> u32 {
        self.source.read().max_zoom()
    }

    fn set_tile_source(&self, source: Arc<TileSource>) {
        *self.source.write() = source;
    }

    fn load(&self, key: TileKey) -> Result<TileLoad, TileError> {
        if let Some(availability) = &self.availability {
            if !availability.is_network_available() {
                return Err(TileError::NetworkUnavailable);
            }
        }

        let source = self.source.read().clone();
        if !source.contains_zoom(&key) {
            return Err(TileError::NotFound);
        }

        let (bytes, expires_at) = self.download(&source, &key)?;

        if let Some(writer) = &self.writer {
            self.save(writer, &source, &key, &bytes, expires_at);
        }

        Ok(TileLoad::Fresh(source.decode(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FilesystemProvider;
    use crate::tests::{init_logger, png_bytes, TestServer};
    use assert_matches::assert_matches;
    use std::collections::HashMap;
    use std::time::Duration;

    fn server() -> TestServer {
        init_logger();
        let mut tiles = HashMap::new();
        tiles.insert("/10/5/3.png".to_string(), png_bytes(4, 4));
        tiles.insert("/10/5/4.png".to_string(), b"not an image".to_vec());
        TestServer::start(tiles)
    }

    fn downloader(template: &str) -> NetworkDownloader {
        let source = Arc::new(TileSource::new("Test", template));
        NetworkDownloader::new(source, &TileCacheConfig::default()).expect("client")
    }

    #[test]
    fn downloads_and_saves_tile() {
        let server = server();
        let dir = tempfile::tempdir().expect("temp dir");
        let writer = TileWriter::new(dir.path(), &TileCacheConfig::default()).expect("writer");
        assert!(writer.wait_ready(Duration::from_secs(5)));

        let downloader = downloader(&server.url_template()).with_writer(writer.clone());
        let key = TileKey::new(10, 5, 3);
        assert_matches!(downloader.load(key), Ok(TileLoad::Fresh(_)));

        assert_eq!(server.requests(), vec!["/10/5/3.png"]);
        assert!(dir.path().join("Test/10/5/3.png").is_file());
        assert_eq!(writer.usage().used(), png_bytes(4, 4).len() as u64);
    }

    #[test]
    fn missing_tile_is_not_found() {
        let server = server();
        let downloader = downloader(&server.url_template());
        assert_matches!(downloader.load(TileKey::new(10, 0, 0)), Err(TileError::NotFound));
    }

    #[test]
    fn invalid_image_is_decode_error() {
        let server = server();
        let downloader = downloader(&server.url_template());
        assert_matches!(downloader.load(TileKey::new(10, 5, 4)), Err(TileError::ImageDecode(_)));
    }

    #[test]
    fn out_of_zoom_range_is_not_requested() {
        let server = server();
        let downloader = downloader(&server.url_template());
        assert_matches!(downloader.load(TileKey::new(20, 0, 0)), Err(TileError::NotFound));
        assert!(server.requests().is_empty());
    }

    #[test]
    fn unavailable_network_fails_fast() {
        let server = server();
        let downloader = downloader(&server.url_template()).with_availability(|| false);
        let err = downloader.load(TileKey::new(10, 5, 3)).expect_err("must fail");

        assert_matches!(err, TileError::NetworkUnavailable);
        assert!(!err.cannot_continue());
        assert!(server.requests().is_empty());
    }

    #[test]
    fn refused_connection_cannot_continue() {
        init_logger();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bound");
        let addr = listener.local_addr().expect("address");
        drop(listener);

        let downloader = downloader(&format!("http://{addr}/{{z}}/{{x}}/{{y}}.png"));
        let err = downloader.load(TileKey::new(1, 0, 0)).expect_err("must fail");
        assert_matches!(err, TileError::HostUnreachable(_));
        assert!(err.cannot_continue());
    }

    fn saved_with_headers(headers: &[(&str, &str)]) -> (tempfile::TempDir, TileKey) {
        init_logger();
        let key = TileKey::new(10, 5, 3);
        let server = TestServer::start_with_headers(
            HashMap::from([("/10/5/3.png".to_string(), png_bytes(4, 4))]),
            headers,
        );
        let dir = tempfile::tempdir().expect("temp dir");
        let writer = TileWriter::new(dir.path(), &TileCacheConfig::default()).expect("writer");

        let downloader = downloader(&server.url_template()).with_writer(writer);
        assert_matches!(downloader.load(key), Ok(TileLoad::Fresh(_)));
        (dir, key)
    }

    fn cached(dir: &tempfile::TempDir, key: TileKey) -> TileLoad {
        let source = Arc::new(TileSource::new("Test", "http://localhost/{z}/{x}/{y}.png"));
        FilesystemProvider::new(dir.path(), source, &TileCacheConfig::default())
            .load(key)
            .expect("cached tile")
    }

    #[test]
    fn max_age_header_sets_expiry_of_saved_tile() {
        let (dir, key) = saved_with_headers(&[("Cache-Control", "public, max-age=3600")]);

        let modified = std::fs::metadata(dir.path().join("Test/10/5/3.png"))
            .and_then(|metadata| metadata.modified())
            .expect("modified time");
        let expected = SystemTime::now() + Duration::from_secs(3600)
            - TileCacheConfig::default().tile_max_age;
        let diff = match expected.duration_since(modified) {
            Ok(diff) => diff,
            Err(err) => err.duration(),
        };
        assert!(diff < Duration::from_secs(60), "modified time is off by {diff:?}");
        assert_matches!(cached(&dir, key), TileLoad::Fresh(_));
    }

    #[test]
    fn expired_header_makes_saved_tile_expired() {
        let (dir, key) = saved_with_headers(&[("Expires", "Fri, 19 Oct 2018 17:47:00 GMT")]);
        assert_matches!(cached(&dir, key), TileLoad::Expired(_));

        let (dir, key) = saved_with_headers(&[("Cache-Control", "max-age=0")]);
        assert_matches!(cached(&dir, key), TileLoad::Expired(_));
    }

    #[test]
    fn tile_without_expiry_headers_is_fresh_for_max_age() {
        let (dir, key) = saved_with_headers(&[]);
        assert_matches!(cached(&dir, key), TileLoad::Fresh(_));
    }
}
