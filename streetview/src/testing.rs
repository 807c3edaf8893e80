//! In-memory tile service used by the unit tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use serde_json::json;

use crate::error::FetchError;
use crate::metadata::MetadataQuery;
use crate::service::TileService;
use crate::tile_grid::TileCoordinate;

#[derive(Clone, Copy)]
enum Failure {
    Always(u16),
    Times(u16, usize),
    Corrupt,
}

/// Serves solid-colour PNG tiles and records how it was called.
pub(crate) struct MockTileService {
    tile_width: u32,
    tile_height: u32,
    delay: Duration,
    metadata: serde_json::Value,
    metadata_failure: Option<u16>,
    session_failure: Option<(usize, u16)>,
    failures: HashMap<TileCoordinate, Failure>,
    sessions: AtomicUsize,
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    metadata_requests: AtomicUsize,
    attempts: Mutex<HashMap<TileCoordinate, usize>>,
}

impl MockTileService {
    pub(crate) fn new(tile_width: u32, tile_height: u32) -> Self {
        Self {
            tile_width,
            tile_height,
            delay: Duration::ZERO,
            metadata: json!({
                "panoId": "MOCKPANO",
                "imageWidth": tile_width * 4,
                "imageHeight": tile_height * 2,
                "tileWidth": tile_width,
                "tileHeight": tile_height,
                "date": "2021-06",
                "copyright": "From the Owner"
            }),
            metadata_failure: None,
            session_failure: None,
            failures: HashMap::new(),
            sessions: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            metadata_requests: AtomicUsize::new(0),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub(crate) fn fail_metadata(mut self, status: u16) -> Self {
        self.metadata_failure = Some(status);
        self
    }

    /// Session creation answers `status` once `allowed` sessions have been handed out.
    pub(crate) fn fail_sessions_after(mut self, allowed: usize, status: u16) -> Self {
        self.session_failure = Some((allowed, status));
        self
    }

    /// Every request for `coord` answers `status`.
    pub(crate) fn fail_tile(mut self, coord: TileCoordinate, status: u16) -> Self {
        self.failures.insert(coord, Failure::Always(status));
        self
    }

    /// The first `times` requests for `coord` answer `status`.
    pub(crate) fn fail_tile_times(mut self, coord: TileCoordinate, status: u16, times: usize) -> Self {
        self.failures.insert(coord, Failure::Times(status, times));
        self
    }

    /// Requests for `coord` succeed but return bytes that are not an image.
    pub(crate) fn corrupt_tile(mut self, coord: TileCoordinate) -> Self {
        self.failures.insert(coord, Failure::Corrupt);
        self
    }

    pub(crate) fn tile_color(coord: TileCoordinate) -> Rgb<u8> {
        Rgb([
            (coord.column as u8).wrapping_mul(40).wrapping_add(10),
            (coord.row as u8).wrapping_mul(40).wrapping_add(10),
            200,
        ])
    }

    pub(crate) fn tile_requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub(crate) fn metadata_requests(&self) -> usize {
        self.metadata_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn sessions_created(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn attempts(&self, coord: TileCoordinate) -> usize {
        self.attempts.lock().get(&coord).copied().unwrap_or(0)
    }

    pub(crate) fn reset_counters(&self) {
        self.requests.store(0, Ordering::SeqCst);
        self.in_flight.store(0, Ordering::SeqCst);
        self.max_in_flight.store(0, Ordering::SeqCst);
        self.attempts.lock().clear();
    }

    fn encode_tile(&self, coord: TileCoordinate) -> Bytes {
        let tile = RgbImage::from_pixel(self.tile_width, self.tile_height, Self::tile_color(coord));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(tile)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .expect("png encoding");
        Bytes::from(buf)
    }
}

#[async_trait::async_trait]
impl TileService for MockTileService {
    async fn create_session(&self) -> Result<String, FetchError> {
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        match self.session_failure {
            Some((allowed, status)) if n > allowed => Err(FetchError::Status {
                status,
                body: "session refused".into(),
            }),
            _ => Ok(format!("session-{n}")),
        }
    }

    async fn fetch_metadata(
        &self,
        _session: &str,
        _query: &MetadataQuery,
    ) -> Result<Bytes, FetchError> {
        self.metadata_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.metadata_failure {
            return Err(FetchError::Status {
                status,
                body: "metadata unavailable".into(),
            });
        }
        Ok(Bytes::from(self.metadata.to_string()))
    }

    async fn fetch_tile(
        &self,
        _session: &str,
        _pano_id: &str,
        _zoom: u8,
        coord: TileCoordinate,
    ) -> Result<Bytes, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.attempts.lock();
            let entry = attempts.entry(coord).or_insert(0);
            *entry += 1;
            *entry
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failed = |status: u16| {
            Err(FetchError::Status {
                status,
                body: String::new(),
            })
        };
        match self.failures.get(&coord) {
            Some(Failure::Always(status)) => failed(*status),
            Some(Failure::Times(status, times)) if attempt <= *times => failed(*status),
            Some(Failure::Corrupt) => Ok(Bytes::from_static(b"not an image")),
            _ => Ok(self.encode_tile(coord)),
        }
    }
}
