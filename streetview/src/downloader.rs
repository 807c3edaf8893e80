//! High level panorama download: link resolution, metadata, tiles and stitching.

use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;

use crate::error::StreetViewError;
use crate::fetcher::{resolve_concurrency, CancelToken, TileFetcher};
use crate::metadata::{MetadataQuery, PanoramaMetadata};
use crate::resolver::resolve_link;
use crate::retry::RetryPolicy;
use crate::service::{TileService, DEFAULT_BASE_URL};
use crate::session::SessionStore;
use crate::stitcher::Canvas;
use crate::tile_grid::{QualityTier, TileCoordinate, TileGrid};

/// Settings of a [`Downloader`].
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadConfig {
    /// Resolution tier to download.
    pub quality: QualityTier,
    /// Maximum parallel tile requests. 0 picks a value from the quality tier and core count.
    pub concurrency: usize,
    /// Timeout of a single request.
    pub timeout: Duration,
    /// Repetitions of a request failing with a transient error.
    pub retries: u32,
    /// Delay before the first repetition, doubled for every further one.
    pub backoff: Duration,
    /// Base address of the tile service.
    pub base_url: String,
    /// Language requested on session creation.
    pub language: String,
    /// Region requested on session creation.
    pub region: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            quality: QualityTier::default(),
            concurrency: 0,
            timeout: Duration::from_secs(30),
            retries: 3,
            backoff: Duration::from_millis(500),
            base_url: DEFAULT_BASE_URL.to_string(),
            language: "en-US".to_string(),
            region: "US".to_string(),
        }
    }
}

impl DownloadConfig {
    /// Retry policy derived from `retries` and `backoff`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            backoff: self.backoff,
        }
    }
}

/// Builder for [`Downloader`].
///
/// ```ignore
/// let downloader = Downloader::builder()
///     .with_api_key(key)
///     .with_quality(QualityTier::High)
///     .with_retries(5)
///     .build()?;
/// ```
#[derive(Default)]
pub struct DownloaderBuilder {
    config: DownloadConfig,
    api_key: Option<String>,
    service: Option<Arc<dyn TileService>>,
}

impl DownloaderBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all settings at once.
    pub fn with_config(mut self, config: DownloadConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the API key used by the HTTP tile service.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the resolution tier.
    pub fn with_quality(mut self, quality: QualityTier) -> Self {
        self.config.quality = quality;
        self
    }

    /// Sets the number of parallel tile requests, 0 for automatic.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Sets the timeout of a single request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets how often a transient failure is retried.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    /// Sets the initial retry delay.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Sets the base address of the tile service.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Uses the given service instead of the HTTP one. The API key and base address are ignored.
    pub fn with_service(mut self, service: Arc<dyn TileService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Builds the downloader.
    pub fn build(self) -> Result<Downloader, StreetViewError> {
        let service = match self.service {
            Some(service) => service,
            None => Self::http_service(&self.config, self.api_key)?,
        };

        Ok(Downloader {
            service,
            session: Arc::new(SessionStore::new()),
            config: self.config,
        })
    }

    #[cfg(feature = "http")]
    fn http_service(
        config: &DownloadConfig,
        api_key: Option<String>,
    ) -> Result<Arc<dyn TileService>, StreetViewError> {
        let api_key = api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| StreetViewError::InvalidConfig("API key is not set".into()))?;
        let service =
            crate::service::HttpTileService::new(api_key, config.base_url.clone(), config.timeout)
                .map_err(|err| StreetViewError::InvalidConfig(err.to_string()))?
                .with_locale(config.language.clone(), config.region.clone());
        Ok(Arc::new(service))
    }

    #[cfg(not(feature = "http"))]
    fn http_service(
        _config: &DownloadConfig,
        _api_key: Option<String>,
    ) -> Result<Arc<dyn TileService>, StreetViewError> {
        Err(StreetViewError::InvalidConfig(
            "no tile service given and the `http` feature is disabled".into(),
        ))
    }
}

/// Stitched panorama together with what was known about it.
#[derive(Debug, Clone)]
pub struct Panorama {
    /// Stitched image of exactly `grid.scaled_width` x `grid.scaled_height` pixels.
    pub image: RgbImage,
    /// Metadata the download was planned from.
    pub metadata: PanoramaMetadata,
    /// Grid that was fetched.
    pub grid: TileGrid,
    /// Tiles that could not be fetched. Their area is background filled.
    pub missing: Vec<TileCoordinate>,
}

impl Panorama {
    /// Returns true if every tile of the grid was fetched.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Fraction of tiles that were fetched, in `[0, 1]`.
    pub fn coverage(&self) -> f64 {
        let total = self.grid.tile_count();
        if total == 0 {
            return 1.0;
        }
        (total - self.missing.len()) as f64 / total as f64
    }
}

/// Downloads panoramas from a tile service.
///
/// One downloader keeps one session with the service for its whole lifetime.
pub struct Downloader {
    service: Arc<dyn TileService>,
    session: Arc<SessionStore>,
    config: DownloadConfig,
}

impl Downloader {
    /// Starts building a downloader.
    pub fn builder() -> DownloaderBuilder {
        DownloaderBuilder::new()
    }

    /// Settings of this downloader.
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Grid that [`Downloader::download`] fetches for `metadata`.
    pub fn plan(&self, metadata: &PanoramaMetadata) -> TileGrid {
        TileGrid::for_metadata(metadata, self.config.quality)
    }

    /// Looks up panorama metadata.
    pub async fn fetch_metadata(
        &self,
        query: &MetadataQuery,
    ) -> Result<PanoramaMetadata, StreetViewError> {
        let service = self.service.as_ref();
        let body = self
            .session
            .call(service, &self.config.retry_policy(), |token| async move {
                service.fetch_metadata(&token, query).await
            })
            .await?;

        let metadata = PanoramaMetadata::from_json(&body)?;
        log::debug!(
            "Panorama {} is {}x{} with {}x{} tiles",
            metadata.pano_id,
            metadata.image_width,
            metadata.image_height,
            metadata.tile_width,
            metadata.tile_height
        );
        Ok(metadata)
    }

    /// Resolves a map link and looks up the metadata of the panorama it points at. The viewing
    /// direction of the link is attached to the result.
    pub async fn resolve_url(&self, url: &str) -> Result<PanoramaMetadata, StreetViewError> {
        let link = resolve_link(url)?;
        log::info!("Resolved panorama {}", link.pano_id);

        let metadata = self
            .fetch_metadata(&MetadataQuery::ById(link.pano_id))
            .await?;
        Ok(metadata.with_view(link.yaw, link.pitch))
    }

    /// Downloads and stitches the panorama described by `metadata`.
    pub async fn download(&self, metadata: &PanoramaMetadata) -> Result<Panorama, StreetViewError> {
        self.download_with_cancel(metadata, &CancelToken::new())
            .await
    }

    /// Same as [`Downloader::download`], aborting with [`StreetViewError::Cancelled`] once
    /// `cancel` fires.
    pub async fn download_with_cancel(
        &self,
        metadata: &PanoramaMetadata,
        cancel: &CancelToken,
    ) -> Result<Panorama, StreetViewError> {
        let grid = self.plan(metadata);
        log::info!(
            "Downloading {} at {} quality: {}x{} pixels",
            metadata.pano_id,
            self.config.quality,
            grid.scaled_width,
            grid.scaled_height
        );

        self.session
            .token(self.service.as_ref(), &self.config.retry_policy())
            .await?;

        let fetcher = TileFetcher::new(
            Arc::clone(&self.service),
            Arc::clone(&self.session),
            self.config.retry_policy(),
            resolve_concurrency(self.config.concurrency, self.config.quality),
        );

        let mut canvas = Canvas::new(grid);
        let summary = fetcher
            .fetch_all(&metadata.pano_id, &grid, cancel, |coord, tile| {
                canvas.place(coord, &tile)
            })
            .await?;

        if !summary.missing.is_empty() {
            log::warn!(
                "{} of {} tiles are missing, their area is left black",
                summary.missing.len(),
                grid.tile_count()
            );
        }

        Ok(Panorama {
            image: canvas.finish(),
            metadata: metadata.clone(),
            grid,
            missing: summary.missing,
        })
    }

    /// Resolves `url` and downloads the panorama it points at.
    pub async fn download_from_url(&self, url: &str) -> Result<Panorama, StreetViewError> {
        let metadata = self.resolve_url(url).await?;
        self.download(&metadata).await
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use image::Rgb;

    use super::*;
    use crate::stitcher::BACKGROUND;
    use crate::testing::MockTileService;

    const LINK: &str = "https://www.google.com/maps/@34.0,-118.0,3a,75y,90t/data=!3m7!1e1!3m5!1sMOCKPANO!2e0!6shttps:%2F%2Fstreetviewpixels-pa.googleapis.com%2Fv1%2Fthumbnail%3Fpanoid%3DMOCKPANO%26w%3D203%26h%3D100%26yaw%3D123.5%26pitch%3D-2%26thumbfov%3D100!7i16384!8i8192";

    fn downloader(service: Arc<MockTileService>, quality: QualityTier) -> Downloader {
        Downloader::builder()
            .with_service(service)
            .with_quality(quality)
            .with_retries(2)
            .with_backoff(Duration::ZERO)
            .with_concurrency(3)
            .build()
            .unwrap()
    }

    #[test]
    fn default_config() {
        let config = DownloadConfig::default();
        assert_eq!(config.quality, QualityTier::Medium);
        assert_eq!(config.concurrency, 0);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.base_url, "https://tile.googleapis.com");
    }

    #[tokio::test]
    async fn complete_download() {
        let service = Arc::new(MockTileService::new(8, 8));
        let downloader = downloader(service.clone(), QualityTier::High);

        let metadata = downloader
            .fetch_metadata(&MetadataQuery::ById("MOCKPANO".into()))
            .await
            .unwrap();
        let panorama = downloader.download(&metadata).await.unwrap();

        assert_eq!(panorama.image.dimensions(), (32, 16));
        assert!(panorama.is_complete());
        assert_abs_diff_eq!(panorama.coverage(), 1.0);
        assert_eq!(
            panorama.image.get_pixel(9, 1),
            &MockTileService::tile_color(TileCoordinate::new(1, 0))
        );
        assert_eq!(
            panorama.image.get_pixel(31, 15),
            &MockTileService::tile_color(TileCoordinate::new(3, 1))
        );
        assert_eq!(service.tile_requests(), 8);
        assert_eq!(service.sessions_created(), 1);
    }

    #[tokio::test]
    async fn lower_quality_fetches_fewer_tiles() {
        let service = Arc::new(MockTileService::new(8, 8));
        let downloader = downloader(service.clone(), QualityTier::Medium);

        let metadata = downloader
            .fetch_metadata(&MetadataQuery::ById("MOCKPANO".into()))
            .await
            .unwrap();
        let grid = downloader.plan(&metadata);
        assert_eq!((grid.tiles_across, grid.tiles_down), (2, 1));

        let panorama = downloader.download(&metadata).await.unwrap();
        assert_eq!(panorama.image.dimensions(), (16, 8));
        assert_eq!(service.tile_requests(), 2);
    }

    #[tokio::test]
    async fn missing_tile_is_reported_and_left_black() {
        let gap = TileCoordinate::new(1, 1);
        let service = Arc::new(MockTileService::new(8, 8).fail_tile(gap, 404));
        let downloader = downloader(service, QualityTier::High);

        let panorama = downloader.download_from_url(LINK).await.unwrap();
        assert_eq!(panorama.image.dimensions(), (32, 16));
        assert!(!panorama.is_complete());
        assert_eq!(panorama.missing, vec![gap]);
        assert_abs_diff_eq!(panorama.coverage(), 0.875);
        assert_eq!(panorama.image.get_pixel(12, 12), &BACKGROUND);
        assert_ne!(panorama.image.get_pixel(4, 12), &Rgb([0, 0, 0]));
    }

    #[tokio::test]
    async fn url_view_is_attached() {
        let service = Arc::new(MockTileService::new(8, 8));
        let downloader = downloader(service.clone(), QualityTier::High);

        let metadata = downloader.resolve_url(LINK).await.unwrap();
        assert_eq!(metadata.pano_id, "MOCKPANO");
        assert_eq!(metadata.url_yaw, Some(123.5));
        assert_eq!(metadata.url_pitch, Some(-2.0));
        assert_eq!(service.metadata_requests(), 1);
    }

    #[tokio::test]
    async fn link_without_panorama_makes_no_requests() {
        let service = Arc::new(MockTileService::new(8, 8));
        let downloader = downloader(service.clone(), QualityTier::High);

        let result = downloader
            .download_from_url("https://www.google.com/maps/@34.0,-118.0,15z")
            .await;
        assert!(matches!(result, Err(StreetViewError::MalformedInput(_))));
        assert_eq!(service.metadata_requests(), 0);
        assert_eq!(service.sessions_created(), 0);
    }

    #[tokio::test]
    async fn forbidden_metadata_is_permanent() {
        let service = Arc::new(MockTileService::new(8, 8).fail_metadata(403));
        let downloader = downloader(service.clone(), QualityTier::High);

        let err = downloader
            .fetch_metadata(&MetadataQuery::ById("MOCKPANO".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StreetViewError::PermanentNetwork(_)));
        assert_eq!(err.http_status(), Some(403));
        assert_eq!(service.metadata_requests(), 1);
    }

    #[tokio::test]
    async fn unavailable_metadata_is_transient_after_retries() {
        let service = Arc::new(MockTileService::new(8, 8).fail_metadata(503));
        let downloader = downloader(service.clone(), QualityTier::High);

        let err = downloader
            .fetch_metadata(&MetadataQuery::ByLocation {
                lat: 34.0,
                lng: -118.0,
                radius: 50,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreetViewError::TransientNetwork { attempts: 3, .. }
        ));
        assert_eq!(service.metadata_requests(), 3);
    }

    #[tokio::test]
    async fn malformed_metadata_is_rejected() {
        let service = Arc::new(
            MockTileService::new(8, 8)
                .with_metadata(serde_json::json!({"panoId": "X", "imageWidth": 32})),
        );
        let downloader = downloader(service, QualityTier::High);

        let err = downloader
            .fetch_metadata(&MetadataQuery::ById("X".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StreetViewError::MalformedMetadata(_)));
    }

    #[tokio::test]
    async fn rejected_session_fails_the_download() {
        let service = Arc::new(MockTileService::new(8, 8).fail_sessions_after(0, 403));
        let downloader = downloader(service.clone(), QualityTier::High);
        let metadata = PanoramaMetadata::from_json(
            br#"{"panoId":"MOCKPANO","imageWidth":32,"imageHeight":16,"tileWidth":8,"tileHeight":8}"#,
        )
        .unwrap();

        let err = downloader.download(&metadata).await.unwrap_err();
        assert!(matches!(err, StreetViewError::SessionUnavailable(_)));
        assert_eq!(err.http_status(), Some(403));
        assert_eq!(service.tile_requests(), 0);
    }

    #[tokio::test]
    async fn unavailable_session_service_fails_after_retries() {
        let service = Arc::new(MockTileService::new(8, 8).fail_sessions_after(0, 503));
        let downloader = downloader(service.clone(), QualityTier::High);

        let err = downloader.download_from_url(LINK).await.unwrap_err();
        match err {
            StreetViewError::SessionUnavailable(inner) => assert!(matches!(
                *inner,
                StreetViewError::TransientNetwork { attempts: 3, .. }
            )),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(service.sessions_created(), 3);
        assert_eq!(service.metadata_requests(), 0);
    }

    #[tokio::test]
    async fn cancelled_download_has_no_image() {
        let service = Arc::new(MockTileService::new(8, 8));
        let downloader = downloader(service.clone(), QualityTier::High);
        let metadata = downloader.resolve_url(LINK).await.unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = downloader.download_with_cancel(&metadata, &cancel).await;
        assert!(matches!(result, Err(StreetViewError::Cancelled)));
        assert_eq!(service.tile_requests(), 0);
    }

    #[cfg(feature = "http")]
    #[test]
    fn http_service_requires_api_key() {
        let result = Downloader::builder().build();
        assert!(matches!(result, Err(StreetViewError::InvalidConfig(_))));

        let downloader = Downloader::builder()
            .with_api_key("AIzaSyExampleExampleExampleExample00")
            .with_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(downloader.config().timeout, Duration::from_secs(5));
    }
}
