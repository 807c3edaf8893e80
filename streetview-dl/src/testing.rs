use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::{ImageOutputFormat, Rgb, RgbImage};
use streetview::{
    Adjustments, Downloader, FetchError, ImageFilter, MetadataQuery, QualityTier, TileCoordinate,
    TileService, ViewOptions,
};

use crate::cli::OutputFormat;
use crate::pipeline::{OutputSettings, Pipeline};

pub const LINK: &str = "https://www.google.com/maps/@34.0,-118.0,3a,75y,90t/data=!3m7!1e1!3m5!1sFAKEPANO!2e0!6shttps:%2F%2Fstreetviewpixels-pa.googleapis.com%2Fv1%2Fthumbnail%3Fpanoid%3DFAKEPANO%26yaw%3D90%26pitch%3D0!7i16384!8i8192";

/// Serves a 64x32 panorama in 16x16 tiles whose red channel encodes the tile column.
pub struct FakeService {
    pub tiles: AtomicUsize,
    missing: Option<TileCoordinate>,
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            tiles: AtomicUsize::new(0),
            missing: None,
        }
    }

    /// Answers every request for `coord` with 404.
    pub fn with_missing(coord: TileCoordinate) -> Self {
        Self {
            tiles: AtomicUsize::new(0),
            missing: Some(coord),
        }
    }

    pub fn tile_requests(&self) -> usize {
        self.tiles.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TileService for FakeService {
    async fn create_session(&self) -> Result<String, FetchError> {
        Ok("session".into())
    }

    async fn fetch_metadata(
        &self,
        _session: &str,
        _query: &MetadataQuery,
    ) -> Result<Bytes, FetchError> {
        Ok(Bytes::from_static(
            br#"{"panoId":"FAKEPANO","imageWidth":64,"imageHeight":32,"tileWidth":16,"tileHeight":16,"date":"2023-05","copyright":"From the Owner"}"#,
        ))
    }

    async fn fetch_tile(
        &self,
        _session: &str,
        _pano_id: &str,
        _zoom: u8,
        coord: TileCoordinate,
    ) -> Result<Bytes, FetchError> {
        self.tiles.fetch_add(1, Ordering::SeqCst);
        if Some(coord) == self.missing {
            return Err(FetchError::Status {
                status: 404,
                body: String::new(),
            });
        }
        let tile = RgbImage::from_pixel(16, 16, Rgb([coord.column as u8 * 60, 100, 100]));
        let mut buf = Vec::new();
        tile.write_to(&mut std::io::Cursor::new(&mut buf), ImageOutputFormat::Png)
            .map_err(|err| FetchError::Decode(err.to_string()))?;
        Ok(Bytes::from(buf))
    }
}

/// JPEG output without any processing into `dir`.
pub fn settings(dir: &Path) -> OutputSettings {
    OutputSettings {
        format: OutputFormat::Jpg,
        jpeg_quality: 90,
        max_width: None,
        view: ViewOptions::default(),
        filter: ImageFilter::None,
        adjustments: Adjustments::default(),
        write_metadata: false,
        metadata_only: false,
        xmp: true,
        output_dir: Some(dir.to_path_buf()),
    }
}

pub fn pipeline(service: Arc<FakeService>, settings: OutputSettings) -> Pipeline {
    let downloader = Downloader::builder()
        .with_service(service)
        .with_quality(QualityTier::High)
        .with_backoff(Duration::ZERO)
        .build()
        .expect("service is given");
    Pipeline::new(downloader, settings)
}
