//! Street View panorama downloader.
//!
//! A panorama is served by the tile service as a grid of image tiles at several zoom levels. This
//! crate resolves a map link to a panorama, plans the tile grid for a [`QualityTier`], fetches the
//! tiles concurrently, stitches them into one equirectangular image and offers the crops, filters
//! and metadata needed to save it as a photo sphere.
//!
//! ```ignore
//! let downloader = Downloader::builder()
//!     .with_api_key(api_key)
//!     .with_quality(QualityTier::High)
//!     .build()?;
//! let panorama = downloader.download_from_url(link).await?;
//! let view = ViewOptions { fov: Some(120.0), ..Default::default() }
//!     .apply(panorama.image, panorama.metadata.url_yaw);
//! ```

pub mod downloader;
pub mod equirect;
pub mod error;
pub mod fetcher;
pub mod metadata;
pub mod processing;
pub mod resolver;
pub mod retry;
pub mod service;
pub mod session;
pub mod stitcher;
pub mod tile_grid;
pub mod xmp;

#[cfg(test)]
mod testing;

pub use downloader::{DownloadConfig, Downloader, DownloaderBuilder, Panorama};
pub use equirect::{ClipDirection, ViewOptions};
pub use error::{FetchError, StreetViewError};
pub use fetcher::CancelToken;
pub use metadata::{MetadataQuery, PanoramaMetadata};
pub use processing::{Adjustments, ImageFilter};
pub use resolver::{looks_like_street_view_link, resolve_link, PanoramaLink};
pub use retry::RetryPolicy;
pub use service::TileService;
#[cfg(feature = "http")]
pub use service::HttpTileService;
pub use tile_grid::{QualityTier, TileCoordinate, TileGrid};
