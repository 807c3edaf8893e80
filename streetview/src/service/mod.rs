//! Access to the remote tile service.

use bytes::Bytes;

use crate::error::FetchError;
use crate::metadata::MetadataQuery;
use crate::tile_grid::TileCoordinate;

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub use http::HttpTileService;

/// Address of the public tile service.
pub const DEFAULT_BASE_URL: &str = "https://tile.googleapis.com";

/// Remote service serving panorama metadata and tiles.
///
/// Every method performs exactly one request. Retries, session caching and concurrency are
/// handled by the caller, which keeps implementations trivial to replace in tests.
#[async_trait::async_trait]
pub trait TileService: Send + Sync {
    /// Creates a new session token.
    async fn create_session(&self) -> Result<String, FetchError>;

    /// Loads the raw metadata response for a panorama.
    async fn fetch_metadata(
        &self,
        session: &str,
        query: &MetadataQuery,
    ) -> Result<Bytes, FetchError>;

    /// Loads the encoded image of a single tile.
    async fn fetch_tile(
        &self,
        session: &str,
        pano_id: &str,
        zoom: u8,
        coord: TileCoordinate,
    ) -> Result<Bytes, FetchError>;
}
