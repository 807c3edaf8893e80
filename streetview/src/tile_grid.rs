//! Tile grid planning.
//!
//! The tile service serves a panorama as a grid of fixed-size tiles at several zoom levels. Zoom
//! level [`NATIVE_ZOOM`] is the full capture resolution, every level below halves both
//! dimensions. [`TileGrid::plan`] is the single place where the grid is derived from the
//! panorama geometry, so tile counts shown before a download always match what is fetched.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::metadata::PanoramaMetadata;

/// Zoom level at which the service returns tiles at full capture resolution.
pub const NATIVE_ZOOM: u8 = 5;

/// User facing resolution tier.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    /// Zoom level 3, one quarter of the native width.
    Low,
    /// Zoom level 4, one half of the native width.
    #[default]
    Medium,
    /// Zoom level 5, native resolution.
    High,
}

impl QualityTier {
    /// All tiers from lowest to highest.
    pub const ALL: [QualityTier; 3] = [Self::Low, Self::Medium, Self::High];

    /// Zoom level requested from the tile service.
    pub fn zoom(self) -> u8 {
        match self {
            Self::Low => 3,
            Self::Medium => 4,
            Self::High => NATIVE_ZOOM,
        }
    }

    /// Factor the native dimensions are divided by at this tier.
    pub fn scale_factor(self) -> u32 {
        1 << (NATIVE_ZOOM - self.zoom())
    }

    /// Lowercase name of the tier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown quality tier '{other}'")),
        }
    }
}

/// Zero-based position of a tile in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoordinate {
    /// Column, counted from the left edge (yaw 0).
    pub column: u32,
    /// Row, counted from the top edge.
    pub row: u32,
}

impl TileCoordinate {
    /// Creates a new coordinate.
    pub const fn new(column: u32, row: u32) -> Self {
        Self { column, row }
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.column, self.row)
    }
}

/// Tile layout of one panorama at one quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileGrid {
    /// Number of tile columns.
    pub tiles_across: u32,
    /// Number of tile rows.
    pub tiles_down: u32,
    /// Width of the panorama at the planned zoom level.
    pub scaled_width: u32,
    /// Height of the panorama at the planned zoom level.
    pub scaled_height: u32,
    /// Width of a single tile.
    pub tile_width: u32,
    /// Height of a single tile.
    pub tile_height: u32,
    /// Zoom level the tiles are requested at.
    pub zoom: u8,
}

impl TileGrid {
    /// Plans the grid for a panorama of `full_width` x `full_height` native pixels split into
    /// `tile_width` x `tile_height` tiles.
    ///
    /// Tile dimensions must be positive; [`PanoramaMetadata`] guarantees that for service
    /// responses.
    pub fn plan(
        full_width: u32,
        full_height: u32,
        tile_width: u32,
        tile_height: u32,
        quality: QualityTier,
    ) -> Self {
        debug_assert!(tile_width > 0 && tile_height > 0);

        let scale = quality.scale_factor();
        let scaled_width = full_width / scale;
        let scaled_height = full_height / scale;

        Self {
            tiles_across: scaled_width.div_ceil(tile_width.max(1)),
            tiles_down: scaled_height.div_ceil(tile_height.max(1)),
            scaled_width,
            scaled_height,
            tile_width,
            tile_height,
            zoom: quality.zoom(),
        }
    }

    /// Plans the grid for the given panorama.
    pub fn for_metadata(metadata: &PanoramaMetadata, quality: QualityTier) -> Self {
        Self::plan(
            metadata.image_width,
            metadata.image_height,
            metadata.tile_width,
            metadata.tile_height,
            quality,
        )
    }

    /// Total number of tiles in the grid.
    pub fn tile_count(&self) -> usize {
        self.tiles_across as usize * self.tiles_down as usize
    }

    /// Width of the canvas covered by the full grid, including padding.
    pub fn canvas_width(&self) -> u32 {
        self.tiles_across.saturating_mul(self.tile_width)
    }

    /// Height of the canvas covered by the full grid, including padding.
    pub fn canvas_height(&self) -> u32 {
        self.tiles_down.saturating_mul(self.tile_height)
    }

    /// Pixel offset of the top-left corner of the tile.
    pub fn tile_origin(&self, coord: TileCoordinate) -> (u32, u32) {
        (coord.column * self.tile_width, coord.row * self.tile_height)
    }

    /// Returns true if the coordinate lies inside the grid.
    pub fn contains(&self, coord: TileCoordinate) -> bool {
        coord.column < self.tiles_across && coord.row < self.tiles_down
    }

    /// All coordinates of the grid, row by row.
    pub fn coordinates(&self) -> impl Iterator<Item = TileCoordinate> + '_ {
        (0..self.tiles_down).flat_map(move |row| {
            (0..self.tiles_across).map(move |column| TileCoordinate::new(column, row))
        })
    }
}
