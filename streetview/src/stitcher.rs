//! Assembly of fetched tiles into a single panorama image.

use image::{imageops, Rgb, RgbImage};

use crate::tile_grid::{TileCoordinate, TileGrid};

/// Colour of canvas regions no tile was placed on.
pub const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

/// Pixel buffer covering the whole tile grid.
///
/// The canvas is as large as the full grid, which can exceed the panorama because the last row and
/// column of tiles are padded. [`Canvas::finish`] trims the padding.
pub struct Canvas {
    grid: TileGrid,
    image: RgbImage,
    placed: usize,
}

impl Canvas {
    /// Allocates a canvas for `grid` filled with [`BACKGROUND`].
    pub fn new(grid: TileGrid) -> Self {
        Self::with_background(grid, BACKGROUND)
    }

    /// Allocates a canvas for `grid` filled with `background`.
    pub fn with_background(grid: TileGrid, background: Rgb<u8>) -> Self {
        Self {
            image: RgbImage::from_pixel(grid.canvas_width(), grid.canvas_height(), background),
            grid,
            placed: 0,
        }
    }

    /// Grid this canvas was allocated for.
    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Number of tiles placed so far.
    pub fn placed(&self) -> usize {
        self.placed
    }

    /// Copies `tile` to its position in the grid.
    ///
    /// Tiles that are smaller than the nominal tile size (grid edges) are copied as is, larger
    /// ones are clipped to the canvas. Coordinates outside the grid are ignored.
    pub fn place(&mut self, coord: TileCoordinate, tile: &RgbImage) {
        if !self.grid.contains(coord) {
            log::warn!(
                "Ignoring tile {coord} outside of the {}x{} grid",
                self.grid.tiles_across,
                self.grid.tiles_down
            );
            return;
        }

        let (x, y) = self.grid.tile_origin(coord);
        imageops::replace(&mut self.image, tile, i64::from(x), i64::from(y));
        self.placed += 1;
    }

    /// Crops the padding and returns the panorama of exactly `scaled_width` x `scaled_height`.
    pub fn finish(self) -> RgbImage {
        let TileGrid {
            scaled_width,
            scaled_height,
            ..
        } = self.grid;

        if self.image.dimensions() == (scaled_width, scaled_height) {
            return self.image;
        }
        imageops::crop_imm(&self.image, 0, 0, scaled_width, scaled_height).to_image()
    }
}

/// Stitches the given tiles into a panorama. Tiles absent from `tiles` stay background.
pub fn stitch<'a>(
    grid: TileGrid,
    tiles: impl IntoIterator<Item = (TileCoordinate, &'a RgbImage)>,
) -> RgbImage {
    let mut canvas = Canvas::new(grid);
    for (coord, tile) in tiles {
        canvas.place(coord, tile);
    }
    canvas.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile_grid::QualityTier;

    fn solid(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    #[test]
    fn output_has_exact_panorama_size() {
        // 1000x600 native at medium: 500x300 scaled, 2x2 tiles of 256 with padding.
        let grid = TileGrid::plan(1000, 600, 256, 256, QualityTier::Medium);
        assert_eq!((grid.canvas_width(), grid.canvas_height()), (512, 512));

        let tiles: Vec<_> = grid
            .coordinates()
            .map(|coord| (coord, solid(256, 256, 100)))
            .collect();
        let image = stitch(grid, tiles.iter().map(|(c, t)| (*c, t)));

        assert_eq!(image.dimensions(), (500, 300));
        assert!(image.pixels().all(|p| *p == Rgb([100, 100, 100])));
    }

    #[test]
    fn tiles_land_at_grid_offsets() {
        let grid = TileGrid::plan(40, 20, 10, 10, QualityTier::High);
        let mut canvas = Canvas::new(grid);
        for coord in grid.coordinates() {
            let value = (coord.row * 4 + coord.column) as u8 * 10;
            canvas.place(coord, &solid(10, 10, value));
        }
        assert_eq!(canvas.placed(), 8);

        let image = canvas.finish();
        assert_eq!(image.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(15, 5), &Rgb([10, 10, 10]));
        assert_eq!(image.get_pixel(39, 9), &Rgb([30, 30, 30]));
        assert_eq!(image.get_pixel(0, 10), &Rgb([40, 40, 40]));
        assert_eq!(image.get_pixel(39, 19), &Rgb([70, 70, 70]));
    }

    #[test]
    fn missing_tile_leaves_background() {
        let grid = TileGrid::plan(30, 20, 10, 10, QualityTier::High);
        let absent = TileCoordinate::new(1, 1);
        let tile = solid(10, 10, 255);
        let image = stitch(
            grid,
            grid.coordinates()
                .filter(|coord| *coord != absent)
                .map(|coord| (coord, &tile)),
        );

        assert_eq!(image.dimensions(), (30, 20));
        for (x, y, pixel) in image.enumerate_pixels() {
            let inside_gap = (10..20).contains(&x) && (10..20).contains(&y);
            let expected = if inside_gap { BACKGROUND } else { Rgb([255, 255, 255]) };
            assert_eq!(*pixel, expected, "pixel ({x}, {y})");
        }
    }

    #[test]
    fn short_edge_tiles_and_custom_background() {
        let grid = TileGrid::plan(25, 10, 10, 10, QualityTier::High);
        let background = Rgb([9, 9, 9]);
        let mut canvas = Canvas::with_background(grid, background);
        canvas.place(TileCoordinate::new(0, 0), &solid(10, 10, 1));
        canvas.place(TileCoordinate::new(1, 0), &solid(10, 10, 2));
        canvas.place(TileCoordinate::new(2, 0), &solid(5, 10, 3));
        canvas.place(TileCoordinate::new(3, 0), &solid(10, 10, 4));

        let image = canvas.finish();
        assert_eq!(image.dimensions(), (25, 10));
        assert_eq!(image.get_pixel(24, 9), &Rgb([3, 3, 3]));
    }

    #[test]
    fn oversized_tile_is_clipped() {
        let grid = TileGrid::plan(20, 10, 10, 10, QualityTier::High);
        let mut canvas = Canvas::new(grid);
        canvas.place(TileCoordinate::new(1, 0), &solid(30, 30, 50));
        let image = canvas.finish();
        assert_eq!(image.dimensions(), (20, 10));
        assert_eq!(image.get_pixel(19, 9), &Rgb([50, 50, 50]));
        assert_eq!(image.get_pixel(9, 9), &BACKGROUND);
    }
}
