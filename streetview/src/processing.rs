//! Colour filters and resizing applied to a finished panorama.

use std::fmt;
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

const SEPIA: [[f32; 3]; 3] = [
    [0.393, 0.769, 0.189],
    [0.349, 0.686, 0.168],
    [0.272, 0.534, 0.131],
];

/// Adjustments applied on top of the sepia tone by [`ImageFilter::Vintage`].
pub const VINTAGE: Adjustments = Adjustments {
    brightness: 0.95,
    contrast: 0.85,
    saturation: 0.8,
};

/// Artistic colour filter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFilter {
    /// Leave colours unchanged.
    #[default]
    None,
    /// Black and white.
    #[serde(rename = "bw")]
    Grayscale,
    /// Warm brown tone.
    Sepia,
    /// Sepia with muted brightness, contrast and saturation.
    Vintage,
}

impl ImageFilter {
    /// Short name used on the command line and in file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Grayscale => "bw",
            Self::Sepia => "sepia",
            Self::Vintage => "vintage",
        }
    }

    /// Applies the filter, returning the input unchanged for [`ImageFilter::None`].
    pub fn apply(self, image: RgbImage) -> RgbImage {
        match self {
            Self::None => image,
            Self::Grayscale => grayscale(&image),
            Self::Sepia => sepia(&image),
            Self::Vintage => VINTAGE.apply(sepia(&image)),
        }
    }
}

impl fmt::Display for ImageFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "bw" | "grayscale" | "greyscale" => Ok(Self::Grayscale),
            "sepia" => Ok(Self::Sepia),
            "vintage" => Ok(Self::Vintage),
            other => Err(format!("unknown filter '{other}'")),
        }
    }
}

/// Brightness, contrast and saturation factors. 1.0 leaves the property unchanged, 0.0 reduces
/// it fully (black, flat grey, grayscale), values above 1.0 enhance it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adjustments {
    /// Blend factor against black.
    pub brightness: f32,
    /// Blend factor against the mean grey level.
    pub contrast: f32,
    /// Blend factor against the grayscale image.
    pub saturation: f32,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
        }
    }
}

impl Adjustments {
    /// Returns true if applying the adjustments would not change any pixel.
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Applies brightness, then contrast, then saturation.
    pub fn apply(&self, mut image: RgbImage) -> RgbImage {
        if self.brightness != 1.0 {
            blend_towards(&mut image, self.brightness, |_| [0.0; 3]);
        }

        if self.contrast != 1.0 {
            let grey = mean_luma(&image).round();
            blend_towards(&mut image, self.contrast, |_| [grey; 3]);
        }

        if self.saturation != 1.0 {
            blend_towards(&mut image, self.saturation, |pixel| {
                [f32::from(luma(pixel)); 3]
            });
        }

        image
    }
}

/// ITU-R 601 luma of a pixel.
pub fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    let value = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
    value.round().clamp(0.0, 255.0) as u8
}

/// Converts to gray while keeping three channels.
pub fn grayscale(image: &RgbImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let l = luma(image.get_pixel(x, y));
        Rgb([l, l, l])
    })
}

/// Applies the classic sepia colour matrix.
pub fn sepia(image: &RgbImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0.map(f32::from);
        Rgb(SEPIA.map(|[kr, kg, kb]| to_channel(kr * r + kg * g + kb * b)))
    })
}

/// Scales the image down to `max_width`, keeping the aspect ratio.
///
/// Images that already fit are returned unchanged. The second value tells if a resize happened.
pub fn resize_to_max_width(image: RgbImage, max_width: u32) -> (RgbImage, bool) {
    let (width, height) = image.dimensions();
    if max_width == 0 || width <= max_width {
        return (image, false);
    }

    let scale = f64::from(max_width) / f64::from(width);
    let new_height = ((f64::from(height) * scale) as u32).max(1);
    log::info!("Resizing {width}x{height} to {max_width}x{new_height}");
    (
        imageops::resize(&image, max_width, new_height, FilterType::Lanczos3),
        true,
    )
}

fn mean_luma(image: &RgbImage) -> f32 {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = image.pixels().map(|p| u64::from(luma(p))).sum();
    (sum as f64 / count as f64) as f32
}

fn blend_towards(image: &mut RgbImage, factor: f32, degenerate: impl Fn(&Rgb<u8>) -> [f32; 3]) {
    for pixel in image.pixels_mut() {
        let base = degenerate(pixel);
        let mut channels = [0u8; 3];
        for (i, channel) in channels.iter_mut().enumerate() {
            let value = f32::from(pixel.0[i]);
            *channel = to_channel(base[i] + factor * (value - base[i]));
        }
        *pixel = Rgb(channels);
    }
}

fn to_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
