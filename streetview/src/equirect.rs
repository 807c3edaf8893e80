//! Angle-aware crops of equirectangular panoramas.
//!
//! Horizontal pixel position is linear in yaw: `x = (yaw mod 360) / 360 * width`. A window that
//! crosses the 0°/360° seam is assembled from the two pieces on either side of it, so every crop
//! is seamless. All functions take the image by reference and return a new one.

use std::fmt;
use std::str::FromStr;

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

/// Horizontal extent of a full panorama in degrees.
pub const FULL_CIRCLE: f64 = 360.0;

/// Field of view forced by a directional clip.
pub const HALF_CIRCLE: f64 = 180.0;

/// Normalizes an angle in degrees to `[0, 360)`.
pub fn normalize_yaw(yaw: f64) -> f64 {
    let yaw = yaw.rem_euclid(FULL_CIRCLE);
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if yaw >= FULL_CIRCLE {
        0.0
    } else {
        yaw
    }
}

/// Horizontal pixel position of `yaw` in a panorama `width` pixels wide.
pub fn yaw_to_x(yaw: f64, width: u32) -> f64 {
    normalize_yaw(yaw) / FULL_CIRCLE * f64::from(width)
}

/// Width in pixels of a `fov` degree window of a panorama `width` pixels wide.
///
/// The result is at least one pixel and at most the full width.
pub fn fov_width(fov: f64, width: u32) -> u32 {
    if width == 0 {
        return 0;
    }
    let span = (fov / FULL_CIRCLE * f64::from(width)).round();
    if span.is_nan() {
        return width;
    }
    span.clamp(1.0, f64::from(width)) as u32
}

/// Extracts the `fov` degree window centred on `yaw`.
///
/// A field of view of 360° or more returns a copy of the input. The result always has the height
/// of the input.
pub fn crop_fov(image: &RgbImage, yaw: f64, fov: f64) -> RgbImage {
    let (width, height) = image.dimensions();
    if fov.is_nan() || fov >= FULL_CIRCLE || width == 0 {
        return image.clone();
    }

    let out_width = fov_width(fov, width);
    if out_width == width {
        return image.clone();
    }

    let center = yaw_to_x(yaw, width);
    let start = (center - f64::from(out_width) / 2.0).round() as i64;
    let start = start.rem_euclid(i64::from(width)) as u32;

    let first = out_width.min(width - start);
    if first == out_width {
        return imageops::crop_imm(image, start, 0, out_width, height).to_image();
    }

    let before_seam = imageops::crop_imm(image, start, 0, first, height).to_image();
    let after_seam = imageops::crop_imm(image, 0, 0, out_width - first, height).to_image();

    let mut result = RgbImage::new(out_width, height);
    imageops::replace(&mut result, &before_seam, 0, 0);
    imageops::replace(&mut result, &after_seam, i64::from(first), 0);
    result
}

/// Which half of the panorama a directional clip keeps.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipDirection {
    /// Keep everything.
    #[default]
    None,
    /// Keep the 180° behind the viewing direction.
    Left,
    /// Keep the 180° in front of the viewing direction.
    Right,
}

impl ClipDirection {
    /// Lowercase name of the direction.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    /// Yaw of the centre of the kept half, or `None` when nothing is clipped.
    pub fn center(self, yaw: f64) -> Option<f64> {
        match self {
            Self::None => None,
            Self::Right => Some(normalize_yaw(yaw)),
            Self::Left => Some(normalize_yaw(yaw + HALF_CIRCLE)),
        }
    }
}

impl fmt::Display for ClipDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClipDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(format!("unknown clip direction '{other}'")),
        }
    }
}

/// Keeps one 180° half of the panorama relative to `yaw`.
pub fn clip(image: &RgbImage, yaw: f64, direction: ClipDirection) -> RgbImage {
    match direction.center(yaw) {
        Some(center) => crop_fov(image, center, HALF_CIRCLE),
        None => image.clone(),
    }
}

/// Keeps the top `keep_fraction` of the rows.
///
/// The fraction is clamped to `[0, 1]`; 1 returns a copy of the input.
pub fn crop_bottom(image: &RgbImage, keep_fraction: f64) -> RgbImage {
    let (width, height) = image.dimensions();
    let keep_fraction = if keep_fraction.is_nan() {
        1.0
    } else {
        keep_fraction.clamp(0.0, 1.0)
    };
    if keep_fraction >= 1.0 {
        return image.clone();
    }

    let rows = (f64::from(height) * keep_fraction).floor() as u32;
    imageops::crop_imm(image, 0, 0, width, rows).to_image()
}

/// Geometric view settings applied to a stitched panorama.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewOptions {
    /// Horizontal field of view in degrees. `None` keeps the full circle.
    pub fov: Option<f64>,
    /// Directional clip. Takes precedence over `fov`.
    pub clip: ClipDirection,
    /// Fraction of rows to keep from the top.
    pub crop_bottom: Option<f64>,
}

impl ViewOptions {
    /// Field of view that [`ViewOptions::apply`] produces, if the view is cropped horizontally.
    pub fn effective_fov(&self) -> Option<f64> {
        if self.clip != ClipDirection::None {
            return Some(HALF_CIRCLE);
        }
        self.fov.filter(|fov| *fov < FULL_CIRCLE)
    }

    /// Returns true if no crop would be applied.
    pub fn is_identity(&self) -> bool {
        self.effective_fov().is_none() && self.crop_bottom.map_or(true, |f| f >= 1.0)
    }

    /// Applies the clip or field of view crop around `yaw`, then the bottom crop.
    ///
    /// Without a known viewing direction the angle crops cannot be placed and are skipped.
    pub fn apply(&self, mut image: RgbImage, yaw: Option<f64>) -> RgbImage {
        if let Some(fov) = self.effective_fov() {
            match (self.clip, yaw) {
                (_, None) => {
                    log::warn!(
                        "Link has no viewing direction, skipping clip and field of view crop"
                    );
                }
                (ClipDirection::None, Some(yaw)) => {
                    log::info!("Cropping to {fov}° field of view around yaw {yaw:.1}°");
                    image = crop_fov(&image, yaw, fov);
                }
                (direction, Some(yaw)) => {
                    if let Some(requested) = self.fov.filter(|f| *f != HALF_CIRCLE) {
                        log::warn!(
                            "Clip {direction} overrides field of view {requested}°, using 180°"
                        );
                    }
                    log::info!("Clipping {direction} half around yaw {yaw:.1}°");
                    image = clip(&image, yaw, direction);
                }
            }
        }

        if let Some(fraction) = self.crop_bottom {
            if fraction < 1.0 {
                log::info!("Keeping top {:.0}% of rows", fraction.max(0.0) * 100.0);
                image = crop_bottom(&image, fraction);
            }
        }

        image
    }
}
