use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use streetview::equirect::ClipDirection;
use streetview::metadata::DEFAULT_SEARCH_RADIUS;
use streetview::{Adjustments, ImageFilter, QualityTier, ViewOptions};

/// Download Street View panoramas as equirectangular images.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Map link of the Street View scene to download.
    #[arg(required_unless_present_any = ["batch", "lat", "configure"])]
    pub url: Option<String>,

    /// Maps API key with the Map Tiles API enabled.
    #[arg(long, env = "GOOGLE_MAPS_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Output file name. Derived from the panorama id when omitted.
    #[arg(short, long, conflicts_with = "batch")]
    pub output: Option<PathBuf>,

    /// Directory generated file names are placed in.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Resolution tier: low, medium or high.
    #[arg(long, default_value_t = QualityTier::Medium)]
    pub quality: QualityTier,

    /// Output image format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Jpg)]
    pub format: OutputFormat,

    /// JPEG compression quality.
    #[arg(long, default_value_t = 92, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: u8,

    /// Scale the image down to this width if it is wider.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_width: Option<u32>,

    /// Horizontal field of view in degrees, centred on the viewing direction of the link.
    #[arg(long, value_parser = clap::value_parser!(u16).range(60..=360))]
    pub fov: Option<u16>,

    /// Keep only the half in front of (right) or behind (left) the viewing direction.
    #[arg(long, default_value_t = ClipDirection::None)]
    pub clip: ClipDirection,

    /// Keep only this fraction of rows from the top, e.g. 0.75 to drop the ground.
    #[arg(long, value_parser = parse_fraction)]
    pub crop_bottom: Option<f64>,

    /// Colour filter: none, bw, sepia or vintage.
    #[arg(long, default_value_t = ImageFilter::None)]
    pub filter: ImageFilter,

    /// Brightness factor, 1.0 keeps the original.
    #[arg(long, default_value_t = 1.0, value_parser = parse_factor)]
    pub brightness: f32,

    /// Contrast factor, 1.0 keeps the original.
    #[arg(long, default_value_t = 1.0, value_parser = parse_factor)]
    pub contrast: f32,

    /// Saturation factor, 1.0 keeps the original.
    #[arg(long, default_value_t = 1.0, value_parser = parse_factor)]
    pub saturation: f32,

    /// Also save the panorama metadata as JSON next to the image.
    #[arg(long)]
    pub metadata: bool,

    /// Save the metadata JSON only, do not download the panorama.
    #[arg(long)]
    pub metadata_only: bool,

    /// File with one link per line. Empty lines and lines starting with '#' are skipped.
    #[arg(long)]
    pub batch: Option<PathBuf>,

    /// Do not embed photo sphere metadata into JPEG files.
    #[arg(long)]
    pub no_xmp: bool,

    /// Timeout of a single request in seconds.
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Repetitions of a request that failed with a transient error.
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Delay before the first repetition in seconds, doubled for every further one.
    #[arg(long, default_value = "0.5", value_parser = parse_seconds)]
    pub backoff: Duration,

    /// Parallel tile requests, 0 to pick from the quality tier and core count.
    #[arg(long, default_value_t = 0)]
    pub concurrency: usize,

    /// Latitude of a location to look up the nearest panorama for, instead of a link.
    #[arg(long, requires = "lng", conflicts_with_all = ["url", "batch"], allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Longitude of the location.
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lng: Option<f64>,

    /// Search radius around the location in meters.
    #[arg(long, default_value_t = DEFAULT_SEARCH_RADIUS)]
    pub radius: u32,

    /// Store an API key read from standard input in the configuration file and exit.
    #[arg(long)]
    pub configure: bool,

    /// Log debug output.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Encoding of the saved image.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JPEG, with photo sphere metadata.
    Jpg,
    /// Lossless PNG.
    Png,
    /// Lossless WebP.
    Webp,
}

impl OutputFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }
}

impl Args {
    /// Geometric crops requested on the command line.
    pub fn view_options(&self) -> ViewOptions {
        ViewOptions {
            fov: self.fov.map(f64::from),
            clip: self.clip,
            crop_bottom: self.crop_bottom,
        }
    }

    /// Colour adjustments requested on the command line.
    pub fn adjustments(&self) -> Adjustments {
        Adjustments {
            brightness: self.brightness,
            contrast: self.contrast,
            saturation: self.saturation,
        }
    }

    /// Location lookup, if requested instead of a link.
    pub fn location(&self) -> Option<(f64, f64)> {
        self.lat.zip(self.lng)
    }
}

fn parse_fraction(value: &str) -> Result<f64, String> {
    let fraction: f64 = value.parse().map_err(|_| format!("'{value}' is not a number"))?;
    if fraction > 0.0 && fraction <= 1.0 {
        Ok(fraction)
    } else {
        Err(format!("{value} is not in (0, 1]"))
    }
}

fn parse_factor(value: &str) -> Result<f32, String> {
    let factor: f32 = value.parse().map_err(|_| format!("'{value}' is not a number"))?;
    if factor.is_finite() && factor >= 0.0 {
        Ok(factor)
    } else {
        Err(format!("{value} must be a non-negative number"))
    }
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value.parse().map_err(|_| format!("'{value}' is not a number"))?;
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(Duration::from_secs_f64(seconds))
    } else {
        Err(format!("{value} must be a non-negative number of seconds"))
    }
}
