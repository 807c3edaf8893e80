//! Processing of a single panorama, from link to saved file.

use std::path::PathBuf;

use anyhow::{bail, Context};
use streetview::processing::resize_to_max_width;
use streetview::xmp::PanoramaArea;
use streetview::{
    looks_like_street_view_link, Adjustments, CancelToken, Downloader, ImageFilter,
    MetadataQuery, PanoramaMetadata, ViewOptions,
};

use crate::cli::{Args, OutputFormat};
use crate::output::{self, NameParts};

/// What to download.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Map link of a Street View scene.
    Link(String),
    /// Panorama nearest to a location.
    Location {
        /// Latitude in degrees.
        lat: f64,
        /// Longitude in degrees.
        lng: f64,
        /// Search radius in meters.
        radius: u32,
    },
}

/// Post-processing and output settings shared by every panorama of one invocation.
#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub format: OutputFormat,
    pub jpeg_quality: u8,
    pub max_width: Option<u32>,
    pub view: ViewOptions,
    pub filter: ImageFilter,
    pub adjustments: Adjustments,
    pub write_metadata: bool,
    pub metadata_only: bool,
    pub xmp: bool,
    pub output_dir: Option<PathBuf>,
}

impl OutputSettings {
    /// Settings given on the command line.
    pub fn from_args(args: &Args) -> Self {
        Self {
            format: args.format,
            jpeg_quality: args.jpeg_quality,
            max_width: args.max_width,
            view: args.view_options(),
            filter: args.filter,
            adjustments: args.adjustments(),
            write_metadata: args.metadata || args.metadata_only,
            metadata_only: args.metadata_only,
            xmp: !args.no_xmp,
            output_dir: args.output_dir.clone(),
        }
    }
}

/// Files produced for one panorama.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Panorama that was processed.
    pub pano_id: String,
    /// Saved image, `None` when only metadata was requested.
    pub image: Option<PathBuf>,
    /// Size of the saved image in bytes.
    pub image_size: u64,
    /// Saved metadata sidecar.
    pub metadata: Option<PathBuf>,
    /// Number of tiles that could not be fetched.
    pub missing_tiles: usize,
    /// Number of tiles in the grid.
    pub total_tiles: usize,
    /// Attribution of the imagery.
    pub copyright: Option<String>,
}

impl Outcome {
    /// Prints the saved files to standard output.
    pub fn print(&self) {
        if let Some(path) = &self.image {
            println!(
                "Saved: {} ({})",
                path.display(),
                output::format_file_size(self.image_size)
            );
            if let Some(copyright) = &self.copyright {
                println!("Copyright: {copyright}");
            }
        }
        if let Some(path) = &self.metadata {
            println!("Metadata: {}", path.display());
        }
        if self.missing_tiles > 0 {
            log::warn!(
                "Panorama {} is incomplete: {} of {} tiles are missing",
                self.pano_id,
                self.missing_tiles,
                self.total_tiles
            );
        }
    }
}

/// Downloads, processes and saves panoramas.
pub struct Pipeline {
    downloader: Downloader,
    settings: OutputSettings,
}

impl Pipeline {
    pub fn new(downloader: Downloader, settings: OutputSettings) -> Self {
        Self {
            downloader,
            settings,
        }
    }

    /// Processes one panorama. `output` overrides the generated file name.
    pub async fn run(
        &self,
        target: &Target,
        output: Option<PathBuf>,
        cancel: &CancelToken,
    ) -> anyhow::Result<Outcome> {
        let metadata = self.metadata(target).await?;
        log::info!(
            "Panorama {}: {}x{}{}",
            metadata.pano_id,
            metadata.image_width,
            metadata.image_height,
            metadata
                .date
                .as_deref()
                .map(|date| format!(", captured {date}"))
                .unwrap_or_default()
        );

        let image_path = output.unwrap_or_else(|| self.default_path(&metadata));
        let mut outcome = Outcome {
            pano_id: metadata.pano_id.clone(),
            image: None,
            image_size: 0,
            metadata: None,
            missing_tiles: 0,
            total_tiles: 0,
            copyright: metadata.copyright_info.clone(),
        };

        if self.settings.write_metadata {
            let path = output::metadata_path(&image_path);
            output::save_metadata(&metadata, &path)?;
            log::info!("Metadata saved to {}", path.display());
            outcome.metadata = Some(path);
        }
        if self.settings.metadata_only {
            return Ok(outcome);
        }

        let panorama = self
            .downloader
            .download_with_cancel(&metadata, cancel)
            .await?;
        outcome.missing_tiles = panorama.missing.len();
        outcome.total_tiles = panorama.grid.tile_count();

        let yaw = metadata.url_yaw;
        let image = self.settings.view.apply(panorama.image, yaw);
        let (image, _) = match self.settings.max_width {
            Some(max_width) => resize_to_max_width(image, max_width),
            None => (image, false),
        };
        let image = self.settings.filter.apply(image);
        let image = if self.settings.adjustments.is_identity() {
            image
        } else {
            self.settings.adjustments.apply(image)
        };

        let area = self.panorama_area(image.width(), image.height(), yaw);
        let xmp = match self.settings.format {
            OutputFormat::Jpg if self.settings.xmp => Some(&area),
            _ => None,
        };
        outcome.image_size = output::save_image(
            &image,
            &image_path,
            self.settings.format,
            self.settings.jpeg_quality,
            xmp,
        )?;
        outcome.image = Some(image_path);
        Ok(outcome)
    }

    async fn metadata(&self, target: &Target) -> anyhow::Result<PanoramaMetadata> {
        match target {
            Target::Link(link) => {
                if !looks_like_street_view_link(link) {
                    bail!("not a Street View link: {link}");
                }
                self.downloader
                    .resolve_url(link)
                    .await
                    .context("failed to look up the panorama")
            }
            Target::Location { lat, lng, radius } => self
                .downloader
                .fetch_metadata(&MetadataQuery::ByLocation {
                    lat: *lat,
                    lng: *lng,
                    radius: *radius,
                })
                .await
                .with_context(|| format!("no panorama found near {lat}, {lng}")),
        }
    }

    fn default_path(&self, metadata: &PanoramaMetadata) -> PathBuf {
        let name = output::default_file_name(
            &metadata.pano_id,
            &NameParts {
                quality: self.downloader.config().quality,
                view: self.settings.view,
                filter: self.settings.filter,
                format: self.settings.format,
            },
        );
        match &self.settings.output_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Placement of the final image in the sphere, accounting for the crops that were applied.
    fn panorama_area(&self, width: u32, height: u32, yaw: Option<f64>) -> PanoramaArea {
        let view = &self.settings.view;
        let mut area = match view.effective_fov().filter(|_| yaw.is_some()) {
            Some(fov) => PanoramaArea::partial(width, height, fov),
            None => PanoramaArea::full(width, height),
        };
        if let Some(fraction) = view.crop_bottom.filter(|f| *f > 0.0 && *f < 1.0) {
            area.full_height = (f64::from(height) / fraction).round() as u32;
        }
        area
    }
}
