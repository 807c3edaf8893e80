//! File names and image/metadata writing.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ColorType, ImageOutputFormat, RgbImage};
use streetview::equirect::ClipDirection;
use streetview::xmp::{self, PanoramaArea};
use streetview::{ImageFilter, PanoramaMetadata, QualityTier, ViewOptions};

use crate::cli::OutputFormat;

/// Settings that determine the generated file name.
#[derive(Debug, Clone, Copy)]
pub struct NameParts {
    pub quality: QualityTier,
    pub view: ViewOptions,
    pub filter: ImageFilter,
    pub format: OutputFormat,
}

/// `streetview_{id}[_{quality}][_{fov}deg|_{clip}][_{filter}].{ext}`, where default settings are
/// left out.
pub fn default_file_name(pano_id: &str, parts: &NameParts) -> String {
    let mut name = format!("streetview_{}", sanitize(pano_id));

    if parts.quality != QualityTier::Medium {
        name.push('_');
        name.push_str(parts.quality.as_str());
    }

    if parts.view.clip != ClipDirection::None {
        name.push('_');
        name.push_str(parts.view.clip.as_str());
    } else if let Some(fov) = parts.view.fov.filter(|fov| *fov < 360.0) {
        name.push_str(&format!("_{fov}deg"));
    }

    if parts.filter != ImageFilter::None {
        name.push('_');
        name.push_str(parts.filter.as_str());
    }

    name.push('.');
    name.push_str(parts.format.extension());
    name
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Path of the JSON sidecar for an image path.
pub fn metadata_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("json")
}

/// Encodes `image` and writes it to `path`. For JPEG output `xmp` is embedded into the file, the
/// other formats ignore it.
///
/// Returns the number of bytes written.
pub fn save_image(
    image: &RgbImage,
    path: &Path,
    format: OutputFormat,
    jpeg_quality: u8,
    xmp: Option<&PanoramaArea>,
) -> anyhow::Result<u64> {
    let mut encoded = Vec::new();
    match format {
        OutputFormat::Jpg => {
            JpegEncoder::new_with_quality(&mut encoded, jpeg_quality)
                .encode_image(image)
                .context("failed to encode JPEG")?;
            if let Some(area) = xmp {
                encoded = xmp::embed_area(&encoded, area)?;
            }
        }
        OutputFormat::Png => {
            image
                .write_to(&mut Cursor::new(&mut encoded), ImageOutputFormat::Png)
                .context("failed to encode PNG")?;
        }
        OutputFormat::Webp => {
            WebPEncoder::new_lossless(&mut encoded)
                .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
                .context("failed to encode WebP")?;
        }
    }

    create_parent(path)?;
    fs::write(path, &encoded).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(encoded.len() as u64)
}

/// Writes the metadata as pretty printed JSON.
pub fn save_metadata(metadata: &PanoramaMetadata, path: &Path) -> anyhow::Result<()> {
    create_parent(path)?;
    let json = serde_json::to_string_pretty(metadata)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

fn create_parent(path: &Path) -> anyhow::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display())),
        _ => Ok(()),
    }
}

/// Human readable byte count.
pub fn format_file_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let bytes_f = bytes as f64;
    if bytes_f < KB {
        format!("{bytes} B")
    } else if bytes_f < KB * KB {
        format!("{:.1} KB", bytes_f / KB)
    } else if bytes_f < KB * KB * KB {
        format!("{:.1} MB", bytes_f / (KB * KB))
    } else {
        format!("{:.1} GB", bytes_f / (KB * KB * KB))
    }
}
