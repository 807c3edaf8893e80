//! Photo sphere (GPano) XMP metadata for JPEG files.
//!
//! Viewers recognise a JPEG as a 360° panorama by an XMP packet in an APP1 segment. The packet is
//! inserted into already encoded JPEG bytes, the image data itself is not touched.

use crate::equirect::FULL_CIRCLE;
use crate::error::StreetViewError;

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const COM: u8 = 0xFE;

/// Identifier that starts the payload of an XMP APP1 segment.
pub const XMP_NAMESPACE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// Largest payload a JPEG segment can carry.
const MAX_SEGMENT_PAYLOAD: usize = u16::MAX as usize - 2;

/// Placement of an image inside the full panorama sphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanoramaArea {
    /// Width of the full 360° panorama.
    pub full_width: u32,
    /// Height of the full panorama.
    pub full_height: u32,
    /// Left edge of the image in the full panorama.
    pub left: u32,
    /// Top edge of the image in the full panorama.
    pub top: u32,
    /// Width of the image.
    pub width: u32,
    /// Height of the image.
    pub height: u32,
}

impl PanoramaArea {
    /// Area of an image covering the whole sphere.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            full_width: width,
            full_height: height,
            left: 0,
            top: 0,
            width,
            height,
        }
    }

    /// Area of a `width` x `height` image that covers `fov` degrees horizontally, centred in the
    /// full panorama. The full height is kept equal to `height`.
    pub fn partial(width: u32, height: u32, fov: f64) -> Self {
        if !(fov > 0.0 && fov < FULL_CIRCLE) {
            return Self::full(width, height);
        }

        let full_width = ((f64::from(width) * FULL_CIRCLE / fov).round() as u32).max(width);
        Self {
            full_width,
            full_height: height,
            left: (full_width - width) / 2,
            top: 0,
            width,
            height,
        }
    }

    /// Serializes the area as an XMP packet.
    pub fn to_xmp(&self) -> String {
        format!(
            concat!(
                r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">"#,
                r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">"#,
                r#"<rdf:Description xmlns:GPano="http://ns.google.com/photos/1.0/panorama/" "#,
                r#"GPano:ProjectionType="equirectangular" "#,
                r#"GPano:UsePanoramaViewer="True" "#,
                r#"GPano:FullPanoWidthPixels="{}" "#,
                r#"GPano:FullPanoHeightPixels="{}" "#,
                r#"GPano:CroppedAreaLeftPixels="{}" "#,
                r#"GPano:CroppedAreaTopPixels="{}" "#,
                r#"GPano:CroppedAreaImageWidthPixels="{}" "#,
                r#"GPano:CroppedAreaImageHeightPixels="{}" />"#,
                r#"</rdf:RDF>"#,
                r#"</x:xmpmeta>"#,
            ),
            self.full_width, self.full_height, self.left, self.top, self.width, self.height,
        )
    }
}

/// Inserts a GPano packet for a full `width` x `height` panorama into `jpeg`.
pub fn embed_gpano(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, StreetViewError> {
    embed_area(jpeg, &PanoramaArea::full(width, height))
}

/// Inserts a GPano packet describing `area` into `jpeg`.
///
/// The segment goes after the SOI marker and any leading APP0, APP1 and comment segments, so
/// JFIF and EXIF headers stay first.
pub fn embed_area(jpeg: &[u8], area: &PanoramaArea) -> Result<Vec<u8>, StreetViewError> {
    if !jpeg.starts_with(&SOI) {
        return Err(StreetViewError::MalformedInput(
            "data is not a JPEG image".into(),
        ));
    }

    let packet = area.to_xmp();
    let payload_len = XMP_NAMESPACE.len() + packet.len();
    if payload_len > MAX_SEGMENT_PAYLOAD {
        return Err(StreetViewError::MalformedInput(
            "XMP packet does not fit in a JPEG segment".into(),
        ));
    }

    let insert_at = header_end(jpeg);
    let segment_len = (payload_len + 2) as u16;

    let mut out = Vec::with_capacity(jpeg.len() + payload_len + 4);
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&[0xFF, APP1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(XMP_NAMESPACE);
    out.extend_from_slice(packet.as_bytes());
    out.extend_from_slice(&jpeg[insert_at..]);
    Ok(out)
}

/// Offset just past the leading APP0, APP1 and COM segments.
fn header_end(jpeg: &[u8]) -> usize {
    let mut pos = SOI.len();
    while let &[0xFF, marker, hi, lo, ..] = &jpeg[pos..] {
        if !matches!(marker, APP0 | APP1 | COM) {
            break;
        }
        let next = pos + 2 + usize::from(u16::from_be_bytes([hi, lo]));
        if next > jpeg.len() {
            break;
        }
        pos = next;
    }
    pos
}
