//! Recovers the panorama identifier and viewing direction from a map-service link.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::StreetViewError;

/// Panorama reference extracted from a map link.
#[derive(Debug, Clone, PartialEq)]
pub struct PanoramaLink {
    /// Panorama identifier.
    pub pano_id: String,
    /// Viewing yaw in degrees, if the link carries one.
    pub yaw: Option<f64>,
    /// Viewing pitch in degrees, if the link carries one.
    pub pitch: Option<f64>,
}

fn thumbnail_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"https:%2F%2Fstreetviewpixels.*?%3F([^!]+)").expect("valid pattern")
    })
}

fn data_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"!3m5!1s([^!?&/#]+)").expect("valid pattern"))
}

fn query_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[?&]panoid=([^&#]+)").expect("valid pattern"))
}

/// Extracts the panorama reference from a map link.
///
/// Sources are tried richest first:
/// 1. the percent-encoded thumbnail URL embedded in the data blob (id, yaw and pitch);
/// 2. the `!3m5!1s<id>` token of the data blob (id only);
/// 3. a plain `panoid=` query parameter (id only).
pub fn resolve_link(link: &str) -> Result<PanoramaLink, StreetViewError> {
    let haystack = link.split('#').next().unwrap_or(link);

    if let Some(query) = thumbnail_pattern()
        .captures(haystack)
        .and_then(|caps| caps.get(1))
    {
        let decoded = query.as_str().replace("%26", "&").replace("%3D", "=");
        if let Some(resolved) = from_thumbnail_query(&decoded) {
            log::debug!("Resolved panorama {} from thumbnail query", resolved.pano_id);
            return Ok(resolved);
        }
    }

    for pattern in [data_token_pattern(), query_pattern()] {
        if let Some(id) = pattern.captures(haystack).and_then(|caps| caps.get(1)) {
            log::debug!("Resolved panorama {} without view angles", id.as_str());
            return Ok(PanoramaLink {
                pano_id: id.as_str().to_string(),
                yaw: None,
                pitch: None,
            });
        }
    }

    Err(StreetViewError::MalformedInput(link.to_string()))
}

fn from_thumbnail_query(query: &str) -> Option<PanoramaLink> {
    let mut pano_id = None;
    let mut yaw = None;
    let mut pitch = None;

    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let slot = match key {
            "panoid" => &mut pano_id,
            "yaw" => &mut yaw,
            "pitch" => &mut pitch,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    let pano_id = pano_id.filter(|id| !id.is_empty())?;

    // Absent angles default to 0, an unparsable one drops both.
    let yaw = yaw.unwrap_or("0");
    let pitch = pitch.unwrap_or("0");
    let (yaw, pitch) = match (parse_angle(yaw), parse_angle(pitch)) {
        (Ok(yaw), Ok(pitch)) => (yaw, pitch),
        _ => (None, None),
    };

    Some(PanoramaLink {
        pano_id: pano_id.to_string(),
        yaw,
        pitch,
    })
}

fn parse_angle(value: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some)
}

/// Quick check that a link points at a Street View scene of the map service.
pub fn looks_like_street_view_link(link: &str) -> bool {
    if link.is_empty() {
        return false;
    }

    let lower = link.to_ascii_lowercase();
    if !["maps.google.com", "google.com/maps"]
        .iter()
        .any(|domain| lower.contains(domain))
    {
        return false;
    }

    ["3a,", "streetview", "!1e1", "data=!3m"]
        .iter()
        .any(|marker| link.contains(marker))
}
