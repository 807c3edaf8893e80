//! Panorama metadata returned by the tile service.

use serde::{Deserialize, Serialize};

use crate::error::StreetViewError;

/// Search radius in meters used for location lookups when none is given.
pub const DEFAULT_SEARCH_RADIUS: u32 = 50;

/// Largest accepted panorama or tile side in pixels. Native panoramas are 16384 pixels wide.
pub const MAX_DIMENSION: u32 = 32_768;

/// How a panorama is looked up.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataQuery {
    /// Lookup by panorama identifier.
    ById(String),
    /// Nearest panorama to a location.
    ByLocation {
        /// Latitude in degrees.
        lat: f64,
        /// Longitude in degrees.
        lng: f64,
        /// Search radius in meters.
        radius: u32,
    },
}

impl MetadataQuery {
    /// Query parameters identifying the panorama.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::ById(id) => vec![("panoId", id.clone())],
            Self::ByLocation { lat, lng, radius } => vec![
                ("lat", lat.to_string()),
                ("lng", lng.to_string()),
                ("radius", radius.to_string()),
            ],
        }
    }
}

/// Metadata of a single panorama.
///
/// Geometry fields are validated on construction: a record that exists is always safe to plan a
/// tile grid from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanoramaMetadata {
    /// Panorama identifier.
    pub pano_id: String,
    /// Width of the panorama at native resolution.
    pub image_width: u32,
    /// Height of the panorama at native resolution.
    pub image_height: u32,
    /// Width of a tile.
    pub tile_width: u32,
    /// Height of a tile.
    pub tile_height: u32,
    /// Capture latitude.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lat: Option<f64>,
    /// Capture longitude.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lng: Option<f64>,
    /// Capture date as reported by the service (usually `YYYY-MM`).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub date: Option<String>,
    /// Attribution string.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub copyright_info: Option<String>,
    /// Viewing yaw taken from the source link, in degrees.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url_yaw: Option<f64>,
    /// Viewing pitch taken from the source link, in degrees.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url_pitch: Option<f64>,
    /// Links to neighbouring panoramas, passed through untouched.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub links: Option<serde_json::Value>,
}

/// Raw metadata response. Every field is optional here so that a missing one can be reported by
/// name instead of as a generic deserialization failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataResponse {
    pano_id: Option<String>,
    image_width: Option<i64>,
    image_height: Option<i64>,
    tile_width: Option<i64>,
    tile_height: Option<i64>,
    lat: Option<f64>,
    lng: Option<f64>,
    date: Option<String>,
    copyright: Option<String>,
    links: Option<serde_json::Value>,
}

impl PanoramaMetadata {
    /// Parses and validates a metadata response body.
    pub fn from_json(body: &[u8]) -> Result<Self, StreetViewError> {
        let response: MetadataResponse = serde_json::from_slice(body)
            .map_err(|err| StreetViewError::MalformedMetadata(err.to_string()))?;
        Self::from_response(response)
    }

    /// Parses and validates an already decoded metadata response.
    pub fn from_value(value: serde_json::Value) -> Result<Self, StreetViewError> {
        let response: MetadataResponse = serde_json::from_value(value)
            .map_err(|err| StreetViewError::MalformedMetadata(err.to_string()))?;
        Self::from_response(response)
    }

    /// Attaches the viewing direction recovered from the source link.
    pub fn with_view(mut self, yaw: Option<f64>, pitch: Option<f64>) -> Self {
        self.url_yaw = yaw;
        self.url_pitch = pitch;
        self
    }

    fn from_response(response: MetadataResponse) -> Result<Self, StreetViewError> {
        let pano_id = response
            .pano_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StreetViewError::MalformedMetadata("missing panoId".into()))?;

        Ok(Self {
            pano_id,
            image_width: positive("imageWidth", response.image_width)?,
            image_height: positive("imageHeight", response.image_height)?,
            tile_width: positive("tileWidth", response.tile_width)?,
            tile_height: positive("tileHeight", response.tile_height)?,
            lat: response.lat,
            lng: response.lng,
            date: response.date,
            copyright_info: response.copyright,
            url_yaw: None,
            url_pitch: None,
            links: response.links,
        })
    }
}

fn positive(name: &str, value: Option<i64>) -> Result<u32, StreetViewError> {
    let value =
        value.ok_or_else(|| StreetViewError::MalformedMetadata(format!("missing {name}")))?;
    u32::try_from(value)
        .ok()
        .filter(|v| (1..=MAX_DIMENSION).contains(v))
        .ok_or_else(|| {
            StreetViewError::MalformedMetadata(format!(
                "{name} must be in 1..={MAX_DIMENSION}, got {value}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn response() -> serde_json::Value {
        json!({
            "panoId": "ABC",
            "imageWidth": 16384,
            "imageHeight": 8192,
            "tileWidth": 512,
            "tileHeight": 512,
            "lat": 34.0,
            "lng": -118.0,
            "date": "2020-01",
            "copyright": "From the Owner, Google"
        })
    }

    #[test]
    fn parses_full_response() {
        let metadata = PanoramaMetadata::from_value(response()).unwrap();
        assert_eq!(metadata.pano_id, "ABC");
        assert_eq!(metadata.image_width, 16384);
        assert_eq!(metadata.image_height, 8192);
        assert_eq!(metadata.tile_width, 512);
        assert_eq!(metadata.date.as_deref(), Some("2020-01"));
        assert_eq!(
            metadata.copyright_info.as_deref(),
            Some("From the Owner, Google")
        );
        assert_eq!(metadata.url_yaw, None);
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let body = br#"{"panoId":"X","imageWidth":1024,"imageHeight":512,"tileWidth":512,"tileHeight":512}"#;
        let metadata = PanoramaMetadata::from_json(body).unwrap();
        assert!(metadata.lat.is_none());
        assert!(metadata.copyright_info.is_none());
    }

    #[test]
    fn missing_geometry_is_rejected_by_name() {
        let mut value = response();
        value.as_object_mut().unwrap().remove("tileHeight");
        let err = PanoramaMetadata::from_value(value).unwrap_err();
        match err {
            StreetViewError::MalformedMetadata(msg) => assert!(msg.contains("tileHeight")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn zero_or_negative_geometry_is_rejected() {
        for bad in [json!(0), json!(-512)] {
            let mut value = response();
            value["tileWidth"] = bad;
            assert!(matches!(
                PanoramaMetadata::from_value(value),
                Err(StreetViewError::MalformedMetadata(_))
            ));
        }
    }

    #[test]
    fn oversized_geometry_is_rejected() {
        for (field, bad) in [
            ("imageWidth", json!(4_294_967_295_u64)),
            ("imageHeight", json!(MAX_DIMENSION + 1)),
            ("tileWidth", json!(1_u64 << 40)),
        ] {
            let mut value = response();
            value[field] = bad;
            match PanoramaMetadata::from_value(value) {
                Err(StreetViewError::MalformedMetadata(msg)) => assert!(msg.contains(field)),
                other => panic!("{field}: unexpected result {other:?}"),
            }
        }

        let mut value = response();
        value["imageWidth"] = json!(MAX_DIMENSION);
        assert!(PanoramaMetadata::from_value(value).is_ok());
    }

    #[test]
    fn serializes_snake_case_without_nulls() {
        let metadata = PanoramaMetadata::from_value(response())
            .unwrap()
            .with_view(Some(148.5), None);
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["pano_id"], "ABC");
        assert_eq!(value["image_width"], 16384);
        assert_eq!(value["tile_height"], 512);
        assert_eq!(value["url_yaw"], 148.5);
        assert!(value.get("url_pitch").is_none());
        assert!(value.get("links").is_none());
    }

    #[test]
    fn location_query_pairs() {
        let query = MetadataQuery::ByLocation {
            lat: 41.5,
            lng: 12.25,
            radius: DEFAULT_SEARCH_RADIUS,
        };
        assert_eq!(
            query.query_pairs(),
            vec![
                ("lat", "41.5".to_string()),
                ("lng", "12.25".to_string()),
                ("radius", "50".to_string())
            ]
        );
    }
}
