use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Decimal places kept when a coordinate participates in a cache key.
pub const KEY_COORD_DECIMALS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_meters(&self, other: &Coordinate) -> f64 {
        let lat_a = self.lat.to_radians();
        let lat_b = other.lat.to_radians();
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();

        let h = (d_lat / 2.0).sin().powi(2)
            + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * h.sqrt().asin()
    }

    /// Stable textual form for composite cache keys, rounded so that jitter
    /// below ~0.1 m does not produce distinct keys.
    pub fn key_fragment(&self) -> String {
        let factor = 10_f64.powi(KEY_COORD_DECIMALS as i32);
        let lat = (self.lat * factor).round() / factor;
        let lng = (self.lng * factor).round() / factor;
        format!("{lat:.6},{lng:.6}")
    }
}

/// A photo as reported by the photo-library collaborator. The engine only
/// reads these; it never owns or mutates library state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoAsset {
    pub id: String,
    pub captured_at: DateTime<Utc>,
    pub coordinate: Option<Coordinate>,
}

impl PhotoAsset {
    pub fn new(
        id: impl Into<String>,
        captured_at: DateTime<Utc>,
        coordinate: Option<Coordinate>,
    ) -> Self {
        Self {
            id: id.into(),
            captured_at,
            coordinate,
        }
    }
}

/// Normalized representation of one asset, produced by the photo-processor
/// port and shared read-only by every consumer of the same asset id.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub asset_id: String,
    pub normalized_bytes: Vec<u8>,
    pub original_bytes: Vec<u8>,
    /// Coordinate extracted from embedded metadata, independent of the
    /// library-reported coordinate on the asset itself.
    pub exif_coordinate: Option<Coordinate>,
    pub metadata: HashMap<String, String>,
}
