//! Geographic primitives shared by proposals, sessions and collaborators.

use crate::error::{CivicError, Result};
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate pair.
///
/// Coordinates are stored and written at full precision; any rounding for
/// display or grouping happens on the read side (see [`LatLng::site_key`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Returns the coordinate if it is finite and inside the valid ranges.
    pub fn validated(self) -> Result<Self> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(CivicError::invalid_input("coordinates must be finite numbers"));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(CivicError::invalid_input(format!(
                "latitude {} is outside [-90, 90]",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(CivicError::invalid_input(format!(
                "longitude {} is outside [-180, 180]",
                self.lng
            )));
        }
        Ok(self)
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &LatLng) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }

    /// Key used to group proposals sharing (approximately) the same site.
    ///
    /// Six decimals is roughly 11cm at the equator.
    pub fn site_key(&self) -> String {
        format!("{:.6},{:.6}", self.lat, self.lng)
    }

    /// `lat,lng` as expected by Google Maps query strings.
    pub fn to_query_param(&self) -> String {
        format!("{},{}", self.lat, self.lng)
    }
}

impl std::fmt::Display for LatLng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.lat, self.lng)
    }
}
