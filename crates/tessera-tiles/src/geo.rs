//! Geo-referencing on the WGS84 ellipsoid
//!
//! Model space is treated as a local east-north-up frame anchored at a geographic origin.
//! The root tile's `transform` carries that frame into Earth-centered, Earth-fixed
//! coordinates.

use serde::{Deserialize, Serialize};
use tessera_core::math::{DMat4, DVec3, DVec4};

/// WGS84 semi-major axis in meters
pub const WGS84_A: f64 = 6_378_137.0;

/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Geographic anchor of the model's local origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoOrigin {
    /// Longitude in degrees, east positive
    pub lon: f64,
    /// Latitude in degrees, north positive
    pub lat: f64,
    /// Height above the ellipsoid in meters
    #[serde(default)]
    pub height: f64,
}

impl GeoOrigin {
    pub fn new(lon: f64, lat: f64, height: f64) -> Self {
        Self { lon, lat, height }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.lon.is_finite() && self.lat.is_finite() && self.height.is_finite()) {
            return Err("geoOrigin values must be finite".into());
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(format!("geoOrigin lon {} outside [-180, 180]", self.lon));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(format!("geoOrigin lat {} outside [-90, 90]", self.lat));
        }
        Ok(())
    }

    /// Earth-centered, Earth-fixed position of the origin
    pub fn to_ecef(&self) -> DVec3 {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let (sin_lat, cos_lat) = self.lat.to_radians().sin_cos();
        let (sin_lon, cos_lon) = self.lon.to_radians().sin_cos();
        // Prime vertical radius of curvature
        let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        DVec3::new(
            (n + self.height) * cos_lat * cos_lon,
            (n + self.height) * cos_lat * sin_lon,
            (n * (1.0 - e2) + self.height) * sin_lat,
        )
    }

    /// Matrix taking local east-north-up coordinates to ECEF
    pub fn enu_to_ecef(&self) -> DMat4 {
        let (sin_lat, cos_lat) = self.lat.to_radians().sin_cos();
        let (sin_lon, cos_lon) = self.lon.to_radians().sin_cos();
        let east = DVec3::new(-sin_lon, cos_lon, 0.0);
        let north = DVec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
        let up = DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);
        DMat4::from_cols(
            east.extend(0.0),
            north.extend(0.0),
            up.extend(0.0),
            DVec4::from((self.to_ecef(), 1.0)),
        )
    }

    /// `enu_to_ecef` as the column-major array tileset.json expects
    pub fn transform(&self) -> [f64; 16] {
        self.enu_to_ecef().to_cols_array()
    }
}
