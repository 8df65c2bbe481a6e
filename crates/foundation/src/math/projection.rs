//! Geographic to render-space projection.
//!
//! Markers are laid out on a flat plane using an equirectangular projection
//! centred on a configured origin. Longitude offsets are scaled by the cosine
//! of the origin latitude so distances near the origin are roughly isotropic.
//! Longitudes are never wrapped, which keeps the mapping injective over the
//! full `[-90, 90] x [-180, 180]` range.

use serde::{Deserialize, Serialize};

use super::Vec2;
use crate::error::ConfigurationError;

/// Projection parameters.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Latitude of the projection centre (degrees).
    #[serde(alias = "originLat")]
    pub origin_lat: f64,
    /// Longitude of the projection centre (degrees).
    #[serde(alias = "originLon")]
    pub origin_lon: f64,
    /// Render units per degree of latitude.
    pub scale: f64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            origin_lat: 0.0,
            origin_lon: 0.0,
            scale: 1.0,
        }
    }
}

/// Stateless lat/lon to `Vec2` transform.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CoordinateMapper {
    config: ProjectionConfig,
    x_scale: f64,
}

impl CoordinateMapper {
    pub fn new(config: ProjectionConfig) -> Result<Self, ConfigurationError> {
        let ProjectionConfig {
            origin_lat,
            origin_lon,
            scale,
        } = config;

        if !origin_lat.is_finite() || !origin_lon.is_finite() || !scale.is_finite() {
            return Err(ConfigurationError::InvalidProjection(format!(
                "parameters must be finite (origin_lat={origin_lat}, origin_lon={origin_lon}, scale={scale})"
            )));
        }
        // At the poles cos(lat) is zero and every longitude collapses onto x = 0.
        if origin_lat <= -90.0 || origin_lat >= 90.0 {
            return Err(ConfigurationError::InvalidProjection(format!(
                "origin_lat must be strictly inside (-90, 90), got {origin_lat}"
            )));
        }
        if !(-180.0..=180.0).contains(&origin_lon) {
            return Err(ConfigurationError::InvalidProjection(format!(
                "origin_lon must be inside [-180, 180], got {origin_lon}"
            )));
        }
        if scale <= 0.0 {
            return Err(ConfigurationError::InvalidProjection(format!(
                "scale must be positive, got {scale}"
            )));
        }

        Ok(Self {
            config,
            x_scale: origin_lat.to_radians().cos() * scale,
        })
    }

    pub fn config(&self) -> ProjectionConfig {
        self.config
    }

    /// Projects geographic degrees into render space.
    pub fn project(&self, lat: f64, lon: f64) -> Vec2 {
        Vec2::new(
            (lon - self.config.origin_lon) * self.x_scale,
            (lat - self.config.origin_lat) * self.config.scale,
        )
    }
}

impl Default for CoordinateMapper {
    fn default() -> Self {
        Self {
            config: ProjectionConfig::default(),
            x_scale: 1.0,
        }
    }
}
