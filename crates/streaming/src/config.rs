use std::path::Path;

use foundation::ConfigurationError;
use foundation::math::{CoordinateMapper, ProjectionConfig};
use scene::ClusterPolicy;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ENV_ORIGIN_LAT: &str = "FIREMAP_ORIGIN_LAT";
pub const ENV_ORIGIN_LON: &str = "FIREMAP_ORIGIN_LON";
pub const ENV_SCALE: &str = "FIREMAP_SCALE";
pub const ENV_CLUSTER_RADIUS: &str = "FIREMAP_CLUSTER_RADIUS";

/// Configuration for one sync controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub projection: ProjectionConfig,
    pub clustering: ClusteringConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub enabled: bool,
    /// Merge distance in render units.
    pub radius: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            radius: 0.01,
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(text).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Overlays `FIREMAP_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overrides fields from `lookup(key)`. Unparsable values are logged and
    /// leave the current value in place. Setting a cluster radius enables
    /// clustering.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |key: &str| -> Option<f64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<f64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("ignoring {key}={raw:?}: not a number");
                    None
                }
            }
        };

        if let Some(v) = read(ENV_ORIGIN_LAT) {
            self.projection.origin_lat = v;
        }
        if let Some(v) = read(ENV_ORIGIN_LON) {
            self.projection.origin_lon = v;
        }
        if let Some(v) = read(ENV_SCALE) {
            self.projection.scale = v;
        }
        if let Some(v) = read(ENV_CLUSTER_RADIUS) {
            self.clustering.enabled = true;
            self.clustering.radius = v;
        }
    }

    /// Builds the projection and optional cluster policy.
    pub fn build(&self) -> Result<(CoordinateMapper, Option<ClusterPolicy>), ConfigurationError> {
        let mapper = CoordinateMapper::new(self.projection)?;
        let policy = if self.clustering.enabled {
            Some(ClusterPolicy::new(self.clustering.radius)?)
        } else {
            None
        };
        Ok((mapper, policy))
    }
}
