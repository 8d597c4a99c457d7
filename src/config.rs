use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::StraightenError;

/// Tunables for the straightening pipeline.
///
/// Every field has a default, so a TOML file only needs to name the values it
/// overrides:
///
/// ```toml
/// step = 0.5
/// ring_points = 48
/// retwist_tolerances = [1.5, 3.0, 6.0]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StraightenConfig {
    /// Arc-length distance between resampled frames, in voxels.
    pub step: f64,
    /// Added once to the maximum diameter to get the sampling half-width.
    pub extent_buffer: f64,
    /// Lower bound for the global minimum diameter.
    pub min_diameter_floor: f64,
    /// Points per cross-section ring.
    pub ring_points: usize,
    /// Weight of curvature in the cross-section flattening factor.
    pub curvature_scale: f64,
    /// Allowed miss between the interpolated and the target right vector.
    pub rotation_tolerance_deg: f64,
    /// Dense samples per lattice segment for the arc-length table.
    pub arc_samples_per_segment: usize,
    /// Distance thresholds for the successive inverse-search attempts.
    pub retwist_tolerances: Vec<f64>,
    /// Extra slices added on each side of the scoped range on the second attempt.
    pub retwist_slice_margin: usize,
    /// Sampling planes whose corners moved less than this are kept as-is.
    pub plane_change_tolerance: f64,
    /// Run per-slice loops on the rayon pool.
    pub parallel: bool,
}

impl Default for StraightenConfig {
    fn default() -> Self {
        Self {
            step: 1.0,
            extent_buffer: 5.0,
            min_diameter_floor: 1.0,
            ring_points: 32,
            curvature_scale: 100.0,
            rotation_tolerance_deg: 2.0,
            arc_samples_per_segment: 64,
            retwist_tolerances: vec![1.0, 2.0, 4.0],
            retwist_slice_margin: 5,
            plane_change_tolerance: 1e-3,
            parallel: true,
        }
    }
}

impl StraightenConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: StraightenConfig =
            toml::from_str(text).context("failed to parse straightening config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("invalid config file {:?}", path.as_ref()))
    }

    pub fn validate(&self) -> Result<(), StraightenError> {
        if !(self.step > 0.0) || !self.step.is_finite() {
            return Err(StraightenError::Config(format!(
                "step must be positive, got {}",
                self.step
            )));
        }
        for (name, value) in [
            ("extent_buffer", self.extent_buffer),
            ("min_diameter_floor", self.min_diameter_floor),
            ("curvature_scale", self.curvature_scale),
            ("rotation_tolerance_deg", self.rotation_tolerance_deg),
            ("plane_change_tolerance", self.plane_change_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(StraightenError::Config(format!(
                    "{name} must be finite and not negative, got {value}"
                )));
            }
        }
        if self.ring_points < 3 {
            return Err(StraightenError::Config(format!(
                "ring_points must be at least 3, got {}",
                self.ring_points
            )));
        }
        if self.arc_samples_per_segment == 0 {
            return Err(StraightenError::Config(
                "arc_samples_per_segment must be at least 1".to_string(),
            ));
        }
        if self.retwist_tolerances.is_empty() {
            return Err(StraightenError::Config(
                "retwist_tolerances must name at least one attempt".to_string(),
            ));
        }
        if self
            .retwist_tolerances
            .iter()
            .any(|t| !t.is_finite() || *t <= 0.0)
        {
            return Err(StraightenError::Config(
                "retwist_tolerances must all be finite and positive".to_string(),
            ));
        }
        Ok(())
    }
}
