//! Tunables shared by the reconstruction pipeline.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    enums::Interpolation,
    error::{ReconstructionError, Result},
    renderer::RenderQuality,
    transfer::RegionPolicy,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Maximum per-component difference between direction cosines of two slices.
    pub orientation_tolerance: f64,
    /// Relative deviation of a slice gap from the median gap that marks a
    /// volume as non-uniform.
    pub spacing_tolerance: f64,
    pub interpolation: Interpolation,
    pub quality: RenderQuality,
    /// Accumulated opacity at which a ray stops marching.
    pub early_termination: f32,
    /// Hounsfield units.
    pub bone_threshold: f32,
    pub hotspot: RegionPolicy,
    pub defect: RegionPolicy,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            orientation_tolerance: 1e-3,
            spacing_tolerance: 0.05,
            interpolation: Interpolation::Trilinear,
            quality: RenderQuality::Normal,
            early_termination: 0.98,
            bone_threshold: 200.0,
            hotspot: RegionPolicy::hotspots(),
            defect: RegionPolicy::defects(),
        }
    }
}

impl ReconstructionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ReconstructionError::invalid_config(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            ReconstructionError::invalid_config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.orientation_tolerance > 0.0) {
            return Err(ReconstructionError::invalid_config(
                "orientation_tolerance must be positive",
            ));
        }
        if !(self.spacing_tolerance > 0.0) {
            return Err(ReconstructionError::invalid_config(
                "spacing_tolerance must be positive",
            ));
        }
        if !(self.early_termination > 0.0 && self.early_termination <= 1.0) {
            return Err(ReconstructionError::invalid_config(
                "early_termination must lie in (0, 1]",
            ));
        }
        if !self.bone_threshold.is_finite() {
            return Err(ReconstructionError::invalid_config(
                "bone_threshold must be finite",
            ));
        }
        self.hotspot.validate()?;
        self.defect.validate()
    }
}
