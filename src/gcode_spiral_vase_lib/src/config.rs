use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, SpiralVaseError};
use crate::nearest::ReferenceSearch;
use crate::Mm;

// Made up threshold to prevent craziness when the previous layer's path is nowhere near this
// layer's. It isn't derived from extrusion width or anything else about the print.
pub const MAX_XY_SMOOTHING_DEFAULT: Mm = 2.0;

/// Settings of one [`crate::SpiralVase`] instance, fixed for the whole job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiralVaseConfig {
    /// When false, layers pass through untouched (but still update the tracked position).
    pub enabled: bool,
    /// Blend each layer's XY path toward the previous layer's.
    pub smooth_xy: bool,
    /// Whether E values are relative amounts (M83). Tapering extrusion requires it.
    pub use_relative_e: bool,
    /// Previous-layer references farther away than this are ignored when smoothing.
    pub max_xy_smoothing: Mm,
    pub reference_search: ReferenceSearch,
}

impl Default for SpiralVaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smooth_xy: false,
            use_relative_e: true,
            max_xy_smoothing: MAX_XY_SMOOTHING_DEFAULT,
            reference_search: ReferenceSearch::default(),
        }
    }
}

impl SpiralVaseConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_smooth_xy(mut self, smooth_xy: bool) -> Self {
        self.smooth_xy = smooth_xy;
        self
    }

    pub fn with_relative_e(mut self, relative: bool) -> Self {
        self.use_relative_e = relative;
        self
    }

    pub fn with_max_xy_smoothing(mut self, max_xy_smoothing: Mm) -> Self {
        self.max_xy_smoothing = max_xy_smoothing;
        self
    }

    pub fn with_reference_search(mut self, reference_search: ReferenceSearch) -> Self {
        self.reference_search = reference_search;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.max_xy_smoothing.is_finite() || self.max_xy_smoothing < 0.0 {
            return Err(SpiralVaseError::InvalidConfig(format!(
                "max_xy_smoothing must be a finite, non-negative distance, got {}",
                self.max_xy_smoothing
            )));
        }
        Ok(())
    }
}

/// Settings for running a whole G-code program through the spiral transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub spiral: SpiralVaseConfig,
    /// A line starting with this begins a new layer.
    pub layer_change_marker: String,
    /// A line starting with this ends the last layer; everything from it on is end G-code and
    /// passes through untouched. If it never shows up, the last layer runs to the end of the file.
    pub end_marker: String,
    /// Index of the first layer to spiralize. Layers below it print as normal stacked loops, so a
    /// vase gets a solid bottom.
    pub first_spiral_layer: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            spiral: SpiralVaseConfig::default(),
            layer_change_marker: ";LAYER_CHANGE".to_owned(),
            end_marker: "; Filament-specific end gcode".to_owned(),
            first_spiral_layer: 1,
        }
    }
}

impl JobConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<JobConfig> {
        let text = fs::read_to_string(path)?;
        let config: JobConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.spiral.validate()?;
        if self.layer_change_marker.is_empty() {
            return Err(SpiralVaseError::InvalidConfig("layer_change_marker must not be empty".to_owned()));
        }
        if self.end_marker.is_empty() {
            return Err(SpiralVaseError::InvalidConfig("end_marker must not be empty".to_owned()));
        }
        Ok(())
    }
}
