//! Preprocessing parameters

use crate::error::{ImagingError, Result};
use serde::{Deserialize, Serialize};

pub const MIN_SCALE: f64 = 1.0;
pub const MAX_SCALE: f64 = 4.0;

/// Parameters for one pipeline run.
///
/// Stage order is fixed by the pipeline; the order of these fields has no
/// effect on the output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PreprocessConfig {
    /// Convert to luminance
    pub grayscale: bool,

    /// Invert RGB channels as the final stage
    pub invert: bool,

    /// Binarize against `threshold` (implies luminance)
    pub threshold_enabled: bool,

    /// Luminance cutoff; pixels strictly above it become white
    pub threshold: u8,

    /// Upscale factor applied before any color transform, in [1, 4]
    pub scale: f64,

    /// 3x3 median filter after luminance, before binarization
    pub denoise: bool,

    /// Binarize against the local neighbourhood mean instead of `threshold`
    pub adaptive: bool,

    /// Open then close the binarized strokes (binarizes at `threshold`
    /// unless `adaptive` is set)
    pub morphology: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            grayscale: true,
            invert: false,
            threshold_enabled: false,
            threshold: 128,
            scale: 2.0,
            denoise: false,
            adaptive: false,
            morphology: false,
        }
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.scale.is_finite() || !(MIN_SCALE..=MAX_SCALE).contains(&self.scale) {
            return Err(ImagingError::InvalidConfig(format!(
                "scale must be within [{}, {}], got {}",
                MIN_SCALE, MAX_SCALE, self.scale
            )));
        }
        Ok(())
    }

    /// Whether the luminance stage runs
    pub fn needs_luminance(&self) -> bool {
        self.grayscale || self.denoise || self.binarizes()
    }

    /// Whether any binarization stage runs
    pub fn binarizes(&self) -> bool {
        self.threshold_enabled || self.adaptive || self.morphology
    }

    /// Copy with a new threshold; enables thresholding
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self.threshold_enabled = true;
        self
    }

    /// Copy with a new scale, clamped to the supported range
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = if scale.is_finite() {
            scale.clamp(MIN_SCALE, MAX_SCALE)
        } else {
            MIN_SCALE
        };
        self
    }

    pub fn with_invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PreprocessConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_scale() {
        let mut config = PreprocessConfig::default();
        config.scale = 0.5;
        assert!(config.validate().is_err());
        config.scale = f64::NAN;
        assert!(config.validate().is_err());
        config.scale = 4.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_scale_clamps() {
        assert_eq!(PreprocessConfig::default().with_scale(9.0).scale, 4.0);
        assert_eq!(PreprocessConfig::default().with_scale(f64::INFINITY).scale, 1.0);
    }

    #[test]
    fn test_cleanup_stages_default_off() {
        let config = PreprocessConfig::default();
        assert!(!config.denoise && !config.adaptive && !config.morphology);
        assert!(!config.binarizes());

        let config: PreprocessConfig =
            serde_json::from_str(r#"{"grayscale": false, "morphology": true}"#).unwrap();
        assert!(config.binarizes());
        assert!(config.needs_luminance());

        let config: PreprocessConfig =
            serde_json::from_str(r#"{"grayscale": false, "denoise": true}"#).unwrap();
        assert!(!config.binarizes());
        assert!(config.needs_luminance());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PreprocessConfig =
            serde_json::from_str(r#"{"thresholdEnabled": true, "threshold": 90}"#).unwrap();
        assert!(config.threshold_enabled);
        assert_eq!(config.threshold, 90);
        assert_eq!(config.scale, 2.0);
        assert!(config.needs_luminance());
    }
}
