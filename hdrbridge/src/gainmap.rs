//! Apple `HDRHeadroom`/`HDRGain` to a standard gain-map configuration.

use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::probe::AssetDescriptor;

/// Gain-map parameters in the layout the encoder's config file expects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainMapConfig {
    pub max_content_boost: [f32; 3],
    pub min_content_boost: [f32; 3],
    pub gamma: [f32; 3],
    pub offset_sdr: [f32; 3],
    pub offset_hdr: [f32; 3],
    pub hdr_capacity_min: f32,
    pub hdr_capacity_max: f32,
    pub use_base_color_space: bool,
}

/// Stops of headroom for an Apple (headroom, gain) pair.
///
/// Piecewise-linear fit taken from the reference decoder; the coefficients
/// are compatibility constants.
pub fn apple_stops(headroom: f64, gain: f64) -> f64 {
    if headroom < 1.0 {
        if gain <= 0.01 {
            -20.0 * gain + 1.8
        } else {
            -0.101 * gain + 1.601
        }
    } else if gain <= 0.01 {
        -70.0 * gain + 3.0
    } else {
        -0.303 * gain + 2.303
    }
}

impl GainMapConfig {
    /// Pure mapping from Apple's pair. Negative stops clamp to no boost.
    pub fn compute(headroom: f64, gain: f64) -> Self {
        let boost = 2.0_f64.powf(apple_stops(headroom, gain).max(0.0)) as f32;
        Self {
            max_content_boost: [boost; 3],
            min_content_boost: [1.0; 3],
            gamma: [1.0; 3],
            offset_sdr: [0.0; 3],
            offset_hdr: [0.0; 3],
            hdr_capacity_min: 1.0,
            hdr_capacity_max: boost,
            use_base_color_space: true,
        }
    }

    /// Requires both Apple tags on the probed source.
    pub fn from_descriptor(descriptor: &AssetDescriptor) -> Result<Self> {
        let missing = |tag| Error::GainMetadataMissing {
            path: descriptor.path.clone(),
            tag,
        };
        let headroom = descriptor.hdr_headroom.ok_or_else(|| missing("HDRHeadroom"))?;
        let gain = descriptor.hdr_gain.ok_or_else(|| missing("HDRGain"))?;
        Ok(Self::compute(headroom, gain))
    }

    /// Directive lines for `ultrahdr_app -f`.
    pub fn to_config_text(&self) -> String {
        let mut out = String::new();
        let mut line = |key: &str, values: &[f32]| {
            out.push_str("--");
            out.push_str(key);
            for v in values {
                let _ = write!(out, " {v:.6}");
            }
            out.push('\n');
        };
        line("maxContentBoost", &self.max_content_boost);
        line("minContentBoost", &self.min_content_boost);
        line("gamma", &self.gamma);
        line("offsetSdr", &self.offset_sdr);
        line("offsetHdr", &self.offset_hdr);
        line("hdrCapacityMin", &[self.hdr_capacity_min]);
        line("hdrCapacityMax", &[self.hdr_capacity_max]);
        out.push_str(&format!(
            "--useBaseColorSpace {}\n",
            u8::from(self.use_base_color_space)
        ));
        out
    }
}
