use std::env;
use std::path::PathBuf;

use crate::color::TransferFunction;
use crate::error::{Error, Result};

/// libultrahdr's default `UHDR_MAX_DIMENSION`.
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;
pub const DEFAULT_QUALITY: u8 = 95;

/// Program name or path for every external collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub exiftool: String,
    pub ffmpeg: String,
    pub ultrahdr_app: String,
    pub heif_dec: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            exiftool: "exiftool".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ultrahdr_app: "ultrahdr_app".to_string(),
            heif_dec: "heif-dec".to_string(),
        }
    }
}

/// Which tags the final metadata copy carries over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetadataScope {
    #[default]
    All,
    Exif,
}

impl MetadataScope {
    pub(crate) fn exiftool_selector(self) -> &'static str {
        match self {
            MetadataScope::All => "-all:all",
            MetadataScope::Exif => "-exif:all",
        }
    }
}

/// Settings for one pipeline run. Threaded explicitly through every stage.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub tools: ToolPaths,
    /// Longest allowed output side; larger inputs are scaled down to it.
    pub max_dimension: u32,
    pub base_quality: u8,
    pub gainmap_quality: u8,
    /// Transfer function of decoded output (UltraHDR -> TIFF).
    pub tiff_transfer: TransferFunction,
    /// Parent of the per-run working directory.
    pub work_root: PathBuf,
    pub metadata_scope: MetadataScope,
    /// Leave intermediates on disk after the run.
    pub keep_work: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            base_quality: DEFAULT_QUALITY,
            gainmap_quality: DEFAULT_QUALITY,
            tiff_transfer: TransferFunction::Pq,
            work_root: env::temp_dir(),
            metadata_scope: MetadataScope::default(),
            keep_work: false,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_dimension < 2 || self.max_dimension % 2 != 0 {
            return Err(Error::InvalidConfig(format!(
                "max dimension must be an even number >= 2 (got {})",
                self.max_dimension
            )));
        }
        for (name, q) in [
            ("base quality", self.base_quality),
            ("gain map quality", self.gainmap_quality),
        ] {
            if !(1..=100).contains(&q) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be within 1-100 (got {q})"
                )));
            }
        }
        let tools = &self.tools;
        for program in [
            &tools.exiftool,
            &tools.ffmpeg,
            &tools.ultrahdr_app,
            &tools.heif_dec,
        ] {
            if program.trim().is_empty() {
                return Err(Error::InvalidConfig("empty tool path".to_string()));
            }
        }
        Ok(())
    }
}
