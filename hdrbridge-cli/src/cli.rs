use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, builder::ValueHint};
use hdrbridge::{
    DEFAULT_MAX_DIMENSION, DEFAULT_QUALITY, MetadataScope, RunConfig, ToolPaths, TransferFunction,
};

/// Command-line arguments for hdrbridge.
#[derive(Parser, Debug)]
#[command(
    name = "hdrbridge",
    about = "Convert between Apple HDR HEIC, UltraHDR JPEG and HDR TIFF using external tools.",
    author,
    version,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log every collaborator invocation (same as RUST_LOG=debug)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apple HDR HEIC to UltraHDR JPEG
    HeicToUhdr(ConvertArgs),
    /// UltraHDR JPEG to 16-bit HDR TIFF
    UhdrToTiff(ConvertArgs),
    /// Apple HDR HEIC to HDR TIFF (via an UltraHDR intermediate)
    HeicToTiff(ConvertArgs),
    /// Any HDR image ffmpeg can read (AVIF, PQ/HLG PNG, ...) to UltraHDR JPEG
    HdrToUhdr(ConvertArgs),
    /// Print what the pipeline would infer for a file, without converting
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Source image
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Output path (defaults to the input name with the target extension)
    #[arg(long, short = 'o', value_hint = ValueHint::FilePath, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Longest output side; larger inputs are scaled down (even, >= 2)
    #[arg(
        long = "max-dimension",
        value_name = "PX",
        default_value_t = DEFAULT_MAX_DIMENSION,
        value_parser = clap::value_parser!(u32).range(2..)
    )]
    pub max_dimension: u32,

    /// JPEG quality for the UltraHDR base image (1-100)
    #[arg(
        long = "base-q",
        default_value_t = DEFAULT_QUALITY,
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    pub base_quality: u8,

    /// JPEG quality for the gain map (1-100)
    #[arg(
        long = "gm-q",
        alias = "gainmap-q",
        default_value_t = DEFAULT_QUALITY,
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    pub gainmap_quality: u8,

    /// Transfer function of TIFF output
    #[arg(long, value_enum, default_value = "pq")]
    pub transfer: Transfer,

    /// Which tags to copy from the source onto the output
    #[arg(long, value_enum, default_value = "all")]
    pub metadata: Metadata,

    /// Directory for per-run scratch space (defaults to the system temp dir)
    #[arg(long = "work-dir", value_hint = ValueHint::DirPath, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Leave intermediates on disk for inspection
    #[arg(long = "keep-work")]
    pub keep_work: bool,

    #[command(flatten)]
    pub tools: ToolArgs,
}

impl ConvertArgs {
    pub fn run_config(&self) -> RunConfig {
        let defaults = RunConfig::default();
        RunConfig {
            tools: self.tools.paths(),
            max_dimension: self.max_dimension,
            base_quality: self.base_quality,
            gainmap_quality: self.gainmap_quality,
            tiff_transfer: self.transfer.into(),
            work_root: self.work_dir.clone().unwrap_or(defaults.work_root),
            metadata_scope: self.metadata.into(),
            keep_work: self.keep_work,
        }
    }
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Image to inspect
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Cap used for the reported scale plan
    #[arg(
        long = "max-dimension",
        value_name = "PX",
        default_value_t = DEFAULT_MAX_DIMENSION,
        value_parser = clap::value_parser!(u32).range(2..)
    )]
    pub max_dimension: u32,

    #[command(flatten)]
    pub tools: ToolArgs,
}

/// Collaborator locations; bare names are searched on `PATH`.
#[derive(Args, Debug)]
pub struct ToolArgs {
    #[arg(long, env = "HDRBRIDGE_EXIFTOOL", default_value = "exiftool", value_name = "PATH")]
    pub exiftool: String,

    #[arg(long, env = "HDRBRIDGE_FFMPEG", default_value = "ffmpeg", value_name = "PATH")]
    pub ffmpeg: String,

    #[arg(
        long = "ultrahdr-app",
        env = "HDRBRIDGE_ULTRAHDR_APP",
        default_value = "ultrahdr_app",
        value_name = "PATH"
    )]
    pub ultrahdr_app: String,

    #[arg(
        long = "heif-dec",
        env = "HDRBRIDGE_HEIF_DEC",
        default_value = "heif-dec",
        value_name = "PATH"
    )]
    pub heif_dec: String,
}

impl ToolArgs {
    pub fn paths(&self) -> ToolPaths {
        ToolPaths {
            exiftool: self.exiftool.clone(),
            ffmpeg: self.ffmpeg.clone(),
            ultrahdr_app: self.ultrahdr_app.clone(),
            heif_dec: self.heif_dec.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Transfer {
    Pq,
    Hlg,
}

impl From<Transfer> for TransferFunction {
    fn from(t: Transfer) -> Self {
        match t {
            Transfer::Pq => TransferFunction::Pq,
            Transfer::Hlg => TransferFunction::Hlg,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Metadata {
    /// Every writable tag group
    All,
    /// EXIF only
    Exif,
}

impl From<Metadata> for MetadataScope {
    fn from(m: Metadata) -> Self {
        match m {
            Metadata::All => MetadataScope::All,
            Metadata::Exif => MetadataScope::Exif,
        }
    }
}
