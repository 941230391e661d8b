//! Argument vectors for each collaborator call the pipeline makes.

use std::path::Path;

use crate::color::{ColorDecision, Gamut, TransferFunction};
use crate::config::{MetadataScope, ToolPaths};
use crate::gateway::Invocation;
use crate::scale::ScalePlan;

/// 10:10:10:2 packed, R in the low bits (`UHDR_IMG_FMT_32bppRGBA1010102`).
pub const RAW_PIX_FMT: &str = "x2bgr10le";
pub const RAW_BYTES_PER_PIXEL: u64 = 4;
/// `ultrahdr_app` selector for the packed layout above.
const UHDR_RGBA1010102: &str = "5";
const UHDR_FULL_RANGE: &str = "1";

fn ffmpeg(tools: &ToolPaths) -> Invocation {
    Invocation::new(&tools.ffmpeg).args(["-hide_banner", "-loglevel", "error", "-y"])
}

fn scale_filter(width: u32, height: u32) -> String {
    format!("scale={width}:{height}")
}

/// Split an Apple HDR HEIC into its base image and auxiliary images.
pub fn heif_extract(tools: &ToolPaths, src: &Path, base_out: &Path) -> Invocation {
    Invocation::new(&tools.heif_dec)
        .args(["--with-aux", "--quality", "100"])
        .arg(src)
        .arg(base_out)
}

pub fn scale_jpeg(
    tools: &ToolPaths,
    src: &Path,
    dst: &Path,
    width: u32,
    height: u32,
) -> Invocation {
    ffmpeg(tools)
        .arg("-i")
        .arg(src)
        .arg("-vf")
        .arg(scale_filter(width, height))
        .args(["-q:v", "1"])
        .arg(dst)
}

/// Any container image to packed raw at the given size.
pub fn to_raw(tools: &ToolPaths, src: &Path, dst: &Path, width: u32, height: u32) -> Invocation {
    ffmpeg(tools)
        .arg("-i")
        .arg(src)
        .arg("-vf")
        .arg(scale_filter(width, height))
        .args(["-pix_fmt", RAW_PIX_FMT, "-f", "rawvideo"])
        .arg(dst)
}

/// Packed raw to a 16-bit TIFF tagged with `transfer` and `gamut`.
pub fn wrap_tiff(
    tools: &ToolPaths,
    raw: &Path,
    raw_size: (u32, u32),
    plan: &ScalePlan,
    gamut: Gamut,
    transfer: TransferFunction,
    dst: &Path,
) -> Invocation {
    let (w, h) = raw_size;
    let mut inv = ffmpeg(tools)
        .args(["-f", "rawvideo", "-pix_fmt", RAW_PIX_FMT, "-s"])
        .arg(format!("{w}x{h}"))
        .arg("-i")
        .arg(raw);
    if plan.scaled {
        inv = inv
            .arg("-vf")
            .arg(scale_filter(plan.target_width, plan.target_height));
    }
    inv.args([
        "-pix_fmt",
        "rgb48le",
        "-color_primaries",
        gamut.ffmpeg_primaries(),
        "-color_trc",
        transfer.ffmpeg_trc(),
    ])
    .arg(dst)
}

/// UltraHDR from an HDR raw intent; the encoder derives the gain map.
#[allow(clippy::too_many_arguments)]
pub fn encode_from_raw(
    tools: &ToolPaths,
    raw: &Path,
    width: u32,
    height: u32,
    color: &ColorDecision,
    base_quality: u8,
    gainmap_quality: u8,
    dst: &Path,
) -> Invocation {
    Invocation::new(&tools.ultrahdr_app)
        .args(["-m", "0", "-p"])
        .arg(raw)
        .args([
            "-a".to_string(),
            UHDR_RGBA1010102.to_string(),
            "-w".to_string(),
            width.to_string(),
            "-h".to_string(),
            height.to_string(),
            "-C".to_string(),
            color.gamut_code.to_string(),
            "-t".to_string(),
            color.transfer.uhdr_code().to_string(),
            "-R".to_string(),
            UHDR_FULL_RANGE.to_string(),
            "-q".to_string(),
            base_quality.to_string(),
            "-Q".to_string(),
            gainmap_quality.to_string(),
            "-z".to_string(),
        ])
        .arg(dst)
}

/// UltraHDR from an SDR base JPEG, a gain-map JPEG and a metadata config.
pub fn encode_with_gainmap(
    tools: &ToolPaths,
    base: &Path,
    gainmap: &Path,
    metadata_cfg: &Path,
    dst: &Path,
) -> Invocation {
    Invocation::new(&tools.ultrahdr_app)
        .args(["-m", "0", "-i"])
        .arg(base)
        .arg("-g")
        .arg(gainmap)
        .arg("-f")
        .arg(metadata_cfg)
        .arg("-z")
        .arg(dst)
}

/// UltraHDR back to packed raw in `transfer`.
pub fn decode_to_raw(
    tools: &ToolPaths,
    src: &Path,
    transfer: TransferFunction,
    dst: &Path,
) -> Invocation {
    Invocation::new(&tools.ultrahdr_app)
        .args(["-m", "1", "-j"])
        .arg(src)
        .args([
            "-o".to_string(),
            transfer.uhdr_code().to_string(),
            "-O".to_string(),
            UHDR_RGBA1010102.to_string(),
            "-z".to_string(),
        ])
        .arg(dst)
}

/// Copy tags from `src` onto `dst` in place.
pub fn copy_metadata(
    tools: &ToolPaths,
    src: &Path,
    dst: &Path,
    scope: MetadataScope,
) -> Invocation {
    Invocation::new(&tools.exiftool)
        .args(["-overwrite_original", "-TagsFromFile"])
        .arg(src)
        .arg(scope.exiftool_selector())
        .arg(dst)
}
