//! Linear conversion chains built from the gateway, probe and policy modules.
//!
//! Every run owns a [`WorkDir`]; all intermediates and the staged output
//! live there until the Publish stage moves the result into place. The
//! directory is removed when the run ends, whatever the outcome.

pub mod commands;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::color::{self, ColorDecision};
use crate::config::{RunConfig, ToolPaths};
use crate::error::{Error, Result};
use crate::gainmap::GainMapConfig;
use crate::gateway::{ToolGateway, ToolRunner};
use crate::probe::{self, AssetDescriptor};
use crate::scale::ScalePlan;
use crate::workdir::WorkDir;

use commands::RAW_BYTES_PER_PIXEL;

/// Base image name handed to the HEIF decoder; auxiliary images are written
/// next to it with a URN suffix.
const HEIF_BASE: &str = "base.jpg";
const HEIF_GAINMAP_MARKER: &str = "hdrgainmap";

/// The supported conversion paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Apple HDR HEIC to UltraHDR JPEG.
    HeicToUltraHdr,
    /// UltraHDR JPEG to 16-bit HDR TIFF.
    UltraHdrToTiff,
    /// Apple HDR HEIC to HDR TIFF through an UltraHDR intermediate.
    HeicToTiff,
    /// Any HDR image the muxer can read to UltraHDR JPEG.
    HdrToUltraHdr,
}

impl Conversion {
    /// Collaborators this path calls, in the order it first calls them.
    pub fn required_tools<'a>(&self, tools: &'a ToolPaths) -> Vec<&'a str> {
        let exiftool = tools.exiftool.as_str();
        let ffmpeg = tools.ffmpeg.as_str();
        let ultrahdr_app = tools.ultrahdr_app.as_str();
        let heif_dec = tools.heif_dec.as_str();
        match self {
            Conversion::HeicToUltraHdr | Conversion::HeicToTiff => {
                vec![exiftool, heif_dec, ffmpeg, ultrahdr_app]
            }
            Conversion::UltraHdrToTiff => vec![exiftool, ultrahdr_app, ffmpeg],
            Conversion::HdrToUltraHdr => vec![exiftool, ffmpeg, ultrahdr_app],
        }
    }

    pub fn output_extension(&self) -> &'static str {
        match self {
            Conversion::HeicToUltraHdr | Conversion::HdrToUltraHdr => "jpg",
            Conversion::UltraHdrToTiff | Conversion::HeicToTiff => "tiff",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Conversion::HeicToUltraHdr => "heic-to-uhdr",
            Conversion::UltraHdrToTiff => "uhdr-to-tiff",
            Conversion::HeicToTiff => "heic-to-tiff",
            Conversion::HdrToUltraHdr => "hdr-to-uhdr",
        }
    }
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A step of a run, as reported in failures and in [`RunReport::stages`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    ToolCheck,
    Probe,
    GainMapDerivation,
    ScaleDecision,
    Extract,
    Scale,
    RawConvert,
    Encode,
    Decode,
    Wrap,
    Publish,
    MetadataCopy,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::ToolCheck => "tool-check",
            Stage::Probe => "probe",
            Stage::GainMapDerivation => "gain-map-derivation",
            Stage::ScaleDecision => "scale-decision",
            Stage::Extract => "extract",
            Stage::Scale => "scale",
            Stage::RawConvert => "raw-convert",
            Stage::Encode => "encode",
            Stage::Decode => "decode",
            Stage::Wrap => "wrap",
            Stage::Publish => "publish",
            Stage::MetadataCopy => "metadata-copy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A run that stopped at `stage`. Nothing after it was attempted.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl PipelineError {
    /// The output was written; only the tag copy onto it failed.
    pub fn converted(&self) -> bool {
        matches!(self.source, Error::MetadataCopyFailed { .. })
    }
}

/// What a successful run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub conversion: Conversion,
    pub output: PathBuf,
    /// Completed stages in execution order.
    pub stages: Vec<Stage>,
    /// Non-fatal findings: colour guesses and raw size mismatches.
    pub warnings: Vec<String>,
    pub color: Option<ColorDecision>,
    pub scale: Option<ScalePlan>,
    pub gainmap: Option<GainMapConfig>,
    /// Set when the work directory was left on disk.
    pub kept_work_dir: Option<PathBuf>,
}

impl RunReport {
    fn new(conversion: Conversion, output: &Path) -> Self {
        Self {
            conversion,
            output: output.to_path_buf(),
            stages: Vec::new(),
            warnings: Vec::new(),
            color: None,
            scale: None,
            gainmap: None,
            kept_work_dir: None,
        }
    }
}

/// Runs conversions with one configuration over one [`ToolRunner`].
#[derive(Debug, Clone)]
pub struct Pipeline<R> {
    gateway: ToolGateway<R>,
    config: RunConfig,
}

impl<R: ToolRunner> Pipeline<R> {
    pub fn new(runner: R, config: RunConfig) -> Self {
        Self {
            gateway: ToolGateway::new(runner),
            config,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn gateway(&self) -> &ToolGateway<R> {
        &self.gateway
    }

    /// Probe a single asset without converting anything.
    pub fn probe(&self, path: &Path) -> Result<AssetDescriptor> {
        let exiftool = self.config.tools.exiftool.as_str();
        self.gateway.check([exiftool])?;
        probe::probe(&self.gateway, exiftool, path)
    }

    /// Convert `input` into `output` along `conversion`.
    ///
    /// The work directory is removed before this returns, on success and on
    /// failure, unless `keep_work` is set.
    pub fn run(
        &self,
        conversion: Conversion,
        input: &Path,
        output: &Path,
    ) -> std::result::Result<RunReport, PipelineError> {
        info!("{conversion}: {} -> {}", input.display(), output.display());
        let init = |source| PipelineError {
            stage: Stage::Init,
            source,
        };
        self.preflight(input, output).map_err(init)?;
        let mut work = WorkDir::create(&self.config.work_root).map_err(init)?;
        work.keep(self.config.keep_work);

        let mut run = Run {
            pipeline: self,
            report: RunReport::new(conversion, output),
            work,
        };
        run.report.stages.push(Stage::Init);
        let outcome = run.execute(conversion, input, output);

        let Run {
            mut report, work, ..
        } = run;
        if self.config.keep_work {
            report.kept_work_dir = Some(work.path().to_path_buf());
        }
        drop(work);
        outcome.map(|()| report)
    }

    fn preflight(&self, input: &Path, output: &Path) -> Result<()> {
        self.config.validate()?;
        if !input.is_file() {
            return Err(Error::io(
                format!("Input {}", input.display()),
                io::Error::from(io::ErrorKind::NotFound),
            ));
        }
        let same = input == output
            || matches!(
                (fs::canonicalize(input), fs::canonicalize(output)),
                (Ok(a), Ok(b)) if a == b
            );
        if same {
            return Err(Error::InvalidConfig(format!(
                "output would overwrite the input {}",
                input.display()
            )));
        }
        Ok(())
    }
}

/// State of one in-flight run.
struct Run<'p, R> {
    pipeline: &'p Pipeline<R>,
    report: RunReport,
    work: WorkDir,
}

impl<'p, R: ToolRunner> Run<'p, R> {
    fn stage<T>(
        &mut self,
        stage: Stage,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> std::result::Result<T, PipelineError> {
        info!("[{stage}]");
        match f(self) {
            Ok(value) => {
                self.report.stages.push(stage);
                Ok(value)
            }
            Err(source) => Err(PipelineError { stage, source }),
        }
    }

    fn config(&self) -> &'p RunConfig {
        &self.pipeline.config
    }

    fn gateway(&self) -> &'p ToolGateway<R> {
        &self.pipeline.gateway
    }

    fn execute(
        &mut self,
        conversion: Conversion,
        input: &Path,
        output: &Path,
    ) -> std::result::Result<(), PipelineError> {
        let tools = conversion.required_tools(&self.config().tools);
        self.stage(Stage::ToolCheck, |run| run.gateway().check(tools))?;

        let staged = self
            .work
            .file(&format!("output.{}", conversion.output_extension()));
        match conversion {
            Conversion::HeicToUltraHdr => self.heic_to_uhdr(input, &staged)?,
            Conversion::UltraHdrToTiff => self.uhdr_to_tiff(input, &staged)?,
            Conversion::HeicToTiff => {
                let intermediate = self.work.file("intermediate.jpg");
                self.heic_to_uhdr(input, &intermediate)?;
                self.uhdr_to_tiff(&intermediate, &staged)?;
            }
            Conversion::HdrToUltraHdr => self.hdr_to_uhdr(input, &staged)?,
        }

        self.stage(Stage::Publish, |_| publish(&staged, output))?;
        self.stage(Stage::MetadataCopy, |run| {
            let inv = commands::copy_metadata(
                &run.config().tools,
                input,
                output,
                run.config().metadata_scope,
            );
            run.gateway()
                .invoke(&inv)
                .map(drop)
                .map_err(|e| Error::MetadataCopyFailed {
                    dest: output.to_path_buf(),
                    source: Box::new(e),
                })
        })
    }

    fn probe(&self, path: &Path) -> Result<AssetDescriptor> {
        probe::probe(self.gateway(), &self.config().tools.exiftool, path)
    }

    /// `infer` has already logged these; only record them.
    fn note_color(&mut self, decision: ColorDecision) {
        self.report.warnings.extend(decision.warnings());
        self.report.color = Some(decision);
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.report.warnings.push(message);
    }

    fn decide_scale(
        &mut self,
        descriptor: &AssetDescriptor,
    ) -> std::result::Result<ScalePlan, PipelineError> {
        self.stage(Stage::ScaleDecision, |run| {
            let plan = ScalePlan::plan(
                descriptor.width,
                descriptor.height,
                run.config().max_dimension,
            );
            if plan.scaled {
                info!(
                    "scaling {}x{} -> {}x{}",
                    descriptor.width, descriptor.height, plan.target_width, plan.target_height
                );
            }
            run.report.scale.get_or_insert(plan);
            Ok(plan)
        })
    }

    /// Base image + Apple gain map + derived metadata, re-encoded as UltraHDR.
    ///
    /// The encoder takes colour from the decoded base image, so no inference
    /// runs on the HEIC.
    fn heic_to_uhdr(&mut self, input: &Path, dst: &Path) -> std::result::Result<(), PipelineError> {
        let descriptor = self.stage(Stage::Probe, |run| run.probe(input))?;

        let metadata_cfg = self.stage(Stage::GainMapDerivation, |run| {
            let config = GainMapConfig::from_descriptor(&descriptor)?;
            let path = run.work.file("metadata.cfg");
            fs::write(&path, config.to_config_text())
                .map_err(|e| Error::io(format!("Failed to write {}", path.display()), e))?;
            info!(
                "gain map: max content boost {:.4}",
                config.max_content_boost[0]
            );
            run.report.gainmap = Some(config);
            Ok(path)
        })?;

        let plan = self.decide_scale(&descriptor)?;

        let (base, gainmap) = self.stage(Stage::Extract, |run| {
            let base = run.work.file(HEIF_BASE);
            let inv = commands::heif_extract(&run.config().tools, input, &base);
            run.gateway().invoke(&inv)?;
            let gainmap = find_gainmap(run.work.path())?;
            Ok((base, gainmap))
        })?;

        let (base, gainmap) = if plan.scaled {
            self.stage(Stage::Scale, |run| {
                let gm = run.probe(&gainmap)?;
                let (gm_w, gm_h) = plan.companion(
                    (descriptor.width, descriptor.height),
                    (gm.width, gm.height),
                );
                let tools = &run.config().tools;
                let scaled_base = run.work.file("base-scaled.jpg");
                let scaled_gm = run.work.file("gainmap-scaled.jpg");
                run.gateway().invoke(&commands::scale_jpeg(
                    tools,
                    &base,
                    &scaled_base,
                    plan.target_width,
                    plan.target_height,
                ))?;
                run.gateway()
                    .invoke(&commands::scale_jpeg(tools, &gainmap, &scaled_gm, gm_w, gm_h))?;
                Ok((scaled_base, scaled_gm))
            })?
        } else {
            (base, gainmap)
        };

        self.stage(Stage::Encode, |run| {
            let inv = commands::encode_with_gainmap(
                &run.config().tools,
                &base,
                &gainmap,
                &metadata_cfg,
                dst,
            );
            run.gateway().invoke(&inv).map(drop)
        })
    }

    /// Decode to packed raw in the configured transfer, then wrap as TIFF.
    fn uhdr_to_tiff(&mut self, input: &Path, dst: &Path) -> std::result::Result<(), PipelineError> {
        let descriptor = self.stage(Stage::Probe, |run| run.probe(input))?;
        let decision = color::infer(&descriptor);
        let gamut = decision.gamut;
        self.note_color(decision);
        let plan = self.decide_scale(&descriptor)?;

        let transfer = self.config().tiff_transfer;
        let raw = self.work.file("decoded.raw");
        self.stage(Stage::Decode, |run| {
            let inv = commands::decode_to_raw(&run.config().tools, input, transfer, &raw);
            run.gateway().invoke(&inv)?;
            run.check_raw_size(&raw, descriptor.width, descriptor.height);
            Ok(())
        })?;

        self.stage(Stage::Wrap, |run| {
            let inv = commands::wrap_tiff(
                &run.config().tools,
                &raw,
                (descriptor.width, descriptor.height),
                &plan,
                gamut,
                transfer,
                dst,
            );
            run.gateway().invoke(&inv).map(drop)
        })
    }

    /// Muxer to packed raw at the planned size, then let the encoder derive
    /// the gain map.
    fn hdr_to_uhdr(&mut self, input: &Path, dst: &Path) -> std::result::Result<(), PipelineError> {
        let descriptor = self.stage(Stage::Probe, |run| run.probe(input))?;
        let decision = color::infer(&descriptor);
        self.note_color(decision.clone());
        let plan = self.decide_scale(&descriptor)?;
        let (w, h) = (plan.target_width, plan.target_height);

        let raw = self.work.file("hdr.raw");
        self.stage(Stage::RawConvert, |run| {
            let inv = commands::to_raw(&run.config().tools, input, &raw, w, h);
            run.gateway().invoke(&inv)?;
            run.check_raw_size(&raw, w, h);
            Ok(())
        })?;

        self.stage(Stage::Encode, |run| {
            let config = run.config();
            let inv = commands::encode_from_raw(
                &config.tools,
                &raw,
                w,
                h,
                &decision,
                config.base_quality,
                config.gainmap_quality,
                dst,
            );
            run.gateway().invoke(&inv).map(drop)
        })
    }

    /// Compare a raw file's length with `width * height * 4`. A mismatch is
    /// recorded, not fatal.
    fn check_raw_size(&mut self, raw: &Path, width: u32, height: u32) {
        let expected = u64::from(width) * u64::from(height) * RAW_BYTES_PER_PIXEL;
        let problem = match fs::metadata(raw) {
            Ok(meta) if meta.len() == expected => return,
            Ok(meta) => format!(
                "{} is {} bytes, expected {expected} for {width}x{height}",
                raw.display(),
                meta.len()
            ),
            Err(e) => format!("{}: {e}", raw.display()),
        };
        self.warn(Error::shape(problem).to_string());
    }
}

/// The auxiliary image the HEIF decoder wrote for Apple's HDR gain map.
fn find_gainmap(dir: &Path) -> Result<PathBuf> {
    let entries =
        fs::read_dir(dir).map_err(|e| Error::io(format!("Failed to list {}", dir.display()), e))?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(HEIF_GAINMAP_MARKER))
        })
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| Error::shape("HEIF decoder wrote no HDR gain map auxiliary image"))
}

/// Move the staged result into place, copying across filesystems.
fn publish(staged: &Path, output: &Path) -> Result<()> {
    if fs::rename(staged, output).is_ok() {
        return Ok(());
    }
    fs::copy(staged, output)
        .map(drop)
        .map_err(|e| Error::io(format!("Failed to write {}", output.display()), e))
}
