use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hdrbridge::{
    Conversion, Error, Gamut, Invocation, Pipeline, RunConfig, Stage, ToolOutput, ToolRunner,
    TransferFunction,
};
use tempfile::TempDir;

const W: u32 = 64;
const H: u32 = 48;

fn exif_xml(width: u32, height: u32, extra: &str) -> String {
    format!(
        "<?xml version='1.0' encoding='UTF-8'?>\n\
         <rdf:RDF xmlns:rdf='http://www.w3.org/1999/02/22-rdf-syntax-ns#'>\n\
         <rdf:Description rdf:about='x'>\n\
         <File:ImageWidth>{width}</File:ImageWidth>\n\
         <File:ImageHeight>{height}</File:ImageHeight>\n\
         {extra}\n\
         </rdf:Description>\n\
         </rdf:RDF>\n"
    )
}

fn apple_heic_xml() -> String {
    exif_xml(
        W,
        H,
        "<ICC_Profile:ProfileDescription>Display P3</ICC_Profile:ProfileDescription>\
         <Apple:HDRHeadroom>0.5</Apple:HDRHeadroom>\
         <Apple:HDRGain>0.005</Apple:HDRGain>",
    )
}

/// Pretends to be every collaborator: records calls and writes the files
/// each one would have produced.
struct FakeRunner {
    missing: Vec<&'static str>,
    /// Reader output for paths whose file name contains the key.
    probes: Vec<(&'static str, String)>,
    default_probe: String,
    raw_len: usize,
    fail: Option<Box<dyn Fn(&Invocation) -> bool>>,
    calls: RefCell<Vec<Invocation>>,
    metadata_cfg: RefCell<Option<String>>,
}

impl FakeRunner {
    fn new(default_probe: String) -> Self {
        Self {
            missing: Vec::new(),
            probes: Vec::new(),
            default_probe,
            raw_len: (W * H * 4) as usize,
            fail: None,
            calls: RefCell::new(Vec::new()),
            metadata_cfg: RefCell::new(None),
        }
    }

    fn programs(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.program.clone()).collect()
    }

    fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.program == program)
            .cloned()
            .collect()
    }

    fn probe_output(&self, inv: &Invocation) -> String {
        let target = inv.args_lossy().last().cloned().unwrap_or_default();
        self.probes
            .iter()
            .find(|(key, _)| target.contains(key))
            .map(|(_, xml)| xml.clone())
            .unwrap_or_else(|| self.default_probe.clone())
    }

    fn produce(&self, path: &Path) -> io::Result<()> {
        if path.extension().is_some_and(|e| e == "raw") {
            fs::write(path, vec![0u8; self.raw_len])
        } else {
            fs::write(path, b"fake")
        }
    }
}

impl ToolRunner for FakeRunner {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        if self.missing.iter().any(|m| *m == program) {
            return None;
        }
        Some(PathBuf::from("/fake/bin").join(program))
    }

    fn run(&self, inv: &Invocation) -> io::Result<ToolOutput> {
        self.calls.borrow_mut().push(inv.clone());
        if self.fail.as_ref().is_some_and(|f| f(inv)) {
            return Ok(ToolOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: format!("{} exploded", inv.program),
            });
        }

        let last = inv.args.last().map(PathBuf::from);
        let mut stdout = String::new();
        match inv.program.as_str() {
            "exiftool" if inv.value_of("-TagsFromFile").is_none() => {
                stdout = self.probe_output(inv);
            }
            "heif-dec" => {
                let base = last.expect("heif-dec output");
                self.produce(&base)?;
                let aux = base.with_file_name("base-urn:com:apple:photo:2020:aux:hdrgainmap.jpg");
                self.produce(&aux)?;
            }
            "ffmpeg" => self.produce(&last.expect("ffmpeg output"))?,
            "ultrahdr_app" => {
                if let Some(cfg) = inv.value_of("-f") {
                    *self.metadata_cfg.borrow_mut() = Some(fs::read_to_string(cfg)?);
                }
                self.produce(Path::new(inv.value_of("-z").expect("ultrahdr_app output")))?;
            }
            _ => {}
        }
        Ok(ToolOutput {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

/// Per-test directory holding the input, the output and the work root.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("work")).unwrap();
        Self { dir }
    }

    fn input(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, b"source").unwrap();
        path
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn work_root(&self) -> PathBuf {
        self.path("work")
    }

    fn config(&self) -> RunConfig {
        RunConfig {
            work_root: self.work_root(),
            ..RunConfig::default()
        }
    }

    fn work_is_empty(&self) -> bool {
        fs::read_dir(self.work_root()).unwrap().next().is_none()
    }
}

fn arg(inv: &Invocation, flag: &str) -> Option<String> {
    inv.value_of(flag).map(|v| v.to_string_lossy().into_owned())
}

#[test]
fn missing_tool_runs_nothing_and_cleans_up() {
    let sb = Sandbox::new();
    let input = sb.input("IMG_0001.HEIC");
    let mut runner = FakeRunner::new(apple_heic_xml());
    runner.missing = vec!["heif-dec"];
    let pipeline = Pipeline::new(runner, sb.config());

    let err = pipeline
        .run(Conversion::HeicToUltraHdr, &input, &sb.path("out.jpg"))
        .unwrap_err();

    assert_eq!(err.stage, Stage::ToolCheck);
    assert!(matches!(err.source, Error::ToolNotFound { ref program } if program == "heif-dec"));
    assert!(pipeline.gateway().runner().calls.borrow().is_empty());
    assert!(sb.work_is_empty());
    assert!(!sb.path("out.jpg").exists());
}

#[test]
fn heic_to_uhdr_derives_gain_map_metadata() {
    let sb = Sandbox::new();
    let input = sb.input("IMG_0001.HEIC");
    let output = sb.path("out.jpg");
    let pipeline = Pipeline::new(FakeRunner::new(apple_heic_xml()), sb.config());

    let report = pipeline
        .run(Conversion::HeicToUltraHdr, &input, &output)
        .unwrap();

    assert_eq!(
        report.stages,
        [
            Stage::Init,
            Stage::ToolCheck,
            Stage::Probe,
            Stage::GainMapDerivation,
            Stage::ScaleDecision,
            Stage::Extract,
            Stage::Encode,
            Stage::Publish,
            Stage::MetadataCopy,
        ]
    );
    let runner = pipeline.gateway().runner();
    assert_eq!(
        runner.programs(),
        ["exiftool", "heif-dec", "ultrahdr_app", "exiftool"]
    );

    let encode = &runner.calls_to("ultrahdr_app")[0];
    assert!(arg(encode, "-g").unwrap().ends_with("hdrgainmap.jpg"));
    assert!(arg(encode, "-i").unwrap().ends_with("base.jpg"));
    let cfg = runner.metadata_cfg.borrow().clone().unwrap();
    assert!(cfg.starts_with("--maxContentBoost 3.249010 3.249010 3.249010\n"));
    assert!(cfg.contains("--hdrCapacityMax 3.249010\n"));

    let boost = report.gainmap.unwrap().max_content_boost[0];
    assert!((boost - 3.249_01).abs() < 1e-4);
    assert!(output.is_file());
    assert!(report.kept_work_dir.is_none());
    assert!(sb.work_is_empty());
    assert!(report.color.is_none());
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);

    let copy = runner.calls.borrow().last().cloned().unwrap();
    assert_eq!(arg(&copy, "-TagsFromFile").as_deref(), input.to_str());
    assert_eq!(copy.args_lossy().last().map(String::as_str), output.to_str());
}

#[test]
fn heic_gain_map_is_scaled_with_the_base() {
    let sb = Sandbox::new();
    let input = sb.input("IMG_0002.HEIC");
    let mut runner = FakeRunner::new(apple_heic_xml());
    runner.probes = vec![("hdrgainmap", exif_xml(W / 2, H / 2, ""))];
    let config = RunConfig {
        max_dimension: 32,
        ..sb.config()
    };
    let pipeline = Pipeline::new(runner, config);

    let report = pipeline
        .run(Conversion::HeicToUltraHdr, &input, &sb.path("out.jpg"))
        .unwrap();

    assert!(report.stages.contains(&Stage::Scale));
    let plan = report.scale.unwrap();
    assert_eq!((plan.target_width, plan.target_height), (32, 24));

    let runner = pipeline.gateway().runner();
    let filters: Vec<String> = runner
        .calls_to("ffmpeg")
        .iter()
        .filter_map(|c| arg(c, "-vf"))
        .collect();
    assert_eq!(filters, ["scale=32:24", "scale=16:12"]);
    let encode = &runner.calls_to("ultrahdr_app")[0];
    assert!(arg(encode, "-i").unwrap().ends_with("base-scaled.jpg"));
    assert!(arg(encode, "-g").unwrap().ends_with("gainmap-scaled.jpg"));
}

#[test]
fn missing_apple_tags_fail_before_extraction() {
    let sb = Sandbox::new();
    let input = sb.input("plain.heic");
    let pipeline = Pipeline::new(FakeRunner::new(exif_xml(W, H, "")), sb.config());

    let err = pipeline
        .run(Conversion::HeicToUltraHdr, &input, &sb.path("out.jpg"))
        .unwrap_err();

    assert_eq!(err.stage, Stage::GainMapDerivation);
    assert!(matches!(
        err.source,
        Error::GainMetadataMissing {
            tag: "HDRHeadroom",
            ..
        }
    ));
    assert_eq!(pipeline.gateway().runner().programs(), ["exiftool"]);
    assert!(sb.work_is_empty());
}

#[test]
fn uhdr_to_tiff_decodes_then_wraps() {
    let sb = Sandbox::new();
    let input = sb.input("photo.jpg");
    let output = sb.path("photo.tiff");
    let xml = exif_xml(
        W,
        H,
        "<ICC_Profile:ProfileDescription>Display P3</ICC_Profile:ProfileDescription>",
    );
    let pipeline = Pipeline::new(FakeRunner::new(xml), sb.config());

    let report = pipeline
        .run(Conversion::UltraHdrToTiff, &input, &output)
        .unwrap();

    let runner = pipeline.gateway().runner();
    assert_eq!(
        runner.programs(),
        ["exiftool", "ultrahdr_app", "ffmpeg", "exiftool"]
    );
    let decode = &runner.calls_to("ultrahdr_app")[0];
    assert_eq!(arg(decode, "-m").as_deref(), Some("1"));
    assert_eq!(arg(decode, "-o").as_deref(), Some("2"));
    let wrap = &runner.calls_to("ffmpeg")[0];
    assert_eq!(arg(wrap, "-s").as_deref(), Some("64x48"));
    assert_eq!(arg(wrap, "-color_primaries").as_deref(), Some("smpte432"));
    assert_eq!(arg(wrap, "-color_trc").as_deref(), Some("smpte2084"));
    assert!(arg(wrap, "-vf").is_none());

    assert!(output.is_file());
    assert!(report.warnings.iter().all(|w| !w.contains("bytes")));
}

#[test]
fn short_raw_output_is_only_a_warning() {
    let sb = Sandbox::new();
    let input = sb.input("photo.jpg");
    let mut runner = FakeRunner::new(exif_xml(W, H, ""));
    runner.raw_len = 100;
    let pipeline = Pipeline::new(runner, sb.config());

    let report = pipeline
        .run(Conversion::UltraHdrToTiff, &input, &sb.path("photo.tiff"))
        .unwrap();

    let expected = format!("expected {}", W * H * 4);
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.starts_with("unexpected output shape") && w.contains(&expected)),
        "{:?}",
        report.warnings
    );
    assert_eq!(report.stages.last(), Some(&Stage::MetadataCopy));
}

#[test]
fn hdr_source_is_encoded_from_raw() {
    let sb = Sandbox::new();
    let input = sb.input("scene.avif");
    let xml = exif_xml(
        W,
        H,
        "<QuickTime:TransferCharacteristics>SMPTE ST 2084 (PQ)</QuickTime:TransferCharacteristics>\
         <QuickTime:ColorPrimaries>BT.2020, BT.2100</QuickTime:ColorPrimaries>",
    );
    let config = RunConfig {
        base_quality: 90,
        gainmap_quality: 80,
        ..sb.config()
    };
    let pipeline = Pipeline::new(FakeRunner::new(xml), config);

    let report = pipeline
        .run(Conversion::HdrToUltraHdr, &input, &sb.path("scene.jpg"))
        .unwrap();

    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    let color = report.color.unwrap();
    assert_eq!(color.gamut_code, 2);

    let runner = pipeline.gateway().runner();
    let raw = &runner.calls_to("ffmpeg")[0];
    assert_eq!(arg(raw, "-pix_fmt").as_deref(), Some("x2bgr10le"));
    let encode = &runner.calls_to("ultrahdr_app")[0];
    assert_eq!(arg(encode, "-t").as_deref(), Some("2"));
    assert_eq!(arg(encode, "-C").as_deref(), Some("2"));
    assert_eq!(arg(encode, "-w").as_deref(), Some("64"));
    assert_eq!(arg(encode, "-h").as_deref(), Some("48"));
    assert_eq!(arg(encode, "-q").as_deref(), Some("90"));
    assert_eq!(arg(encode, "-Q").as_deref(), Some("80"));
}

#[test]
fn heic_to_tiff_goes_through_ultrahdr() {
    let sb = Sandbox::new();
    let input = sb.input("IMG_0003.HEIC");
    let pipeline = Pipeline::new(FakeRunner::new(apple_heic_xml()), sb.config());

    let report = pipeline
        .run(Conversion::HeicToTiff, &input, &sb.path("out.tiff"))
        .unwrap();

    let runner = pipeline.gateway().runner();
    assert_eq!(
        runner.programs(),
        [
            "exiftool",
            "heif-dec",
            "ultrahdr_app",
            "exiftool",
            "ultrahdr_app",
            "ffmpeg",
            "exiftool",
        ]
    );
    let decode = &runner.calls_to("ultrahdr_app")[1];
    assert!(arg(decode, "-j").unwrap().ends_with("intermediate.jpg"));
    assert_eq!(report.stages.iter().filter(|s| **s == Stage::Probe).count(), 2);
    assert!(sb.path("out.tiff").is_file());
    assert_eq!(
        report.warnings,
        ["transfer function not tagged; assuming HLG"],
        "only the intermediate is inferred"
    );
}

#[test]
fn untagged_jpeg_defaults_to_hlg_bt2020() {
    let sb = Sandbox::new();
    let input = sb.path("photo.jpg");
    // SOI, then an APP2 ICC_PROFILE segment naming sRGB, then EOI.
    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE2, 0x00, 0x26];
    jpeg.extend_from_slice(b"ICC_PROFILE\0\x01\x01");
    jpeg.extend_from_slice(b"desc sRGB IEC61966-2.1");
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    fs::write(&input, jpeg).unwrap();
    let pipeline = Pipeline::new(FakeRunner::new(exif_xml(W, H, "")), sb.config());

    let report = pipeline
        .run(Conversion::UltraHdrToTiff, &input, &sb.path("photo.tiff"))
        .unwrap();

    let color = report.color.unwrap();
    assert_eq!(color.transfer, TransferFunction::Hlg);
    assert_eq!(color.gamut, Gamut::Bt2020);
    assert!(!color.had_explicit_color_info);
    let wrap = &pipeline.gateway().runner().calls_to("ffmpeg")[0];
    assert_eq!(arg(wrap, "-color_primaries").as_deref(), Some("bt2020"));
}

#[test]
fn stage_failure_aborts_the_rest() {
    let sb = Sandbox::new();
    let input = sb.input("IMG_0004.HEIC");
    let output = sb.path("out.jpg");
    let mut runner = FakeRunner::new(apple_heic_xml());
    runner.fail = Some(Box::new(|inv: &Invocation| inv.program == "ultrahdr_app"));
    let pipeline = Pipeline::new(runner, sb.config());

    let err = pipeline
        .run(Conversion::HeicToUltraHdr, &input, &output)
        .unwrap_err();

    assert_eq!(err.stage, Stage::Encode);
    assert!(!err.converted());
    match &err.source {
        Error::ToolExecutionFailed {
            program,
            exit_code,
            stderr,
            ..
        } => {
            assert_eq!(program, "ultrahdr_app");
            assert_eq!(*exit_code, Some(1));
            assert!(stderr.contains("exploded"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        pipeline.gateway().runner().programs(),
        ["exiftool", "heif-dec", "ultrahdr_app"]
    );
    assert!(!output.exists());
    assert!(sb.work_is_empty());
}

#[test]
fn metadata_copy_failure_keeps_the_output() {
    let sb = Sandbox::new();
    let input = sb.input("scene.avif");
    let output = sb.path("scene.jpg");
    let mut runner = FakeRunner::new(exif_xml(W, H, ""));
    runner.fail = Some(Box::new(|inv: &Invocation| inv.value_of("-TagsFromFile").is_some()));
    let pipeline = Pipeline::new(runner, sb.config());

    let err = pipeline
        .run(Conversion::HdrToUltraHdr, &input, &output)
        .unwrap_err();

    assert_eq!(err.stage, Stage::MetadataCopy);
    assert!(err.converted());
    assert!(matches!(err.source, Error::MetadataCopyFailed { .. }));
    assert!(output.is_file());
    assert!(sb.work_is_empty());
}

#[test]
fn output_may_not_replace_input() {
    let sb = Sandbox::new();
    let input = sb.input("photo.jpg");
    let pipeline = Pipeline::new(FakeRunner::new(exif_xml(W, H, "")), sb.config());

    let err = pipeline
        .run(Conversion::HdrToUltraHdr, &input, &input)
        .unwrap_err();

    assert_eq!(err.stage, Stage::Init);
    assert!(matches!(err.source, Error::InvalidConfig(_)));
    assert!(pipeline.gateway().runner().calls.borrow().is_empty());
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let sb = Sandbox::new();
    let input = sb.input("scene.avif");
    let config = RunConfig {
        max_dimension: 4095,
        ..sb.config()
    };
    let pipeline = Pipeline::new(FakeRunner::new(exif_xml(W, H, "")), config);

    let err = pipeline
        .run(Conversion::HdrToUltraHdr, &input, &sb.path("scene.jpg"))
        .unwrap_err();

    assert_eq!(err.stage, Stage::Init);
    assert!(matches!(err.source, Error::InvalidConfig(_)));
    assert!(sb.work_is_empty());
}

#[test]
fn keep_work_leaves_intermediates() {
    let sb = Sandbox::new();
    let input = sb.input("IMG_0005.HEIC");
    let config = RunConfig {
        keep_work: true,
        ..sb.config()
    };
    let pipeline = Pipeline::new(FakeRunner::new(apple_heic_xml()), config);

    let report = pipeline
        .run(Conversion::HeicToUltraHdr, &input, &sb.path("out.jpg"))
        .unwrap();

    let kept = report.kept_work_dir.unwrap();
    assert!(kept.join("metadata.cfg").is_file());
    assert!(kept.join("base.jpg").is_file());
}
