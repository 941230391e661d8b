use std::{
    ffi::OsStr,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use clap::Parser;
use hdrbridge::{Conversion, GainMapConfig, Pipeline, RunConfig, ScalePlan, SystemRunner, color};

mod cli;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(args.verbose);
    run(args.command)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default));
    builder.format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()));
    let _ = builder.try_init();
}

fn run(cmd: cli::Command) -> Result<()> {
    match cmd {
        cli::Command::HeicToUhdr(args) => convert(Conversion::HeicToUltraHdr, &args),
        cli::Command::UhdrToTiff(args) => convert(Conversion::UltraHdrToTiff, &args),
        cli::Command::HeicToTiff(args) => convert(Conversion::HeicToTiff, &args),
        cli::Command::HdrToUhdr(args) => convert(Conversion::HdrToUltraHdr, &args),
        cli::Command::Probe(args) => probe(&args),
    }
}

fn convert(conversion: Conversion, args: &cli::ConvertArgs) -> Result<()> {
    ensure!(
        args.input.is_file(),
        "Input {} does not exist or is not a file",
        args.input.display()
    );
    let out_path = resolve_out_path(args, conversion);
    let pipeline = Pipeline::new(SystemRunner, args.run_config());

    match pipeline.run(conversion, &args.input, &out_path) {
        Ok(report) => {
            if let Some(color) = &report.color {
                println!("Colour: {} / {}", color.transfer, color.gamut);
            }
            if let Some(plan) = report.scale.filter(|p| p.scaled) {
                println!("Scaled to {}x{}", plan.target_width, plan.target_height);
            }
            if let Some(dir) = &report.kept_work_dir {
                println!("Kept work dir {}", dir.display());
            }
            println!("Wrote {}", report.output.display());
            Ok(())
        }
        Err(err) if err.converted() => {
            println!("Wrote {}", out_path.display());
            Err(anyhow::Error::new(err).context("Output written, but its metadata was not copied"))
        }
        Err(err) => Err(anyhow::Error::new(err)
            .context(format!("Failed to convert {}", args.input.display()))),
    }
}

fn probe(args: &cli::ProbeArgs) -> Result<()> {
    let config = RunConfig {
        tools: args.tools.paths(),
        max_dimension: args.max_dimension,
        ..RunConfig::default()
    };
    config.validate()?;
    let pipeline = Pipeline::new(SystemRunner, config);
    let descriptor = pipeline
        .probe(&args.input)
        .with_context(|| format!("Failed to probe {}", args.input.display()))?;

    println!("Size: {}x{}", descriptor.width, descriptor.height);
    println!(
        "Transfer tag: {}",
        descriptor.transfer_tag.as_deref().unwrap_or("-")
    );
    for tag in descriptor.color_tags.present() {
        println!("Colour tag: {tag}");
    }

    let decision = color::infer(&descriptor);
    println!(
        "Inferred: {} / {} (gamut code {}, explicit colour info: {})",
        decision.transfer, decision.gamut, decision.gamut_code, decision.had_explicit_color_info
    );

    let plan = ScalePlan::plan(descriptor.width, descriptor.height, args.max_dimension);
    if plan.scaled {
        println!(
            "Would scale to {}x{}",
            plan.target_width, plan.target_height
        );
    } else {
        println!("Within {} px, no scaling", args.max_dimension);
    }

    match GainMapConfig::from_descriptor(&descriptor) {
        Ok(gainmap) => {
            println!("Apple gain map metadata:");
            print!("{}", gainmap.to_config_text());
        }
        Err(_) => println!("No Apple HDRHeadroom/HDRGain tags"),
    }
    Ok(())
}

fn resolve_out_path(args: &cli::ConvertArgs, conversion: Conversion) -> PathBuf {
    args.out
        .clone()
        .unwrap_or_else(|| default_out_for(&args.input, conversion.output_extension()))
}

fn default_out_for(input: &Path, ext: &str) -> PathBuf {
    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    let stem = input.file_stem().unwrap_or_else(|| OsStr::new("output"));

    let mut filename = stem.to_os_string();
    if input
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
    {
        filename.push("-hdr");
    }
    filename.push(".");
    filename.push(ext);

    let mut out = parent.to_path_buf();
    out.push(filename);
    out
}
