//! Conversion orchestration between Apple HDR HEIC, UltraHDR JPEG and HDR TIFF.
//!
//! The crate does no pixel work itself. It decides parameters and drives
//! external collaborators (`exiftool`, `heif-dec`, `ffmpeg`, `ultrahdr_app`)
//! through a small, testable surface:
//! - [`ToolGateway`] runs one collaborator per call over a [`ToolRunner`], so
//!   tests can substitute a fake for [`SystemRunner`].
//! - [`probe()`] reads dimensions and colour/transfer tags into an
//!   [`AssetDescriptor`], and [`color::infer`] turns those into a concrete
//!   [`ColorDecision`].
//! - [`GainMapConfig`] maps Apple's `HDRHeadroom`/`HDRGain` pair to gain-map
//!   metadata, and [`ScalePlan`] fits output under a maximum dimension.
//! - [`Pipeline`] sequences the stages of each [`Conversion`] in a scratch
//!   directory that is removed when the run ends.
//!
//! The `hdrbridge` binary in the companion `hdrbridge-cli` package wraps all
//! of this in a command line.

pub mod color;
mod config;
mod error;
pub mod gainmap;
mod gateway;
pub mod pipeline;
pub mod probe;
pub mod scale;
mod workdir;

pub use color::{ColorDecision, Gamut, TransferFunction};
pub use config::{DEFAULT_MAX_DIMENSION, DEFAULT_QUALITY, MetadataScope, RunConfig, ToolPaths};
pub use error::{Error, Result};
pub use gainmap::GainMapConfig;
pub use gateway::{Invocation, SystemRunner, ToolGateway, ToolOutput, ToolRunner};
pub use pipeline::{Conversion, Pipeline, PipelineError, RunReport, Stage};
pub use probe::{AssetDescriptor, ColorTags, probe};
pub use scale::ScalePlan;
