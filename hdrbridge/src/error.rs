use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error produced by the conversion core.
#[derive(Debug, Error)]
pub enum Error {
    /// A collaborator binary could not be resolved before invocation.
    #[error("required tool `{program}` was not found")]
    ToolNotFound { program: String },

    /// A collaborator ran and exited with a non-zero status (or was killed).
    #[error("{program} failed ({}): {}", exit_label(.exit_code), last_line(.stderr, .stdout))]
    ToolExecutionFailed {
        program: String,
        /// `None` when the process was terminated by a signal.
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("could not determine pixel dimensions of {}", path.display())]
    DimensionsUnavailable { path: PathBuf },

    /// The source is missing Apple's `HDRHeadroom`/`HDRGain` pair.
    #[error("{} has no {tag} tag; not an Apple HDR asset", path.display())]
    GainMetadataMissing { path: PathBuf, tag: &'static str },

    #[error("unexpected output shape: {detail}")]
    UnexpectedOutputShape { detail: String },

    #[error("metadata copy to {} failed: {source}", dest.display())]
    MetadataCopyFailed {
        dest: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn shape(detail: impl Into<String>) -> Self {
        Self::UnexpectedOutputShape {
            detail: detail.into(),
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn last_line<'a>(stderr: &'a str, stdout: &'a str) -> &'a str {
    let pick = |s: &'a str| s.lines().rev().map(str::trim).find(|l| !l.is_empty());
    pick(stderr).or_else(|| pick(stdout)).unwrap_or("no output")
}
