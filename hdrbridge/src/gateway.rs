//! Uniform contract for running external collaborators.
//!
//! Every run is a single attempt: no retries, no rollback of whatever the
//! child wrote before it failed. Output is captured so a failure carries
//! the child's own diagnostics.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::error::{Error, Result};

/// A program plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Arguments as lossy UTF-8, for logging and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Value following `flag`, if the flag is present.
    pub fn value_of(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(OsString::as_os_str)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }
}

/// Seam between the pipeline and the operating system.
pub trait ToolRunner {
    /// Resolve `program` to an executable, or `None` if it cannot be found.
    fn locate(&self, program: &str) -> Option<PathBuf>;

    /// Run to completion and capture output. Only spawn failures are `Err`.
    fn run(&self, invocation: &Invocation) -> io::Result<ToolOutput>;
}

impl<R: ToolRunner + ?Sized> ToolRunner for &R {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        (**self).locate(program)
    }

    fn run(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
        (**self).run(invocation)
    }
}

/// Runs real processes, resolving bare names against `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        let candidate = Path::new(program);
        if candidate.components().count() > 1 {
            return is_executable(candidate).then(|| candidate.to_path_buf());
        }
        let path = env::var_os("PATH")?;
        env::split_paths(&path).find_map(|dir| {
            executable_names(program)
                .into_iter()
                .map(|name| dir.join(name))
                .find(|p| is_executable(p))
        })
    }

    fn run(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
        let out = Command::new(&invocation.program)
            .args(&invocation.args)
            .output()?;
        Ok(ToolOutput {
            exit_code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}

fn executable_names(program: &str) -> Vec<String> {
    if cfg!(windows) && Path::new(program).extension().is_none() {
        vec![format!("{program}.exe"), program.to_string()]
    } else {
        vec![program.to_string()]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Checked front door over a [`ToolRunner`].
#[derive(Debug, Clone)]
pub struct ToolGateway<R> {
    runner: R,
}

impl<R: ToolRunner> ToolGateway<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Fail with [`Error::ToolNotFound`] naming the first unresolvable program.
    pub fn check<'a, I>(&self, programs: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for program in programs {
            match self.runner.locate(program) {
                Some(path) => debug!("{program} -> {}", path.display()),
                None => {
                    return Err(Error::ToolNotFound {
                        program: program.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run once; any non-zero exit becomes [`Error::ToolExecutionFailed`].
    pub fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput> {
        self.check([invocation.program.as_str()])?;
        debug!("exec: {invocation}");
        let output = self.runner.run(invocation).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::ToolNotFound {
                program: invocation.program.clone(),
            },
            _ => Error::io(format!("Failed to spawn {}", invocation.program), e),
        })?;
        if !output.success() {
            return Err(Error::ToolExecutionFailed {
                program: invocation.program.clone(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}
