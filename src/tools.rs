//! Invocation of the external command-line tools the pipeline delegates to.

use log::{debug, info};
use std::{
    ffi::{OsStr, OsString},
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::Command,
};

use crate::{errors::BifidotyperError, utils::find_executable};

/// One command line to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    program: String,
    args: Vec<OsString>,
    log_file: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(program: &str) -> Self {
        ToolInvocation {
            program: program.to_string(),
            args: Vec::new(),
            log_file: None,
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

    /// Captures the tool's stdout and stderr in `path`.
    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Value following `flag`, e.g. the output path after `-o`.
    pub fn value_of(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|idx| self.args.get(idx + 1))
            .map(|v| v.as_os_str())
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Runs external tools. Implemented by [`SystemRunner`]; tests substitute
/// their own implementation.
pub trait ToolRunner: Send + Sync {
    fn run(&self, invocation: &ToolInvocation) -> Result<(), BifidotyperError>;
}

/// Runs tools as child processes found on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<(), BifidotyperError> {
        let executable = find_executable(invocation.program())?;
        info!("Running command: {}", invocation.command_line());

        let output = Command::new(&executable)
            .args(invocation.arguments())
            .output()?;

        if let Some(log_path) = invocation.log_file() {
            let mut log = fs::File::create(log_path)?;
            log.write_all(&output.stdout)?;
            log.write_all(&output.stderr)?;
            debug!("Wrote {} output to {:?}", invocation.program(), log_path);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BifidotyperError::ToolFailed {
                tool: invocation.program().to_string(),
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}
