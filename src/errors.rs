use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BifidotyperError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid file extension for {0}. Must be one of: .fastq, .fastq.gz, .fq, .fq.gz")]
    InvalidReadExtension(PathBuf),

    #[error("Sample '{sample}': {reason}")]
    SampleConfig { sample: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Required reference file '{name}' not found at {path:?}")]
    MissingReference { name: String, path: PathBuf },

    #[error("{0} not found in PATH. Please install it or add it to your PATH.")]
    ExecutableNotFound(String),

    #[error("{tool} failed (exit code: {code:?}): {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Stage '{stage}' did not produce its output {path:?}")]
    MissingStageOutput { stage: String, path: PathBuf },

    #[error("Genome acquisition failed: {0}")]
    Acquisition(String),

    #[error("Unexpected archive layout in {archive:?}: {reason}")]
    ArchiveLayout { archive: PathBuf, reason: String },

    #[error("Dereplication failed: {0}")]
    Dereplication(String),

    #[error("Failed to parse {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("I/O error")]
    IoError(#[from] std::io::Error),
}

impl BifidotyperError {
    pub fn sample_config(sample: impl Into<String>, reason: impl Into<String>) -> Self {
        BifidotyperError::SampleConfig {
            sample: sample.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        BifidotyperError::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
