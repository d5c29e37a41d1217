//! Ordered, file-based stage execution.
//!
//! A [`Pipeline`] is a list of [`Stage`]s. Each stage declares the files it
//! reads and the single artefact it writes. A stage whose artefact is newer
//! than all of its inputs is reused instead of recomputed, which is what makes
//! reruns on unchanged inputs idempotent.

use anyhow::Result;
use log::{debug, info};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::{Instant, SystemTime},
};
use thiserror::Error;

use crate::{errors::BifidotyperError, tools::ToolRunner};

/// Shared by every stage of a run.
pub struct StageContext<'a> {
    pub runner: &'a dyn ToolRunner,
    /// Thread count handed to external tools.
    pub threads: usize,
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &str;
    fn inputs(&self) -> Vec<PathBuf>;
    fn output(&self) -> PathBuf;
    fn run(&self, ctx: &StageContext) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Computed,
    Reused,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub output: PathBuf,
    pub status: StageStatus,
    pub seconds: f64,
}

#[derive(Error, Debug, Clone)]
#[error("stage '{stage}' failed: {message}")]
pub struct StageError {
    pub stage: String,
    pub message: String,
    /// Reports of the stages that completed before the failure.
    pub completed: Vec<StageReport>,
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// True when `output` exists and is at least as new as every input.
/// A missing input makes the output stale.
pub fn is_fresh(output: &Path, inputs: &[PathBuf]) -> bool {
    let Some(out_time) = modified(output) else {
        return false;
    };
    inputs.iter().all(|input| match modified(input) {
        Some(in_time) => in_time <= out_time,
        None => false,
    })
}

pub struct Pipeline<'a> {
    label: String,
    stages: Vec<Box<dyn Stage + 'a>>,
    reuse_existing: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(label: impl Into<String>) -> Self {
        Pipeline {
            label: label.into(),
            stages: Vec::new(),
            reuse_existing: true,
        }
    }

    pub fn with_stage(mut self, stage: impl Stage + 'a) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// When false every stage is recomputed.
    pub fn reuse_existing(mut self, reuse: bool) -> Self {
        self.reuse_existing = reuse;
        self
    }

    /// Runs the stages in order and stops at the first failure.
    pub fn run(&self, ctx: &StageContext) -> Result<Vec<StageReport>, StageError> {
        let mut reports = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let output = stage.output();
            let inputs = stage.inputs();

            if self.reuse_existing && is_fresh(&output, &inputs) {
                info!(
                    "[{}] {}: reusing existing {:?}",
                    self.label,
                    stage.name(),
                    output
                );
                reports.push(StageReport {
                    name: stage.name().to_string(),
                    output,
                    status: StageStatus::Reused,
                    seconds: 0.0,
                });
                continue;
            }

            info!("[{}] {}: started", self.label, stage.name());
            debug!("[{}] {} inputs: {:?}", self.label, stage.name(), inputs);
            let started = Instant::now();

            let fail = |message: String, reports: &Vec<StageReport>| StageError {
                stage: stage.name().to_string(),
                message,
                completed: reports.clone(),
            };

            if let Err(e) = stage.run(ctx) {
                return Err(fail(format!("{:#}", e), &reports));
            }
            if !output.exists() {
                let missing = BifidotyperError::MissingStageOutput {
                    stage: stage.name().to_string(),
                    path: output.clone(),
                };
                return Err(fail(missing.to_string(), &reports));
            }

            let seconds = started.elapsed().as_secs_f64();
            info!(
                "[{}] {}: finished in {:.2}s -> {:?}",
                self.label,
                stage.name(),
                seconds,
                output
            );
            reports.push(StageReport {
                name: stage.name().to_string(),
                output,
                status: StageStatus::Computed,
                seconds,
            });
        }

        Ok(reports)
    }
}
