//! Input discovery: turns the read files given on the command line into
//! named samples.
//!
//! Problems that only concern one sample (a missing mate, a duplicate file,
//! an unreadable path) are collected as per-sample errors so the remaining
//! samples can still be processed.

use log::{debug, info, warn};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::errors::BifidotyperError;

pub const VALID_EXTENSIONS: [&str; 4] = [".fastq.gz", ".fq.gz", ".fastq", ".fq"];

pub const DEFAULT_R1_SUFFIX: &str = "_R1";
pub const DEFAULT_R2_SUFFIX: &str = "_R2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "layout", rename_all = "kebab-case")]
pub enum SampleReads {
    SingleEnd { reads: PathBuf },
    PairedEnd { r1: PathBuf, r2: PathBuf },
}

impl SampleReads {
    pub fn files(&self) -> Vec<PathBuf> {
        match self {
            SampleReads::SingleEnd { reads } => vec![reads.clone()],
            SampleReads::PairedEnd { r1, r2 } => vec![r1.clone(), r2.clone()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub name: String,
    pub reads: SampleReads,
}

#[derive(Debug)]
pub struct SampleError {
    pub sample: String,
    pub error: BifidotyperError,
}

/// Samples that passed validation, plus the ones that did not.
#[derive(Debug, Default)]
pub struct SampleSheet {
    pub samples: Vec<Sample>,
    pub errors: Vec<SampleError>,
}

impl SampleSheet {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MateSuffixes {
    pub r1: String,
    pub r2: String,
}

impl Default for MateSuffixes {
    fn default() -> Self {
        MateSuffixes {
            r1: DEFAULT_R1_SUFFIX.to_string(),
            r2: DEFAULT_R2_SUFFIX.to_string(),
        }
    }
}

impl MateSuffixes {
    pub fn new(r1: &str, r2: &str) -> Result<Self, BifidotyperError> {
        if r1.is_empty() || r2.is_empty() {
            return Err(BifidotyperError::InvalidInput(
                "--r1-suffix and --r2-suffix must not be empty".to_string(),
            ));
        }
        if r1 == r2 {
            return Err(BifidotyperError::InvalidInput(
                "--r1-suffix and --r2-suffix must be different".to_string(),
            ));
        }
        Ok(MateSuffixes {
            r1: r1.to_string(),
            r2: r2.to_string(),
        })
    }
}

/// Strips a recognised read-file extension (case-insensitive) from a file name.
/// Returns `None` when the name carries none of [`VALID_EXTENSIONS`].
pub fn strip_read_extension(file_name: &str) -> Option<&str> {
    let lower = file_name.to_ascii_lowercase();
    VALID_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| &file_name[..file_name.len() - ext.len()])
}

fn remove_last(haystack: &str, needle: &str) -> String {
    match haystack.rfind(needle) {
        Some(idx) => format!("{}{}", &haystack[..idx], &haystack[idx + needle.len()..]),
        None => haystack.to_string(),
    }
}

/// Derives the sample name of a read file: the file name without its read
/// extension and without the mate suffix.
pub fn sample_name(path: &Path, suffixes: &MateSuffixes) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = strip_read_extension(&file_name).unwrap_or(&file_name);
    let stem = remove_last(stem, &suffixes.r1);
    remove_last(&stem, &suffixes.r2)
}

fn file_stem_of(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    strip_read_extension(&file_name)
        .unwrap_or(&file_name)
        .to_string()
}

fn validate_file(path: &Path) -> Result<(), BifidotyperError> {
    if !path.is_file() {
        return Err(BifidotyperError::FileNotFound(path.to_path_buf()));
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if strip_read_extension(&file_name).is_none() {
        return Err(BifidotyperError::InvalidReadExtension(path.to_path_buf()));
    }
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn record_error(errors: &mut BTreeMap<String, Vec<String>>, sample: &str, reason: String) {
    warn!("Sample '{}': {}", sample, reason);
    errors.entry(sample.to_string()).or_default().push(reason);
}

fn finish(
    mut accepted: BTreeMap<String, SampleReads>,
    errors: BTreeMap<String, Vec<String>>,
) -> SampleSheet {
    let mut sheet = SampleSheet::default();
    for (sample, reasons) in errors {
        accepted.remove(&sample);
        sheet.errors.push(SampleError {
            error: BifidotyperError::sample_config(&sample, reasons.join("; ")),
            sample,
        });
    }
    sheet.samples = accepted
        .into_iter()
        .map(|(name, reads)| Sample { name, reads })
        .collect();
    info!(
        "Resolved {} samples ({} with configuration errors)",
        sheet.samples.len(),
        sheet.errors.len()
    );
    sheet
}

/// Builds one single-end sample per read file.
pub fn discover_single_end(
    files: &[PathBuf],
    suffixes: &MateSuffixes,
) -> Result<SampleSheet, BifidotyperError> {
    if files.is_empty() {
        return Err(BifidotyperError::InvalidInput(
            "no single-end FASTQ files given".to_string(),
        ));
    }
    info!("Processing {} single-end files", files.len());

    let mut accepted: BTreeMap<String, SampleReads> = BTreeMap::new();
    let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for file in files {
        let file = absolute(file);
        let name = sample_name(&file, suffixes);
        if let Err(e) = validate_file(&file) {
            record_error(&mut errors, &name, e.to_string());
            continue;
        }
        if accepted.contains_key(&name) {
            record_error(
                &mut errors,
                &name,
                format!("duplicate sample name (file {:?})", file),
            );
            continue;
        }
        debug!("Added single-end sample {}: {:?}", name, file);
        accepted.insert(name, SampleReads::SingleEnd { reads: file });
    }

    Ok(finish(accepted, errors))
}

/// Pairs R1/R2 files that share a sample name.
pub fn discover_paired_end(
    files: &[PathBuf],
    suffixes: &MateSuffixes,
) -> Result<SampleSheet, BifidotyperError> {
    if files.is_empty() {
        return Err(BifidotyperError::InvalidInput(
            "no paired-end FASTQ files given".to_string(),
        ));
    }
    info!("Processing {} paired-end files", files.len());

    let mut r1_files: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut r2_files: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for file in files {
        let file = absolute(file);
        let name = sample_name(&file, suffixes);
        if let Err(e) = validate_file(&file) {
            record_error(&mut errors, &name, e.to_string());
            continue;
        }

        let stem = file_stem_of(&file);
        let has_r1 = stem.contains(&suffixes.r1);
        let has_r2 = stem.contains(&suffixes.r2);
        let slot = match (has_r1, has_r2) {
            (true, true) => {
                record_error(
                    &mut errors,
                    &name,
                    format!(
                        "file {:?} contains both R1 ('{}') and R2 ('{}') suffixes",
                        file, suffixes.r1, suffixes.r2
                    ),
                );
                continue;
            }
            (false, false) => {
                record_error(
                    &mut errors,
                    &name,
                    format!(
                        "file {:?} matches neither R1 ('{}') nor R2 ('{}')",
                        file, suffixes.r1, suffixes.r2
                    ),
                );
                continue;
            }
            (true, false) => &mut r1_files,
            (false, true) => &mut r2_files,
        };
        if let Some(previous) = slot.get(&name) {
            let mate = if has_r1 { "R1" } else { "R2" };
            let reason = format!("duplicate {} files {:?} and {:?}", mate, previous, file);
            record_error(&mut errors, &name, reason);
            continue;
        }
        slot.insert(name, file);
    }

    let mut accepted: BTreeMap<String, SampleReads> = BTreeMap::new();
    for (name, r1) in &r1_files {
        match r2_files.get(name) {
            Some(r2) => {
                debug!("Added paired-end sample {}: R1={:?}, R2={:?}", name, r1, r2);
                accepted.insert(
                    name.clone(),
                    SampleReads::PairedEnd {
                        r1: r1.clone(),
                        r2: r2.clone(),
                    },
                );
            }
            None => record_error(
                &mut errors,
                name,
                format!("missing R2 file for {:?}", r1),
            ),
        }
    }
    for (name, r2) in &r2_files {
        if !r1_files.contains_key(name) {
            record_error(
                &mut errors,
                name,
                format!("missing R1 file for {:?}", r2),
            );
        }
    }

    Ok(finish(accepted, errors))
}
