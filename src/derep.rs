//! Dereplication of the acquired genomes with dRep.

use anyhow::{Context, Result};
use log::info;
use std::{
    collections::BTreeSet,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    errors::BifidotyperError,
    tools::{ToolInvocation, ToolRunner},
    utils::{get_output_writer, partial_path, publish},
};

pub const DREP: &str = "dRep";
pub const DEFAULT_ANI: f64 = 0.95;

/// Genomes retained by dereplication at a given ANI threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct RepresentativeSet {
    pub ani: f64,
    /// Paths of the retained genomes from the input set, sorted by file name.
    pub members: Vec<PathBuf>,
}

impl RepresentativeSet {
    pub fn file_names(&self) -> Vec<String> {
        self.members
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }
}

/// Writes one path per line, atomically.
pub fn write_path_list(path: &Path, entries: &[PathBuf]) -> Result<()> {
    let partial = partial_path(path);
    let mut writer = get_output_writer(&partial)?;
    for entry in entries {
        writeln!(writer, "{}", entry.display())?;
    }
    writer.flush()?;
    drop(writer);
    publish(&partial, path)
}

pub fn drep_invocation(
    drep_dir: &Path,
    genome_list: &Path,
    ani: f64,
    threads: usize,
) -> ToolInvocation {
    ToolInvocation::new(DREP)
        .arg("dereplicate")
        .arg(drep_dir)
        .arg("-g")
        .arg(genome_list)
        .arg("-sa")
        .arg(ani.to_string())
        .arg("-p")
        .arg(threads.to_string())
        .arg("--ignoreGenomeQuality")
}

/// Runs dRep over `genomes` and reads back the representatives.
///
/// The genome list handed to dRep is sorted, so the same input set yields the
/// same invocation regardless of acquisition order. Every representative must
/// be one of the inputs; an empty result is an error.
pub fn dereplicate(
    runner: &dyn ToolRunner,
    genomes: &[PathBuf],
    ani: f64,
    threads: usize,
    work_dir: &Path,
) -> Result<RepresentativeSet> {
    if genomes.is_empty() {
        return Err(BifidotyperError::Dereplication("no genomes to dereplicate".to_string()).into());
    }
    if !(ani > 0.0 && ani <= 1.0) {
        return Err(BifidotyperError::InvalidInput(format!(
            "ANI threshold must be in (0, 1], got {}",
            ani
        ))
        .into());
    }

    let mut sorted: Vec<PathBuf> = genomes.to_vec();
    sorted.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
    sorted.dedup();

    let genome_list = work_dir.join("genome_list.txt");
    write_path_list(&genome_list, &sorted)?;

    let drep_dir = work_dir.join("drep");
    if drep_dir.exists() {
        fs::remove_dir_all(&drep_dir)
            .with_context(|| format!("Failed to clear stale dRep directory {:?}", drep_dir))?;
    }
    info!(
        "Dereplicating {} genomes at {:.3} ANI",
        sorted.len(),
        ani
    );
    let invocation = drep_invocation(&drep_dir, &genome_list, ani, threads)
        .log_to(work_dir.join("drep.log"));
    runner.run(&invocation)?;

    let representatives_dir = drep_dir.join("dereplicated_genomes");
    let names = list_representatives(&representatives_dir)?;

    let mut members = Vec::with_capacity(names.len());
    for name in &names {
        let Some(input) = sorted
            .iter()
            .find(|p| p.file_name().is_some_and(|n| n.to_string_lossy() == name.as_str()))
        else {
            return Err(BifidotyperError::Dereplication(format!(
                "representative {} is not among the input genomes",
                name
            ))
            .into());
        };
        members.push(input.clone());
    }

    info!(
        "dRep kept {} of {} genomes",
        members.len(),
        sorted.len()
    );
    Ok(RepresentativeSet { ani, members })
}

fn list_representatives(dir: &Path) -> Result<BTreeSet<String>> {
    if !dir.is_dir() {
        return Err(BifidotyperError::Dereplication(format!(
            "dRep produced no {:?}",
            dir
        ))
        .into());
    }
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().is_file() {
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    if names.is_empty() {
        return Err(BifidotyperError::Dereplication(format!(
            "{:?} is empty",
            dir
        ))
        .into());
    }
    Ok(names)
}
