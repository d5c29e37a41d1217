//! The genome annotation table (`genomes.csv`): display label, genome size and
//! plot colour for every reference genome, keyed by genome file name.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use needletail::parse_fastx_file;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    errors::BifidotyperError,
    utils::{genome_id, partial_path, publish},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenomeAnnotation {
    #[serde(rename = "Genome_file")]
    pub genome_file: String,
    #[serde(rename = "Label")]
    pub label: String,
    #[serde(rename = "Genome_size")]
    pub genome_size: Option<u64>,
    #[serde(rename = "Color")]
    pub color: String,
}

/// Colour derived from the genome id, stable across runs.
pub fn genome_color(genome: &str) -> String {
    let digest = md5::compute(genome.as_bytes());
    format!("#{:02x}{:02x}{:02x}", digest[0], digest[1], digest[2])
}

impl GenomeAnnotation {
    /// Reads label (first FASTA header) and size (total sequence length) from a genome file.
    pub fn from_fasta(path: &Path) -> Result<Self> {
        let path_str = path.to_string_lossy();
        let mut reader = parse_fastx_file(path)
            .with_context(|| format!("Failed to open or parse genome: {}", path_str))?;

        let mut label = None;
        let mut size: u64 = 0;
        while let Some(record) = reader.next() {
            let record =
                record.with_context(|| format!("Error reading record from {}", path_str))?;
            if label.is_none() {
                label = Some(String::from_utf8_lossy(record.id()).trim().to_string());
            }
            size += record.seq().len() as u64;
        }

        let genome_file = genome_id(&path_str);
        let label = label.ok_or_else(|| {
            BifidotyperError::parse(path, "genome file contains no sequence")
        })?;
        Ok(GenomeAnnotation {
            color: genome_color(&genome_file),
            genome_file,
            label,
            genome_size: Some(size),
        })
    }

    /// Stand-in for a genome the table does not know about.
    pub fn placeholder(genome: &str) -> Self {
        GenomeAnnotation {
            genome_file: genome.to_string(),
            label: genome.to_string(),
            genome_size: None,
            color: genome_color(genome),
        }
    }
}

/// Rows in file order, unique by `Genome_file`.
#[derive(Debug, Clone, Default)]
pub struct AnnotationTable {
    rows: Vec<GenomeAnnotation>,
    index: HashMap<String, usize>,
}

/// Outcome of merging genome files into a table.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: Vec<String>,
    pub skipped: Vec<String>,
}

impl AnnotationTable {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open annotation table {:?}", path))?;

        let mut table = AnnotationTable::default();
        for row in reader.deserialize() {
            let row: GenomeAnnotation = row.map_err(|e| BifidotyperError::parse(path, e))?;
            if !table.insert(row.clone()) {
                warn!(
                    "Duplicate annotation row for {} in {:?}, keeping the first",
                    row.genome_file, path
                );
            }
        }
        debug!("Loaded {} annotation rows from {:?}", table.len(), path);
        Ok(table)
    }

    /// Like [`AnnotationTable::load`], but a missing file yields an empty table.
    pub fn load_or_empty(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("{:?} does not exist yet, starting a new table", path);
            Ok(AnnotationTable::default())
        }
    }

    /// Adds a row unless its genome is already present.
    pub fn insert(&mut self, row: GenomeAnnotation) -> bool {
        if self.index.contains_key(&row.genome_file) {
            return false;
        }
        self.index.insert(row.genome_file.clone(), self.rows.len());
        self.rows.push(row);
        true
    }

    pub fn lookup(&self, genome: &str) -> Option<&GenomeAnnotation> {
        self.index.get(genome).map(|&idx| &self.rows[idx])
    }

    pub fn contains(&self, genome: &str) -> bool {
        self.index.contains_key(genome)
    }

    pub fn rows(&self) -> &[GenomeAnnotation] {
        &self.rows
    }

    pub fn genome_ids(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.genome_file.as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Adds a row for every genome file the table does not have yet.
    /// Existing rows are left untouched. New genomes are scanned in parallel and
    /// appended in file name order.
    pub fn merge_genomes(&mut self, genome_files: &[PathBuf]) -> Result<MergeSummary> {
        let mut summary = MergeSummary::default();
        let mut pending: Vec<&PathBuf> = Vec::new();
        for file in genome_files {
            let id = genome_id(&file.to_string_lossy());
            if self.contains(&id) || pending.iter().any(|p| genome_id(&p.to_string_lossy()) == id) {
                info!("Genome {} already exists in the table. Skipping.", id);
                summary.skipped.push(id);
            } else {
                pending.push(file);
            }
        }

        let mut scanned = pending
            .par_iter()
            .map(|file| GenomeAnnotation::from_fasta(file))
            .collect::<Result<Vec<_>>>()?;
        scanned.sort_by(|a, b| a.genome_file.cmp(&b.genome_file));

        for row in scanned {
            debug!(
                "Adding {} ({}, {:?} bp)",
                row.genome_file, row.label, row.genome_size
            );
            summary.added.push(row.genome_file.clone());
            self.insert(row);
        }
        Ok(summary)
    }

    /// Writes the table as comma-separated values, atomically.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let partial = partial_path(path);
        let mut writer = csv::Writer::from_path(&partial)
            .with_context(|| format!("Failed to create {:?}", partial))?;
        if self.rows.is_empty() {
            writer.write_record(["Genome_file", "Label", "Genome_size", "Color"])?;
        }
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        drop(writer);
        publish(&partial, path)
    }
}

/// Lists the `.fna` files directly inside `dir`, sorted.
pub fn list_fna_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("Failed to read directory {:?}", dir))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "fna") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
