//! sylph sketching, querying and profiling, and the tables it produces.
//!
//! sylph itself is a black box here: this module only builds its command
//! lines, moves its outputs into their deterministic places and reads the
//! TSV files it writes.

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    errors::BifidotyperError,
    pipeline::{Stage, StageContext},
    samples::{Sample, SampleReads},
    tools::ToolInvocation,
    utils::{genome_id, partial_path, publish, tsv_reader, tsv_writer},
};

pub const SYLPH: &str = "sylph";
pub const UNCLASSIFIED: &str = "unclassified";

/// Tolerance on the per-sample abundance total.
pub const ABUNDANCE_TOLERANCE: f64 = 1e-6;
/// Totals this close to 100 are treated as rounding noise and rescaled.
const RESCALE_WINDOW: f64 = 0.01;

// --- Command lines ---

pub fn sketch_reads_invocation(reads: &SampleReads, out_dir: &Path, threads: usize) -> ToolInvocation {
    let inv = ToolInvocation::new(SYLPH).arg("sketch");
    let inv = match reads {
        SampleReads::SingleEnd { reads } => inv.arg("-r").arg(reads),
        SampleReads::PairedEnd { r1, r2 } => inv.arg("-1").arg(r1).arg("-2").arg(r2),
    };
    inv.arg("-d")
        .arg(out_dir)
        .arg("-t")
        .arg(threads.to_string())
}

pub fn sketch_genomes_invocation(genome_list: &Path, db_prefix: &Path, threads: usize) -> ToolInvocation {
    ToolInvocation::new(SYLPH)
        .arg("sketch")
        .arg("--gl")
        .arg(genome_list)
        .arg("-o")
        .arg(db_prefix)
        .arg("-t")
        .arg(threads.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Query,
    Profile,
}

impl SearchMode {
    pub fn subcommand(self) -> &'static str {
        match self {
            SearchMode::Query => "query",
            SearchMode::Profile => "profile",
        }
    }
}

pub fn search_invocation(
    mode: SearchMode,
    sketch: &Path,
    database: &Path,
    output: &Path,
    threads: usize,
) -> ToolInvocation {
    ToolInvocation::new(SYLPH)
        .arg(mode.subcommand())
        .arg(sketch)
        .arg(database)
        .arg("-t")
        .arg(threads.to_string())
        .arg("-o")
        .arg(output)
}

// --- Stages ---

/// Sketches one sample's reads into `<sketch_dir>/<sample>.sylsp`.
///
/// sylph names read sketches after the first read file, so the sketch is
/// produced in a per-sample staging directory and renamed afterwards.
pub struct SketchReads {
    pub sample: Sample,
    pub sketch_dir: PathBuf,
}

impl SketchReads {
    pub fn sketch_path(sketch_dir: &Path, sample: &str) -> PathBuf {
        sketch_dir.join(format!("{}.sylsp", sample))
    }
}

impl Stage for SketchReads {
    fn name(&self) -> &str {
        "sketch_reads"
    }

    fn inputs(&self) -> Vec<PathBuf> {
        self.sample.reads.files()
    }

    fn output(&self) -> PathBuf {
        Self::sketch_path(&self.sketch_dir, &self.sample.name)
    }

    fn run(&self, ctx: &StageContext) -> Result<()> {
        let staging = self
            .sketch_dir
            .join(format!(".{}.staging", self.sample.name));
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .with_context(|| format!("Failed to clear staging directory {:?}", staging))?;
        }
        fs::create_dir_all(&staging)?;

        let invocation = sketch_reads_invocation(&self.sample.reads, &staging, ctx.threads)
            .log_to(self.sketch_dir.join(format!("{}.sketch.log", self.sample.name)));
        ctx.runner.run(&invocation)?;

        let produced: Vec<PathBuf> = fs::read_dir(&staging)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "sylsp"))
            .collect();
        let sketch = match produced.as_slice() {
            [single] => single.clone(),
            [] => bail!("sylph produced no read sketch in {:?}", staging),
            many => bail!("sylph produced {} read sketches in {:?}", many.len(), staging),
        };

        publish(&sketch, &self.output())?;
        fs::remove_dir_all(&staging).ok();
        Ok(())
    }
}

/// Runs `sylph query` or `sylph profile` of one read sketch against the
/// reference database.
pub struct SearchDatabase {
    pub mode: SearchMode,
    pub sample: String,
    pub sketch: PathBuf,
    pub database: PathBuf,
    pub output: PathBuf,
}

impl SearchDatabase {
    pub fn query_path(query_dir: &Path, sample: &str) -> PathBuf {
        query_dir.join(format!("{}.query.tsv", sample))
    }

    pub fn profile_path(query_dir: &Path, sample: &str) -> PathBuf {
        query_dir.join(format!("{}.profile.tsv", sample))
    }
}

impl Stage for SearchDatabase {
    fn name(&self) -> &str {
        self.mode.subcommand()
    }

    fn inputs(&self) -> Vec<PathBuf> {
        vec![self.sketch.clone(), self.database.clone()]
    }

    fn output(&self) -> PathBuf {
        self.output.clone()
    }

    fn run(&self, ctx: &StageContext) -> Result<()> {
        let partial = partial_path(&self.output);
        let invocation = search_invocation(
            self.mode,
            &self.sketch,
            &self.database,
            &partial,
            ctx.threads,
        );
        ctx.runner.run(&invocation)?;
        if !partial.exists() {
            return Err(BifidotyperError::MissingStageOutput {
                stage: format!("{} ({})", self.mode.subcommand(), self.sample),
                path: partial,
            }
            .into());
        }
        publish(&partial, &self.output)
    }
}

/// Derives the normalised abundance table from a profile table.
pub struct NormalizeAbundance {
    pub sample: String,
    pub profile: PathBuf,
    pub output: PathBuf,
}

impl NormalizeAbundance {
    pub fn abundance_path(query_dir: &Path, sample: &str) -> PathBuf {
        query_dir.join(format!("{}.abundance.tsv", sample))
    }
}

impl Stage for NormalizeAbundance {
    fn name(&self) -> &str {
        "abundance"
    }

    fn inputs(&self) -> Vec<PathBuf> {
        vec![self.profile.clone()]
    }

    fn output(&self) -> PathBuf {
        self.output.clone()
    }

    fn run(&self, _ctx: &StageContext) -> Result<()> {
        let records = read_profile_table(&self.profile)?;
        let rows = normalize_abundances(&self.sample, &records);
        write_abundance_table(&self.output, &rows)
    }
}

// --- Tables ---

/// Matched and total k-mer counts, written by sylph as `matched/total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Containment {
    pub matched: u64,
    pub total: u64,
}

impl Containment {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.matched as f64 / self.total as f64
        }
    }
}

impl FromStr for Containment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (matched, total) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("expected 'matched/total', got '{}'", s))?;
        let matched = matched
            .trim()
            .parse()
            .map_err(|e| format!("bad numerator in '{}': {}", s, e))?;
        let total = total
            .trim()
            .parse()
            .map_err(|e| format!("bad denominator in '{}': {}", s, e))?;
        Ok(Containment { matched, total })
    }
}

impl std::fmt::Display for Containment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.matched, self.total)
    }
}

/// One row of a `sylph query` table. Only the columns used downstream are read.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRecord {
    #[serde(rename = "Sample_file")]
    pub sample_file: String,
    #[serde(rename = "Genome_file")]
    pub genome_file: String,
    #[serde(rename = "Adjusted_ANI")]
    pub adjusted_ani: f64,
    #[serde(rename = "Containment_ind")]
    pub containment_ind: String,
    #[serde(rename = "Contig_name", default)]
    pub contig_name: String,
}

impl QueryRecord {
    pub fn genome_id(&self) -> String {
        genome_id(&self.genome_file)
    }

    pub fn containment(&self) -> Result<Containment, String> {
        self.containment_ind.parse()
    }
}

/// One row of a `sylph profile` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileRecord {
    #[serde(rename = "Sample_file")]
    pub sample_file: String,
    #[serde(rename = "Genome_file")]
    pub genome_file: String,
    #[serde(rename = "Taxonomic_abundance")]
    pub taxonomic_abundance: f64,
    #[serde(rename = "Sequence_abundance")]
    pub sequence_abundance: f64,
    #[serde(rename = "Adjusted_ANI")]
    pub adjusted_ani: f64,
    #[serde(rename = "Contig_name", default)]
    pub contig_name: String,
}

impl ProfileRecord {
    pub fn genome_id(&self) -> String {
        genome_id(&self.genome_file)
    }
}

fn read_records<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let mut reader = tsv_reader(path)?;
    let mut records = Vec::new();
    for (idx, row) in reader.deserialize().enumerate() {
        let record: T = row.map_err(|e| {
            BifidotyperError::parse(path, format!("row {}: {}", idx + 1, e))
        })?;
        records.push(record);
    }
    debug!("Read {} rows from {:?}", records.len(), path);
    Ok(records)
}

pub fn read_query_table(path: &Path) -> Result<Vec<QueryRecord>> {
    read_records(path).with_context(|| format!("Failed to read sylph query table {:?}", path))
}

pub fn read_profile_table(path: &Path) -> Result<Vec<ProfileRecord>> {
    read_records(path).with_context(|| format!("Failed to read sylph profile table {:?}", path))
}

/// One row of a normalised abundance table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbundanceRow {
    #[serde(rename = "Sample")]
    pub sample: String,
    #[serde(rename = "Genome_file")]
    pub genome_file: String,
    #[serde(rename = "Abundance")]
    pub abundance: f64,
    #[serde(rename = "Sequence_abundance")]
    pub sequence_abundance: Option<f64>,
    #[serde(rename = "Adjusted_ANI")]
    pub adjusted_ani: Option<f64>,
}

impl AbundanceRow {
    pub fn is_unclassified(&self) -> bool {
        self.genome_file == UNCLASSIFIED
    }
}

/// Turns profile records into abundance rows summing to 100.
///
/// Totals within a small window of 100 are rescaled to exactly 100; any other
/// shortfall becomes an `unclassified` row. Rows are ordered by genome id.
pub fn normalize_abundances(sample: &str, records: &[ProfileRecord]) -> Vec<AbundanceRow> {
    let mut rows: Vec<AbundanceRow> = records
        .iter()
        .map(|r| AbundanceRow {
            sample: sample.to_string(),
            genome_file: r.genome_id(),
            abundance: r.taxonomic_abundance.max(0.0),
            sequence_abundance: Some(r.sequence_abundance),
            adjusted_ani: Some(r.adjusted_ani),
        })
        .collect();
    rows.sort_by(|a, b| a.genome_file.cmp(&b.genome_file));

    let total: f64 = rows.iter().map(|r| r.abundance).sum();
    if total > 0.0 && ((total - 100.0).abs() <= RESCALE_WINDOW || total > 100.0) {
        if total > 100.0 + RESCALE_WINDOW {
            warn!(
                "Sample '{}': profile abundances sum to {:.4}, rescaling to 100",
                sample, total
            );
        }
        for row in &mut rows {
            row.abundance = row.abundance * 100.0 / total;
        }
    } else {
        let remainder = 100.0 - total;
        if remainder > ABUNDANCE_TOLERANCE {
            rows.push(AbundanceRow {
                sample: sample.to_string(),
                genome_file: UNCLASSIFIED.to_string(),
                abundance: remainder,
                sequence_abundance: None,
                adjusted_ani: None,
            });
        }
    }
    rows
}

pub fn write_abundance_table(path: &Path, rows: &[AbundanceRow]) -> Result<()> {
    let (mut writer, partial) = tsv_writer(path)?;
    if rows.is_empty() {
        writer.write_record([
            "Sample",
            "Genome_file",
            "Abundance",
            "Sequence_abundance",
            "Adjusted_ANI",
        ])?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    drop(writer);
    publish(&partial, path)
}

pub fn read_abundance_table(path: &Path) -> Result<Vec<AbundanceRow>> {
    read_records(path).with_context(|| format!("Failed to read abundance table {:?}", path))
}
