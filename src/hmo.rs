//! HMO gene detection: salmon quantification of sample reads against the
//! B. longum subsp. infantis gene set, joined with the HMO cluster annotation.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use crate::{
    errors::BifidotyperError,
    pipeline::{Stage, StageContext},
    samples::{Sample, SampleReads},
    tools::ToolInvocation,
    utils::{get_input_reader, partial_path, publish, tsv_reader, tsv_writer},
};

pub const SALMON: &str = "salmon";
pub const SALMON_INDEX_DIR: &str = "B_longum_salmon_index";

// --- HMO annotation ---

/// Maps every annotated gene (`Blon_<digits>`) to the HMO clusters it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HmoAnnotation {
    pub gene_clusters: BTreeMap<String, BTreeSet<String>>,
}

/// True for ids of the form `Blon_<digits>`.
pub fn is_blon_id(id: &str) -> bool {
    id.strip_prefix("Blon_")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

impl HmoAnnotation {
    /// Reads the `;`-separated annotation table. `Blon` cells may carry several
    /// space-separated ids; tokens that are not `Blon_<digits>` are ignored.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = get_input_reader(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .from_reader(reader);

        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read header of {:?}", path))?
            .clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| BifidotyperError::parse(path, format!("missing column '{}'", name)))
        };
        let blon_idx = column("Blon")?;
        let cluster_idx = column("Cluster")?;

        let mut annotation = HmoAnnotation::default();
        for record in reader.records() {
            let record = record.with_context(|| format!("Failed to read row of {:?}", path))?;
            let cluster = record.get(cluster_idx).unwrap_or("").trim();
            if cluster.is_empty() {
                continue;
            }
            for gene in record
                .get(blon_idx)
                .unwrap_or("")
                .split_whitespace()
                .filter(|id| is_blon_id(id))
            {
                annotation
                    .gene_clusters
                    .entry(gene.to_string())
                    .or_default()
                    .insert(cluster.to_string());
            }
        }

        info!(
            "Loaded HMO annotation for {} genes from {:?}",
            annotation.gene_clusters.len(),
            path
        );
        Ok(annotation)
    }

    pub fn clusters_of(&self, gene: &str) -> Option<&BTreeSet<String>> {
        self.gene_clusters.get(gene)
    }
}

// --- salmon output ---

#[derive(Debug, Clone, Deserialize)]
pub struct QuantRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Length")]
    pub length: u64,
    #[serde(rename = "EffectiveLength")]
    pub effective_length: f64,
    #[serde(rename = "TPM")]
    pub tpm: f64,
    #[serde(rename = "NumReads")]
    pub num_reads: f64,
}

pub fn read_quant_table(path: &Path) -> Result<Vec<QuantRecord>> {
    let mut reader = tsv_reader(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        let record: QuantRecord = row.map_err(|e| BifidotyperError::parse(path, e))?;
        records.push(record);
    }
    debug!("Read {} transcripts from {:?}", records.len(), path);
    Ok(records)
}

/// Presence call for one HMO gene in one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HmoGeneRow {
    #[serde(rename = "Sample")]
    pub sample: String,
    #[serde(rename = "Name")]
    pub gene: String,
    #[serde(rename = "Cluster")]
    pub clusters: String,
    #[serde(rename = "Length")]
    pub length: u64,
    #[serde(rename = "TPM")]
    pub tpm: f64,
    #[serde(rename = "NumReads")]
    pub num_reads: f64,
    #[serde(rename = "Present")]
    pub present: bool,
}

impl HmoGeneRow {
    pub fn cluster_list(&self) -> impl Iterator<Item = &str> {
        self.clusters.split(',').filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterPresence {
    #[serde(rename = "Sample")]
    pub sample: String,
    #[serde(rename = "Cluster")]
    pub cluster: String,
    #[serde(rename = "Genes")]
    pub genes: usize,
    #[serde(rename = "Genes_present")]
    pub genes_present: usize,
    #[serde(rename = "Percent")]
    pub percent: f64,
    #[serde(rename = "Present")]
    pub present: bool,
}

/// Keeps the quantified genes that carry an HMO annotation, one row per gene,
/// sorted by gene name. A gene is present when at least one read was assigned.
pub fn annotate_genes(
    sample: &str,
    quant: &[QuantRecord],
    annotation: &HmoAnnotation,
) -> Vec<HmoGeneRow> {
    let mut rows: BTreeMap<&str, HmoGeneRow> = BTreeMap::new();
    for record in quant {
        let Some(clusters) = annotation.clusters_of(&record.name) else {
            continue;
        };
        if rows.contains_key(record.name.as_str()) {
            warn!(
                "Sample '{}': gene {} quantified twice, keeping the first entry",
                sample, record.name
            );
            continue;
        }
        rows.insert(
            &record.name,
            HmoGeneRow {
                sample: sample.to_string(),
                gene: record.name.clone(),
                clusters: clusters.iter().cloned().collect::<Vec<_>>().join(","),
                length: record.length,
                tpm: record.tpm,
                num_reads: record.num_reads,
                present: record.num_reads > 0.0,
            },
        );
    }
    if rows.is_empty() {
        warn!(
            "Sample '{}': no quantified transcript matched the HMO annotation",
            sample
        );
    }
    rows.into_values().collect()
}

/// Summarises gene calls per cluster. A cluster is present only when every
/// one of its genes is present.
pub fn cluster_presence(sample: &str, genes: &[HmoGeneRow]) -> Vec<ClusterPresence> {
    let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for gene in genes {
        for cluster in gene.cluster_list() {
            let entry = counts.entry(cluster).or_insert((0, 0));
            entry.0 += 1;
            if gene.present {
                entry.1 += 1;
            }
        }
    }
    counts
        .into_iter()
        .map(|(cluster, (total, present))| ClusterPresence {
            sample: sample.to_string(),
            cluster: cluster.to_string(),
            genes: total,
            genes_present: present,
            percent: present as f64 / total as f64 * 100.0,
            present: present == total,
        })
        .collect()
}

fn write_rows<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
    let (mut writer, partial) = tsv_writer(path)?;
    if rows.is_empty() {
        writer.write_record(header)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    drop(writer);
    publish(&partial, path)
}

const GENE_HEADER: [&str; 7] = [
    "Sample", "Name", "Cluster", "Length", "TPM", "NumReads", "Present",
];

pub fn write_gene_table(path: &Path, rows: &[HmoGeneRow]) -> Result<()> {
    write_rows(path, &GENE_HEADER, rows)
}

pub fn read_gene_table(path: &Path) -> Result<Vec<HmoGeneRow>> {
    let mut reader = tsv_reader(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        let row: HmoGeneRow = row.map_err(|e| BifidotyperError::parse(path, e))?;
        rows.push(row);
    }
    Ok(rows)
}

pub fn write_cluster_table(path: &Path, rows: &[ClusterPresence]) -> Result<()> {
    write_rows(
        path,
        &["Sample", "Cluster", "Genes", "Genes_present", "Percent", "Present"],
        rows,
    )
}

pub fn read_cluster_table(path: &Path) -> Result<Vec<ClusterPresence>> {
    let mut reader = tsv_reader(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        let row: ClusterPresence = row.map_err(|e| BifidotyperError::parse(path, e))?;
        rows.push(row);
    }
    Ok(rows)
}

// --- Stages ---

/// Builds the salmon index of the gene sequences once per output directory.
pub struct SalmonIndex {
    pub genes_fasta: PathBuf,
    pub hmo_dir: PathBuf,
}

impl SalmonIndex {
    pub fn index_path(hmo_dir: &Path) -> PathBuf {
        hmo_dir.join(SALMON_INDEX_DIR)
    }
}

impl Stage for SalmonIndex {
    fn name(&self) -> &str {
        "salmon_index"
    }

    fn inputs(&self) -> Vec<PathBuf> {
        vec![self.genes_fasta.clone()]
    }

    fn output(&self) -> PathBuf {
        Self::index_path(&self.hmo_dir)
    }

    fn run(&self, ctx: &StageContext) -> Result<()> {
        let partial = partial_path(&self.output());
        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }
        let invocation = ToolInvocation::new(SALMON)
            .arg("index")
            .arg("-t")
            .arg(&self.genes_fasta)
            .arg("-i")
            .arg(&partial)
            .arg("-p")
            .arg(ctx.threads.to_string())
            .log_to(self.hmo_dir.join("salmon_index.log"));
        ctx.runner.run(&invocation)?;
        publish(&partial, &self.output())
    }
}

/// Quantifies one sample's reads against the gene index.
pub struct SalmonQuant {
    pub sample: Sample,
    pub index: PathBuf,
    pub hmo_dir: PathBuf,
}

impl SalmonQuant {
    pub fn quant_dir(hmo_dir: &Path, sample: &str) -> PathBuf {
        hmo_dir.join(format!("{}_salmon", sample))
    }

    pub fn invocation(&self, out_dir: &Path, threads: usize) -> ToolInvocation {
        let inv = ToolInvocation::new(SALMON)
            .arg("quant")
            .arg("-i")
            .arg(&self.index)
            .arg("-l")
            .arg("A");
        let inv = match &self.sample.reads {
            SampleReads::SingleEnd { reads } => inv.arg("-r").arg(reads),
            SampleReads::PairedEnd { r1, r2 } => inv.arg("-1").arg(r1).arg("-2").arg(r2),
        };
        inv.arg("-p")
            .arg(threads.to_string())
            .arg("--validateMappings")
            .arg("-o")
            .arg(out_dir)
            .log_to(self.hmo_dir.join(format!("{}_salmon.log", self.sample.name)))
    }
}

impl Stage for SalmonQuant {
    fn name(&self) -> &str {
        "salmon_quant"
    }

    fn inputs(&self) -> Vec<PathBuf> {
        let mut inputs = self.sample.reads.files();
        inputs.push(self.index.clone());
        inputs
    }

    fn output(&self) -> PathBuf {
        Self::quant_dir(&self.hmo_dir, &self.sample.name).join("quant.sf")
    }

    fn run(&self, ctx: &StageContext) -> Result<()> {
        let out_dir = Self::quant_dir(&self.hmo_dir, &self.sample.name);
        let partial = partial_path(&out_dir);
        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }
        ctx.runner.run(&self.invocation(&partial, ctx.threads))?;
        if !partial.join("quant.sf").is_file() {
            return Err(BifidotyperError::MissingStageOutput {
                stage: self.name().to_string(),
                path: partial.join("quant.sf"),
            }
            .into());
        }
        publish(&partial, &out_dir)
    }
}

/// Joins one sample's salmon counts with the HMO annotation.
pub struct AnnotateHmoGenes {
    pub sample: String,
    pub quant: PathBuf,
    pub annotation: PathBuf,
    pub hmo_dir: PathBuf,
}

impl AnnotateHmoGenes {
    pub fn gene_table_path(hmo_dir: &Path, sample: &str) -> PathBuf {
        hmo_dir.join(format!("{}.hmo_genes.tsv", sample))
    }

    pub fn cluster_table_path(hmo_dir: &Path, sample: &str) -> PathBuf {
        hmo_dir.join(format!("{}.cluster_presence.tsv", sample))
    }
}

impl Stage for AnnotateHmoGenes {
    fn name(&self) -> &str {
        "hmo_genes"
    }

    fn inputs(&self) -> Vec<PathBuf> {
        vec![self.quant.clone(), self.annotation.clone()]
    }

    fn output(&self) -> PathBuf {
        Self::gene_table_path(&self.hmo_dir, &self.sample)
    }

    fn run(&self, _ctx: &StageContext) -> Result<()> {
        let annotation = HmoAnnotation::load(&self.annotation)?;
        let quant = read_quant_table(&self.quant)?;
        let genes = annotate_genes(&self.sample, &quant, &annotation);
        let clusters = cluster_presence(&self.sample, &genes);

        // The cluster table is written first so the gene table, which marks
        // the stage as complete, only exists once both are on disk.
        write_cluster_table(
            &Self::cluster_table_path(&self.hmo_dir, &self.sample),
            &clusters,
        )?;
        write_gene_table(&self.output(), &genes)?;
        info!(
            "Sample '{}': {} of {} HMO genes detected",
            self.sample,
            genes.iter().filter(|g| g.present).count(),
            genes.len()
        );
        Ok(())
    }
}
