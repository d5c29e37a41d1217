//! Run-level aggregation: the merged strain report and the combined HMO gene table.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use crate::{
    annotation::AnnotationTable,
    hmo::{HmoGeneRow, read_gene_table, write_gene_table},
    sylph::{read_abundance_table, read_profile_table, read_query_table},
    utils::{publish, tsv_reader, tsv_writer},
};

pub const REPORT_FILE: &str = "bifidotyper_report.tsv";

/// Per-sample tables feeding the report.
#[derive(Debug, Clone)]
pub struct SampleTables {
    pub sample: String,
    pub query: PathBuf,
    pub profile: PathBuf,
    pub abundance: PathBuf,
}

/// One (sample, genome) row of the merged report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    #[serde(rename = "Sample")]
    pub sample: String,
    #[serde(rename = "Genome_file")]
    pub genome_file: String,
    #[serde(rename = "Label")]
    pub label: Option<String>,
    #[serde(rename = "Genome_size")]
    pub genome_size: Option<u64>,
    #[serde(rename = "Color")]
    pub color: Option<String>,
    #[serde(rename = "Taxonomic_abundance")]
    pub taxonomic_abundance: f64,
    #[serde(rename = "Sequence_abundance")]
    pub sequence_abundance: f64,
    #[serde(rename = "Containment_ind")]
    pub containment_ind: Option<String>,
    #[serde(rename = "Adjusted_ANI")]
    pub adjusted_ani: Option<f64>,
    #[serde(rename = "Annotated")]
    pub annotated: bool,
}

impl ReportRow {
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.genome_file)
    }

    /// Containment as a fraction in [0, 1], 0 when the genome was not matched.
    pub fn containment_fraction(&self) -> f64 {
        self.containment_ind
            .as_deref()
            .and_then(|c| c.parse::<crate::sylph::Containment>().ok())
            .map(|c| c.fraction())
            .unwrap_or(0.0)
    }
}

#[derive(Default)]
struct GenomeHits {
    abundance: Option<(f64, Option<f64>, Option<f64>)>,
    query: Option<(String, f64)>,
}

/// Builds the report rows of one sample: one row for every genome of the
/// annotation table and every genome sylph reported, sorted by genome id.
pub fn sample_report(annotation: &AnnotationTable, tables: &SampleTables) -> Result<Vec<ReportRow>> {
    let mut hits: BTreeMap<String, GenomeHits> = annotation
        .genome_ids()
        .map(|id| (id.to_string(), GenomeHits::default()))
        .collect();

    for record in read_query_table(&tables.query)? {
        let entry = hits.entry(record.genome_id()).or_default();
        let better = entry
            .query
            .as_ref()
            .is_none_or(|(_, ani)| record.adjusted_ani > *ani);
        if better {
            entry.query = Some((record.containment_ind.clone(), record.adjusted_ani));
        }
    }
    // Profile genomes are part of the row set even when absent from the query table.
    for record in read_profile_table(&tables.profile)? {
        hits.entry(record.genome_id()).or_default();
    }
    for row in read_abundance_table(&tables.abundance)? {
        if row.is_unclassified() {
            continue;
        }
        hits.entry(row.genome_file.clone()).or_default().abundance =
            Some((row.abundance, row.sequence_abundance, row.adjusted_ani));
    }

    let mut rows = Vec::with_capacity(hits.len());
    for (genome, hit) in hits {
        let known = annotation.lookup(&genome);
        if known.is_none() {
            warn!(
                "Sample '{}': genome {} is not in the annotation table",
                tables.sample, genome
            );
        }
        let (taxonomic, sequence, profile_ani) = hit.abundance.unwrap_or((0.0, None, None));
        let (containment, query_ani) = match hit.query {
            Some((c, ani)) => (Some(c), Some(ani)),
            None => (None, None),
        };
        rows.push(ReportRow {
            sample: tables.sample.clone(),
            label: known.map(|a| a.label.clone()),
            genome_size: known.and_then(|a| a.genome_size),
            color: known.map(|a| a.color.clone()),
            taxonomic_abundance: taxonomic,
            sequence_abundance: sequence.unwrap_or(0.0),
            containment_ind: containment,
            adjusted_ani: query_ani.or(profile_ani),
            annotated: known.is_some(),
            genome_file: genome,
        });
    }
    Ok(rows)
}

pub fn build_report(annotation: &AnnotationTable, samples: &[SampleTables]) -> Result<Vec<ReportRow>> {
    let mut rows = Vec::new();
    for tables in samples {
        let sample_rows = sample_report(annotation, tables)
            .with_context(|| format!("Failed to build report for sample '{}'", tables.sample))?;
        rows.extend(sample_rows);
    }
    Ok(rows)
}

const REPORT_HEADER: [&str; 10] = [
    "Sample",
    "Genome_file",
    "Label",
    "Genome_size",
    "Color",
    "Taxonomic_abundance",
    "Sequence_abundance",
    "Containment_ind",
    "Adjusted_ANI",
    "Annotated",
];

pub fn write_report(path: &Path, rows: &[ReportRow]) -> Result<()> {
    let (mut writer, partial) = tsv_writer(path)?;
    if rows.is_empty() {
        writer.write_record(REPORT_HEADER)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    drop(writer);
    publish(&partial, path)?;
    info!("Wrote {} report rows to {:?}", rows.len(), path);
    Ok(())
}

pub fn read_report(path: &Path) -> Result<Vec<ReportRow>> {
    let mut reader = tsv_reader(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row.with_context(|| format!("Bad report row in {:?}", path))?);
    }
    Ok(rows)
}

/// Concatenates per-sample HMO gene tables in the given order.
pub fn combine_gene_tables(tables: &[PathBuf], output: &Path) -> Result<Vec<HmoGeneRow>> {
    let mut rows = Vec::new();
    let mut seen = BTreeSet::new();
    for table in tables {
        for row in read_gene_table(table)? {
            if seen.insert((row.sample.clone(), row.gene.clone())) {
                rows.push(row);
            }
        }
    }
    write_gene_table(output, &rows)?;
    info!("Wrote {} HMO gene rows to {:?}", rows.len(), output);
    Ok(rows)
}
