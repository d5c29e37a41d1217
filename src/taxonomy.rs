//! GTDB taxonomy strings and family-level selection.

use anyhow::{Context, Result};
use log::{debug, info};
use std::{collections::BTreeSet, io::BufRead, path::Path};

use crate::errors::BifidotyperError;

/// The seven ranks of a GTDB taxonomy string
/// (`d__Bacteria;p__...;c__...;o__...;f__...;g__...;s__...`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lineage {
    pub domain: Option<String>,
    pub phylum: Option<String>,
    pub class: Option<String>,
    pub order: Option<String>,
    pub family: Option<String>,
    pub genus: Option<String>,
    pub species: Option<String>,
}

impl Lineage {
    pub fn parse(taxonomy: &str) -> Self {
        let mut lineage = Lineage::default();
        for rank in taxonomy.split(';') {
            let Some((prefix, name)) = rank.trim().split_once("__") else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let slot = match prefix {
                "d" => &mut lineage.domain,
                "p" => &mut lineage.phylum,
                "c" => &mut lineage.class,
                "o" => &mut lineage.order,
                "f" => &mut lineage.family,
                "g" => &mut lineage.genus,
                "s" => &mut lineage.species,
                _ => continue,
            };
            *slot = Some(name.to_string());
        }
        lineage
    }
}

/// Drops the GTDB `RS_`/`GB_` source prefix.
pub fn assembly_accession(gtdb_id: &str) -> &str {
    gtdb_id
        .strip_prefix("RS_")
        .or_else(|| gtdb_id.strip_prefix("GB_"))
        .unwrap_or(gtdb_id)
}

/// Accession encoded in a genome file name:
/// `GCF_000010425.1_genomic.fna.gz` -> `GCF_000010425.1`.
pub fn accession_from_file_name(file_name: &str) -> Option<String> {
    let mut parts = file_name.splitn(3, '_');
    let db = parts.next()?;
    let rest = parts.next()?;
    if !(db == "GCF" || db == "GCA") {
        return None;
    }
    let number = rest.split(".fna").next().unwrap_or(rest);
    if number.is_empty() {
        return None;
    }
    Some(format!("{}_{}", db, number))
}

/// Assembly accessions whose family rank equals `family`.
/// Taxonomy lines are `<gtdb id>\t<taxonomy string>`.
pub fn select_family<R: BufRead>(reader: R, family: &str) -> Result<BTreeSet<String>> {
    let mut selected = BTreeSet::new();
    let mut lines = 0usize;
    for line in reader.lines() {
        let line = line.context("Failed to read taxonomy table")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        lines += 1;
        let Some((id, taxonomy)) = line.split_once('\t') else {
            return Err(BifidotyperError::parse(
                Path::new("taxonomy"),
                format!("line {} has no tab separator", lines),
            )
            .into());
        };
        if Lineage::parse(taxonomy).family.as_deref() == Some(family) {
            selected.insert(assembly_accession(id.trim()).to_string());
        }
    }
    debug!("Scanned {} taxonomy lines", lines);
    info!(
        "Taxonomy selected {} accessions in family {}",
        selected.len(),
        family
    );
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ranks() {
        let l = Lineage::parse(
            "d__Bacteria;p__Actinomycetota;c__Actinomycetes;o__Actinomycetales;f__Bifidobacteriaceae;g__Bifidobacterium;s__Bifidobacterium longum",
        );
        assert_eq!(l.family.as_deref(), Some("Bifidobacteriaceae"));
        assert_eq!(l.species.as_deref(), Some("Bifidobacterium longum"));
    }

    #[test]
    fn accession_helpers() {
        assert_eq!(assembly_accession("RS_GCF_000010425.1"), "GCF_000010425.1");
        assert_eq!(assembly_accession("GB_GCA_1.1"), "GCA_1.1");
        assert_eq!(
            accession_from_file_name("GCF_000010425.1_genomic.fna.gz").as_deref(),
            Some("GCF_000010425.1")
        );
        assert_eq!(
            accession_from_file_name("GCA_000000001.2.fna").as_deref(),
            Some("GCA_000000001.2")
        );
        assert_eq!(accession_from_file_name("genome.fna"), None);
    }
}
