use log::info;
use std::path::{Path, PathBuf};

use crate::errors::BifidotyperError;

pub const HMO_ANNOTATION_FILE: &str = "humann2_HMO_annotation.csv";
pub const BL_GENES_FILE: &str = "CP001095.1_gene_sequences.fasta";
pub const GENOMES_TABLE_FILE: &str = "genomes.csv";
pub const SKETCH_DB_FILE: &str = "bifidobacteria_sketches.syldb";

/// The reference artefacts the classification pipeline reads.
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    pub dir: PathBuf,
    /// HMO gene to cluster annotation (`;`-separated).
    pub hmo_annotation: PathBuf,
    /// B. longum subsp. infantis ATCC 15697 gene sequences.
    pub bl_genes: PathBuf,
    /// Genome annotation table, keyed by `Genome_file`.
    pub genomes_table: PathBuf,
    /// sylph database of the representative genomes.
    pub sketch_db: PathBuf,
}

impl ReferenceSet {
    /// Resolves and validates every reference file inside `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, BifidotyperError> {
        if !dir.is_dir() {
            return Err(BifidotyperError::MissingReference {
                name: "reference directory".to_string(),
                path: dir.to_path_buf(),
            });
        }

        let set = ReferenceSet {
            dir: dir.to_path_buf(),
            hmo_annotation: dir.join(HMO_ANNOTATION_FILE),
            bl_genes: dir.join(BL_GENES_FILE),
            genomes_table: dir.join(GENOMES_TABLE_FILE),
            sketch_db: dir.join(SKETCH_DB_FILE),
        };

        for (name, path) in set.entries() {
            if !path.is_file() {
                return Err(BifidotyperError::MissingReference {
                    name: name.to_string(),
                    path: path.clone(),
                });
            }
        }
        info!("References validated in {:?}", dir);
        Ok(set)
    }

    pub fn entries(&self) -> [(&'static str, &PathBuf); 4] {
        [
            ("humann2_hmo", &self.hmo_annotation),
            ("bl_genes", &self.bl_genes),
            ("genomes_df", &self.genomes_table),
            ("bifidobacteria_sketches", &self.sketch_db),
        ]
    }
}
