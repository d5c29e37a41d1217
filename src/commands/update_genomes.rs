use anyhow::Result;
use log::{info, warn};

use crate::{
    annotation::{AnnotationTable, MergeSummary, list_fna_files},
    cli::UpdateGenomesArgs,
};

/// Adds every `.fna` genome in the directory that the table lacks, then
/// rewrites the table.
pub fn update_genomes(args: &UpdateGenomesArgs) -> Result<MergeSummary> {
    let mut table = AnnotationTable::load_or_empty(&args.csv_path)?;
    let genomes = list_fna_files(&args.genomes_dir)?;
    if genomes.is_empty() {
        warn!("No .fna files found in the directory: {:?}", args.genomes_dir);
    }

    let summary = table.merge_genomes(&genomes)?;
    table.write(&args.csv_path)?;
    info!(
        "{:?}: {} genomes added, {} already present",
        args.csv_path,
        summary.added.len(),
        summary.skipped.len()
    );
    Ok(summary)
}

/// Entry point of the `bifidotyper-update-genomes` binary.
pub fn run_update_genomes(args: UpdateGenomesArgs) -> Result<()> {
    super::init_logging(args.verbose, None)?;
    update_genomes(&args)?;
    Ok(())
}
