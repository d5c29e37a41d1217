//! `bifidotyper-build-db`: acquire, dereplicate, sketch and annotate the
//! reference genomes.

use anyhow::{Context, Result};
use log::{info, warn};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    acquire::{DEFAULT_GTDB_URL, GenomeRecord, GtdbArchive, acquire_gtdb, acquire_ncbi},
    annotation::AnnotationTable,
    cli::BuildDbArgs,
    derep::{RepresentativeSet, dereplicate, write_path_list},
    errors::BifidotyperError,
    references::{GENOMES_TABLE_FILE, SKETCH_DB_FILE},
    sylph::sketch_genomes_invocation,
    tools::{SystemRunner, ToolRunner},
    utils::{get_num_threads, initialize_rayon_pool},
};

pub const REPRESENTATIVES_FILE: &str = "representatives.txt";
const STAGING_DIR: &str = ".staging";
const WORK_DIR: &str = "work";

/// What the builder needs to know, independent of how it was invoked.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub output_dir: PathBuf,
    pub prior_annotation: Option<PathBuf>,
    pub taxon: String,
    pub ani: f64,
    /// `None` skips GTDB.
    pub gtdb: Option<GtdbArchive>,
    pub ncbi: bool,
    pub keep_work: bool,
    pub threads: usize,
}

impl BuildConfig {
    pub fn from_args(args: &BuildDbArgs) -> Self {
        let gtdb = if args.skip_gtdb {
            None
        } else if let Some(path) = &args.gtdb_archive {
            Some(GtdbArchive::Local(path.clone()))
        } else {
            Some(GtdbArchive::Remote(
                args.gtdb_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_GTDB_URL.to_string()),
            ))
        };
        BuildConfig {
            output_dir: args.output_dir.clone(),
            prior_annotation: args.prior_annotation.clone(),
            taxon: args.taxon.clone(),
            ani: args.ani,
            gtdb,
            ncbi: !args.skip_ncbi,
            keep_work: args.keep_work,
            threads: get_num_threads(args.threads),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub acquired: usize,
    pub representatives: RepresentativeSet,
    pub published: Vec<PathBuf>,
}

fn acquire_all(
    config: &BuildConfig,
    runner: &dyn ToolRunner,
    work_dir: &Path,
) -> Result<Vec<GenomeRecord>> {
    let genomes_dir = work_dir.join("genomes");
    if genomes_dir.exists() {
        fs::remove_dir_all(&genomes_dir)?;
    }
    fs::create_dir_all(&genomes_dir)?;

    let mut records = Vec::new();
    if config.ncbi {
        records.extend(acquire_ncbi(runner, &config.taxon, work_dir, &genomes_dir)?);
    }
    if let Some(archive) = &config.gtdb {
        let already_have: BTreeSet<String> =
            records.iter().map(|r| r.accession.clone()).collect();
        records.extend(acquire_gtdb(
            archive,
            &config.taxon,
            &already_have,
            work_dir,
            &genomes_dir,
        )?);
    }
    if records.is_empty() {
        return Err(BifidotyperError::Acquisition(format!(
            "no genomes acquired for {}",
            config.taxon
        ))
        .into());
    }
    info!("Acquired {} genomes in total", records.len());
    Ok(records)
}

fn sketch_representatives(
    runner: &dyn ToolRunner,
    representatives: &RepresentativeSet,
    work_dir: &Path,
    staging: &Path,
    threads: usize,
) -> Result<PathBuf> {
    let list = work_dir.join("representative_paths.txt");
    write_path_list(&list, &representatives.members)?;

    let prefix = staging.join(SKETCH_DB_FILE.trim_end_matches(".syldb"));
    let invocation = sketch_genomes_invocation(&list, &prefix, threads)
        .log_to(work_dir.join("sylph_sketch.log"));
    runner.run(&invocation)?;

    let database = staging.join(SKETCH_DB_FILE);
    if !database.is_file() {
        return Err(BifidotyperError::MissingStageOutput {
            stage: "sketch_genomes".to_string(),
            path: database,
        }
        .into());
    }
    Ok(database)
}

fn annotate_representatives(
    config: &BuildConfig,
    representatives: &RepresentativeSet,
    staging: &Path,
) -> Result<PathBuf> {
    let mut table = match &config.prior_annotation {
        Some(prior) => AnnotationTable::load(prior)
            .with_context(|| format!("Failed to read prior annotation {:?}", prior))?,
        None => AnnotationTable::default(),
    };
    let merged = table.merge_genomes(&representatives.members)?;
    info!(
        "Annotation: {} genomes added, {} kept from the prior table",
        merged.added.len(),
        merged.skipped.len()
    );
    let path = staging.join(GENOMES_TABLE_FILE);
    table.write(&path)?;
    Ok(path)
}

/// Moves every file of `staging` into `output_dir`, replacing older versions.
fn publish_staging(staging: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut published = Vec::new();
    let mut entries: Vec<PathBuf> = fs::read_dir(staging)?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    entries.sort();
    for entry in entries {
        let Some(name) = entry.file_name() else {
            continue;
        };
        let target = output_dir.join(name);
        if target.is_dir() {
            fs::remove_dir_all(&target)?;
        }
        fs::rename(&entry, &target)
            .with_context(|| format!("Failed to publish {:?}", target))?;
        info!("Published {:?}", target);
        published.push(target);
    }
    fs::remove_dir(staging).ok();
    Ok(published)
}

/// Builds the reference database. Nothing in `output_dir` is replaced unless
/// every step succeeded.
pub fn build_database(config: &BuildConfig, runner: &dyn ToolRunner) -> Result<BuildSummary> {
    if !config.ncbi && config.gtdb.is_none() {
        return Err(BifidotyperError::InvalidInput(
            "both genome sources are disabled".to_string(),
        )
        .into());
    }
    let staging = config.output_dir.join(STAGING_DIR);
    let work_dir = config.output_dir.join(WORK_DIR);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)
        .with_context(|| format!("Failed to create {:?}", staging))?;
    fs::create_dir_all(&work_dir)?;

    let genomes = acquire_all(config, runner, &work_dir)?;
    let paths: Vec<PathBuf> = genomes.iter().map(|g| g.path.clone()).collect();
    let representatives = dereplicate(runner, &paths, config.ani, config.threads, &work_dir)?;

    let names: Vec<PathBuf> = representatives
        .file_names()
        .into_iter()
        .map(PathBuf::from)
        .collect();
    write_path_list(&staging.join(REPRESENTATIVES_FILE), &names)?;
    sketch_representatives(runner, &representatives, &work_dir, &staging, config.threads)?;
    annotate_representatives(config, &representatives, &staging)?;

    let published = publish_staging(&staging, &config.output_dir)?;
    if config.keep_work {
        info!("Keeping work directory {:?}", work_dir);
    } else if let Err(e) = fs::remove_dir_all(&work_dir) {
        warn!("Failed to remove work directory {:?}: {}", work_dir, e);
    }

    Ok(BuildSummary {
        acquired: genomes.len(),
        representatives,
        published,
    })
}

/// Entry point of the `bifidotyper-build-db` binary.
pub fn run_build_db(args: BuildDbArgs) -> Result<()> {
    super::init_logging(args.verbose, None)?;
    let config = BuildConfig::from_args(&args);
    initialize_rayon_pool(config.threads)?;

    let summary = build_database(&config, &SystemRunner)?;
    info!(
        "Reference database built in {:?}: {} genomes acquired, {} representatives at {} ANI",
        config.output_dir,
        summary.acquired,
        summary.representatives.members.len(),
        summary.representatives.ani
    );
    Ok(())
}
