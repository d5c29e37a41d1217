//! The sample classification run: input discovery, per-sample stage
//! pipelines on a worker pool, then run-level aggregation.

use anyhow::{Context, Result};
use log::{error, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    annotation::AnnotationTable,
    cli::Cli,
    hmo::{AnnotateHmoGenes, SalmonIndex, SalmonQuant, read_cluster_table},
    pipeline::{Pipeline, Stage, StageContext, StageReport},
    plot,
    references::{ReferenceSet, SKETCH_DB_FILE},
    report::{REPORT_FILE, SampleTables, build_report, combine_gene_tables, write_report},
    samples::{MateSuffixes, Sample, SampleSheet, discover_paired_end, discover_single_end},
    sylph::{NormalizeAbundance, SearchDatabase, SearchMode, SketchReads},
    tools::{SystemRunner, ToolRunner},
    utils::{get_num_threads, partial_path, publish, track_progress_and_resources},
};

/// Fixed directory tree below the output directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub genome_sketches: PathBuf,
    pub fastq_sketches: PathBuf,
    pub queries: PathBuf,
    pub hmo: PathBuf,
    pub plots: PathBuf,
}

impl OutputLayout {
    pub fn new(root: &Path) -> Self {
        OutputLayout {
            root: root.to_path_buf(),
            genome_sketches: root.join("sylph_genome_sketches"),
            fastq_sketches: root.join("sylph_fastq_sketches"),
            queries: root.join("sylph_genome_queries"),
            hmo: root.join("hmo_quantification"),
            plots: root.join("plots"),
        }
    }

    pub fn create(&self) -> Result<()> {
        for dir in [
            &self.root,
            &self.genome_sketches,
            &self.fastq_sketches,
            &self.queries,
            &self.hmo,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory {:?}", dir))?;
        }
        Ok(())
    }

    pub fn report(&self) -> PathBuf {
        self.root.join(REPORT_FILE)
    }

    pub fn summary(&self) -> PathBuf {
        self.root.join("run_summary.json")
    }

    pub fn combined_hmo_genes(&self) -> PathBuf {
        self.hmo.join("hmo_genes.tsv")
    }

    pub fn sketch_db(&self) -> PathBuf {
        self.genome_sketches.join(SKETCH_DB_FILE)
    }
}

/// Settings of one classification run.
#[derive(Debug, Clone)]
pub struct ClassifyConfig {
    pub references: ReferenceSet,
    pub layout: OutputLayout,
    /// Threads handed to each external tool.
    pub threads: usize,
    /// Samples processed concurrently.
    pub jobs: usize,
    pub reuse_existing: bool,
    pub plots: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleStatus {
    /// Every stage produced its output.
    Completed,
    /// A stage failed after at least one earlier stage had produced output.
    Partial,
    /// Nothing was produced: a configuration error or a failing first stage.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleOutcome {
    pub sample: String,
    pub status: SampleStatus,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
    pub stages: Vec<StageReport>,
}

impl SampleOutcome {
    /// Whether every named stage produced its output in this run.
    pub fn finished(&self, stages: &[&str]) -> bool {
        stages
            .iter()
            .all(|name| self.stages.iter().any(|s| s.name == *name))
    }
}

/// Stages whose tables feed the strain report.
const REPORT_STAGES: [&str; 3] = ["query", "profile", "abundance"];
const HMO_STAGES: [&str; 1] = ["hmo_genes"];

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub samples: Vec<SampleOutcome>,
    pub report: Option<PathBuf>,
    pub plots: Vec<PathBuf>,
}

impl RunSummary {
    pub fn any_failed(&self) -> bool {
        self.samples
            .iter()
            .any(|s| s.status == SampleStatus::Failed)
    }

    pub fn count(&self, status: SampleStatus) -> usize {
        self.samples.iter().filter(|s| s.status == status).count()
    }

    /// Names of the samples for which all of `stages` finished.
    fn samples_with(&self, stages: &[&str]) -> Vec<String> {
        self.samples
            .iter()
            .filter(|s| s.status != SampleStatus::Failed && s.finished(stages))
            .map(|s| s.sample.clone())
            .collect()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let partial = partial_path(path);
        let file = fs::File::create(&partial)
            .with_context(|| format!("Failed to create {:?}", partial))?;
        serde_json::to_writer_pretty(file, self)?;
        publish(&partial, path)
    }
}

/// Places the reference sketch database inside the output tree.
struct StageSketchDatabase {
    source: PathBuf,
    target: PathBuf,
}

impl Stage for StageSketchDatabase {
    fn name(&self) -> &str {
        "sketch_database"
    }

    fn inputs(&self) -> Vec<PathBuf> {
        vec![self.source.clone()]
    }

    fn output(&self) -> PathBuf {
        self.target.clone()
    }

    fn run(&self, _ctx: &StageContext) -> Result<()> {
        let partial = partial_path(&self.target);
        fs::copy(&self.source, &partial)
            .with_context(|| format!("Failed to copy {:?}", self.source))?;
        publish(&partial, &self.target)
    }
}

fn sample_pipeline(
    config: &ClassifyConfig,
    sample: &Sample,
    database: &Path,
    index: &Path,
) -> Pipeline<'static> {
    let layout = &config.layout;
    let name = &sample.name;
    let sketch = SketchReads::sketch_path(&layout.fastq_sketches, name);
    let profile = SearchDatabase::profile_path(&layout.queries, name);
    let quant = SalmonQuant::quant_dir(&layout.hmo, name).join("quant.sf");

    Pipeline::new(name.clone())
        .reuse_existing(config.reuse_existing)
        .with_stage(SketchReads {
            sample: sample.clone(),
            sketch_dir: layout.fastq_sketches.clone(),
        })
        .with_stage(SearchDatabase {
            mode: SearchMode::Query,
            sample: name.clone(),
            sketch: sketch.clone(),
            database: database.to_path_buf(),
            output: SearchDatabase::query_path(&layout.queries, name),
        })
        .with_stage(SearchDatabase {
            mode: SearchMode::Profile,
            sample: name.clone(),
            sketch,
            database: database.to_path_buf(),
            output: profile.clone(),
        })
        .with_stage(NormalizeAbundance {
            sample: name.clone(),
            profile,
            output: NormalizeAbundance::abundance_path(&layout.queries, name),
        })
        .with_stage(SalmonQuant {
            sample: sample.clone(),
            index: index.to_path_buf(),
            hmo_dir: layout.hmo.clone(),
        })
        .with_stage(AnnotateHmoGenes {
            sample: name.clone(),
            quant,
            annotation: config.references.hmo_annotation.clone(),
            hmo_dir: layout.hmo.clone(),
        })
}

fn run_sample(
    config: &ClassifyConfig,
    sample: &Sample,
    database: &Path,
    index: &Path,
    ctx: &StageContext,
) -> SampleOutcome {
    info!("Sample '{}': starting", sample.name);
    match sample_pipeline(config, sample, database, index).run(ctx) {
        Ok(stages) => {
            info!("Sample '{}': completed", sample.name);
            SampleOutcome {
                sample: sample.name.clone(),
                status: SampleStatus::Completed,
                failed_stage: None,
                error: None,
                stages,
            }
        }
        Err(e) => {
            error!("Sample '{}': {}", sample.name, e);
            let status = if e.completed.is_empty() {
                SampleStatus::Failed
            } else {
                SampleStatus::Partial
            };
            SampleOutcome {
                sample: sample.name.clone(),
                status,
                failed_stage: Some(e.stage.clone()),
                error: Some(e.message.clone()),
                stages: e.completed,
            }
        }
    }
}

/// Runs every sample of `sheet` and aggregates what each one produced.
///
/// Configuration errors in the sheet and failing stages are recorded in the
/// summary; a failing stage stops only the remaining stages of its sample. A failure of the shared reference
/// stages aborts the run.
pub fn run_pipeline(
    config: &ClassifyConfig,
    sheet: &SampleSheet,
    runner: &dyn ToolRunner,
) -> Result<RunSummary> {
    let layout = &config.layout;
    layout.create()?;
    let ctx = StageContext {
        runner,
        threads: config.threads,
    };

    let index = SalmonIndex::index_path(&layout.hmo);
    Pipeline::new("reference")
        .reuse_existing(config.reuse_existing)
        .with_stage(StageSketchDatabase {
            source: config.references.sketch_db.clone(),
            target: layout.sketch_db(),
        })
        .with_stage(SalmonIndex {
            genes_fasta: config.references.bl_genes.clone(),
            hmo_dir: layout.hmo.clone(),
        })
        .run(&ctx)
        .context("Preparing shared reference data failed")?;
    let database = layout.sketch_db();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs.max(1))
        .build()
        .context("Failed to build sample worker pool")?;

    let mut outcomes: Vec<SampleOutcome> = track_progress_and_resources(
        "Processing samples",
        sheet.samples.len() as u64,
        |pb| {
            Ok(pool.install(|| {
                sheet
                    .samples
                    .par_iter()
                    .map(|sample| {
                        let outcome = run_sample(config, sample, &database, &index, &ctx);
                        pb.inc(1);
                        outcome
                    })
                    .collect::<Vec<_>>()
            }))
        },
    )?;

    for config_error in &sheet.errors {
        outcomes.push(SampleOutcome {
            sample: config_error.sample.clone(),
            status: SampleStatus::Failed,
            failed_stage: Some("input".to_string()),
            error: Some(config_error.error.to_string()),
            stages: Vec::new(),
        });
    }
    outcomes.sort_by(|a, b| a.sample.cmp(&b.sample));

    let mut summary = RunSummary {
        samples: outcomes,
        report: None,
        plots: Vec::new(),
    };
    aggregate(config, &mut summary)?;
    summary.write(&layout.summary())?;

    info!(
        "Run finished: {} samples completed, {} partial, {} failed",
        summary.count(SampleStatus::Completed),
        summary.count(SampleStatus::Partial),
        summary.count(SampleStatus::Failed)
    );
    Ok(summary)
}

/// Writes the run-level tables from every sample that got far enough:
/// the strain report needs the sylph tables, the HMO outputs need the gene
/// tables. Partial samples contribute whatever they finished.
fn aggregate(config: &ClassifyConfig, summary: &mut RunSummary) -> Result<()> {
    let layout = &config.layout;
    let classified = summary.samples_with(&REPORT_STAGES);
    let quantified = summary.samples_with(&HMO_STAGES);

    let mut rows = Vec::new();
    if classified.is_empty() {
        warn!("No sample has sylph results, skipping the report");
    } else {
        let annotation = AnnotationTable::load(&config.references.genomes_table)?;
        let tables: Vec<SampleTables> = classified
            .iter()
            .map(|sample| SampleTables {
                sample: sample.clone(),
                query: SearchDatabase::query_path(&layout.queries, sample),
                profile: SearchDatabase::profile_path(&layout.queries, sample),
                abundance: NormalizeAbundance::abundance_path(&layout.queries, sample),
            })
            .collect();
        rows = build_report(&annotation, &tables)?;
        write_report(&layout.report(), &rows)?;
        summary.report = Some(layout.report());
    }

    let mut clusters = BTreeMap::new();
    if quantified.is_empty() {
        warn!("No sample has HMO gene results, skipping the combined gene table");
    } else {
        let gene_tables: Vec<PathBuf> = quantified
            .iter()
            .map(|sample| AnnotateHmoGenes::gene_table_path(&layout.hmo, sample))
            .collect();
        combine_gene_tables(&gene_tables, &layout.combined_hmo_genes())?;
        for sample in &quantified {
            let path = AnnotateHmoGenes::cluster_table_path(&layout.hmo, sample);
            clusters.insert(sample.clone(), read_cluster_table(&path)?);
        }
    }

    if config.plots && (!rows.is_empty() || !clusters.is_empty()) {
        match plot::render_all(&rows, &clusters, &layout.plots) {
            Ok(paths) => summary.plots = paths,
            Err(e) => warn!("Plotting failed: {:#}", e),
        }
    }
    Ok(())
}

/// Entry point of the `bifidotyper` binary. Returns false when any sample
/// failed outright.
pub fn run_classify(cli: Cli) -> Result<bool> {
    let layout = OutputLayout::new(&cli.output_dir);
    let log_file = if cli.log_file.is_absolute() {
        cli.log_file.clone()
    } else {
        layout.root.join(&cli.log_file)
    };
    super::init_logging(cli.verbose, Some(&log_file))?;
    cli.validate()?;
    info!("bifidotyper {}", env!("CARGO_PKG_VERSION"));

    let sheet = if !cli.single_end.is_empty() {
        discover_single_end(&cli.single_end, &MateSuffixes::default())?
    } else {
        let (r1, r2) = cli.suffixes();
        discover_paired_end(&cli.paired_end, &MateSuffixes::new(&r1, &r2)?)?
    };
    let references = ReferenceSet::from_dir(&cli.reference_dir)?;

    let config = ClassifyConfig {
        references,
        layout,
        threads: get_num_threads(cli.threads),
        jobs: cli.jobs,
        reuse_existing: !cli.force,
        plots: !cli.no_plots,
    };
    let summary = run_pipeline(&config, &sheet, &SystemRunner)?;
    Ok(!summary.any_failed())
}
