//! Genome acquisition for the reference builder: NCBI Datasets packages and the
//! GTDB-Tk reference data archive.

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use log::{debug, info, warn};
use std::{
    collections::BTreeSet,
    fmt,
    fs::{self, File},
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    errors::BifidotyperError,
    taxonomy::{accession_from_file_name, select_family},
    tools::{ToolInvocation, ToolRunner},
    utils::{get_input_reader, partial_path, publish},
};

pub const DATASETS: &str = "datasets";
pub const DEFAULT_TAXON: &str = "Bifidobacteriaceae";
pub const DEFAULT_GTDB_URL: &str = "https://data.gtdb.ecogenomic.org/releases/latest/auxillary_files/gtdbtk_package/full_package/gtdbtk_data.tar.gz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenomeSource {
    Ncbi,
    Gtdb,
}

impl fmt::Display for GenomeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenomeSource::Ncbi => write!(f, "NCBI"),
            GenomeSource::Gtdb => write!(f, "GTDB"),
        }
    }
}

/// One genome assembly on disk, named `<accession>.fna`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomeRecord {
    pub accession: String,
    pub source: GenomeSource,
    pub path: PathBuf,
}

fn write_genome<R: Read>(mut reader: R, genomes_dir: &Path, accession: &str) -> Result<PathBuf> {
    let path = genomes_dir.join(format!("{}.fna", accession));
    let partial = partial_path(&path);
    let mut out = File::create(&partial)
        .with_context(|| format!("Failed to create genome file {:?}", partial))?;
    io::copy(&mut reader, &mut out)
        .with_context(|| format!("Failed to write genome {}", accession))?;
    drop(out);
    publish(&partial, &path)?;
    Ok(path)
}

// --- NCBI ---

pub fn ncbi_download_invocation(taxon: &str, package: &Path) -> ToolInvocation {
    ToolInvocation::new(DATASETS)
        .args(["download", "genome", "taxon", taxon])
        .args(["--include", "genome"])
        .arg("--filename")
        .arg(package)
}

/// Downloads every assembly of `taxon` with NCBI `datasets` and unpacks the
/// genomes into `genomes_dir`.
pub fn acquire_ncbi(
    runner: &dyn ToolRunner,
    taxon: &str,
    work_dir: &Path,
    genomes_dir: &Path,
) -> Result<Vec<GenomeRecord>> {
    let package = work_dir.join("ncbi_dataset.zip");
    let invocation =
        ncbi_download_invocation(taxon, &package).log_to(work_dir.join("datasets.log"));
    runner
        .run(&invocation)
        .map_err(|e| BifidotyperError::Acquisition(format!("NCBI download failed: {}", e)))?;
    extract_ncbi_package(&package, genomes_dir)
}

/// Unpacks `ncbi_dataset/data/<accession>/*_genomic.fna` entries of a Datasets
/// package into `<genomes_dir>/<accession>.fna`.
pub fn extract_ncbi_package(package: &Path, genomes_dir: &Path) -> Result<Vec<GenomeRecord>> {
    let file = File::open(package)
        .with_context(|| format!("Failed to open NCBI package {:?}", package))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| BifidotyperError::ArchiveLayout {
        archive: package.to_path_buf(),
        reason: e.to_string(),
    })?;
    fs::create_dir_all(genomes_dir)?;

    let mut saw_data_dir = false;
    let mut records = Vec::new();
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read entry {} of {:?}", i, package))?;
        let name = entry.name().to_string();
        let Some(rest) = name.strip_prefix("ncbi_dataset/data/") else {
            continue;
        };
        saw_data_dir = true;

        let mut parts = rest.split('/');
        let (Some(accession), Some(file_name)) = (parts.next(), parts.next()) else {
            continue;
        };
        if !(file_name.ends_with("_genomic.fna") || file_name.ends_with("_genomic.fasta")) {
            continue;
        }
        if records.iter().any(|r: &GenomeRecord| r.accession == accession) {
            warn!("NCBI package lists {} twice, keeping the first", accession);
            continue;
        }
        let path = write_genome(entry, genomes_dir, accession)?;
        debug!("Extracted {} to {:?}", accession, path);
        records.push(GenomeRecord {
            accession: accession.to_string(),
            source: GenomeSource::Ncbi,
            path,
        });
    }

    if !saw_data_dir {
        return Err(BifidotyperError::ArchiveLayout {
            archive: package.to_path_buf(),
            reason: "no ncbi_dataset/data/ directory".to_string(),
        }
        .into());
    }
    if records.is_empty() {
        return Err(BifidotyperError::Acquisition(format!(
            "NCBI package {:?} contains no genomes",
            package
        ))
        .into());
    }
    info!("Extracted {} genomes from NCBI", records.len());
    Ok(records)
}

// --- GTDB ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GtdbArchive {
    Local(PathBuf),
    Remote(String),
}

/// Returns a local path to the GTDB archive, downloading it into `work_dir` if needed.
pub fn fetch_gtdb_archive(archive: &GtdbArchive, work_dir: &Path) -> Result<PathBuf> {
    match archive {
        GtdbArchive::Local(path) => {
            if !path.is_file() {
                return Err(BifidotyperError::FileNotFound(path.clone()).into());
            }
            Ok(path.clone())
        }
        GtdbArchive::Remote(url) => {
            let file_name = url
                .rsplit('/')
                .next()
                .filter(|n| !n.is_empty())
                .unwrap_or("gtdbtk_data.tar.gz");
            let target = work_dir.join(file_name);
            info!("Downloading GTDB archive from {}", url);

            let client = reqwest::blocking::Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .timeout(None)
                .build()
                .context("Failed to build HTTP client")?;
            let mut response = client
                .get(url)
                .send()
                .map_err(|e| BifidotyperError::Acquisition(format!("GTDB download: {}", e)))?;
            if !response.status().is_success() {
                return Err(BifidotyperError::Acquisition(format!(
                    "GTDB download returned {}",
                    response.status()
                ))
                .into());
            }

            let partial = partial_path(&target);
            let mut out = File::create(&partial)?;
            response
                .copy_to(&mut out)
                .map_err(|e| BifidotyperError::Acquisition(format!("GTDB download: {}", e)))?;
            drop(out);
            publish(&partial, &target)?;
            Ok(target)
        }
    }
}

fn is_taxonomy_entry(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name == "gtdb_taxonomy.tsv" {
        return true;
    }
    let in_taxonomy_dir = path
        .parent()
        .and_then(|p| p.file_name())
        .is_some_and(|p| p == "taxonomy");
    in_taxonomy_dir && name.contains("_taxonomy") && name.ends_with(".tsv")
}

/// Genome directories used by GTDB-Tk releases: `fastani/database/` up to
/// r214, `skani/database/` from r220. Genomes may sit in nested shards such as
/// `fastani/database/GCF/000/000/001/`.
const GENOME_DATABASE_PARENTS: [&str; 2] = ["fastani", "skani"];

fn is_database_genome(path: &Path) -> bool {
    path.ancestors().skip(1).any(|dir| {
        dir.file_name().is_some_and(|n| n == "database")
            && dir
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .is_some_and(|n| GENOME_DATABASE_PARENTS.contains(&n))
    })
}

/// First pass over the archive: accessions whose family equals `family`.
pub fn read_gtdb_taxonomy(archive_path: &Path, family: &str) -> Result<BTreeSet<String>> {
    let mut archive = tar::Archive::new(get_input_reader(archive_path)?);
    let mut selected = BTreeSet::new();
    let mut found = false;

    for entry in archive.entries()? {
        let entry = entry.with_context(|| format!("Corrupt entry in {:?}", archive_path))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.into_owned();
        if is_taxonomy_entry(&path) {
            debug!("Reading taxonomy from {:?}", path);
            selected.extend(select_family(BufReader::new(entry), family)?);
            found = true;
        }
    }

    if !found {
        return Err(BifidotyperError::ArchiveLayout {
            archive: archive_path.to_path_buf(),
            reason: "no taxonomy table".to_string(),
        }
        .into());
    }
    Ok(selected)
}

/// Second pass: copies selected genomes below the genome database directory into
/// `genomes_dir`, decompressing gzipped ones. Accessions in `already_have`
/// are not copied again.
pub fn extract_gtdb_genomes(
    archive_path: &Path,
    selected: &BTreeSet<String>,
    already_have: &BTreeSet<String>,
    genomes_dir: &Path,
) -> Result<Vec<GenomeRecord>> {
    let mut archive = tar::Archive::new(get_input_reader(archive_path)?);
    fs::create_dir_all(genomes_dir)?;
    let mut saw_database = false;
    let mut records: Vec<GenomeRecord> = Vec::new();

    for entry in archive.entries()? {
        let entry = entry.with_context(|| format!("Corrupt entry in {:?}", archive_path))?;
        let path = entry.path()?.into_owned();
        if !is_database_genome(&path) {
            continue;
        }
        saw_database = true;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(accession) = accession_from_file_name(file_name) else {
            continue;
        };
        if !selected.contains(&accession) {
            continue;
        }
        if already_have.contains(&accession) {
            debug!("{} already provided by NCBI, skipping GTDB copy", accession);
            continue;
        }
        if records.iter().any(|r| r.accession == accession) {
            continue;
        }

        let out = if file_name.ends_with(".gz") {
            write_genome(MultiGzDecoder::new(entry), genomes_dir, &accession)?
        } else {
            write_genome(entry, genomes_dir, &accession)?
        };
        records.push(GenomeRecord {
            accession,
            source: GenomeSource::Gtdb,
            path: out,
        });
    }

    if !saw_database {
        return Err(BifidotyperError::ArchiveLayout {
            archive: archive_path.to_path_buf(),
            reason: "no fastani/database/ or skani/database/ directory".to_string(),
        }
        .into());
    }
    let missing = selected
        .iter()
        .filter(|a| !already_have.contains(*a) && !records.iter().any(|r| &r.accession == *a))
        .count();
    if missing > 0 {
        warn!(
            "{} selected GTDB accessions have no genome in the archive",
            missing
        );
    }
    info!("Extracted {} genomes from GTDB", records.len());
    Ok(records)
}

/// Both GTDB passes, skipping accessions already obtained elsewhere.
pub fn acquire_gtdb(
    archive: &GtdbArchive,
    family: &str,
    already_have: &BTreeSet<String>,
    work_dir: &Path,
    genomes_dir: &Path,
) -> Result<Vec<GenomeRecord>> {
    let archive_path = fetch_gtdb_archive(archive, work_dir)?;
    let selected = read_gtdb_taxonomy(&archive_path, family)?;
    extract_gtdb_genomes(&archive_path, &selected, already_have, genomes_dir)
}
