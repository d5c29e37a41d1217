use clap::{ArgGroup, Parser};
use std::{ffi::OsString, path::PathBuf};

use crate::{
    acquire::DEFAULT_TAXON,
    derep::DEFAULT_ANI,
    errors::BifidotyperError,
    samples::{DEFAULT_R1_SUFFIX, DEFAULT_R2_SUFFIX},
};

/// Classify Bifidobacterium strains and detect HMO utilisation genes in FASTQ samples.
#[derive(Parser, Debug)]
#[clap(name = "bifidotyper", author, version, about, long_about = None)]
#[clap(group(
    ArgGroup::new("reads")
        .required(true)
        .args(["single_end", "paired_end"])
))]
pub struct Cli {
    #[clap(
        long = "single-end",
        num_args = 1..,
        value_name = "FASTQ",
        help = "Single-end FASTQ files (.fastq, .fq, optionally .gz). Also accepted as -se."
    )]
    pub single_end: Vec<PathBuf>,

    #[clap(
        long = "paired-end",
        num_args = 1..,
        value_name = "FASTQ",
        help = "Paired-end FASTQ files, R1 and R2 mates together. Also accepted as -pe."
    )]
    pub paired_end: Vec<PathBuf>,

    #[clap(
        long,
        requires_all = ["paired_end", "r2_suffix"],
        conflicts_with = "single_end",
        help = "Suffix marking R1 files (paired-end only) [default: _R1]"
    )]
    pub r1_suffix: Option<String>,

    #[clap(
        long,
        requires_all = ["paired_end", "r1_suffix"],
        conflicts_with = "single_end",
        help = "Suffix marking R2 files (paired-end only) [default: _R2]"
    )]
    pub r2_suffix: Option<String>,

    #[clap(
        short,
        long,
        default_value_t = 1,
        help = "Threads given to each external tool (0 for all logical cores)"
    )]
    pub threads: usize,

    #[clap(
        short,
        long,
        default_value_t = 1,
        help = "Number of samples processed concurrently"
    )]
    pub jobs: usize,

    #[clap(short, long, default_value = ".", help = "Output directory")]
    pub output_dir: PathBuf,

    #[clap(
        long,
        env = "BIFIDOTYPER_REFERENCE_DIR",
        default_value = "reference",
        help = "Directory holding the reference files"
    )]
    pub reference_dir: PathBuf,

    #[clap(
        long,
        default_value = "bifidotyper.log",
        help = "Run log file; relative paths are placed in the output directory"
    )]
    pub log_file: PathBuf,

    #[clap(long, help = "Recompute every stage even when its outputs are up to date")]
    pub force: bool,

    #[clap(long, help = "Skip figure generation")]
    pub no_plots: bool,

    #[clap(short, long, action = clap::ArgAction::Count, help = "Verbosity level (e.g., -v, -vv)")]
    pub verbose: u8,
}

impl Cli {
    /// Rejects argument combinations clap cannot express on its own.
    pub fn validate(&self) -> Result<(), BifidotyperError> {
        if (self.r1_suffix.is_some() || self.r2_suffix.is_some()) && self.paired_end.is_empty() {
            return Err(BifidotyperError::InvalidInput(
                "--r1-suffix and --r2-suffix can only be used with paired-end mode".to_string(),
            ));
        }
        Ok(())
    }

    /// Mate suffixes in effect, defaults applied.
    pub fn suffixes(&self) -> (String, String) {
        (
            self.r1_suffix
                .clone()
                .unwrap_or_else(|| DEFAULT_R1_SUFFIX.to_string()),
            self.r2_suffix
                .clone()
                .unwrap_or_else(|| DEFAULT_R2_SUFFIX.to_string()),
        )
    }
}

/// Build the bifidotyper reference database from NCBI and GTDB genomes.
#[derive(Parser, Debug)]
#[clap(name = "bifidotyper-build-db", author, version, about, long_about = None)]
pub struct BuildDbArgs {
    #[clap(help = "Directory receiving the reference files")]
    pub output_dir: PathBuf,

    #[clap(help = "Existing genomes.csv whose rows are carried over")]
    pub prior_annotation: Option<PathBuf>,

    #[clap(long, default_value = DEFAULT_TAXON, help = "Family to collect genomes for")]
    pub taxon: String,

    #[clap(long, default_value_t = DEFAULT_ANI, help = "Secondary ANI threshold for dereplication")]
    pub ani: f64,

    #[clap(
        long,
        conflicts_with = "gtdb_url",
        help = "Local GTDB-Tk reference data archive (.tar.gz)"
    )]
    pub gtdb_archive: Option<PathBuf>,

    #[clap(long, help = "URL of the GTDB-Tk reference data archive")]
    pub gtdb_url: Option<String>,

    #[clap(long, help = "Do not download genomes from NCBI")]
    pub skip_ncbi: bool,

    #[clap(long, conflicts_with = "skip_ncbi", help = "Do not take genomes from GTDB")]
    pub skip_gtdb: bool,

    #[clap(long, help = "Keep the intermediate work directory")]
    pub keep_work: bool,

    #[clap(
        short,
        long,
        default_value_t = 0,
        help = "Number of threads to use (0 for all logical cores)"
    )]
    pub threads: usize,

    #[clap(short, long, action = clap::ArgAction::Count, help = "Verbosity level (e.g., -v, -vv)")]
    pub verbose: u8,
}

/// Add genomes from a directory of .fna files to a genome annotation table.
#[derive(Parser, Debug)]
#[clap(name = "bifidotyper-update-genomes", author, version, about, long_about = None)]
pub struct UpdateGenomesArgs {
    #[clap(help = "Directory containing .fna genome files")]
    pub genomes_dir: PathBuf,

    #[clap(help = "Annotation CSV to update (created if missing)")]
    pub csv_path: PathBuf,

    #[clap(short, long, action = clap::ArgAction::Count, help = "Verbosity level (e.g., -v, -vv)")]
    pub verbose: u8,
}

/// Rewrites the single-dash long flags `-se` and `-pe` to their `--` forms.
pub fn normalize_legacy_flags<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| match arg.to_str() {
            Some("-se") => OsString::from("--single-end"),
            Some("-pe") => OsString::from("--paired-end"),
            _ => arg,
        })
        .collect()
}

pub fn parse_cli() -> Cli {
    Cli::parse_from(normalize_legacy_flags(std::env::args_os()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definitions_are_valid() {
        Cli::command().debug_assert();
        BuildDbArgs::command().debug_assert();
        UpdateGenomesArgs::command().debug_assert();
    }

    #[test]
    fn legacy_flags_are_rewritten() {
        let args = normalize_legacy_flags(["bifidotyper", "-pe", "a_R1.fq", "a_R2.fq", "-t", "2"]);
        let cli = Cli::parse_from(args);
        assert_eq!(cli.paired_end.len(), 2);
        assert!(cli.single_end.is_empty());
        assert_eq!(cli.threads, 2);
        assert_eq!(cli.suffixes(), ("_R1".to_string(), "_R2".to_string()));
    }

    #[test]
    fn suffixes_need_paired_end() {
        let args = normalize_legacy_flags([
            "bifidotyper",
            "-se",
            "a.fq",
            "--r1-suffix",
            "_1",
            "--r2-suffix",
            "_2",
        ]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn validate_rejects_suffixes_without_paired_end() {
        let mut cli = Cli::parse_from(["bifidotyper", "--single-end", "a.fq"]);
        assert!(cli.validate().is_ok());
        cli.r1_suffix = Some("_1".to_string());
        cli.r2_suffix = Some("_2".to_string());
        let err = cli.validate().unwrap_err();
        assert!(err.to_string().contains("only be used with paired-end mode"));
    }

    #[test]
    fn single_and_paired_are_exclusive() {
        let args = normalize_legacy_flags(["bifidotyper", "-se", "a.fq", "-pe", "b_R1.fq"]);
        assert!(Cli::try_parse_from(args).is_err());
    }
}
