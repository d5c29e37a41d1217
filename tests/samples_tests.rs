mod common;

use bifidotyper::errors::BifidotyperError;
use bifidotyper::samples::{
    MateSuffixes, SampleReads, discover_paired_end, discover_single_end, sample_name,
    strip_read_extension,
};
use common::write_fastq;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fastqs(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            write_fastq(&path);
            path
        })
        .collect()
}

#[test]
fn test_pairs_files_by_sample_name() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let files = fastqs(
        temp_dir.path(),
        &["B_R2.fastq.gz", "A_R1.fastq.gz", "A_R2.fastq.gz", "B_R1.fastq.gz"],
    );

    let sheet = discover_paired_end(&files, &MateSuffixes::default())?;
    assert!(!sheet.has_errors());
    let names: Vec<&str> = sheet.samples.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);

    match &sheet.samples[0].reads {
        SampleReads::PairedEnd { r1, r2 } => {
            assert_eq!(r1.file_name().unwrap(), "A_R1.fastq.gz");
            assert_eq!(r2.file_name().unwrap(), "A_R2.fastq.gz");
        }
        other => panic!("expected paired reads, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_missing_mate_only_fails_that_sample() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let files = fastqs(
        temp_dir.path(),
        &["A_R1.fq", "A_R2.fq", "B_R1.fq", "B_R2.fq", "sampleC_R1.fq"],
    );

    let sheet = discover_paired_end(&files, &MateSuffixes::default())?;
    assert_eq!(sheet.samples.len(), 2);
    assert_eq!(sheet.errors.len(), 1);
    assert_eq!(sheet.errors[0].sample, "sampleC");
    let message = sheet.errors[0].error.to_string();
    assert!(message.contains("missing R2"), "unexpected message: {}", message);
    Ok(())
}

#[test]
fn test_custom_suffixes() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let files = fastqs(temp_dir.path(), &["S1_1.fastq", "S1_2.fastq"]);

    let sheet = discover_paired_end(&files, &MateSuffixes::new("_1", "_2")?)?;
    assert_eq!(sheet.samples.len(), 1);
    assert_eq!(sheet.samples[0].name, "S1");
    Ok(())
}

#[test]
fn test_ambiguous_and_unmatched_files() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let files = fastqs(
        temp_dir.path(),
        &["X_R1_R2.fq", "plain.fq", "D_R1.fq", "D_R2.fq"],
    );

    let sheet = discover_paired_end(&files, &MateSuffixes::default())?;
    assert_eq!(sheet.samples.len(), 1);
    assert_eq!(sheet.samples[0].name, "D");

    let reasons: Vec<String> = sheet.errors.iter().map(|e| e.error.to_string()).collect();
    assert!(reasons.iter().any(|r| r.contains("both R1")));
    assert!(reasons.iter().any(|r| r.contains("neither R1")));
    Ok(())
}

#[test]
fn test_duplicate_mate_fails_sample() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let a = fastqs(temp_dir.path(), &["E_R1.fq", "E_R2.fq"]);
    let sub = temp_dir.path().join("again");
    std::fs::create_dir_all(&sub)?;
    let b = fastqs(&sub, &["E_R1.fq"]);

    let files: Vec<PathBuf> = a.into_iter().chain(b).collect();
    let sheet = discover_paired_end(&files, &MateSuffixes::default())?;
    assert!(sheet.samples.is_empty());
    assert!(sheet.errors[0].error.to_string().contains("duplicate R1"));
    Ok(())
}

#[test]
fn test_missing_file_and_bad_extension() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let good = fastqs(temp_dir.path(), &["ok.fastq", "reads.txt"]);
    let mut files = good.clone();
    files.push(temp_dir.path().join("absent.fq"));

    let sheet = discover_single_end(&files, &MateSuffixes::default())?;
    assert_eq!(sheet.samples.len(), 1);
    assert_eq!(sheet.samples[0].name, "ok");
    assert_eq!(sheet.errors.len(), 2);
    assert!(matches!(
        sheet.errors[0].error,
        BifidotyperError::SampleConfig { .. }
    ));
    Ok(())
}

#[test]
fn test_empty_input_is_a_run_error() {
    let result = discover_single_end(&[], &MateSuffixes::default());
    assert!(matches!(result, Err(BifidotyperError::InvalidInput(_))));
}

#[test]
fn test_suffix_validation() {
    assert!(MateSuffixes::new("_R1", "_R1").is_err());
    assert!(MateSuffixes::new("", "_R2").is_err());
}

#[test]
fn test_name_helpers() {
    assert_eq!(strip_read_extension("a.FASTQ.GZ"), Some("a"));
    assert_eq!(strip_read_extension("a.fq"), Some("a"));
    assert_eq!(strip_read_extension("a.bam"), None);
    assert_eq!(
        sample_name(Path::new("/x/R1run_R1.fq.gz"), &MateSuffixes::default()),
        "R1run"
    );
}
