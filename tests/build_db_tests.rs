mod common;

use assert_cmd::prelude::*;
use bifidotyper::annotation::AnnotationTable;
use bifidotyper::commands::build_db::{BuildConfig, build_database};
use common::FakeRunner;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn config(out: &Path) -> BuildConfig {
    BuildConfig {
        output_dir: out.to_path_buf(),
        prior_annotation: None,
        taxon: "Bifidobacteriaceae".to_string(),
        ani: 0.95,
        gtdb: None,
        ncbi: true,
        keep_work: false,
        threads: 1,
    }
}

#[test]
fn test_build_publishes_database_and_annotation() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let out = temp_dir.path().join("reference");
    let prior = temp_dir.path().join("prior.csv");
    fs::write(
        &prior,
        "Genome_file,Label,Genome_size,Color\nGCF_OLD.fna,Curated strain,1000,#abcdef\n",
    )?;

    let mut cfg = config(&out);
    cfg.prior_annotation = Some(prior);
    let runner = FakeRunner::new();
    let summary = build_database(&cfg, &runner)?;

    assert_eq!(summary.acquired, 1);
    assert_eq!(summary.representatives.file_names(), vec!["GCF_000000001.1.fna"]);
    assert!(out.join("bifidobacteria_sketches.syldb").is_file());
    assert_eq!(
        fs::read_to_string(out.join("representatives.txt"))?,
        "GCF_000000001.1.fna\n"
    );
    assert!(!out.join(".staging").exists());
    assert!(!out.join("work").exists());

    let table = AnnotationTable::load(&out.join("genomes.csv"))?;
    assert_eq!(table.len(), 2);
    assert_eq!(table.lookup("GCF_OLD.fna").unwrap().label, "Curated strain");
    let new = table.lookup("GCF_000000001.1.fna").unwrap();
    assert_eq!(new.label, "chr1 NCBI one");
    assert_eq!(new.genome_size, Some(8));

    let calls = runner.calls();
    assert!(calls[0].starts_with("datasets download genome taxon Bifidobacteriaceae"));
    assert!(calls.iter().any(|c| c.starts_with("dRep dereplicate")));
    assert!(calls.iter().any(|c| c.starts_with("sylph sketch --gl")));
    Ok(())
}

#[test]
fn test_failed_build_leaves_previous_outputs() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let out = temp_dir.path().join("reference");
    fs::create_dir_all(&out)?;
    fs::write(out.join("genomes.csv"), "previous")?;

    let mut cfg = config(&out);
    cfg.keep_work = true;
    let runner = FakeRunner::failing_on("representative_paths");
    assert!(build_database(&cfg, &runner).is_err());

    assert_eq!(fs::read_to_string(out.join("genomes.csv"))?, "previous");
    assert!(!out.join("bifidobacteria_sketches.syldb").exists());
    assert!(!out.join("representatives.txt").exists());
    Ok(())
}

#[test]
fn test_no_sources_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let mut cfg = config(temp_dir.path());
    cfg.ncbi = false;
    let runner = FakeRunner::new();
    assert!(build_database(&cfg, &runner).is_err());
    assert!(runner.calls().is_empty());
    Ok(())
}

#[test]
fn test_build_db_cli_rejects_both_skips() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let mut cmd = Command::cargo_bin("bifidotyper-build-db")?;
    cmd.arg(temp_dir.path()).arg("--skip-ncbi").arg("--skip-gtdb");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
    Ok(())
}
