mod common;

use assert_cmd::prelude::*;
use common::{write_fastq, write_references};
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

#[test]
fn test_reads_are_required() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("bifidotyper")?;
    cmd.assert().failure();
    Ok(())
}

#[test]
fn test_suffixes_rejected_for_single_end() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let reads = temp_dir.path().join("s1.fastq");
    write_fastq(&reads);

    let reference = temp_dir.path().join("reference");
    write_references(&reference);
    let out = temp_dir.path().join("out");

    let mut cmd = Command::cargo_bin("bifidotyper")?;
    cmd.arg("-se")
        .arg(&reads)
        .arg("--r1-suffix")
        .arg("_1")
        .arg("--r2-suffix")
        .arg("_2")
        .arg("-o")
        .arg(&out)
        .arg("--reference-dir")
        .arg(&reference);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("suffix"))
        .stderr(predicate::str::contains("not found").not());
    assert!(!out.join("sylph_fastq_sketches").exists());
    Ok(())
}

#[test]
fn test_missing_reference_dir_fails() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let reads = temp_dir.path().join("s1.fastq");
    write_fastq(&reads);

    let mut cmd = Command::cargo_bin("bifidotyper")?;
    cmd.arg("-se")
        .arg(&reads)
        .arg("-o")
        .arg(temp_dir.path().join("out"))
        .arg("--reference-dir")
        .arg(temp_dir.path().join("no_reference"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
    Ok(())
}

#[cfg(unix)]
mod end_to_end {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    const FAKE_SYLPH: &str = r#"#!/bin/sh
cmd="$1"
shift
out=""
dir=""
first=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -d) dir="$2"; shift ;;
    -1|-r) first="$2"; shift ;;
  esac
  shift
done
case "$cmd" in
  sketch)
    mkdir -p "$dir"
    echo sketch > "$dir/$(basename "$first").paired.sylsp"
    ;;
  query)
    printf 'Sample_file\tGenome_file\tAdjusted_ANI\tEff_cov\tANI_5-95_percentile\tEff_lambda\tLambda_5-95_percentile\tMedian_cov\tMean_cov_geq1\tContainment_ind\tNaive_ANI\tkmers_reassigned\tContig_name\n' > "$out"
    printf 's.sylsp\t/db/GCF_A.fna\t98.5\t3.2\t98.1-98.9\t0.1\tNA-NA\t3\t3.5\t250/300\t97.0\t0\tcontigA\n' >> "$out"
    ;;
  profile)
    printf 'Sample_file\tGenome_file\tTaxonomic_abundance\tSequence_abundance\tAdjusted_ANI\tEff_cov\tANI_5-95_percentile\tEff_lambda\tLambda_5-95_percentile\tMedian_cov\tMean_cov_geq1\tContainment_ind\tNaive_ANI\tkmers_reassigned\tContig_name\n' > "$out"
    printf 's.sylsp\t/db/GCF_A.fna\t80.0\t70.0\t98.5\t3.2\t98.1-98.9\t0.1\tNA-NA\t3\t3.5\t250/300\t97.0\t0\tcontigA\n' >> "$out"
    ;;
esac
"#;

    const FAKE_SALMON: &str = r#"#!/bin/sh
cmd="$1"
shift
out=""
index=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -i) index="$2"; shift ;;
  esac
  shift
done
case "$cmd" in
  index)
    mkdir -p "$index"
    echo '{}' > "$index/versionInfo.json"
    ;;
  quant)
    mkdir -p "$out"
    printf 'Name\tLength\tEffectiveLength\tTPM\tNumReads\nBlon_0001\t900\t700.0\t1200.5\t10.0\nBlon_0002\t600\t400.0\t0.0\t0.0\nBlon_0003\t1500\t1300.0\t300.0\t5.0\n' > "$out/quant.sf"
    ;;
esac
"#;

    fn install(dir: &Path, name: &str, script: &str) {
        let path = dir.join(name);
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_paired_run_with_incomplete_sample() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let bin = temp_dir.path().join("bin");
        fs::create_dir_all(&bin)?;
        install(&bin, "sylph", FAKE_SYLPH);
        install(&bin, "salmon", FAKE_SALMON);

        let reference = temp_dir.path().join("reference");
        write_references(&reference);

        let reads = temp_dir.path().join("reads");
        for name in [
            "A_R1.fastq",
            "A_R2.fastq",
            "B_R1.fastq.gz",
            "B_R2.fastq.gz",
            "sampleC_R1.fastq",
        ] {
            write_fastq(&reads.join(name));
        }
        let out = temp_dir.path().join("out");

        let path = std::env::var_os("PATH").unwrap_or_default();
        let mut paths = vec![bin.clone()];
        paths.extend(std::env::split_paths(&path));

        let mut cmd = Command::cargo_bin("bifidotyper")?;
        cmd.env("PATH", std::env::join_paths(paths)?)
            .arg("-pe")
            .arg(reads.join("A_R1.fastq"))
            .arg(reads.join("A_R2.fastq"))
            .arg(reads.join("B_R1.fastq.gz"))
            .arg(reads.join("B_R2.fastq.gz"))
            .arg(reads.join("sampleC_R1.fastq"))
            .arg("-o")
            .arg(&out)
            .arg("--reference-dir")
            .arg(&reference)
            .arg("-j")
            .arg("2");
        cmd.assert()
            .failure()
            .stderr(predicate::str::contains("One or more samples failed"));

        for sample in ["A", "B"] {
            assert!(out.join("sylph_fastq_sketches").join(format!("{}.sylsp", sample)).is_file());
            for table in ["query", "profile", "abundance"] {
                assert!(
                    out.join("sylph_genome_queries")
                        .join(format!("{}.{}.tsv", sample, table))
                        .is_file()
                );
            }
            let genes = fs::read_to_string(
                out.join("hmo_quantification")
                    .join(format!("{}.hmo_genes.tsv", sample)),
            )?;
            assert_eq!(genes.lines().count(), 4);
        }
        assert!(!out.join("sylph_fastq_sketches").join("sampleC.sylsp").exists());

        let report = fs::read_to_string(out.join("bifidotyper_report.tsv"))?;
        assert_eq!(report.lines().count(), 1 + 2 * 3);

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("run_summary.json"))?)?;
        let samples = summary["samples"].as_array().unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[2]["sample"], "sampleC");
        assert_eq!(samples[2]["status"], "failed");
        assert_eq!(samples[2]["failed_stage"], "input");

        assert!(out.join("bifidotyper.log").is_file());
        Ok(())
    }
}
