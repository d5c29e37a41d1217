mod common;

use bifidotyper::annotation::AnnotationTable;
use bifidotyper::report::{SampleTables, build_report, read_report, write_report};
use bifidotyper::sylph::{normalize_abundances, read_profile_table, write_abundance_table};
use common::{PROFILE_HEADER, QUERY_HEADER, write_references};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn sample_tables(dir: &Path, sample: &str, query_rows: &[&str], profile_rows: &[&str]) -> SampleTables {
    let query = dir.join(format!("{}.query.tsv", sample));
    let profile = dir.join(format!("{}.profile.tsv", sample));
    let abundance = dir.join(format!("{}.abundance.tsv", sample));

    let mut q = String::from(QUERY_HEADER);
    for genome in query_rows {
        q.push_str(&format!(
            "\n{s}.sylsp\t/db/{g}\t97.0\t1.0\t96-98\t0.1\tNA-NA\t1\t1.0\t100/300\t96.0\t0\tc",
            s = sample,
            g = genome
        ));
    }
    fs::write(&query, q + "\n").unwrap();

    let mut p = String::from(PROFILE_HEADER);
    for genome in profile_rows {
        p.push_str(&format!(
            "\n{s}.sylsp\t/db/{g}\t40.0\t30.0\t97.0\t1.0\t96-98\t0.1\tNA-NA\t1\t1.0\t100/300\t96.0\t0\tc",
            s = sample,
            g = genome
        ));
    }
    fs::write(&profile, p + "\n").unwrap();

    let records = read_profile_table(&profile).unwrap();
    write_abundance_table(&abundance, &normalize_abundances(sample, &records)).unwrap();

    SampleTables {
        sample: sample.to_string(),
        query,
        profile,
        abundance,
    }
}

#[test]
fn test_every_sample_has_one_row_per_genome() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    write_references(temp_dir.path());
    let annotation = AnnotationTable::load(&temp_dir.path().join("genomes.csv"))?;

    let tables = vec![
        sample_tables(temp_dir.path(), "S1", &["GCF_A.fna", "GCF_X.fna"], &["GCF_A.fna"]),
        sample_tables(temp_dir.path(), "S2", &[], &[]),
    ];
    let rows = build_report(&annotation, &tables)?;

    let mut per_sample: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for row in &rows {
        per_sample.entry(&row.sample).or_default().push(&row.genome_file);
    }
    assert_eq!(
        per_sample["S1"],
        vec!["GCF_A.fna", "GCF_B.fna", "GCF_C.fna", "GCF_X.fna"]
    );
    assert_eq!(per_sample["S2"], vec!["GCF_A.fna", "GCF_B.fna", "GCF_C.fna"]);

    let a = rows.iter().find(|r| r.sample == "S1" && r.genome_file == "GCF_A.fna").unwrap();
    assert!(a.annotated);
    assert_eq!(a.label.as_deref(), Some("B. longum subsp. infantis ATCC 15697"));
    assert_eq!(a.containment_ind.as_deref(), Some("100/300"));
    assert!((a.taxonomic_abundance - 40.0).abs() < 1e-9);

    let x = rows.iter().find(|r| r.genome_file == "GCF_X.fna").unwrap();
    assert!(!x.annotated);
    assert_eq!(x.label, None);
    assert_eq!(x.taxonomic_abundance, 0.0);

    let path = temp_dir.path().join("report.tsv");
    write_report(&path, &rows)?;
    assert_eq!(read_report(&path)?, rows);
    Ok(())
}
