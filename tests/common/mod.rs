#![allow(dead_code)]

use bifidotyper::{
    errors::BifidotyperError,
    tools::{ToolInvocation, ToolRunner},
};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

pub const QUERY_HEADER: &str = "Sample_file\tGenome_file\tAdjusted_ANI\tEff_cov\tANI_5-95_percentile\tEff_lambda\tLambda_5-95_percentile\tMedian_cov\tMean_cov_geq1\tContainment_ind\tNaive_ANI\tkmers_reassigned\tContig_name";
pub const PROFILE_HEADER: &str = "Sample_file\tGenome_file\tTaxonomic_abundance\tSequence_abundance\tAdjusted_ANI\tEff_cov\tANI_5-95_percentile\tEff_lambda\tLambda_5-95_percentile\tMedian_cov\tMean_cov_geq1\tContainment_ind\tNaive_ANI\tkmers_reassigned\tContig_name";

/// Stands in for sylph, salmon, dRep and NCBI datasets by writing the files
/// each tool would produce.
#[derive(Default)]
pub struct FakeRunner {
    pub calls: Mutex<Vec<String>>,
    /// Any invocation with an argument containing this text fails.
    pub fail_on: Option<String>,
}

impl FakeRunner {
    pub fn new() -> Self {
        FakeRunner::default()
    }

    pub fn failing_on(marker: &str) -> Self {
        FakeRunner {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(marker.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls starting with `prefix`, e.g. "sylph sketch".
    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }
}

fn value(inv: &ToolInvocation, flag: &str) -> PathBuf {
    PathBuf::from(inv.value_of(flag).unwrap())
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

impl ToolRunner for FakeRunner {
    fn run(&self, inv: &ToolInvocation) -> Result<(), BifidotyperError> {
        self.calls.lock().unwrap().push(inv.command_line());

        if let Some(marker) = &self.fail_on {
            if inv
                .arguments()
                .iter()
                .any(|a| a.to_string_lossy().contains(marker.as_str()))
            {
                return Err(BifidotyperError::ToolFailed {
                    tool: inv.program().to_string(),
                    code: Some(1),
                    stderr: "simulated failure".to_string(),
                });
            }
        }

        let args = inv.arguments();
        let sub = args
            .first()
            .map(|a| a.to_string_lossy().into_owned())
            .unwrap_or_default();
        match (inv.program(), sub.as_str()) {
            ("sylph", "sketch") if inv.value_of("--gl").is_some() => {
                let prefix = value(inv, "-o");
                write_file(&prefix.with_extension("syldb"), "fake syldb");
            }
            ("sylph", "sketch") => {
                let dir = value(inv, "-d");
                let first = inv
                    .value_of("-1")
                    .or_else(|| inv.value_of("-r"))
                    .map(PathBuf::from)
                    .unwrap();
                let name = first.file_name().unwrap().to_string_lossy().into_owned();
                write_file(&dir.join(format!("{}.paired.sylsp", name)), "fake sketch");
            }
            ("sylph", "query") => {
                let out = value(inv, "-o");
                let sketch = args[1].to_string_lossy().into_owned();
                write_file(
                    &out,
                    &format!(
                        "{}\n{s}\t/db/GCF_A.fna\t98.5\t3.2\t98.1-98.9\t0.1\tNA-NA\t3\t3.5\t250/300\t97.0\t0\tcontigA\n{s}\t/db/GCF_B.fna\t96.0\t1.1\t95.1-96.9\t0.1\tNA-NA\t1\t1.5\t90/320\t95.0\t0\tcontigB\n{s}\t/db/GCF_X.fna\t95.1\t0.5\t94.1-95.9\t0.1\tNA-NA\t1\t1.0\t20/280\t94.0\t0\tcontigX\n",
                        QUERY_HEADER,
                        s = sketch
                    ),
                );
            }
            ("sylph", "profile") => {
                let out = value(inv, "-o");
                let sketch = args[1].to_string_lossy().into_owned();
                write_file(
                    &out,
                    &format!(
                        "{}\n{s}\t/db/GCF_A.fna\t60.0\t55.0\t98.5\t3.2\t98.1-98.9\t0.1\tNA-NA\t3\t3.5\t250/300\t97.0\t0\tcontigA\n{s}\t/db/GCF_B.fna\t30.0\t25.0\t96.0\t1.1\t95.1-96.9\t0.1\tNA-NA\t1\t1.5\t90/320\t95.0\t0\tcontigB\n",
                        PROFILE_HEADER,
                        s = sketch
                    ),
                );
            }
            ("salmon", "index") => {
                let dir = value(inv, "-i");
                write_file(&dir.join("versionInfo.json"), "{}");
            }
            ("salmon", "quant") => {
                let dir = value(inv, "-o");
                write_file(
                    &dir.join("quant.sf"),
                    "Name\tLength\tEffectiveLength\tTPM\tNumReads\nBlon_0001\t900\t700.0\t1200.5\t10.0\nBlon_0002\t600\t400.0\t0.0\t0.0\nBlon_0003\t1500\t1300.0\t300.0\t5.0\nBlon_9999\t300\t120.0\t50.0\t3.0\n",
                );
            }
            ("dRep", "dereplicate") => {
                let drep_dir = PathBuf::from(&args[1]);
                let list = fs::read_to_string(value(inv, "-g")).unwrap();
                let out = drep_dir.join("dereplicated_genomes");
                fs::create_dir_all(&out).unwrap();
                // Genomes named *dup* are treated as redundant.
                for line in list.lines().filter(|l| !l.is_empty()) {
                    let path = Path::new(line);
                    let name = path.file_name().unwrap();
                    if !name.to_string_lossy().contains("dup") {
                        fs::copy(path, out.join(name)).unwrap();
                    }
                }
            }
            ("datasets", "download") => {
                let package = value(inv, "--filename");
                write_ncbi_package(
                    &package,
                    &[("GCF_000000001.1", ">chr1 NCBI one\nACGTACGT\n")],
                );
            }
            (program, sub) => panic!("unexpected invocation: {} {}", program, sub),
        }
        Ok(())
    }
}

pub fn write_ncbi_package(path: &Path, genomes: &[(&str, &str)]) {
    let file = File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    zip.start_file("ncbi_dataset/data/assembly_data_report.jsonl", options)
        .unwrap();
    zip.write_all(b"{}\n").unwrap();
    for (accession, fasta) in genomes {
        zip.start_file(
            format!("ncbi_dataset/data/{0}/{0}_ASM_genomic.fna", accession),
            options,
        )
        .unwrap();
        zip.write_all(fasta.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// Reference directory with a two-cluster HMO annotation and three annotated genomes.
pub fn write_references(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    write_file(
        &dir.join("humann2_HMO_annotation.csv"),
        "Blon;Cluster;Description\nBlon_0001 Blon_0002;H1;lacto-N-biose\nBlon_0003;H2;fucosidase\nhypothetical;H3;unknown\n",
    );
    write_file(
        &dir.join("CP001095.1_gene_sequences.fasta"),
        ">Blon_0001\nACGT\n>Blon_0002\nACGT\n>Blon_0003\nACGT\n",
    );
    write_file(
        &dir.join("genomes.csv"),
        "Genome_file,Label,Genome_size,Color\nGCF_A.fna,B. longum subsp. infantis ATCC 15697,2832748,#1f77b4\nGCF_B.fna,B. breve UCC2003,2422684,#ff7f0e\nGCF_C.fna,B. bifidum PRL2010,2214656,#2ca02c\n",
    );
    write_file(&dir.join("bifidobacteria_sketches.syldb"), "fake syldb");
}

pub fn write_fastq(path: &Path) {
    write_file(path, "@read1\nACGTACGTAC\n+\nIIIIIIIIII\n");
}
