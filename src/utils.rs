use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use log::{debug, info};
use std::{
    env,
    ffi::OsString,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::errors::BifidotyperError;

/// Determines the number of threads to use.
/// If `cli_threads` is 0, it uses all available logical cores.
/// Otherwise, it uses the number specified in `cli_threads`.
pub fn get_num_threads(cli_threads: usize) -> usize {
    let num_threads = if cli_threads == 0 {
        num_cpus::get()
    } else {
        cli_threads
    };
    debug!("Using {} threads for external tools.", num_threads);
    num_threads
}

/// Sizes the global rayon pool used for in-process parallel work.
pub fn initialize_rayon_pool(num_threads: usize) -> Result<()> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;
    Ok(())
}

/// Locates an executable by name, either as an absolute path or on `PATH`.
pub fn find_executable(name: &str) -> Result<PathBuf, BifidotyperError> {
    let path = Path::new(name);
    if path.is_absolute() && path.is_file() {
        return Ok(path.to_path_buf());
    }

    if let Some(paths) = env::var_os("PATH") {
        for dir in env::split_paths(&paths) {
            let full_path = dir.join(name);
            if full_path.is_file() {
                return Ok(full_path);
            }
        }
    }

    Err(BifidotyperError::ExecutableNotFound(name.to_string()))
}

/// Identity of a genome: the file name component of its path.
pub fn genome_id(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Temporary sibling used while an artefact is being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Moves a finished `.partial` artefact into its final place.
pub fn publish(partial: &Path, path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
            .with_context(|| format!("Failed to replace directory {:?}", path))?;
    }
    fs::rename(partial, path)
        .with_context(|| format!("Failed to move {:?} to {:?}", partial, path))?;
    debug!("Published {:?}", path);
    Ok(())
}

use indicatif::{ProgressBar, ProgressStyle};
use psutil::process::Process;
use std::time::Instant;

/// Wraps a function to provide progress tracking, execution time, and max RAM usage.
pub fn track_progress_and_resources<F, R>(
    task_description: &str,
    total_items: u64,
    func: F,
) -> Result<R>
where
    F: FnOnce(&ProgressBar) -> Result<R>,
{
    info!("Starting task: {}", task_description);
    let start_time = Instant::now();

    let pb = ProgressBar::new(total_items);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|e| {
                debug!("Error setting progress bar style: {}", e);
                ProgressStyle::default_bar()
            })
            .progress_chars("#>-"),
    );

    let result = func(&pb);

    pb.finish_and_clear();

    let duration = start_time.elapsed();
    info!("Task '{}' finished in {:.2?}", task_description, duration);

    match Process::current() {
        Ok(process) => match process.memory_info() {
            Ok(mem_info) => {
                debug!(
                    "RAM usage after task '{}': {} MB",
                    task_description,
                    mem_info.rss() / 1024 / 1024
                );
            }
            Err(e) => {
                debug!("Failed to get memory info: {}", e);
            }
        },
        Err(e) => {
            debug!("Failed to get current process: {}", e);
        }
    }

    result
}

// Helper function to get file extension as lowercase string
fn get_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_lowercase())
}

/// Opens a file for reading, decompressing `.gz` input.
pub fn get_input_reader(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open input file: {:?}", path))?;

    match get_extension(path).as_deref() {
        Some("gz") => {
            debug!("Reading GZipped file: {:?}", path);
            Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
        }
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

/// Creates a buffered output file.
pub fn get_output_writer(path: &Path) -> Result<Box<dyn Write + Send>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {:?}", path))?;
    Ok(Box::new(BufWriter::new(file)))
}

/// Opens a tab-separated writer on a `.partial` sibling of `path`.
/// Call [`publish`] with the same pair once the writer has been flushed.
pub fn tsv_writer(path: &Path) -> Result<(csv::Writer<Box<dyn Write + Send>>, PathBuf)> {
    let partial = partial_path(path);
    let writer = get_output_writer(&partial)?;
    Ok((
        csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer),
        partial,
    ))
}

/// Opens a tab-separated reader with headers.
pub fn tsv_reader(path: &Path) -> Result<csv::Reader<Box<dyn BufRead + Send>>> {
    let reader = get_input_reader(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(reader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, write::GzEncoder};
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn gzip_and_plain_inputs_read_the_same() {
        let temp_dir = TempDir::new().unwrap();
        let plain = temp_dir.path().join("taxonomy.tsv");
        fs::write(&plain, "a\tb\n").unwrap();

        let gz = temp_dir.path().join("taxonomy.tsv.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(b"a\tb\n").unwrap();
        encoder.finish().unwrap();

        for path in [&plain, &gz] {
            let mut text = String::new();
            get_input_reader(path).unwrap().read_to_string(&mut text).unwrap();
            assert_eq!(text, "a\tb\n");
        }
    }

    #[test]
    fn tsv_writer_publishes_through_partial() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("table.tsv");
        let (mut writer, partial) = tsv_writer(&path).unwrap();
        assert_eq!(partial, temp_dir.path().join("table.tsv.partial"));
        writer.write_record(["x", "y"]).unwrap();
        writer.flush().unwrap();
        drop(writer);
        assert!(!path.exists());
        publish(&partial, &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "x\ty\n");
        assert!(!partial.exists());
    }
}
