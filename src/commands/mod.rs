pub mod build_db;
pub mod classify;
pub mod update_genomes;

use anyhow::{Context, Result};
use log::debug;
use std::{
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

/// Copies every log record to stderr and to a log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Sets up env_logger from the `-v` count; `RUST_LOG` overrides it.
/// With `log_file`, records also go to that file.
pub fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let log_level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level).parse_default_env();

    if let Some(path) = log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
    }

    if builder.try_init().is_err() {
        debug!("Logger already initialised");
    }
    Ok(())
}
