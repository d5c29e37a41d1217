use anyhow::Result;
use bifidotyper::{cli::UpdateGenomesArgs, commands::update_genomes};
use clap::Parser;
use log::error;

fn main() -> Result<()> {
    let args = UpdateGenomesArgs::parse();

    if let Err(e) = update_genomes::run_update_genomes(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
