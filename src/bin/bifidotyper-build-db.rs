use anyhow::Result;
use bifidotyper::{cli::BuildDbArgs, commands::build_db};
use clap::Parser;
use log::error;

fn main() -> Result<()> {
    let args = BuildDbArgs::parse();

    if let Err(e) = build_db::run_build_db(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
