use anyhow::Result;
use bifidotyper::{cli, commands::classify};
use log::error;

fn main() -> Result<()> {
    let args = cli::parse_cli();

    match classify::run_classify(args) {
        Ok(true) => Ok(()),
        Ok(false) => {
            error!("One or more samples failed; see run_summary.json");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
