use anyhow::Result;
use clap::Parser;
use svgd_util::cli::{classify, mixture, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Mixture(args) => {
            mixture::run(args)?;
        }
        Commands::Classify(args) => {
            classify::run(args)?;
        }
    }

    Ok(())
}
