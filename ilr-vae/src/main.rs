mod fit_ilr_vae;
mod make_basis;

use clap::{Parser, Subcommand};
use fit_ilr_vae::*;
use log::info;
use make_basis::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "ILR-VAE",
    long_about = "Linear variational autoencoder for compositional count data.\n\
		  Counts are mapped to isometric log-ratio (balance) coordinates\n\
		  through a sparse orthonormal basis built on a binary tree of features."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Build a random balance basis",
        long_about = "Build a random balance basis over a given number of features.\n\
		      Features are merged by random agglomerative linkage and\n\
		      every internal node contributes one balance (row)."
    )]
    Basis(BasisArgs),

    #[command(
        about = "Fit a linear VAE on balance coordinates",
        long_about = "Fit a linear VAE in the three stages: \n\
		      (1) Impute and map counts to balance coordinates\n\
		      (2) Estimate encoder-decoder parameters via AdamW\n\
		      (3) Estimate latent states on the original data.\n"
    )]
    Fit(FitArgs),
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.commands {
        Commands::Basis(args) => {
            make_basis(args)?;
        }
        Commands::Fit(args) => {
            fit_ilr_vae(args)?;
        }
    }

    info!("Done");
    Ok(())
}
