use clap::Args;
use log::info;
use matrix_util::balance::build_balance_basis;
use matrix_util::sparse_util::write_csc_mtx;

#[derive(Args, Debug)]
pub struct BasisArgs {
    #[arg(
        long,
        short = 'f',
        required = true,
        help = "Number of features (D)",
        long_help = "Number of features (D) in the composition.\n\
		     The basis will have D - 1 rows and D columns."
    )]
    features: usize,

    #[arg(
        long,
        short,
        required = true,
        help = "Output file",
        long_help = "Output MatrixMarket file for the basis triplets,\n\
		     e.g., `basis.mtx.gz` (1-based `row col value`)."
    )]
    out: Box<str>,
}

pub fn make_basis(args: &BasisArgs) -> anyhow::Result<()> {
    let basis = build_balance_basis(args.features)?;
    write_csc_mtx(&basis, &args.out)?;
    info!(
        "wrote a {} x {} balance basis to {}",
        basis.nrows(),
        basis.ncols(),
        args.out
    );
    Ok(())
}
