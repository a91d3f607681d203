use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_util::candle_data_loader::*;
use candle_util::candle_inference::TrainConfig;
use clap::{Args, ValueEnum};
use ilr_vae::linear_vae::train_linear_vae;
use ilr_vae::{BatchAdjustment, Likelihood, LinearVae, LinearVaeConfig};
use log::info;
use matrix_util::balance::build_balance_basis;
use matrix_util::common_io::{mkdir, write_types};
use matrix_util::sparse_util::{read_csc_mtx, write_csc_mtx};
use matrix_util::traits::IoOps;
use matrix_util::utils::generate_minibatch_intervals;

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

#[derive(Args, Debug)]
pub struct FitArgs {
    #[arg(
        long,
        short,
        required = true,
        help = "Count matrix file (sample x feature)",
        long_help = "Tab-separated count matrix, either plain or gzipped.\n\
		     Each row is a sample and each column is a feature."
    )]
    counts: Box<str>,

    #[arg(
        long,
        short,
        help = "Batch effect matrix file (sample x feature)",
        long_help = "Tab-separated batch effect matrix on the log scale.\n\
		     Rows are matched with the count matrix.\n\
		     If given, the offset is removed before encoding\n\
		     and restored after decoding."
    )]
    batch: Option<Box<str>>,

    #[arg(
        long,
        help = "Balance basis file (.mtx or .mtx.gz)",
        long_help = "Balance basis in the MatrixMarket format ((D - 1) x D).\n\
		     If missing, a random basis is built over the features."
    )]
    basis: Option<Box<str>>,

    #[arg(
        long,
        short = 'k',
        default_value_t = 10,
        help = "Latent dimension"
    )]
    hidden: usize,

    #[arg(
        long,
        value_enum,
        default_value = "gaussian",
        help = "Reconstruction likelihood"
    )]
    likelihood: Likelihood,

    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        help = "Closed-form ELBO (Gaussian only)",
        long_help = "Use the closed-form ELBO of the linear Gaussian model.\n\
		     Needs a single encoder layer. Ignored when batch\n\
		     effects are given. Set `false` to train by sampling."
    )]
    analytic: bool,

    #[arg(long, default_value_t = 1, help = "Number of encoder layers")]
    depth: usize,

    #[arg(long, default_value_t = false, help = "Add intercepts to encoder and decoder")]
    bias: bool,

    #[arg(
        long,
        default_value_t = 1e-3,
        help = "Standard deviation of the initial weights"
    )]
    init_scale: f64,

    #[arg(long, short = 'i', default_value_t = 100, help = "Number of epochs")]
    epochs: usize,

    #[arg(long, default_value_t = 100, help = "Minibatch size")]
    batch_size: usize,

    #[arg(long, default_value_t = 1e-3, help = "Learning rate")]
    lr: f32,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Candle device"
    )]
    device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "Device number")]
    device_no: usize,

    #[arg(
        long,
        default_value_t = false,
        help = "Write reconstructed proportions",
        long_help = "Write proportions reconstructed from the posterior mean\n\
		     to {out}.proportions.tsv"
    )]
    proportions: bool,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\
		     - {out}.latent.tsv\n\
		     - {out}.loss.tsv\n\
		     - {out}.basis.mtx.gz\n"
    )]
    out: Box<str>,

    #[arg(long, short, help = "Verbosity")]
    verbose: bool,
}

pub fn fit_ilr_vae(args: &FitArgs) -> anyhow::Result<()> {
    if args.batch_size == 0 {
        anyhow::bail!("minibatch size should be positive");
    }

    let dev = match args.device {
        ComputeDevice::Metal => Device::new_metal(args.device_no)?,
        ComputeDevice::Cuda => Device::new_cuda(args.device_no)?,
        _ => Device::Cpu,
    };

    mkdir(&args.out)?;

    let x_nd = Tensor::from_tsv(&args.counts, None)?;
    let (ntot, num_features) = x_nd.dims2()?;
    info!("{} samples x {} features", ntot, num_features);

    let batch_nd = match &args.batch {
        Some(file) => Some(Tensor::from_tsv(file, None)?),
        None => None,
    };

    let basis = match &args.basis {
        Some(file) => read_csc_mtx(file)?,
        None => build_balance_basis(num_features)?,
    };

    if basis.ncols() != num_features {
        anyhow::bail!(
            "basis has {} columns, but the counts have {} features",
            basis.ncols(),
            num_features
        );
    }

    let batch_adjustment = match batch_nd {
        Some(_) => BatchAdjustment::Additive,
        None => BatchAdjustment::None,
    };

    let config = LinearVaeConfig {
        hidden_dim: args.hidden,
        init_scale: args.init_scale,
        use_analytic_elbo: args.analytic,
        encoder_depth: args.depth,
        likelihood: args.likelihood,
        bias: args.bias,
        batch_adjustment,
    };

    let parameters = VarMap::new();
    let param_builder = VarBuilder::from_varmap(&parameters, DType::F32, &dev);
    let model = LinearVae::new(&basis, config, param_builder)?;

    let mut data = match &batch_nd {
        Some(b) => InMemoryData::new_with_batch(&x_nd, b)?,
        None => InMemoryData::new(&x_nd)?,
    };

    let train_config = TrainConfig {
        learning_rate: args.lr,
        batch_size: args.batch_size,
        num_epochs: args.epochs,
        device: dev.clone(),
        verbose: args.verbose,
        show_progress: true,
    };

    let loss_trace = train_linear_vae(&model, &parameters, &mut data, &train_config)?;

    info!("estimating latent states");

    let mut z_chunks = vec![];
    let mut prop_chunks = vec![];

    for (lb, ub) in generate_minibatch_intervals(ntot, args.batch_size) {
        let mb = data.minibatch_ordered(lb, ub, &dev)?;
        let z_nk = match &mb.batch {
            Some(b) => model.encode_with_batch(&mb.input, b)?,
            None => model.encode(&mb.input)?,
        };
        z_chunks.push(z_nk.to_device(&Device::Cpu)?);

        if args.proportions {
            let p_nd = model.reconstruct(&mb.input, mb.batch.as_ref())?;
            prop_chunks.push(p_nd.to_device(&Device::Cpu)?);
        }
    }

    let latent_file = format!("{}.latent.tsv", args.out);
    Tensor::cat(&z_chunks, 0)?.to_tsv(&latent_file)?;
    info!("latent states: {}", latent_file);

    if args.proportions {
        let prop_file = format!("{}.proportions.tsv", args.out);
        Tensor::cat(&prop_chunks, 0)?.to_tsv(&prop_file)?;
        info!("reconstructed proportions: {}", prop_file);
    }

    let loss_file = format!("{}.loss.tsv", args.out);
    write_types(&loss_trace, &loss_file)?;

    let basis_file = format!("{}.basis.mtx.gz", args.out);
    write_csc_mtx(&basis, &basis_file)?;
    info!("basis: {}", basis_file);

    Ok(())
}
