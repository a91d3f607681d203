use candle_core::{Result, Tensor};
use candle_nn::ops;
use candle_util::candle_loss_functions::*;

/// Observation model of a composition given reconstructed balance
/// coordinates
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum Likelihood {
    #[default]
    Gaussian,
    Multinomial,
    #[value(name = "lognormal")]
    LogNormal,
}

impl std::fmt::Display for Likelihood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Likelihood::Gaussian => "gaussian",
            Likelihood::Multinomial => "multinomial",
            Likelihood::LogNormal => "lognormal",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for Likelihood {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gaussian" => Ok(Likelihood::Gaussian),
            "multinomial" => Ok(Likelihood::Multinomial),
            "lognormal" => Ok(Likelihood::LogNormal),
            _ => Err(anyhow::anyhow!("{} has not been properly specified", s)),
        }
    }
}

impl Likelihood {
    /// Log-likelihood of `x_nd` given the reconstruction `eta_nb`
    ///
    /// * Gaussian: elementwise density of `x` around `eta` (n x D).
    ///   The raw composition is compared against balance coordinates
    ///   as is, so the shapes only agree when `x` already lives in
    ///   balance space.
    /// * Multinomial: mean log-probability of the counts under
    ///   `softmax(eta * psi)` (scalar)
    /// * LogNormal: mean log-density over the positive entries with
    ///   location `log_softmax(eta * psi) + log(total)` and scale
    ///   `exp(log_sigma_sq)` (scalar)
    ///
    /// # Arguments
    /// * `x_nd` - observed composition (n x D)
    /// * `eta_nb` - reconstruction in balance coordinates (n x (D - 1))
    /// * `psi_bd` - balance basis ((D - 1) x D)
    /// * `log_sigma_sq` - scalar log variance
    pub fn log_likelihood(
        &self,
        x_nd: &Tensor,
        eta_nb: &Tensor,
        psi_bd: &Tensor,
        log_sigma_sq: &Tensor,
    ) -> Result<Tensor> {
        match self {
            Likelihood::Gaussian => gaussian_likelihood(x_nd, eta_nb, log_sigma_sq),
            Likelihood::Multinomial => {
                let logits_nd = eta_nb.matmul(psi_bd)?;
                multinomial_likelihood(x_nd, &logits_nd)?.mean(0)
            }
            Likelihood::LogNormal => {
                let logits_nd = eta_nb.matmul(psi_bd)?;
                let log_total_n1 = x_nd.sum_keepdim(1)?.log()?;
                let loc_nd = ops::log_softmax(&logits_nd, 1)?.broadcast_add(&log_total_n1)?;
                let scale = log_sigma_sq.exp()?;
                lognormal_likelihood_nonzero(x_nd, &loc_nd, &scale)
            }
        }
    }
}

/// Average over samples and sum over columns; a scalar is kept as is
pub fn batch_mean_sum(llik: &Tensor) -> Result<Tensor> {
    match llik.rank() {
        0 => Ok(llik.clone()),
        _ => llik.mean(0)?.sum_all(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};

    #[test]
    fn parse_likelihood_names() -> anyhow::Result<()> {
        assert_eq!("gaussian".parse::<Likelihood>()?, Likelihood::Gaussian);
        assert_eq!("Multinomial".parse::<Likelihood>()?, Likelihood::Multinomial);
        assert_eq!("lognormal".parse::<Likelihood>()?, Likelihood::LogNormal);
        assert_eq!(Likelihood::default(), Likelihood::Gaussian);

        let err = "poisson".parse::<Likelihood>().unwrap_err();
        assert!(err.to_string().contains("poisson"));
        Ok(())
    }

    #[test]
    fn display_parses_back() -> anyhow::Result<()> {
        for lik in [
            Likelihood::Gaussian,
            Likelihood::Multinomial,
            Likelihood::LogNormal,
        ] {
            assert_eq!(lik.to_string().parse::<Likelihood>()?, lik);
        }
        Ok(())
    }

    #[test]
    fn multinomial_with_flat_logits() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let psi = Tensor::new(&[[0.5f32.sqrt(), -(0.5f32.sqrt())]], &dev)?;
        let x = Tensor::new(&[[2f32, 0.], [1., 1.]], &dev)?;
        let eta = Tensor::zeros((2, 1), DType::F32, &dev)?;
        let lss = Tensor::new(0f32, &dev)?;

        let llik = Likelihood::Multinomial
            .log_likelihood(&x, &eta, &psi, &lss)?
            .to_scalar::<f32>()?;

        // (log(1/4) + log(2/4)) / 2
        let expected = ((0.25f64).ln() + (0.5f64).ln()) / 2.;
        assert_abs_diff_eq!(llik, expected as f32, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn lognormal_location_tracks_total_count() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let psi = Tensor::new(&[[0.5f32.sqrt(), -(0.5f32.sqrt())]], &dev)?;
        let x = Tensor::new(&[[5f32, 5.]], &dev)?;
        let eta = Tensor::zeros((1, 1), DType::F32, &dev)?;
        let lss = Tensor::new(0f32, &dev)?;

        // loc = log(1/2) + log(10) = log(5), so every entry sits at the mode
        let llik = Likelihood::LogNormal
            .log_likelihood(&x, &eta, &psi, &lss)?
            .to_scalar::<f32>()?;
        let expected = -0.5 * LOG_2_PI as f32 - 5f32.ln();
        assert_abs_diff_eq!(llik, expected, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn reduction_by_rank() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let scalar = Tensor::new(3f32, &dev)?;
        assert_eq!(batch_mean_sum(&scalar)?.to_scalar::<f32>()?, 3.);

        let mat = Tensor::new(&[[1f32, 2.], [3., 4.]], &dev)?;
        assert_eq!(batch_mean_sum(&mat)?.to_scalar::<f32>()?, 5.);
        Ok(())
    }
}
