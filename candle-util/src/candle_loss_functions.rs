use candle_core::{Device, Result, Tensor};
use candle_nn::ops;
use special::Gamma as SpecialGamma;

/// log(2π)
pub const LOG_2_PI: f64 = 1.837_877_066_409_345_3;

/// Negative KL divergence between a diagonal Gaussian and `N(0, I)`
/// for every element
///
/// 0.5 * (1 + log(sigma^2) - mu^2 - sigma^2)
///
/// * `z_mean` - mean of Gaussian distribution (n x k)
/// * `z_lnvar` - log variance of Gaussian distribution, either
///   per sample (n x k) or shared across samples (k)
///
pub fn gaussian_kl(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let lnvar_term = ((z_lnvar - z_lnvar.exp()?)? + 1.)?;
    z_mean.sqr()?.neg()?.broadcast_add(&lnvar_term)? * 0.5
}

/// KL(q || p) averaged over samples and summed over latent dimensions
///
/// mean_i sum_k -gaussian_kl(i,k)
///
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    gaussian_kl(z_mean, z_lnvar)?.neg()?.mean(0)?.sum_all()
}

/// Elementwise Gaussian log-density with a scalar log variance
///
/// llik(i,j) = 0.5 * ( -(x(i,j) - eta(i,j))^2 / sigma^2 - log(2π) - log sigma^2 )
///
/// No normalization across columns; the caller reduces.
///
/// * `x_nd` - observed data
/// * `eta_nd` - reconstruction with the same shape as `x_nd`
/// * `log_sigma_sq` - scalar log variance
///
pub fn gaussian_likelihood(x_nd: &Tensor, eta_nd: &Tensor, log_sigma_sq: &Tensor) -> Result<Tensor> {
    let sigma_sq = log_sigma_sq.exp()?;
    let diff_sq = x_nd.sub(eta_nd)?.sqr()?;
    let scaled = diff_sq.broadcast_div(&sigma_sq)?.neg()?;
    (scaled.broadcast_sub(log_sigma_sq)? - LOG_2_PI)? * 0.5
}

/// Check that every entry is a non-negative whole number and return
/// the count matrix on the host
fn host_counts(x_nd: &Tensor) -> Result<Vec<Vec<f64>>> {
    let x = x_nd
        .to_device(&Device::Cpu)?
        .to_dtype(candle_core::DType::F64)?
        .to_vec2::<f64>()?;

    for (i, x_i) in x.iter().enumerate() {
        for (j, &x_ij) in x_i.iter().enumerate() {
            if !x_ij.is_finite() || x_ij < 0. || x_ij.fract() != 0. {
                candle_core::bail!(
                    "multinomial requires non-negative integer counts, found {} at ({}, {})",
                    x_ij,
                    i,
                    j
                );
            }
        }
    }
    Ok(x)
}

/// Multinomial log-probability of count data given unnormalized logits
///
/// llik(i) = lgamma(N(i) + 1) - sum_j lgamma(x(i,j) + 1)
///           + sum_j x(i,j) * log_softmax(logits)(i,j)
///
/// The factorial terms are constants of the data and are evaluated on
/// the host.
///
/// * `x_nd` - count data, non-negative integers (n x d)
/// * `logits_nd` - unnormalized logits (n x d)
///
/// Returns a vector of log-probabilities (n)
pub fn multinomial_likelihood(x_nd: &Tensor, logits_nd: &Tensor) -> Result<Tensor> {
    let counts = host_counts(x_nd)?;

    let log_norm: Vec<f32> = counts
        .iter()
        .map(|x_i| {
            let ntot: f64 = x_i.iter().sum();
            let denom: f64 = x_i.iter().map(|&x| SpecialGamma::ln_gamma(x + 1.).0).sum();
            (SpecialGamma::ln_gamma(ntot + 1.).0 - denom) as f32
        })
        .collect();

    let n = log_norm.len();
    let log_norm = Tensor::from_vec(log_norm, n, x_nd.device())?.to_dtype(x_nd.dtype())?;

    let log_prob_nd = ops::log_softmax(logits_nd, logits_nd.rank() - 1)?;
    let log_powers = x_nd.mul(&log_prob_nd)?.sum(x_nd.rank() - 1)?;

    log_powers + log_norm
}

/// Log-normal log-density evaluated only at the strictly positive
/// entries of `x_nd`, averaged over those entries
///
/// log p(x) = -(log x - mu)^2 / (2 scale^2) - log(scale) - 0.5 log(2π) - log x
///
/// * `x_nd` - observed data (n x d)
/// * `loc_nd` - location on the log scale (n x d)
/// * `scale` - scalar scale
///
pub fn lognormal_likelihood_nonzero(x_nd: &Tensor, loc_nd: &Tensor, scale: &Tensor) -> Result<Tensor> {
    let zeros = x_nd.zeros_like()?;
    let nz = x_nd.gt(0.0)?;

    // zero entries are replaced before any arithmetic so that neither
    // log(0) nor a non-finite location reaches the backward pass
    let log_x = nz.where_cond(&x_nd.log()?, &zeros)?;
    let loc_nd = nz.where_cond(loc_nd, &zeros)?;

    let two_var = (scale.sqr()? * 2.)?;
    let diff_sq = log_x.sub(&loc_nd)?.sqr()?;

    let log_prob = diff_sq
        .broadcast_div(&two_var)?
        .neg()?
        .broadcast_sub(&scale.log()?)?
        .sub(&log_x)?;
    let log_prob = (log_prob - 0.5 * LOG_2_PI)?;

    let log_prob = nz.where_cond(&log_prob, &zeros)?;
    let n_included = nz.to_dtype(x_nd.dtype())?.sum_all()?;

    log_prob.sum_all()?.div(&n_included)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    #[test]
    fn kl_vanishes_at_the_prior() -> Result<()> {
        let dev = Device::Cpu;
        let z_mean = Tensor::zeros((4, 3), candle_core::DType::F32, &dev)?;
        let z_lnvar = Tensor::zeros(3, candle_core::DType::F32, &dev)?;

        let kl = gaussian_kl(&z_mean, &z_lnvar)?;
        assert_eq!(kl.dims(), &[4, 3]);
        for row in kl.to_vec2::<f32>()? {
            for v in row {
                assert_abs_diff_eq!(v, 0.0, epsilon = 1e-7);
            }
        }

        let loss = gaussian_kl_loss(&z_mean, &z_lnvar)?.to_scalar::<f32>()?;
        assert_abs_diff_eq!(loss, 0.0, epsilon = 1e-7);
        Ok(())
    }

    #[test]
    fn kl_loss_is_positive_away_from_the_prior() -> Result<()> {
        let dev = Device::Cpu;
        let z_mean = Tensor::new(&[[1.0f32, -2.0]], &dev)?;
        let z_lnvar = Tensor::new(&[0.5f32, -0.5], &dev)?;
        let loss = gaussian_kl_loss(&z_mean, &z_lnvar)?.to_scalar::<f32>()?;

        let expected: f32 = [(1.0f32, 0.5f32), (-2.0, -0.5)]
            .iter()
            .map(|&(m, lv)| -0.5 * (1. + lv - m * m - lv.exp()))
            .sum();
        assert_abs_diff_eq!(loss, expected, epsilon = 1e-5);
        assert!(loss > 0.);
        Ok(())
    }

    #[test]
    fn gaussian_likelihood_matches_closed_form() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[1.0f32, 2.0]], &dev)?;
        let eta = Tensor::new(&[[0.0f32, 2.0]], &dev)?;
        let log_sigma_sq = Tensor::new(0.0f32, &dev)?;

        let llik = gaussian_likelihood(&x, &eta, &log_sigma_sq)?.to_vec2::<f32>()?;
        let c = -0.5 * LOG_2_PI as f32;
        assert_abs_diff_eq!(llik[0][0], c - 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(llik[0][1], c, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn multinomial_matches_hand_computation() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[2.0f32, 1.0, 0.0]], &dev)?;
        let logits = Tensor::zeros((1, 3), candle_core::DType::F32, &dev)?;

        // 3! / (2! 1! 0!) * (1/3)^3
        let expected = (3.0f64 * (1. / 27.)).ln() as f32;
        let llik = multinomial_likelihood(&x, &logits)?.to_vec1::<f32>()?;
        assert_abs_diff_eq!(llik[0], expected, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn multinomial_rejects_invalid_counts() -> Result<()> {
        let dev = Device::Cpu;
        let logits = Tensor::zeros((1, 2), candle_core::DType::F32, &dev)?;

        let fractional = Tensor::new(&[[1.5f32, 1.0]], &dev)?;
        assert!(multinomial_likelihood(&fractional, &logits).is_err());

        let negative = Tensor::new(&[[-1.0f32, 3.0]], &dev)?;
        assert!(multinomial_likelihood(&negative, &logits).is_err());
        Ok(())
    }

    #[test]
    fn lognormal_skips_zero_entries() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[1.0f32, 0.0]], &dev)?;
        let loc = Tensor::new(&[[0.0f32, 5.0]], &dev)?;
        let scale = Tensor::new(1.0f32, &dev)?;

        // only x = 1 with loc 0 enters: -0.5 log(2π)
        let llik = lognormal_likelihood_nonzero(&x, &loc, &scale)?.to_scalar::<f32>()?;
        assert_abs_diff_eq!(llik, -0.5 * LOG_2_PI as f32, epsilon = 1e-6);
        Ok(())
    }
}
