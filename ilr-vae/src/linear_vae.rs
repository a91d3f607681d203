use crate::ilr::*;
use crate::likelihood::{batch_mean_sum, Likelihood};
use crate::vae_config::{BatchAdjustment, LinearVaeConfig};

use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};
use candle_util::candle_data_loader::DataLoader;
use candle_util::candle_inference::TrainConfig;
use candle_util::candle_linear_decoder::LinearDecoder;
use candle_util::candle_linear_encoder::LinearEncoder;
use candle_util::candle_loss_functions::{gaussian_kl, gaussian_kl_loss, LOG_2_PI};
use candle_util::candle_model_traits::*;
use candle_util::candle_vae_inference::train_vae;
use log::{info, warn};
use matrix_util::balance::build_balance_basis;
use matrix_util::sparse_util::{csc_to_tensor, CscMatrix};

/// Trainable state of the model
///
/// Variables live in the `VarMap` behind the `VarBuilder` used at
/// construction:
/// * `encoder.fc.{j}.weight` (and `.bias`)
/// * `decoder.dictionary.weight` (and `.bias`)
/// * `variational_logvars` (k), shared by every sample
/// * `log_sigma_sq` (scalar) observation noise
pub struct LinearVaeParams {
    pub encoder: LinearEncoder,
    pub decoder: LinearDecoder,
    pub variational_logvars: Tensor,
    pub log_sigma_sq: Tensor,
}

/// Linear VAE on isometric log-ratio coordinates
///
/// A composition `x` (n x D) is imputed and mapped to balance
/// coordinates `h = log(x + 1) * psi'` (n x (D - 1)). The encoder gives
/// the mean of `q(z|h) = N(z_mean, diag(exp(logvar)))`, the decoder maps
/// a latent code back to balance coordinates.
pub struct LinearVae {
    psi_bd: Tensor,
    config: LinearVaeConfig,
    params: LinearVaeParams,
}

impl LinearVae {
    /// Build a model around a fixed sparse balance basis ((D - 1) x D)
    pub fn new(
        basis: &CscMatrix<f32>,
        config: LinearVaeConfig,
        vb: VarBuilder,
    ) -> anyhow::Result<Self> {
        let psi_bd = csc_to_tensor(basis, vb.device())?.to_dtype(vb.dtype())?;
        Ok(Self::from_dense_basis(psi_bd, config, vb)?)
    }

    /// Build a model with a random balance basis over `num_features`
    pub fn new_with_features(
        num_features: usize,
        config: LinearVaeConfig,
        vb: VarBuilder,
    ) -> anyhow::Result<Self> {
        let basis = build_balance_basis(num_features)?;
        Self::new(&basis, config, vb)
    }

    /// Build a model around a dense balance basis ((D - 1) x D)
    ///
    /// # Arguments
    /// * `psi_bd` - balance basis, not trainable
    /// * `config` - model configuration
    /// * `vb` - variable builder for the parameters
    pub fn from_dense_basis(
        psi_bd: Tensor,
        mut config: LinearVaeConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (input_dim, feature_dim) = psi_bd.dims2()?;
        if input_dim + 1 != feature_dim {
            candle_core::bail!(
                "balance basis should be (D - 1) x D, got {} x {}",
                input_dim,
                feature_dim
            );
        }

        if config.batch_adjustment == BatchAdjustment::Additive && config.use_analytic_elbo {
            warn!("analytic ELBO is not available with batch adjustment; sampling instead");
            config.use_analytic_elbo = false;
        }

        if config.use_analytic_elbo && config.encoder_depth != 1 {
            candle_core::bail!(
                "analytic ELBO needs a single affine encoder layer, got depth {}",
                config.encoder_depth
            );
        }

        if config.use_analytic_elbo && config.likelihood != Likelihood::Gaussian {
            warn!(
                "analytic ELBO assumes a Gaussian likelihood; {} will be ignored",
                config.likelihood
            );
        }

        if config.use_analytic_elbo && config.bias {
            warn!("analytic ELBO ignores the bias terms");
        }

        let hidden_dim = config.hidden_dim;

        let encoder = LinearEncoder::new(
            input_dim,
            hidden_dim,
            config.encoder_depth,
            config.init_scale,
            config.bias,
            vb.pp("encoder"),
        )?;

        // `init_scale` only shrinks the encoder
        let decoder = LinearDecoder::new(input_dim, hidden_dim, config.bias, vb.pp("decoder"))?;

        let variational_logvars =
            vb.get_with_hints(hidden_dim, "variational_logvars", Init::Const(0.))?;
        let log_sigma_sq = vb.get_with_hints((), "log_sigma_sq", Init::Const(0.))?;

        info!(
            "linear VAE: {} features, {} balances, {} latent, {} likelihood, analytic: {}",
            feature_dim, input_dim, hidden_dim, config.likelihood, config.use_analytic_elbo
        );

        Ok(Self {
            psi_bd,
            config,
            params: LinearVaeParams {
                encoder,
                decoder,
                variational_logvars,
                log_sigma_sq,
            },
        })
    }

    /// number of balance coordinates, `D - 1`
    pub fn input_dim(&self) -> usize {
        self.params.encoder.dim_obs()
    }

    /// number of features in the composition, `D`
    pub fn feature_dim(&self) -> usize {
        self.input_dim() + 1
    }

    pub fn hidden_dim(&self) -> usize {
        self.params.encoder.dim_latent()
    }

    pub fn use_analytic_elbo(&self) -> bool {
        self.config.use_analytic_elbo
    }

    pub fn config(&self) -> &LinearVaeConfig {
        &self.config
    }

    pub fn params(&self) -> &LinearVaeParams {
        &self.params
    }

    pub fn basis(&self) -> &Tensor {
        &self.psi_bd
    }

    /// `ilr(x + 1)`
    pub fn ilr_input(&self, x_nd: &Tensor) -> Result<Tensor> {
        ilr(&impute(x_nd)?, &self.psi_bd)
    }

    /// Posterior mean of the latent code, ignoring batch effects
    pub fn encode(&self, x_nd: &Tensor) -> Result<Tensor> {
        let h_nb = self.ilr_input(x_nd)?;
        self.params.encoder.latent_mean(&h_nb)
    }

    /// Posterior mean after removing the batch offset `B * psi'`
    pub fn encode_with_batch(&self, x_nd: &Tensor, batch_nd: &Tensor) -> Result<Tensor> {
        let h_nb = self.ilr_input(x_nd)?;
        let offset_nb = balance_offset(batch_nd, &self.psi_bd)?;
        self.params.encoder.latent_mean(&h_nb.sub(&offset_nb)?)
    }

    /// Reconstructed balance coordinates of a latent code
    pub fn decode(&self, z_nk: &Tensor) -> Result<Tensor> {
        self.params.decoder.forward(z_nk)
    }

    /// `z = z_mean + eps * exp(logvar / 2)`, fresh noise every call
    pub fn reparameterize(&self, z_mean_nk: &Tensor) -> Result<Tensor> {
        let eps = Tensor::randn_like(z_mean_nk, 0., 1.)?;
        let z_sd_k = (&self.params.variational_logvars * 0.5)?.exp()?;
        z_mean_nk + eps.broadcast_mul(&z_sd_k)?
    }

    /// Elementwise negative KL divergence to the prior (n x k)
    pub fn gaussian_kl(&self, z_mean_nk: &Tensor) -> Result<Tensor> {
        gaussian_kl(z_mean_nk, &self.params.variational_logvars)
    }

    /// KL divergence averaged over samples, summed over latent units
    pub fn kl_loss(&self, z_mean_nk: &Tensor) -> Result<Tensor> {
        gaussian_kl_loss(z_mean_nk, &self.params.variational_logvars)
    }

    /// Log-likelihood of the composition under the configured model
    pub fn recon_log_likelihood(&self, x_nd: &Tensor, eta_nb: &Tensor) -> Result<Tensor> {
        self.config.likelihood.log_likelihood(
            x_nd,
            eta_nb,
            &self.psi_bd,
            &self.params.log_sigma_sq,
        )
    }

    /// Expected Gaussian log-likelihood of `h` under `q(z|h)` in closed
    /// form, averaged over samples
    ///
    /// With `W` the decoder weight, `V` the encoder weight and `s` the
    /// posterior variances,
    ///
    /// ```text
    /// E||h - W z||^2 = tr(W diag(s) W') + h'V'W'WVh - 2 h'WVh + h'h
    /// ```
    ///
    /// * `h_nb` - balance coordinates (n x (D - 1))
    pub fn analytic_exp_recon_loss(&self, h_nb: &Tensor) -> Result<Tensor> {
        let v_kb = match self.params.encoder.linear_weight() {
            Some(v) => v,
            None => candle_core::bail!("analytic ELBO needs a single affine encoder layer"),
        };
        let w_bk = self.params.decoder.weight();
        let log_sigma_sq = &self.params.log_sigma_sq;
        let d = h_nb.dim(1)? as f64;

        let var_k = self.params.variational_logvars.exp()?;
        let tr = w_bk.sqr()?.broadcast_mul(&var_k)?.sum_all()?;

        let wv_bb = w_bk.matmul(v_kb)?;
        let vtwtwv_bb = wv_bb.t()?.matmul(&wv_bb)?;

        let xtvtwtwvx = h_nb.matmul(&vtwtwv_bb)?.mul(h_nb)?.mean(0)?.sum_all()?;
        let xtwvx = (h_nb.matmul(&wv_bb)?.mul(h_nb)?.mean(0)?.sum_all()? * 2.)?;
        let xtx = h_nb.sqr()?.mean(0)?.sum_all()?;

        let sq_err = (((tr + xtvtwtwvx)? - xtwvx)? + xtx)?;
        let two_sigma_sq = (log_sigma_sq.exp()? * 2.)?;
        let log_norm = ((log_sigma_sq + LOG_2_PI)? * (0.5 * d))?;

        sq_err.div(&two_sigma_sq)?.neg()?.sub(&log_norm)
    }

    /// KL term minus the closed-form expected log-likelihood
    pub fn analytic_elbo(&self, h_nb: &Tensor, z_mean_nk: &Tensor) -> Result<Tensor> {
        let kl = self.kl_loss(z_mean_nk)?;
        kl - self.analytic_exp_recon_loss(h_nb)?
    }

    /// Per-sample offset in balance coordinates, present exactly when
    /// the model adjusts for batch effects
    fn batch_offset(&self, batch_nd: Option<&Tensor>) -> Result<Option<Tensor>> {
        match (self.config.batch_adjustment, batch_nd) {
            (BatchAdjustment::None, None) => Ok(None),
            (BatchAdjustment::None, Some(_)) => {
                candle_core::bail!("batch matrix given to a model without batch adjustment")
            }
            (BatchAdjustment::Additive, Some(b)) => Ok(Some(balance_offset(b, &self.psi_bd)?)),
            (BatchAdjustment::Additive, None) => {
                candle_core::bail!("batch adjustment requires a batch matrix")
            }
        }
    }

    /// Balance coordinates of the input with the batch offset removed
    fn adjusted_input(&self, x_nd: &Tensor, offset_nb: Option<&Tensor>) -> Result<Tensor> {
        let h_nb = self.ilr_input(x_nd)?;
        match offset_nb {
            Some(o) => h_nb.sub(o),
            None => Ok(h_nb),
        }
    }

    fn decode_with_offset(&self, z_nk: &Tensor, offset_nb: Option<&Tensor>) -> Result<Tensor> {
        let eta_nb = self.decode(z_nk)?;
        match offset_nb {
            Some(o) => eta_nb + o,
            None => Ok(eta_nb),
        }
    }

    /// Scalar loss to minimize
    ///
    /// * `x_nd` - composition (n x D)
    /// * `batch_nd` - batch effects (n x D), required exactly when the
    ///   model was built with [`BatchAdjustment::Additive`]
    pub fn forward(&self, x_nd: &Tensor, batch_nd: Option<&Tensor>) -> Result<Tensor> {
        let offset_nb = self.batch_offset(batch_nd)?;
        let h_nb = self.adjusted_input(x_nd, offset_nb.as_ref())?;
        let z_mean_nk = self.params.encoder.latent_mean(&h_nb)?;

        if self.config.use_analytic_elbo {
            return self.analytic_elbo(&h_nb, &z_mean_nk);
        }

        let kl = self.kl_loss(&z_mean_nk)?;
        let z_nk = self.reparameterize(&z_mean_nk)?;
        let eta_nb = self.decode_with_offset(&z_nk, offset_nb.as_ref())?;
        let llik = self.recon_log_likelihood(x_nd, &eta_nb)?;
        kl - batch_mean_sum(&llik)?
    }

    /// Negative reconstruction log-likelihood, averaged over samples
    ///
    /// Analytic models return the negated closed-form expectation;
    /// batch-adjusted models decode the posterior mean; otherwise a
    /// fresh latent sample is decoded.
    pub fn get_reconstruction_loss(
        &self,
        x_nd: &Tensor,
        batch_nd: Option<&Tensor>,
    ) -> Result<Tensor> {
        let offset_nb = self.batch_offset(batch_nd)?;
        let h_nb = self.adjusted_input(x_nd, offset_nb.as_ref())?;

        if self.config.use_analytic_elbo {
            return self.analytic_exp_recon_loss(&h_nb)?.neg();
        }

        let z_mean_nk = self.params.encoder.latent_mean(&h_nb)?;
        let z_nk = match offset_nb {
            Some(_) => z_mean_nk,
            None => self.reparameterize(&z_mean_nk)?,
        };
        let eta_nb = self.decode_with_offset(&z_nk, offset_nb.as_ref())?;
        batch_mean_sum(&self.recon_log_likelihood(x_nd, &eta_nb)?)?.neg()
    }

    /// Proportions reconstructed from the posterior mean (n x D)
    pub fn reconstruct(&self, x_nd: &Tensor, batch_nd: Option<&Tensor>) -> Result<Tensor> {
        let offset_nb = self.batch_offset(batch_nd)?;
        let h_nb = self.adjusted_input(x_nd, offset_nb.as_ref())?;
        let z_mean_nk = self.params.encoder.latent_mean(&h_nb)?;
        let eta_nb = self.decode_with_offset(&z_mean_nk, offset_nb.as_ref())?;
        ilr_inv(&eta_nb, &self.psi_bd)
    }
}

impl VaeLossT for LinearVae {
    fn loss(&self, x_nd: &Tensor, batch_nb: Option<&Tensor>) -> Result<Tensor> {
        self.forward(x_nd, batch_nb)
    }
}

/// Fit every variable of `variable_map` by minibatch AdamW
///
/// Returns the per-epoch loss trace
pub fn train_linear_vae<DataL>(
    model: &LinearVae,
    variable_map: &candle_nn::VarMap,
    data: &mut DataL,
    train_config: &TrainConfig,
) -> anyhow::Result<Vec<f32>>
where
    DataL: DataLoader,
{
    if data.num_data() == 0 {
        anyhow::bail!("no samples to train on");
    }

    info!(
        "training on {} samples, {} epochs, minibatch size {}",
        data.num_data(),
        train_config.num_epochs,
        train_config.batch_size
    );

    let trace = train_vae(model, variable_map, data, train_config)?;

    if let Some(last) = trace.last() {
        info!("final loss: {}", last);
    }
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn builder(varmap: &VarMap) -> VarBuilder<'_> {
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
    }

    #[test]
    fn dimensions_follow_the_basis() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let model = LinearVae::new_with_features(8, LinearVaeConfig::new(3), builder(&varmap))?;

        assert_eq!(model.input_dim(), 7);
        assert_eq!(model.feature_dim(), 8);
        assert_eq!(model.hidden_dim(), 3);
        assert_eq!(model.basis().dims(), &[7, 8]);
        assert_eq!(model.params().variational_logvars.dims(), &[3]);
        assert_eq!(model.params().log_sigma_sq.rank(), 0);

        let mut names = varmap
            .data()
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(
            names,
            vec![
                "decoder.dictionary.weight",
                "encoder.fc.0.weight",
                "log_sigma_sq",
                "variational_logvars"
            ]
        );
        Ok(())
    }

    #[test]
    fn deep_encoder_needs_sampling() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let config = LinearVaeConfig {
            encoder_depth: 2,
            ..LinearVaeConfig::new(3)
        };
        assert!(LinearVae::new_with_features(6, config.clone(), builder(&varmap)).is_err());

        let varmap = VarMap::new();
        let config = LinearVaeConfig {
            use_analytic_elbo: false,
            ..config
        };
        let model = LinearVae::new_with_features(6, config, builder(&varmap))?;
        assert_eq!(model.params().encoder.depth(), 2);
        Ok(())
    }

    #[test]
    fn batch_adjustment_turns_off_analytic() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let config = LinearVaeConfig {
            batch_adjustment: BatchAdjustment::Additive,
            likelihood: Likelihood::Multinomial,
            ..LinearVaeConfig::new(2)
        };
        let model = LinearVae::new_with_features(5, config, builder(&varmap))?;
        assert!(!model.use_analytic_elbo());
        Ok(())
    }

    #[test]
    fn basis_must_drop_one_dimension() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let psi = Tensor::zeros((3, 3), DType::F32, &Device::Cpu)?;
        assert!(LinearVae::from_dense_basis(psi, LinearVaeConfig::new(2), builder(&varmap)).is_err());
        Ok(())
    }
}
