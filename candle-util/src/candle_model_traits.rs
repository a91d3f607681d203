use candle_core::{Result, Tensor};

pub trait EncoderModuleT {
    /// A deterministic encoder from observed coordinates to the
    /// mean of the latent Gaussian
    ///
    /// # Arguments
    /// * `h_nd` - input data (n x d)
    ///
    /// # Returns `z_mean_nk` (n x k)
    fn latent_mean(&self, h_nd: &Tensor) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait DecoderModuleT {
    /// A decoder that spits out reconstruction
    fn forward(&self, z_nk: &Tensor) -> Result<Tensor>;

    /// Get a representative dictionary matrix (d x k)
    fn get_dictionary(&self) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

/// Anything that turns a minibatch into a scalar loss to minimize
pub trait VaeLossT {
    /// * `x_nd` - observed data (n x d)
    /// * `batch_nb` - optional per-sample covariates paired with `x_nd`
    fn loss(&self, x_nd: &Tensor, batch_nb: Option<&Tensor>) -> Result<Tensor>;
}
