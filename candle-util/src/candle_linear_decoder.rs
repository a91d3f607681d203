use crate::candle_aux_linear::fan_in_uniform_linear;
use crate::candle_model_traits::DecoderModuleT;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// A single affine decoder `k -> d`
pub struct LinearDecoder {
    n_obs: usize,
    n_latent: usize,
    dictionary: Linear,
}

impl LinearDecoder {
    /// Will create a new decoder with the following parameters:
    /// * `dictionary.weight` (d x k)
    /// * `dictionary.bias` (d) if `bias`
    ///
    /// Both start at `U(-1/sqrt(k), 1/sqrt(k))`.
    pub fn new(n_obs: usize, n_latent: usize, bias: bool, vs: VarBuilder) -> Result<Self> {
        let dictionary = fan_in_uniform_linear(n_latent, n_obs, bias, vs.pp("dictionary"))?;
        Ok(Self {
            n_obs,
            n_latent,
            dictionary,
        })
    }

    pub fn weight(&self) -> &Tensor {
        self.dictionary.weight()
    }
}

impl DecoderModuleT for LinearDecoder {
    fn forward(&self, z_nk: &Tensor) -> Result<Tensor> {
        self.dictionary.forward(z_nk)
    }

    fn get_dictionary(&self) -> Result<Tensor> {
        Ok(self.dictionary.weight().clone())
    }

    fn dim_obs(&self) -> usize {
        self.n_obs
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}
