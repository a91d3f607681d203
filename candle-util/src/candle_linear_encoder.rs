use crate::candle_aux_layers::*;
use crate::candle_aux_linear::scaled_normal_linear;
use crate::candle_model_traits::EncoderModuleT;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// A stack of affine layers with softplus in between
///
/// `d -> k` for the first layer, then `k -> k` for every extra layer.
pub struct LinearEncoder {
    n_obs: usize,
    n_latent: usize,
    fc: StackLayers<Linear>,
}

impl LinearEncoder {
    /// Will create a new encoder with these variables:
    ///
    /// * `fc.{}.weight` where {} is the layer index
    /// * `fc.{}.bias` if `bias`
    ///
    /// # Arguments
    /// * `n_obs` - input dimension
    /// * `n_latent` - latent dimension
    /// * `depth` - number of affine layers (at least 1)
    /// * `init_scale` - standard deviation of the initial weights
    /// * `bias` - whether every layer has an intercept
    /// * `vs` - variable builder
    pub fn new(
        n_obs: usize,
        n_latent: usize,
        depth: usize,
        init_scale: f64,
        bias: bool,
        vs: VarBuilder,
    ) -> Result<Self> {
        if depth < 1 {
            candle_core::bail!("encoder depth must be at least 1, got {}", depth);
        }

        let mut fc = StackLayers::<Linear>::new();
        fc.push(scaled_normal_linear(
            n_obs,
            n_latent,
            init_scale,
            bias,
            vs.pp("fc.0"),
        )?);

        for j in 1..depth {
            let _name = format!("fc.{}", j);
            fc.push_after_act(
                Nonlinearity::Softplus,
                scaled_normal_linear(n_latent, n_latent, init_scale, bias, vs.pp(_name))?,
            );
        }

        Ok(Self {
            n_obs,
            n_latent,
            fc,
        })
    }

    pub fn depth(&self) -> usize {
        self.fc.len()
    }

    /// The weight matrix (k x d) if the encoder is a single affine map
    pub fn linear_weight(&self) -> Option<&Tensor> {
        self.fc.single_layer().map(|layer| layer.weight())
    }
}

impl EncoderModuleT for LinearEncoder {
    fn latent_mean(&self, h_nd: &Tensor) -> Result<Tensor> {
        self.fc.forward(h_nd)
    }

    fn dim_obs(&self) -> usize {
        self.n_obs
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}
