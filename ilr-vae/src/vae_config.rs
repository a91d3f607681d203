use crate::likelihood::Likelihood;

/// How known per-sample batch effects enter the model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BatchAdjustment {
    #[default]
    None,
    /// Subtract `B * psi'` before encoding and add it back after
    /// decoding
    Additive,
}

/// Fixed at construction
///
/// The balance dimension is not configured here; it always follows
/// the basis.
#[derive(Clone, Debug)]
pub struct LinearVaeConfig {
    pub hidden_dim: usize,
    /// standard deviation of the initial affine weights
    pub init_scale: f64,
    pub use_analytic_elbo: bool,
    pub encoder_depth: usize,
    pub likelihood: Likelihood,
    /// intercepts in both encoder and decoder
    pub bias: bool,
    pub batch_adjustment: BatchAdjustment,
}

impl LinearVaeConfig {
    pub fn new(hidden_dim: usize) -> Self {
        Self {
            hidden_dim,
            ..Default::default()
        }
    }
}

impl Default for LinearVaeConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 10,
            init_scale: 1e-3,
            use_analytic_elbo: true,
            encoder_depth: 1,
            likelihood: Likelihood::Gaussian,
            bias: false,
            batch_adjustment: BatchAdjustment::None,
        }
    }
}
