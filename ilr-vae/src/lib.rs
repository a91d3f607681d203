pub mod ilr;
pub mod likelihood;
pub mod linear_vae;
pub mod vae_config;

pub use likelihood::Likelihood;
pub use linear_vae::{LinearVae, LinearVaeParams};
pub use vae_config::{BatchAdjustment, LinearVaeConfig};
