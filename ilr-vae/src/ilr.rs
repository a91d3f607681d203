//! Isometric log-ratio coordinates
//!
//! The balance basis `psi_bd` is `(D - 1) x D`: one row per balance,
//! one column per feature. Compositions are `n x D`, balance
//! coordinates are `n x (D - 1)`.

use candle_core::{Result, Tensor};
use candle_nn::ops;

/// Pseudo-count so that zero counts survive the logarithm
///
/// x -> x + 1
pub fn impute(x_nd: &Tensor) -> Result<Tensor> {
    x_nd + 1.
}

/// Balance coordinates of a strictly positive composition
///
/// ilr(x) = log(x) * psi'
///
/// Non-positive entries produce non-finite coordinates; apply
/// [`impute`] first.
///
/// * `x_nd` - composition (n x D)
/// * `psi_bd` - balance basis ((D - 1) x D)
pub fn ilr(x_nd: &Tensor, psi_bd: &Tensor) -> Result<Tensor> {
    x_nd.log()?.matmul(&psi_bd.t()?)
}

/// Proportions from balance coordinates
///
/// ilr_inv(h) = softmax(h * psi)
///
/// * `h_nb` - balance coordinates (n x (D - 1))
/// * `psi_bd` - balance basis ((D - 1) x D)
pub fn ilr_inv(h_nb: &Tensor, psi_bd: &Tensor) -> Result<Tensor> {
    ops::softmax(&h_nb.matmul(psi_bd)?, 1)
}

/// Per-sample additive offset in balance coordinates
///
/// offset = B * psi'
///
/// * `batch_nd` - batch effects on the log scale (n x D)
/// * `psi_bd` - balance basis ((D - 1) x D)
pub fn balance_offset(batch_nd: &Tensor, psi_bd: &Tensor) -> Result<Tensor> {
    batch_nd.matmul(&psi_bd.t()?)
}
