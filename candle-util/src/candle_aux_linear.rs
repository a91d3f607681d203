use candle_core::Result;
use candle_nn::{Init, Linear, VarBuilder};

/// Affine layer whose weights start at `N(0, init_scale^2)`
///
/// Creates `weight` (out_dim x in_dim) and, if `bias`, a zero
/// initialized `bias` (out_dim) under `vb`.
///
/// * `in_dim` - input dimension
/// * `out_dim` - output dimension
/// * `init_scale` - standard deviation of the initial weights
/// * `bias` - whether to include an intercept
/// * `vb` - variable builder
pub fn scaled_normal_linear(
    in_dim: usize,
    out_dim: usize,
    init_scale: f64,
    bias: bool,
    vb: VarBuilder,
) -> Result<Linear> {
    let init_ws = Init::Randn {
        mean: 0.,
        stdev: init_scale,
    };
    let ws = vb.get_with_hints((out_dim, in_dim), "weight", init_ws)?;
    let bs = if bias {
        Some(vb.get_with_hints(out_dim, "bias", Init::Const(0.))?)
    } else {
        None
    };
    Ok(Linear::new(ws, bs))
}

/// Affine layer with the usual fan-in uniform initialization
///
/// Both `weight` (out_dim x in_dim) and, if `bias`, `bias` (out_dim)
/// start at `U(-1/sqrt(in_dim), 1/sqrt(in_dim))`.
pub fn fan_in_uniform_linear(
    in_dim: usize,
    out_dim: usize,
    bias: bool,
    vb: VarBuilder,
) -> Result<Linear> {
    let bound = 1. / (in_dim.max(1) as f64).sqrt();
    let init = Init::Uniform {
        lo: -bound,
        up: bound,
    };
    let ws = vb.get_with_hints((out_dim, in_dim), "weight", init)?;
    let bs = if bias {
        Some(vb.get_with_hints(out_dim, "bias", init)?)
    } else {
        None
    };
    Ok(Linear::new(ws, bs))
}
