use crate::candle_data_loader::*;
use crate::candle_inference::TrainConfig;
use crate::candle_model_traits::VaeLossT;

use candle_nn::{AdamW, Optimizer};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

/// Train a VAE objective by minibatch AdamW over every variable in
/// `variable_map`
///
/// * `model` - anything that produces a scalar loss per minibatch
/// * `variable_map` - variables the optimizer updates
/// * `data` - data loader
/// * `train_config` - training configuration
///
/// Returns the mean minibatch loss of every epoch
pub fn train_vae<M, DataL>(
    model: &M,
    variable_map: &candle_nn::VarMap,
    data: &mut DataL,
    train_config: &TrainConfig,
) -> anyhow::Result<Vec<f32>>
where
    M: VaeLossT,
    DataL: DataLoader,
{
    let device = &train_config.device;
    let mut adam = AdamW::new_lr(
        variable_map.all_vars(),
        train_config.learning_rate.into(),
    )?;

    let pb = ProgressBar::new(train_config.num_epochs as u64);

    if !train_config.show_progress || train_config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut loss_trace = Vec::with_capacity(train_config.num_epochs);

    for epoch in 0..train_config.num_epochs {
        data.shuffle_minibatch(train_config.batch_size)?;

        let mut loss_tot = 0f32;

        for b in 0..data.num_minibatch() {
            let mb = data.minibatch_shuffled(b, device)?;
            let loss = model.loss(&mb.input, mb.batch.as_ref())?;
            adam.backward_step(&loss)?;
            loss_tot += loss.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?;
        }

        let loss_avg = loss_tot / data.num_minibatch().max(1) as f32;
        if !loss_avg.is_finite() {
            anyhow::bail!("loss diverged at epoch {}: {}", epoch + 1, loss_avg);
        }
        loss_trace.push(loss_avg);
        pb.inc(1);

        if train_config.verbose {
            info!("[{}] loss: {}", epoch + 1, loss_avg);
        }
    }

    pb.finish_and_clear();
    Ok(loss_trace)
}
