use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_util::candle_data_loader::InMemoryData;
use candle_util::candle_inference::TrainConfig;
use candle_util::candle_linear_decoder::LinearDecoder;
use candle_util::candle_linear_encoder::LinearEncoder;
use candle_util::candle_model_traits::*;
use candle_util::candle_vae_inference::train_vae;

#[test]
fn encoder_depth_and_shapes() -> Result<()> {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

    let shallow = LinearEncoder::new(9, 3, 1, 1e-3, false, vb.pp("shallow"))?;
    let deep = LinearEncoder::new(9, 3, 3, 1e-3, true, vb.pp("deep"))?;

    assert_eq!(shallow.depth(), 1);
    assert_eq!(deep.depth(), 3);
    assert!(shallow.linear_weight().is_some());
    assert!(deep.linear_weight().is_none());

    let h = Tensor::randn(0f32, 1f32, (5, 9), &dev)?;
    assert_eq!(shallow.latent_mean(&h)?.dims(), &[5, 3]);
    assert_eq!(deep.latent_mean(&h)?.dims(), &[5, 3]);

    assert!(LinearEncoder::new(9, 3, 0, 1e-3, false, vb.pp("none")).is_err());
    Ok(())
}

#[test]
fn decoder_maps_latent_back() -> Result<()> {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

    let decoder = LinearDecoder::new(9, 3, true, vb.pp("dec"))?;
    let z = Tensor::randn(0f32, 1f32, (5, 3), &dev)?;
    assert_eq!(decoder.forward(&z)?.dims(), &[5, 9]);
    assert_eq!(decoder.get_dictionary()?.dims(), &[9, 3]);
    assert_eq!((decoder.dim_obs(), decoder.dim_latent()), (9, 3));
    Ok(())
}

/// Auto-encoding with squared error; enough to see the optimizer move
struct SquaredErrorAutoencoder {
    encoder: LinearEncoder,
    decoder: LinearDecoder,
}

impl VaeLossT for SquaredErrorAutoencoder {
    fn loss(&self, x_nd: &Tensor, _batch_nb: Option<&Tensor>) -> Result<Tensor> {
        let z = self.encoder.latent_mean(x_nd)?;
        let x_hat = self.decoder.forward(&z)?;
        x_nd.sub(&x_hat)?.sqr()?.sum(1)?.mean_all()
    }
}

#[test]
fn training_reduces_loss() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

    // rank-2 data in 6 dimensions
    let z = Tensor::randn(0f32, 1f32, (200, 2), &dev)?;
    let w = Tensor::randn(0f32, 1f32, (2, 6), &dev)?;
    let x = z.matmul(&w)?;

    let model = SquaredErrorAutoencoder {
        encoder: LinearEncoder::new(6, 2, 1, 0.1, false, vb.pp("enc"))?,
        decoder: LinearDecoder::new(6, 2, false, vb.pp("dec"))?,
    };

    let mut data = InMemoryData::new(&x)?;
    let config = TrainConfig {
        learning_rate: 0.05,
        batch_size: 50,
        num_epochs: 60,
        show_progress: false,
        ..Default::default()
    };

    let trace = train_vae(&model, &varmap, &mut data, &config)?;
    assert_eq!(trace.len(), 60);
    let first = trace[0];
    let last = *trace.last().ok_or(anyhow::anyhow!("empty trace"))?;
    assert!(last < 0.5 * first, "first {} last {}", first, last);
    Ok(())
}
