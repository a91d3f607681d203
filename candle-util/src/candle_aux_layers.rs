use candle_core::{Result, Tensor};
use candle_nn::Module;

/// Smooth non-linearity placed between affine layers
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Nonlinearity {
    /// log(1 + exp(x))
    Softplus,
}

/// Numerically stable softplus
///
/// log(1 + exp(x)) = max(x, 0) + log(1 + exp(-|x|))
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = (x.abs()?.neg()?.exp()? + 1.)?.log()?;
    x.relu()? + tail
}

impl Module for Nonlinearity {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Nonlinearity::Softplus => softplus(x),
        }
    }
}

/// build a stack of `M` layers with an optional non-linearity
/// between consecutive layers
pub struct StackLayers<M>
where
    M: Module,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Option<Nonlinearity>>,
}

impl<M> Module for StackLayers<M>
where
    M: Module,
{
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
            x = module.forward(&x)?;
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer that is preceded by `activation`
    pub fn push_after_act(&mut self, activation: Nonlinearity, layer: M) {
        self.module_layers.push(layer);
        self.activation_layers.push(Some(activation));
    }

    pub fn push(&mut self, layer: M) {
        self.module_layers.push(layer);
        self.activation_layers.push(None);
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }

    pub fn layers(&self) -> &[M] {
        &self.module_layers
    }

    /// The stack is a single affine map when there is exactly one
    /// layer and no non-linearity
    pub fn single_layer(&self) -> Option<&M> {
        match (self.module_layers.as_slice(), self.activation_layers.as_slice()) {
            ([layer], [None]) => Some(layer),
            _ => None,
        }
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    #[test]
    fn softplus_is_stable_at_the_tails() -> Result<()> {
        let x = Tensor::new(&[-100f32, 0., 100.], &Device::Cpu)?;
        let y = softplus(&x)?.to_vec1::<f32>()?;
        assert_abs_diff_eq!(y[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y[1], 2f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(y[2], 100.0, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn activation_sits_between_layers() -> Result<()> {
        let dev = Device::Cpu;
        let identity = candle_nn::Linear::new(Tensor::eye(2, candle_core::DType::F32, &dev)?, None);

        let mut stack = StackLayers::new();
        stack.push(identity.clone());
        assert!(stack.single_layer().is_some());

        stack.push_after_act(Nonlinearity::Softplus, identity);
        assert_eq!(stack.len(), 2);
        assert!(stack.single_layer().is_none());

        let x = Tensor::new(&[[0f32, -100.]], &dev)?;
        let y = stack.forward(&x)?.to_vec2::<f32>()?;
        assert_abs_diff_eq!(y[0][0], 2f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(y[0][1], 0.0, epsilon = 1e-6);
        Ok(())
    }
}
