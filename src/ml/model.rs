use anyhow::Result;
use burn::{
    module::Param,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
};
use std::collections::BTreeMap;

use crate::domain::error::ModelError;

/// Named parameter tensors, keyed like `head.weight`.
pub type StateDict = BTreeMap<String, TensorData>;

/// A network the classifier wrapper can drive.
///
/// `forward` maps a volume batch `[N, C, D, H, W]` to logits
/// `[N, out_ch]`. The state-dict pair exposes parameters by name so
/// checkpoints can be filtered and partially loaded.
pub trait VolumeNet<B: Backend>: Module<B> {
    fn forward(&self, source: Tensor<B, 5>) -> Tensor<B, 2>;

    fn state_dict(&self) -> StateDict;

    /// Replace every parameter named in the model with the entry in
    /// `state`. Missing keys and shape mismatches are errors.
    fn load_state_dict(self, state: &StateDict, device: &B::Device) -> Result<Self>
    where
        Self: Sized;
}

/// Copy one named tensor out of `state` into a parameter of the same shape.
pub fn load_param<B: Backend, const D: usize>(
    state:   &StateDict,
    key:     &str,
    current: &Param<Tensor<B, D>>,
    device:  &B::Device,
) -> Result<Param<Tensor<B, D>>> {
    let data = state
        .get(key)
        .ok_or_else(|| ModelError::MissingKey(key.to_string()))?;

    let expected = current.dims().to_vec();
    if data.shape != expected {
        return Err(ModelError::ShapeMismatch {
            key:      key.to_string(),
            expected,
            actual:   data.shape.clone(),
        }
        .into());
    }

    let tensor = Tensor::<B, D>::from_data(data.clone().convert::<f32>(), device).require_grad();
    Ok(Param::from_tensor(tensor))
}

// ─── Reference network ────────────────────────────────────────────────────────
// Global mean + max pooling over the three spatial axes, then a
// linear head on the concatenated per-channel statistics:
//
//   [N, C, D, H, W] ──► mean, max ──► [N, 2C] ──► dropout ──► Linear ──► [N, out_ch]

#[derive(Config, Debug)]
pub struct PooledLinearConfig {
    pub in_ch:  usize,
    pub out_ch: usize,
    #[config(default = 0.0)]
    pub dropout: f64,
}

impl PooledLinearConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PooledLinearNet<B> {
        let head    = LinearConfig::new(2 * self.in_ch, self.out_ch).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        PooledLinearNet { head, dropout }
    }
}

#[derive(Module, Debug)]
pub struct PooledLinearNet<B: Backend> {
    pub head:    Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> VolumeNet<B> for PooledLinearNet<B> {
    fn forward(&self, source: Tensor<B, 5>) -> Tensor<B, 2> {
        let [n, c, _, _, _] = source.dims();

        let mean = source.clone().mean_dim(4).mean_dim(3).mean_dim(2).reshape([n, c]);
        let max  = source.max_dim(4).max_dim(3).max_dim(2).reshape([n, c]);

        let features = Tensor::cat(vec![mean, max], 1);
        self.head.forward(self.dropout.forward(features))
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        state.insert("head.weight".to_string(), self.head.weight.val().into_data());
        if let Some(bias) = &self.head.bias {
            state.insert("head.bias".to_string(), bias.val().into_data());
        }
        state
    }

    fn load_state_dict(mut self, state: &StateDict, device: &B::Device) -> Result<Self> {
        self.head.weight = load_param(state, "head.weight", &self.head.weight, device)?;
        let bias = match &self.head.bias {
            Some(bias) => Some(load_param(state, "head.bias", bias, device)?),
            None       => None,
        };
        self.head.bias = bias;
        Ok(self)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let net: PooledLinearNet<TestBackend> = PooledLinearConfig::new(2, 3).init(&device);
        let x = Tensor::<TestBackend, 5>::ones([4, 2, 3, 5, 6], &device);
        assert_eq!(net.forward(x).dims(), [4, 3]);
    }

    #[test]
    fn test_state_dict_keys_and_shapes() {
        let device = Default::default();
        let net: PooledLinearNet<TestBackend> = PooledLinearConfig::new(1, 2).init(&device);
        let state = net.state_dict();
        assert_eq!(state.keys().collect::<Vec<_>>(), vec!["head.bias", "head.weight"]);
        assert_eq!(state["head.weight"].shape, vec![2, 2]);
        assert_eq!(state["head.bias"].shape, vec![2]);
    }

    #[test]
    fn test_load_state_dict_copies_values() {
        let device = Default::default();
        let a: PooledLinearNet<TestBackend> = PooledLinearConfig::new(1, 2).init(&device);
        let b: PooledLinearNet<TestBackend> = PooledLinearConfig::new(1, 2).init(&device);

        let b = b.load_state_dict(&a.state_dict(), &device).unwrap();
        let wa = a.head.weight.val().into_data().to_vec::<f32>().unwrap();
        let wb = b.head.weight.val().into_data().to_vec::<f32>().unwrap();
        assert_eq!(wa, wb);
    }

    #[test]
    fn test_load_state_dict_errors() {
        let device = Default::default();
        let net: PooledLinearNet<TestBackend> = PooledLinearConfig::new(1, 2).init(&device);

        let mut state = net.state_dict();
        state.remove("head.bias");
        let err = net.clone().load_state_dict(&state, &device).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ModelError>(),
            Some(&ModelError::MissingKey("head.bias".to_string()))
        );

        let mut state = net.state_dict();
        state.insert("head.bias".to_string(), TensorData::new(vec![0.0f32; 3], [3]));
        let err = net.load_state_dict(&state, &device).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ModelError>(),
            Some(ModelError::ShapeMismatch { .. })
        ));
    }
}
