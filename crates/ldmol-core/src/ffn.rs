//! Feed-forward networks
//!
//! - [`GeluMlp`]: `fc2(gelu(fc1(x)))` as used by DiT and BERT
//! - [`GatedGeluFfn`]: T5 v1.1 `wo(gelu(wi_0(x)) * wi_1(x))`

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

/// GELU with the tanh approximation (`gelu_new` / `approximate="tanh"`)
pub fn gelu_tanh<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let coeff = (2.0f32 / std::f32::consts::PI).sqrt();
    let inner = (x.clone() + x.clone().powf_scalar(3.0) * 0.044715) * coeff;
    x * (inner.tanh() + 1.0) * 0.5
}

/// Two-layer MLP with GELU
#[derive(Module, Debug)]
pub struct GeluMlp<B: Backend> {
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    /// Use the tanh approximation instead of exact erf GELU
    #[module(skip)]
    pub approximate: bool,
}

/// Configuration for [`GeluMlp`]
pub struct GeluMlpConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub approximate: bool,
}

impl GeluMlpConfig {
    pub fn new(hidden_size: usize, intermediate_size: usize) -> Self {
        Self {
            hidden_size,
            intermediate_size,
            approximate: false,
        }
    }

    pub fn with_approximate(mut self, approximate: bool) -> Self {
        self.approximate = approximate;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> GeluMlp<B> {
        GeluMlp {
            fc1: LinearConfig::new(self.hidden_size, self.intermediate_size).init(device),
            fc2: LinearConfig::new(self.intermediate_size, self.hidden_size).init(device),
            approximate: self.approximate,
        }
    }
}

impl<B: Backend> GeluMlp<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let h = self.fc1.forward(x);
        let h = if self.approximate {
            gelu_tanh(h)
        } else {
            burn::tensor::activation::gelu(h)
        };
        self.fc2.forward(h)
    }
}

/// Gated-GELU feed-forward network (T5 v1.1)
#[derive(Module, Debug)]
pub struct GatedGeluFfn<B: Backend> {
    /// Gate projection (`wi_0`)
    pub gate_proj: Linear<B>,
    /// Up projection (`wi_1`)
    pub up_proj: Linear<B>,
    /// Down projection (`wo`)
    pub down_proj: Linear<B>,
}

/// Configuration for [`GatedGeluFfn`]
pub struct GatedGeluFfnConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
}

impl GatedGeluFfnConfig {
    pub fn new(hidden_size: usize, intermediate_size: usize) -> Self {
        Self {
            hidden_size,
            intermediate_size,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> GatedGeluFfn<B> {
        let proj = |i, o| LinearConfig::new(i, o).with_bias(false).init(device);
        GatedGeluFfn {
            gate_proj: proj(self.hidden_size, self.intermediate_size),
            up_proj: proj(self.hidden_size, self.intermediate_size),
            down_proj: proj(self.intermediate_size, self.hidden_size),
        }
    }
}

impl<B: Backend> GatedGeluFfn<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let gate = gelu_tanh(self.gate_proj.forward(x.clone()));
        let up = self.up_proj.forward(x);
        self.down_proj.forward(gate * up)
    }
}
