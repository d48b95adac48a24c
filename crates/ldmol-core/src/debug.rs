//! Tensor diagnostics for the sampling loop

use burn::prelude::*;

fn host_values<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Vec<f32> {
    tensor
        .clone()
        .into_data()
        .convert::<f32>()
        .to_vec()
        .unwrap_or_default()
}

/// Summarizes a tensor as `min/max/mean/std` plus NaN and Inf counts
pub fn tensor_stats<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> String {
    let values = host_values(tensor);
    if values.is_empty() {
        return "empty".to_string();
    }

    let nan = values.iter().filter(|x| x.is_nan()).count();
    let inf = values.iter().filter(|x| x.is_infinite()).count();
    let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / values.len() as f32;

    let mut out = format!(
        "min={:.4}, max={:.4}, mean={:.4}, std={:.4}",
        min,
        max,
        mean,
        var.sqrt()
    );
    if nan > 0 || inf > 0 {
        out.push_str(&format!(" [NaN={}, Inf={}]", nan, inf));
    }
    out
}

/// Panics when `enabled` and the tensor holds NaN or Inf values
#[inline]
pub fn check_tensor_if<B: Backend, const D: usize>(tensor: &Tensor<B, D>, name: &str, enabled: bool) {
    if !enabled {
        return;
    }

    let values = host_values(tensor);
    let bad = values.iter().filter(|x| !x.is_finite()).count();
    if bad > 0 {
        panic!(
            "[nan] {}: {}/{} values are not finite\nStats: {}",
            name,
            bad,
            values.len(),
            tensor_stats(tensor)
        );
    }
}
