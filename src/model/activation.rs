use ndarray::{Array2, Axis};

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// ln(1 + e^x), without overflow for large x.
pub fn softplus(x: f32) -> f32 {
    if x > 20.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

/// x * tanh(softplus(x))
pub fn mish(x: f32) -> f32 {
    x * softplus(x).tanh()
}

pub fn mish_derivative(x: f32) -> f32 {
    let t = softplus(x).tanh();
    t + x * sigmoid(x) * (1.0 - t * t)
}

/// Row-wise softmax over class logits.
pub fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}
