//! Fully connected surrogate network.
//!
//! A plain multilayer perceptron: frequency-encoded inputs, ReLU hidden
//! layers, sigmoid outputs (every label channel lives in [0,1]), minibatch
//! Adam training. Weight matrices are stored row-major as
//! `weight[input][output]` so the forward pass walks each row once.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;

use super::{LossKind, SurrogateModel, TrainConfig};

/// Dense row-major matrix (rows = inputs, cols = outputs).
struct Matrix {
    elements: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl Matrix {
    fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            elements: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }
}

#[derive(Clone, Copy)]
enum Activation {
    Relu,
    Sigmoid,
}

struct Layer {
    weight: Matrix,
    bias: Vec<f32>,
    activation: Activation,
}

impl Layer {
    fn forward(&self, h: &[f32], out: &mut Vec<f32>) {
        out.clear();
        out.resize(self.weight.cols, 0.0);
        for (in_idx, &h_val) in h.iter().enumerate() {
            let row = &self.weight.elements[in_idx * self.weight.cols..][..self.weight.cols];
            for (out_idx, &w) in row.iter().enumerate() {
                out[out_idx] += w * h_val;
            }
        }
        for (out_idx, value) in out.iter_mut().enumerate() {
            let x = *value + self.bias[out_idx];
            *value = match self.activation {
                Activation::Relu => x.max(0.0),
                Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            };
        }
    }
}

/// Adam first/second moment buffers for one layer.
struct AdamState {
    weight_m: Vec<f32>,
    weight_v: Vec<f32>,
    bias_m: Vec<f32>,
    bias_v: Vec<f32>,
}

impl AdamState {
    fn for_layer(layer: &Layer) -> Self {
        Self {
            weight_m: vec![0.0; layer.weight.elements.len()],
            weight_v: vec![0.0; layer.weight.elements.len()],
            bias_m: vec![0.0; layer.bias.len()],
            bias_v: vec![0.0; layer.bias.len()],
        }
    }
}

/// Per-layer gradient accumulator, same shapes as the layer parameters.
struct LayerGrads {
    weight: Vec<f32>,
    bias: Vec<f32>,
}

/// Multilayer perceptron implementing [`SurrogateModel`].
pub struct Mlp {
    layers: Vec<Layer>,
    adam: Vec<AdamState>,
    rng: ChaCha20Rng,
    raw_input_width: usize,
    output_width: usize,
    frequencies: usize,
    step: u64,
}

impl Mlp {
    /// Build a network mapping `input_width` raw floats to `output_width`
    /// outputs, with `hidden_layers` hidden layers of `hidden_width` units
    /// and `frequencies` sin/cos encoding octaves per input component
    /// (0 disables the encoding).
    pub fn new(
        input_width: usize,
        output_width: usize,
        hidden_width: usize,
        hidden_layers: usize,
        frequencies: usize,
        seed: u64,
    ) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let encoded = input_width * (1 + 2 * frequencies);

        let mut widths = Vec::with_capacity(hidden_layers + 2);
        widths.push(encoded);
        widths.extend(std::iter::repeat(hidden_width).take(hidden_layers));
        widths.push(output_width);

        let mut layers = Vec::with_capacity(widths.len() - 1);
        for pair in widths.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let is_output = layers.len() == widths.len() - 2;
            let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
            let mut weight = Matrix::zeros(fan_in, fan_out);
            for w in &mut weight.elements {
                *w = rng.random_range(-limit..limit);
            }
            layers.push(Layer {
                weight,
                bias: vec![0.0; fan_out],
                activation: if is_output {
                    Activation::Sigmoid
                } else {
                    Activation::Relu
                },
            });
        }

        let adam = layers.iter().map(AdamState::for_layer).collect();
        Self {
            layers,
            adam,
            rng,
            raw_input_width: input_width,
            output_width,
            frequencies,
            step: 0,
        }
    }

    /// Frequency-encode one raw input row: each component x becomes
    /// x, sin(x), cos(x), sin(2x), cos(2x), ... with doubling frequency.
    fn encode(&self, row: &[f32], out: &mut Vec<f32>) {
        out.clear();
        out.extend_from_slice(row);
        let mut f = 1.0f32;
        for _ in 0..self.frequencies {
            for &x in row {
                out.push((f * x).sin());
            }
            for &x in row {
                out.push((f * x).cos());
            }
            f *= 2.0;
        }
    }

    /// Forward pass keeping every post-activation (needed by backprop).
    /// `acts[0]` is the encoded input, `acts[i+1]` is layer i's output.
    fn forward_trace(&self, row: &[f32]) -> Vec<Vec<f32>> {
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        let mut encoded = Vec::new();
        self.encode(row, &mut encoded);
        acts.push(encoded);
        for layer in &self.layers {
            let mut out = Vec::new();
            layer.forward(acts.last().map(Vec::as_slice).unwrap_or(&[]), &mut out);
            acts.push(out);
        }
        acts
    }

    /// Accumulate gradients for one example into `grads`.
    ///
    /// The output layer is sigmoid, so the MSE delta is
    /// 2(a - y) * a * (1 - a) and the cross-entropy delta collapses to
    /// (a - y). Hidden ReLU deltas gate on the post-activation sign.
    fn backward(
        &self,
        acts: &[Vec<f32>],
        label: &[f32],
        loss: LossKind,
        scale: f32,
        grads: &mut [LayerGrads],
    ) {
        let output = acts.last().map(Vec::as_slice).unwrap_or(&[]);
        let mut delta: Vec<f32> = output
            .iter()
            .zip(label)
            .enumerate()
            .map(|(channel, (&a, &y))| {
                let bce = loss == LossKind::VisibilityCrossEntropy && channel == 0;
                if bce {
                    a - y
                } else {
                    2.0 * (a - y) * a * (1.0 - a)
                }
            })
            .collect();

        for layer_idx in (0..self.layers.len()).rev() {
            let layer = &self.layers[layer_idx];
            let input = &acts[layer_idx];
            let grad = &mut grads[layer_idx];

            for (out_idx, &d) in delta.iter().enumerate() {
                grad.bias[out_idx] += d * scale;
            }
            let mut prev_delta = vec![0.0f32; layer.weight.rows];
            for (in_idx, &h) in input.iter().enumerate() {
                let row = in_idx * layer.weight.cols;
                for (out_idx, &d) in delta.iter().enumerate() {
                    grad.weight[row + out_idx] += h * d * scale;
                    prev_delta[in_idx] += layer.weight.elements[row + out_idx] * d;
                }
            }

            if layer_idx > 0 {
                // Gate through the previous layer's ReLU.
                for (value, &act) in prev_delta.iter_mut().zip(input.iter()) {
                    if act <= 0.0 {
                        *value = 0.0;
                    }
                }
                delta = prev_delta;
            }
        }
    }

    fn apply_adam(&mut self, grads: &[LayerGrads], config: &TrainConfig) {
        self.step += 1;
        let opt = &config.optimizer;
        let bias_corr1 = 1.0 - opt.beta1.powi(self.step as i32);
        let bias_corr2 = 1.0 - opt.beta2.powi(self.step as i32);

        for ((layer, state), grad) in self
            .layers
            .iter_mut()
            .zip(self.adam.iter_mut())
            .zip(grads.iter())
        {
            adam_update(
                &mut layer.weight.elements,
                &mut state.weight_m,
                &mut state.weight_v,
                &grad.weight,
                opt,
                bias_corr1,
                bias_corr2,
            );
            adam_update(
                &mut layer.bias,
                &mut state.bias_m,
                &mut state.bias_v,
                &grad.bias,
                opt,
                bias_corr1,
                bias_corr2,
            );
        }
    }
}

fn adam_update(
    params: &mut [f32],
    m: &mut [f32],
    v: &mut [f32],
    grads: &[f32],
    opt: &super::OptimizerConfig,
    bias_corr1: f32,
    bias_corr2: f32,
) {
    for i in 0..params.len() {
        let g = grads[i];
        m[i] = opt.beta1 * m[i] + (1.0 - opt.beta1) * g;
        v[i] = opt.beta2 * v[i] + (1.0 - opt.beta2) * g * g;
        let m_hat = m[i] / bias_corr1;
        let v_hat = v[i] / bias_corr2;
        params[i] -= opt.learning_rate * m_hat / (v_hat.sqrt() + opt.epsilon);
    }
}

impl SurrogateModel for Mlp {
    fn input_width(&self) -> usize {
        self.raw_input_width
    }

    fn output_width(&self) -> usize {
        self.output_width
    }

    fn train(&mut self, inputs: &[f32], labels: &[f32], config: &TrainConfig) {
        let rows = inputs.len() / self.raw_input_width;
        debug_assert_eq!(labels.len(), rows * self.output_width);
        if rows == 0 {
            return;
        }
        let batch = config.batch_size.min(rows).max(1);
        let scale = 1.0 / batch as f32;

        let mut grads: Vec<LayerGrads> = self
            .layers
            .iter()
            .map(|l| LayerGrads {
                weight: vec![0.0; l.weight.elements.len()],
                bias: vec![0.0; l.bias.len()],
            })
            .collect();

        for _ in 0..config.iterations {
            for g in &mut grads {
                g.weight.fill(0.0);
                g.bias.fill(0.0);
            }
            for _ in 0..batch {
                let row = self.rng.random_range(0..rows);
                let input = &inputs[row * self.raw_input_width..][..self.raw_input_width];
                let label = &labels[row * self.output_width..][..self.output_width];
                let acts = self.forward_trace(input);
                self.backward(&acts, label, config.loss, scale, &mut grads);
            }
            self.apply_adam(&grads, config);
        }
    }

    fn evaluate(&self, inputs: &[f32]) -> Vec<f32> {
        let rows = inputs.len() / self.raw_input_width;
        let mut outputs = vec![0.0f32; rows * self.output_width];

        outputs
            .par_chunks_mut(self.output_width)
            .enumerate()
            .for_each(|(row, out)| {
                let input = &inputs[row * self.raw_input_width..][..self.raw_input_width];
                let mut encoded = Vec::new();
                self.encode(input, &mut encoded);
                let mut current = encoded;
                let mut next = Vec::new();
                for layer in &self.layers {
                    layer.forward(&current, &mut next);
                    std::mem::swap(&mut current, &mut next);
                }
                out.copy_from_slice(&current);
            });

        outputs
    }
}
