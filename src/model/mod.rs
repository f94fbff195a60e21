//! Surrogate-model capability interface.
//!
//! The compositor and the training driver treat the learned model as an
//! opaque collaborator: `train` consumes flat input/label buffers produced
//! by the dataset synthesizer, `evaluate` maps a flat input batch to a flat
//! output batch in one blocking call. The core never evaluates per sample.

pub mod mlp;

pub use mlp::Mlp;

/// Loss applied during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    /// Mean squared error over all label channels.
    MeanSquared,
    /// Binary cross-entropy on the visibility channel, MSE on the rest.
    VisibilityCrossEntropy,
}

/// Adam optimizer hyperparameters.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    /// Step size.
    pub learning_rate: f32,
    /// First-moment decay.
    pub beta1: f32,
    /// Second-moment decay.
    pub beta2: f32,
    /// Denominator fudge term.
    pub epsilon: f32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 2e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Full training run description handed to [`SurrogateModel::train`].
#[derive(Debug, Clone, Copy)]
pub struct TrainConfig {
    /// Rows per optimization step.
    pub batch_size: usize,
    /// Number of optimization steps.
    pub iterations: usize,
    /// Optimizer hyperparameters.
    pub optimizer: OptimizerConfig,
    /// Loss selection.
    pub loss: LossKind,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 1024,
            iterations: 2000,
            optimizer: OptimizerConfig::default(),
            loss: LossKind::MeanSquared,
        }
    }
}

/// Trainable function approximating nearest-hit query outputs.
///
/// Both buffers are flat and densely packed: `inputs` holds
/// `rows * input_width()` floats, labels/outputs hold
/// `rows * output_width()` floats.
pub trait SurrogateModel: Send + Sync {
    /// Width of one input row.
    fn input_width(&self) -> usize;

    /// Width of one label/output row.
    fn output_width(&self) -> usize;

    /// Fit the model to the given examples.
    fn train(&mut self, inputs: &[f32], labels: &[f32], config: &TrainConfig);

    /// Evaluate a whole batch, returning `rows * output_width()` floats.
    fn evaluate(&self, inputs: &[f32]) -> Vec<f32>;
}
