//! Reconstruction scorer: dense autoencoder trained on legitimate traffic
//!
//! Encoder `d → 64 → 16`, decoder `16 → 64 → d`, ReLU after the two wide
//! layers, linear bottleneck and output. The anomaly score of a row is its
//! mean squared reconstruction error over the feature components.

use crate::error::{PipelineError, Result};
use crate::models::optim::Adam;
use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Autoencoder training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoencoderConfig {
    /// Width of the two outer hidden layers
    pub hidden_dim: usize,
    /// Width of the bottleneck
    pub latent_dim: usize,
    pub learning_rate: f64,
    pub max_epochs: usize,
    /// Consecutive non-improving validation epochs before stopping
    pub patience: usize,
    pub batch_size: usize,
    /// Return the best-validation weights instead of the last epoch's
    pub restore_best_weights: bool,
    pub seed: Option<u64>,
}

impl Default for AutoencoderConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 64,
            latent_dim: 16,
            learning_rate: 1e-3,
            max_epochs: 50,
            patience: 5,
            batch_size: 64,
            restore_best_weights: true,
            seed: Some(42),
        }
    }
}

/// Per-epoch losses recorded by [`Autoencoder::fit`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_losses: Vec<f64>,
    pub val_losses: Vec<f64>,
    /// Zero-based epoch with the lowest validation loss
    pub best_epoch: usize,
    pub best_val_loss: f64,
    pub stopped_early: bool,
}

/// Patience-based early stopping on a monitored loss
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    stale_epochs: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            stale_epochs: 0,
        }
    }

    /// Record a loss. Returns `true` when the loss improved on the best so far.
    pub fn observe(&mut self, loss: f64) -> bool {
        if loss < self.best {
            self.best = loss;
            self.stale_epochs = 0;
            true
        } else {
            self.stale_epochs += 1;
            false
        }
    }

    pub fn should_stop(&self) -> bool {
        self.stale_epochs >= self.patience
    }

    pub fn best(&self) -> f64 {
        self.best
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DenseLayer {
    /// Shape (inputs, outputs)
    weights: Array2<f64>,
    bias: Array1<f64>,
    relu: bool,
}

impl DenseLayer {
    /// PyTorch-style init: U(-1/sqrt(fan_in), 1/sqrt(fan_in)) for weights and bias
    fn init(n_in: usize, n_out: usize, relu: bool, rng: &mut impl Rng) -> Self {
        let bound = 1.0 / (n_in as f64).sqrt();
        let weights = Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-bound..bound));
        let bias = Array1::from_shape_fn(n_out, |_| rng.gen_range(-bound..bound));
        Self {
            weights,
            bias,
            relu,
        }
    }

    fn forward(&self, input: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let z = input.dot(&self.weights) + &self.bias;
        let a = if self.relu {
            z.mapv(|v| v.max(0.0))
        } else {
            z.clone()
        };
        (z, a)
    }
}

struct ForwardPass {
    /// Input followed by every layer's output
    activations: Vec<Array2<f64>>,
    pre_activations: Vec<Array2<f64>>,
}

impl ForwardPass {
    fn output(&self) -> &Array2<f64> {
        &self.activations[self.activations.len() - 1]
    }
}

/// Dense encode-decode network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Autoencoder {
    config: AutoencoderConfig,
    input_dim: usize,
    layers: Vec<DenseLayer>,
}

impl Autoencoder {
    /// Build an untrained autoencoder for `input_dim` features
    pub fn new(input_dim: usize, config: AutoencoderConfig) -> Result<Self> {
        if input_dim == 0 || config.hidden_dim == 0 || config.latent_dim == 0 {
            return Err(PipelineError::InvalidParameter {
                name: "layer widths".to_string(),
                value: format!("{}/{}/{}", input_dim, config.hidden_dim, config.latent_dim),
                reason: "all widths must be positive".to_string(),
            });
        }
        if config.latent_dim >= config.hidden_dim {
            return Err(PipelineError::InvalidParameter {
                name: "latent_dim".to_string(),
                value: config.latent_dim.to_string(),
                reason: format!("must be narrower than the {}-wide hidden layer", config.hidden_dim),
            });
        }

        let mut rng = match config.seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        let (h, l) = (config.hidden_dim, config.latent_dim);
        let layers = vec![
            DenseLayer::init(input_dim, h, true, &mut rng),
            DenseLayer::init(h, l, false, &mut rng),
            DenseLayer::init(l, h, true, &mut rng),
            DenseLayer::init(h, input_dim, false, &mut rng),
        ];

        Ok(Self {
            config,
            input_dim,
            layers,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn config(&self) -> &AutoencoderConfig {
        &self.config
    }

    /// Train on legitimate-only data with early stopping on `val`.
    pub fn fit(&mut self, train: &Array2<f64>, val: &Array2<f64>) -> Result<TrainingHistory> {
        if train.nrows() == 0 {
            return Err(PipelineError::TrainingError("empty training split".to_string()));
        }
        if val.nrows() == 0 {
            return Err(PipelineError::TrainingError("empty validation split".to_string()));
        }
        for split in [train, val] {
            if split.ncols() != self.input_dim {
                return Err(PipelineError::TrainingError(format!(
                    "expected {} features, got {}",
                    self.input_dim,
                    split.ncols()
                )));
            }
        }

        let mut rng = match self.config.seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed.wrapping_add(1)),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        let mut optimizer = Adam::new(self.config.learning_rate);
        let mut stopper = EarlyStopping::new(self.config.patience);
        let mut history = TrainingHistory::default();
        let mut best_layers = self.layers.clone();

        let n = train.nrows();
        let batch_size = self.config.batch_size.max(1);
        let mut indices: Vec<usize> = (0..n).collect();

        for epoch in 0..self.config.max_epochs {
            indices.shuffle(&mut rng);

            let mut epoch_loss = 0.0;
            for batch in indices.chunks(batch_size) {
                let x_batch = train.select(Axis(0), batch);
                let pass = self.forward(&x_batch);
                epoch_loss += mse(pass.output(), &x_batch) * batch.len() as f64;

                let gradients = self.gradients(&x_batch, &pass);
                optimizer.begin_step();
                for (i, (grad_w, grad_b)) in gradients.into_iter().enumerate() {
                    let layer = &mut self.layers[i];
                    optimizer.update(2 * i, &mut layer.weights, &grad_w);
                    optimizer.update(2 * i + 1, &mut layer.bias, &grad_b);
                }
            }

            let train_loss = epoch_loss / n as f64;
            let val_loss = mse(&self.reconstruct_unchecked(val), val);
            if !val_loss.is_finite() {
                return Err(PipelineError::TrainingError(format!(
                    "validation loss diverged at epoch {}",
                    epoch + 1
                )));
            }

            history.train_losses.push(train_loss);
            history.val_losses.push(val_loss);
            debug!(epoch = epoch + 1, train_loss, val_loss, "Autoencoder epoch complete");

            if stopper.observe(val_loss) {
                history.best_epoch = epoch;
                best_layers = self.layers.clone();
            } else if stopper.should_stop() {
                history.stopped_early = true;
                info!(epoch = epoch + 1, "Early stopping");
                break;
            }
        }

        history.best_val_loss = stopper.best();
        if self.config.restore_best_weights {
            self.layers = best_layers;
        }

        info!(
            epochs = history.val_losses.len(),
            best_epoch = history.best_epoch + 1,
            best_val_loss = history.best_val_loss,
            "Autoencoder training complete"
        );

        Ok(history)
    }

    /// Reconstruct a batch
    pub fn reconstruct(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_width(x.ncols())?;
        Ok(self.reconstruct_unchecked(x))
    }

    /// Per-row mean squared reconstruction error
    pub fn reconstruction_errors(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let recon = self.reconstruct(x)?;
        let sq = (&recon - x).mapv(|d| d * d);
        Ok(sq
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(x.nrows())))
    }

    /// Reconstruction error of a single (already scaled) feature vector
    pub fn score(&self, features: &Array1<f64>) -> Result<f64> {
        let batch = features.clone().insert_axis(Axis(0));
        let errors = self.reconstruction_errors(&batch)?;
        Ok(errors[0])
    }

    fn check_width(&self, width: usize) -> Result<()> {
        if width == self.input_dim {
            Ok(())
        } else {
            Err(PipelineError::shape(
                format!("{} features", self.input_dim),
                format!("{} features", width),
            ))
        }
    }

    fn reconstruct_unchecked(&self, x: &Array2<f64>) -> Array2<f64> {
        self.layers
            .iter()
            .fold(x.to_owned(), |input, layer| layer.forward(&input).1)
    }

    fn forward(&self, x: &Array2<f64>) -> ForwardPass {
        let mut activations = vec![x.to_owned()];
        let mut pre_activations = Vec::with_capacity(self.layers.len());

        for layer in &self.layers {
            let (z, a) = layer.forward(&activations[activations.len() - 1]);
            pre_activations.push(z);
            activations.push(a);
        }

        ForwardPass {
            activations,
            pre_activations,
        }
    }

    /// Backpropagate the MSE loss averaged over every element of the batch
    fn gradients(&self, x: &Array2<f64>, pass: &ForwardPass) -> Vec<(Array2<f64>, Array1<f64>)> {
        let scale = 2.0 / x.len() as f64;
        let mut delta = (pass.output() - x) * scale;
        let mut gradients = Vec::with_capacity(self.layers.len());

        for i in (0..self.layers.len()).rev() {
            let a_prev = &pass.activations[i];
            gradients.push((a_prev.t().dot(&delta), delta.sum_axis(Axis(0))));

            if i > 0 {
                let mut upstream = delta.dot(&self.layers[i].weights.t());
                if self.layers[i - 1].relu {
                    upstream.zip_mut_with(&pass.pre_activations[i - 1], |d, &z| {
                        if z <= 0.0 {
                            *d = 0.0;
                        }
                    });
                }
                delta = upstream;
            }
        }

        gradients.reverse();
        gradients
    }
}

fn mse(prediction: &Array2<f64>, target: &Array2<f64>) -> f64 {
    if target.is_empty() {
        return 0.0;
    }
    (prediction - target).mapv(|d| d * d).sum() / target.len() as f64
}
