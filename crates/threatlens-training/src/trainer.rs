//! Training loop for the threat classifier.
//!
//! Each epoch runs a training pass (dropout on, batch statistics, parameters
//! updated) followed by a validation pass (dropout off, running statistics,
//! parameters frozen). The final parameters are written once all epochs are
//! done.

use crate::data::BatchIterator;
use crate::dataset::Dataset;
use crate::metrics::{compute_classification_metrics, ClassificationMetrics};
use candle_core::{Tensor, D};
use candle_nn::Optimizer;
use std::path::PathBuf;
use threatlens_core::{Result, ThreatError, TrainingConfig};
use threatlens_detector::ThreatClassifier;

/// Training configuration.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    /// Base seed for per-epoch shuffling.
    pub seed: u64,
    /// Snapshot destination; nothing is written when `None`.
    pub output_path: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            batch_size: 32,
            epochs: 10,
            seed: 42,
            output_path: None,
        }
    }
}

impl From<&TrainingConfig> for TrainConfig {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            batch_size: config.batch_size,
            epochs: config.epochs,
            seed: config.seed,
            output_path: Some(PathBuf::from(&config.output_path)),
        }
    }
}

impl TrainConfig {
    fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(ThreatError::Training("epochs must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(ThreatError::Training("batch_size must be positive".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ThreatError::Training(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Per-epoch metrics logged during training.
#[derive(Debug, Clone)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub val_metrics: ClassificationMetrics,
}

/// Running loss and accuracy over one pass of batches.
///
/// Loss is the mean of the per-batch mean losses, so a short final batch
/// weighs the same as a full one.
#[derive(Debug, Clone, Default)]
struct EpochAccumulator {
    loss_sum: f64,
    batches: usize,
    correct: usize,
    seen: usize,
}

impl EpochAccumulator {
    fn record(&mut self, batch_loss: f64, preds: &[u32], labels: &[u32]) {
        self.loss_sum += batch_loss;
        self.batches += 1;
        self.correct += preds.iter().zip(labels).filter(|(p, l)| p == l).count();
        self.seen += labels.len();
    }

    fn mean_loss(&self) -> f64 {
        if self.batches > 0 {
            self.loss_sum / self.batches as f64
        } else {
            0.0
        }
    }

    fn accuracy(&self) -> f64 {
        if self.seen > 0 {
            self.correct as f64 / self.seen as f64
        } else {
            0.0
        }
    }
}

/// Outcome of a full training run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub history: Vec<EpochMetrics>,
    /// Where the fitted parameters were written, if anywhere.
    pub saved_to: Option<PathBuf>,
}

impl TrainingReport {
    #[must_use]
    pub fn final_epoch(&self) -> Option<&EpochMetrics> {
        self.history.last()
    }
}

/// Fit `classifier` on `train_set`, reporting validation metrics on `val_set`
/// after every epoch.
///
/// Parameters are updated in place; the classifier is ready for inference
/// when this returns.
///
/// # Errors
///
/// Returns [`ThreatError::Training`] for invalid hyperparameters or an empty
/// training set, [`ThreatError::Shape`] when the data does not match the
/// classifier's input size, and propagates save failures.
pub fn train(
    classifier: &ThreatClassifier,
    train_set: &Dataset,
    val_set: &Dataset,
    config: &TrainConfig,
) -> Result<TrainingReport> {
    config.validate()?;
    if train_set.is_empty() {
        return Err(ThreatError::Training("training set is empty".into()));
    }
    for set in [train_set, val_set] {
        if !set.is_empty() && set.input_size() != classifier.input_size() {
            return Err(ThreatError::Shape {
                expected: classifier.input_size(),
                actual: set.input_size(),
            });
        }
    }

    let device = classifier.device();
    let (train_inputs, train_labels) = train_set.to_tensors(device)?;
    let mut train_batches = BatchIterator::new(train_inputs, train_labels, config.batch_size)?;
    let mut val_batches = if val_set.is_empty() {
        None
    } else {
        let (val_inputs, val_labels) = val_set.to_tensors(device)?;
        Some(BatchIterator::new(val_inputs, val_labels, config.batch_size)?)
    };

    let mut optimizer = candle_nn::AdamW::new(
        classifier.varmap().all_vars(),
        candle_nn::ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        },
    )
    .map_err(|e| ThreatError::Training(format!("Failed to create optimizer: {e}")))?;

    tracing::info!(
        train_samples = train_set.len(),
        val_samples = val_set.len(),
        learning_rate = config.learning_rate,
        batch_size = config.batch_size,
        epochs = config.epochs,
        parameters = classifier.parameter_count(),
        "Starting training"
    );

    let mut history = Vec::with_capacity(config.epochs);

    for epoch in 0..config.epochs {
        train_batches.reshuffle(config.seed, epoch);

        let mut running = EpochAccumulator::default();

        while let Some((batch_inputs, batch_labels)) = train_batches.next_batch()? {
            let logits = classifier.forward_t(&batch_inputs, true)?;
            let loss = candle_nn::loss::cross_entropy(&logits, &batch_labels)
                .map_err(|e| ThreatError::Training(format!("Loss computation failed: {e}")))?;

            optimizer
                .backward_step(&loss)
                .map_err(|e| ThreatError::Training(format!("Backward step failed: {e}")))?;

            let (preds, labels) = predictions_and_labels(&logits, &batch_labels)?;
            running.record(scalar(&loss)?, &preds, &labels);
        }

        let train_loss = running.mean_loss();
        let train_accuracy = running.accuracy();

        let (val_loss, val_metrics) = match val_batches.as_mut() {
            Some(batches) => validate(classifier, batches)?,
            None => (0.0, ClassificationMetrics::default()),
        };

        tracing::info!(
            epoch = epoch + 1,
            train_loss,
            train_accuracy,
            val_loss,
            val_accuracy = val_metrics.accuracy,
            "Epoch complete"
        );
        tracing::debug!(epoch = epoch + 1, metrics = %val_metrics, "Validation detail");

        history.push(EpochMetrics {
            epoch: epoch + 1,
            train_loss,
            train_accuracy,
            val_loss,
            val_accuracy: val_metrics.accuracy,
            val_metrics,
        });
    }

    let saved_to = match &config.output_path {
        Some(path) => {
            classifier.save(path)?;
            tracing::info!(path = %path.display(), "Saved classifier parameters");
            Some(path.clone())
        }
        None => None,
    };

    Ok(TrainingReport { history, saved_to })
}

fn validate(
    classifier: &ThreatClassifier,
    batches: &mut BatchIterator,
) -> Result<(f64, ClassificationMetrics)> {
    batches.rewind();

    let mut running = EpochAccumulator::default();
    let mut all_preds = Vec::new();
    let mut all_labels = Vec::new();

    while let Some((batch_inputs, batch_labels)) = batches.next_batch()? {
        let logits = classifier.forward_t(&batch_inputs, false)?;
        let loss = candle_nn::loss::cross_entropy(&logits, &batch_labels)
            .map_err(|e| ThreatError::Training(format!("Val loss failed: {e}")))?;

        let (preds, labels) = predictions_and_labels(&logits, &batch_labels)?;
        running.record(scalar(&loss)?, &preds, &labels);
        all_preds.extend(preds);
        all_labels.extend(labels);
    }

    Ok((
        running.mean_loss(),
        compute_classification_metrics(&all_preds, &all_labels),
    ))
}

fn predictions_and_labels(logits: &Tensor, labels: &Tensor) -> Result<(Vec<u32>, Vec<u32>)> {
    let preds: Vec<u32> = logits
        .argmax(D::Minus1)
        .and_then(|t| t.to_vec1())
        .map_err(|e| ThreatError::Training(format!("argmax failed: {e}")))?;
    let labels: Vec<u32> = labels
        .to_vec1()
        .map_err(|e| ThreatError::Training(format!("labels to vec: {e}")))?;
    Ok((preds, labels))
}

fn scalar(loss: &Tensor) -> Result<f64> {
    loss.to_scalar::<f32>()
        .map(f64::from)
        .map_err(|e| ThreatError::Training(format!("Loss scalar failed: {e}")))
}
