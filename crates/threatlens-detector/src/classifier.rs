//! Staged convolutional classifier for byte-level threat detection.
//!
//! Maps a normalised feature vector of length `input_size` to three logits
//! (`malware`, `zero_day`, `apt`).
//!
//! # Architecture
//!
//! ```text
//! Input [B, 1, L]
//!   → Conv1d(1→64,   k=5) → BatchNorm → ReLU → MaxPool(2)    [B, 64,  L/2]
//!   → Conv1d(64→128, k=5) → BatchNorm → ReLU → MaxPool(2)    [B, 128, L/4]
//!   → Conv1d(128→256,k=3) → BatchNorm → ReLU → MaxPool(2)    [B, 256, L/8]
//!   → Flatten                                                [B, 256·L/8]
//!   → Linear(512) → ReLU → Dropout(0.5)
//!   → Linear(128) → ReLU → Dropout(0.5)
//!   → Linear(3)                                              logits
//! ```
//!
//! Convolutions use same-length padding, so only pooling shortens the sequence.
//! Dropout and batch statistics are controlled by the `train` flag passed to
//! [`ThreatClassifier::forward_t`]; the classifier itself carries no mode state.
//!
//! All parameters live in a [`VarMap`] owned by the classifier. Snapshots are
//! safetensors files containing every variable, running normalisation
//! statistics included.

use std::path::Path;

use candle_core::{DType, Device, Tensor, D};
use candle_nn::{BatchNorm, Conv1d, Dropout, Linear, Module, ModuleT, VarBuilder, VarMap};
use rand::Rng;
use threatlens_core::{Result, ThreatError, NUM_CLASSES};

use crate::feature_extraction::FeatureVector;

/// Channel widths of the three convolution stages.
const STAGE_CHANNELS: [usize; 3] = [64, 128, 256];

/// Kernel widths of the three convolution stages.
const STAGE_KERNELS: [usize; 3] = [5, 5, 3];

/// Hidden layer dimensions of the dense head.
const HIDDEN_1: usize = 512;
const HIDDEN_2: usize = 128;

/// Dropout rate after each hidden dense layer.
const DROPOUT_RATE: f32 = 0.5;

/// Sequence length is halved once per stage.
const DOWNSAMPLE_FACTOR: usize = 8;

/// Where the classifier's parameters came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightsSource {
    /// Loaded from a snapshot at this path.
    Snapshot(String),
    /// Randomly initialised; predictions carry no trained signal.
    RandomInit,
}

impl WeightsSource {
    #[must_use]
    pub fn is_trained(&self) -> bool {
        matches!(self, Self::Snapshot(_))
    }
}

/// One local-pattern stage: convolution, normalisation, rectification, 2:1 pooling.
struct ConvStage {
    conv: Conv1d,
    norm: BatchNorm,
}

impl ConvStage {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        vb_conv: VarBuilder,
        vb_norm: VarBuilder,
    ) -> candle_core::Result<Self> {
        let cfg = candle_nn::Conv1dConfig {
            padding: kernel / 2,
            ..Default::default()
        };
        let conv = candle_nn::conv1d(in_channels, out_channels, kernel, cfg, vb_conv)?;
        let norm = candle_nn::batch_norm(out_channels, candle_nn::BatchNormConfig::default(), vb_norm)?;
        Ok(Self { conv, norm })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        let xs = self.norm.forward_t(&xs, train)?;
        halve(&xs.relu()?)
    }
}

/// Max-pool with window and stride 2 over the last dimension of `[B, C, L]`.
fn halve(xs: &Tensor) -> candle_core::Result<Tensor> {
    let (batch, channels, len) = xs.dims3()?;
    xs.reshape((batch, channels, len / 2, 2))?.max(D::Minus1)
}

/// Three-stage convolutional threat classifier.
pub struct ThreatClassifier {
    stages: [ConvStage; 3],
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
    dropout: Dropout,
    varmap: VarMap,
    input_size: usize,
    device: Device,
}

impl ThreatClassifier {
    /// Create a classifier with freshly initialised parameters drawn from `rng`.
    ///
    /// Convolution and linear weights and biases are drawn uniformly from
    /// `[-1/sqrt(fan_in), 1/sqrt(fan_in)]`; normalisation layers start at the
    /// identity. The same seed always yields the same parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ThreatError::Config`] when `input_size` is not a positive
    /// multiple of 8.
    pub fn new_random<R: Rng + ?Sized>(input_size: usize, device: &Device, rng: &mut R) -> Result<Self> {
        let classifier = Self::build(input_size, device)?;
        classifier.reinitialize(rng)?;
        Ok(classifier)
    }

    /// Create a classifier and load its parameters from a safetensors snapshot.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or its tensors do not match the
    /// architecture for `input_size`.
    pub fn load(path: impl AsRef<Path>, input_size: usize, device: &Device) -> Result<Self> {
        let mut classifier = Self::build(input_size, device)?;
        classifier.load_weights(path)?;
        Ok(classifier)
    }

    /// Load the snapshot at `path` if it exists, otherwise fall back to random
    /// initialisation from `rng`.
    ///
    /// A missing snapshot is not an error: the returned [`WeightsSource`] tells
    /// the caller which parameters are in use. A snapshot that exists but cannot
    /// be loaded is still an error.
    pub fn load_or_random<R: Rng + ?Sized>(
        path: Option<&Path>,
        input_size: usize,
        device: &Device,
        rng: &mut R,
    ) -> Result<(Self, WeightsSource)> {
        match path {
            Some(p) if p.exists() => {
                let classifier = Self::load(p, input_size, device)?;
                tracing::info!(path = %p.display(), "Loaded classifier snapshot");
                Ok((classifier, WeightsSource::Snapshot(p.display().to_string())))
            }
            Some(p) => {
                tracing::warn!(
                    path = %p.display(),
                    "No classifier snapshot found, using randomly initialised weights"
                );
                Ok((Self::new_random(input_size, device, rng)?, WeightsSource::RandomInit))
            }
            None => {
                tracing::warn!("No classifier snapshot configured, using randomly initialised weights");
                Ok((Self::new_random(input_size, device, rng)?, WeightsSource::RandomInit))
            }
        }
    }

    fn build(input_size: usize, device: &Device) -> Result<Self> {
        if input_size == 0 || input_size % DOWNSAMPLE_FACTOR != 0 {
            return Err(ThreatError::Config(format!(
                "input_size must be a positive multiple of {DOWNSAMPLE_FACTOR}, got {input_size}"
            )));
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let stage = |idx: usize, in_channels: usize| {
            ConvStage::new(
                in_channels,
                STAGE_CHANNELS[idx],
                STAGE_KERNELS[idx],
                vb.pp(format!("conv{}", idx + 1)),
                vb.pp(format!("bn{}", idx + 1)),
            )
            .map_err(|e| ThreatError::Model(format!("Failed to create stage {}: {e}", idx + 1)))
        };
        let stages = [
            stage(0, 1)?,
            stage(1, STAGE_CHANNELS[0])?,
            stage(2, STAGE_CHANNELS[1])?,
        ];

        let flat = Self::flat_size(input_size);
        let fc1 = candle_nn::linear(flat, HIDDEN_1, vb.pp("fc1"))
            .map_err(|e| ThreatError::Model(format!("Failed to create fc1: {e}")))?;
        let fc2 = candle_nn::linear(HIDDEN_1, HIDDEN_2, vb.pp("fc2"))
            .map_err(|e| ThreatError::Model(format!("Failed to create fc2: {e}")))?;
        let fc3 = candle_nn::linear(HIDDEN_2, NUM_CLASSES, vb.pp("fc3"))
            .map_err(|e| ThreatError::Model(format!("Failed to create fc3: {e}")))?;

        Ok(Self {
            stages,
            fc1,
            fc2,
            fc3,
            dropout: Dropout::new(DROPOUT_RATE),
            varmap,
            input_size,
            device: device.clone(),
        })
    }

    /// Length of the flattened convolutional output for `input_size`.
    #[must_use]
    pub fn flat_size(input_size: usize) -> usize {
        STAGE_CHANNELS[2] * (input_size / DOWNSAMPLE_FACTOR)
    }

    /// Overwrite every learnable weight and bias with values drawn from `rng`.
    ///
    /// Variables are visited in name order so the result depends only on the
    /// seed. Normalisation parameters and running statistics keep their
    /// constant initial values.
    fn reinitialize<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<()> {
        let vars = self
            .varmap
            .data()
            .lock()
            .map_err(|_| ThreatError::Model("parameter store lock poisoned".into()))?;

        let mut names: Vec<&String> = vars.keys().filter(|n| !n.starts_with("bn")).collect();
        names.sort();

        for name in names {
            let var = &vars[name];
            let weight_name = match name.strip_suffix(".bias") {
                Some(prefix) => format!("{prefix}.weight"),
                None => name.clone(),
            };
            let weight_dims = vars
                .get(&weight_name)
                .map(|w| w.dims().to_vec())
                .ok_or_else(|| ThreatError::Model(format!("no weight found for {name}")))?;
            let fan_in: usize = weight_dims.iter().skip(1).product();
            let bound = 1.0 / (fan_in.max(1) as f32).sqrt();

            let values: Vec<f32> = (0..var.elem_count())
                .map(|_| rng.gen_range(-bound..bound))
                .collect();
            let init = Tensor::from_vec(values, var.shape(), &self.device)
                .map_err(|e| ThreatError::Model(format!("Failed to build init for {name}: {e}")))?;
            var.set(&init)
                .map_err(|e| ThreatError::Model(format!("Failed to initialise {name}: {e}")))?;
        }
        Ok(())
    }

    /// Replace all parameters with those stored in a safetensors snapshot.
    pub fn load_weights(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.varmap.load(path).map_err(|e| {
            ThreatError::Model(format!(
                "Failed to load classifier weights from {}: {e}",
                path.display()
            ))
        })
    }

    /// Write all parameters, including running statistics, to `path`.
    ///
    /// Parent directories are created as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.varmap.save(path).map_err(|e| {
            ThreatError::Model(format!(
                "Failed to save classifier weights to {}: {e}",
                path.display()
            ))
        })
    }

    /// Run the classifier over a batch and return logits of shape `[B, 3]`.
    ///
    /// Accepts `[L]` (single vector), `[B, L]`, or `[B, 1, L]`; the channel
    /// dimension is inserted when missing. With `train = true` dropout is
    /// active and normalisation uses batch statistics (updating the running
    /// statistics); with `train = false` the output is deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`ThreatError::Shape`] when the last dimension is not
    /// `input_size` or the channel dimension is not 1.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.promote(xs)?;
        self.forward_inner(&xs, train)
            .map_err(|e| ThreatError::Model(format!("Classifier forward failed: {e}")))
    }

    /// Stack feature vectors into a `[B, L]` tensor and run [`Self::forward_t`].
    pub fn forward_features(&self, batch: &[FeatureVector], train: bool) -> Result<Tensor> {
        let xs = self.batch_tensor(batch)?;
        self.forward_t(&xs, train)
    }

    /// Stack feature vectors into a `[B, L]` tensor on this classifier's device.
    pub fn batch_tensor(&self, batch: &[FeatureVector]) -> Result<Tensor> {
        let mut flat = Vec::with_capacity(batch.len() * self.input_size);
        for fv in batch {
            if fv.len() != self.input_size {
                return Err(ThreatError::Shape {
                    expected: self.input_size,
                    actual: fv.len(),
                });
            }
            flat.extend_from_slice(fv.as_slice());
        }
        Tensor::from_vec(flat, (batch.len(), self.input_size), &self.device)
            .map_err(|e| ThreatError::Model(format!("Failed to build feature batch: {e}")))
    }

    fn promote(&self, xs: &Tensor) -> Result<Tensor> {
        let dims = xs.dims();
        let actual = dims.last().copied().unwrap_or(0);
        if actual != self.input_size {
            return Err(ThreatError::Shape {
                expected: self.input_size,
                actual,
            });
        }
        let promoted = match dims.len() {
            1 => xs.reshape((1, 1, self.input_size)),
            2 => xs.unsqueeze(1),
            3 if dims[1] == 1 => Ok(xs.clone()),
            _ => {
                return Err(ThreatError::Shape {
                    expected: self.input_size,
                    actual: xs.elem_count(),
                })
            }
        };
        promoted
            .and_then(|t| t.to_dtype(DType::F32))
            .map_err(|e| ThreatError::Model(format!("Failed to shape classifier input: {e}")))
    }

    fn forward_inner(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut xs = xs.clone();
        for stage in &self.stages {
            xs = stage.forward_t(&xs, train)?;
        }
        let xs = xs.flatten_from(1)?;

        let xs = self.fc1.forward(&xs)?.relu()?;
        let xs = self.dropout.forward(&xs, train)?;
        let xs = self.fc2.forward(&xs)?.relu()?;
        let xs = self.dropout.forward(&xs, train)?;
        self.fc3.forward(&xs)
    }

    /// Parameter store, shared with the optimizer during training.
    #[must_use]
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Number of learnable scalars, excluding running statistics.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        let vars = self.varmap.data().lock().unwrap_or_else(|e| e.into_inner());
        vars.iter()
            .filter(|(name, _)| !name.contains("running_"))
            .map(|(_, var)| var.elem_count())
            .sum()
    }

    #[must_use]
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Returns a reference to the device this classifier runs on.
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Row-wise softmax of `[B, C]` logits.
pub fn softmax(logits: &Tensor) -> Result<Tensor> {
    candle_nn::ops::softmax(logits, D::Minus1)
        .map_err(|e| ThreatError::Model(format!("Softmax failed: {e}")))
}

/// Index of the largest value; ties resolve to the lowest index.
#[must_use]
pub fn argmax_first(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
