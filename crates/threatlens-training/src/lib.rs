//! Training pipeline for the ThreatLens classifier.
//!
//! Generates labelled synthetic data, iterates it in shuffled mini-batches,
//! fits a [`ThreatClassifier`](threatlens_detector::ThreatClassifier) with
//! cross-entropy and a moment-based optimizer, and reports per-epoch
//! loss, accuracy, and per-class validation metrics.

pub mod data;
pub mod dataset;
pub mod metrics;
pub mod trainer;

pub use dataset::{Dataset, SyntheticDataset};
pub use metrics::{compute_classification_metrics, ClassMetrics, ClassificationMetrics};
pub use trainer::{train, EpochMetrics, TrainConfig, TrainingReport};
