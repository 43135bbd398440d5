//! Byte-level threat classification engine for ThreatLens
//!
//! Turns a raw sample into a [`DetectionResult`](threatlens_core::DetectionResult):
//!
//! ```text
//! bytes ─► FeatureExtractor ─► ThreatClassifier ─► softmax ─► SeverityPolicy ─► DetectionResult
//! ```
//!
//! - [`feature_extraction`]: fixed-length, per-sample normalised feature vectors.
//! - [`classifier`]: the three-stage convolutional network (candle).
//! - [`severity`]: ordered confidence thresholds with APT escalation.
//! - [`pipeline`]: [`ThreatDetector`], which ties the stages together.
//!
//! Uses structured logging via [`tracing`]. Set the `RUST_LOG` environment
//! variable to control log verbosity (e.g., `RUST_LOG=threatlens_detector=debug`).

pub mod classifier;
pub mod device;
pub mod feature_extraction;
pub mod inference_stats;
pub mod pipeline;
pub mod severity;

pub use classifier::{ThreatClassifier, WeightsSource};
pub use device::select_device;
pub use feature_extraction::{FeatureExtractor, FeatureVector, RawSample, DEFAULT_INPUT_SIZE};
pub use inference_stats::{LatencyStats, LatencyTracker};
pub use pipeline::{Prediction, ThreatDetector};
pub use severity::SeverityPolicy;
