//! End-to-end detection: raw sample → features → logits → softmax → severity.
//!
//! Provides [`ThreatDetector`], which owns a [`ThreatClassifier`] and produces one
//! [`DetectionResult`] per call. Inference never mutates the classifier: it
//! always runs with dropout disabled and with normalisation layers reading the
//! accumulated running statistics.

use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use candle_core::Device;
use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use threatlens_core::{
    DetectionResult, ModelConfig, PredictionScores, Result, SeverityConfig, ThreatClass,
    ThreatError, NUM_CLASSES,
};
use uuid::Uuid;

use crate::classifier::{argmax_first, softmax, ThreatClassifier, WeightsSource};
use crate::feature_extraction::{FeatureExtractor, FeatureVector, RawSample};
use crate::inference_stats::{LatencyStats, LatencyTracker};
use crate::severity::SeverityPolicy;

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

/// Classifier output for a single feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Raw logits in class-ordinal order.
    pub logits: [f32; NUM_CLASSES],
    /// Softmax probabilities in class-ordinal order.
    pub probabilities: [f64; NUM_CLASSES],
    /// Argmax class; ties resolve to the lowest ordinal.
    pub threat_type: ThreatClass,
    /// Probability of `threat_type`, in `[0, 1]`.
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// ThreatDetector
// ---------------------------------------------------------------------------

/// Scores raw samples and packages the outcome as [`DetectionResult`]s.
///
/// # Example
///
/// ```
/// use candle_core::Device;
/// use threatlens_core::{ModelConfig, SeverityConfig};
/// use threatlens_detector::ThreatDetector;
///
/// let model = ModelConfig { input_size: 64, seed: Some(7), ..ModelConfig::default() };
/// let detector = ThreatDetector::from_config(&model, &SeverityConfig::default(), &Device::Cpu).unwrap();
/// let result = detector.detect(Some(&b"MZ\x90\x00"[..]), Some("sample.exe"), None).unwrap();
/// assert!((result.prediction_scores.total() - 100.0).abs() < 1e-3);
/// ```
pub struct ThreatDetector {
    classifier: ThreatClassifier,
    extractor: FeatureExtractor,
    policy: SeverityPolicy,
    weights: WeightsSource,
    model_name: String,
    model_version: String,
    /// Random source for the synthetic-feature path.
    rng: Mutex<ChaCha8Rng>,
    latency: LatencyTracker,
}

impl ThreatDetector {
    /// Build a detector from configuration.
    ///
    /// Loads `model.weights_path` when it exists; otherwise the classifier is
    /// randomly initialised and [`Self::weights_source`] reports
    /// [`WeightsSource::RandomInit`]. `model.seed` seeds both parameter
    /// initialisation and the synthetic-feature path.
    pub fn from_config(model: &ModelConfig, severity: &SeverityConfig, device: &Device) -> Result<Self> {
        model.validate()?;
        let policy = SeverityPolicy::from_config(severity)?;

        let mut rng = match model.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let (classifier, weights) = ThreatClassifier::load_or_random(
            model.weights_path.as_deref().map(Path::new),
            model.input_size,
            device,
            &mut rng,
        )?;

        tracing::info!(
            model_name = %model.name,
            model_version = %model.version,
            input_size = model.input_size,
            parameters = classifier.parameter_count(),
            trained = weights.is_trained(),
            "Threat detector ready"
        );

        Ok(Self::new(classifier, policy, weights)
            .with_model_info(&model.name, &model.version)
            .with_rng(rng))
    }

    /// Wrap an existing classifier.
    #[must_use]
    pub fn new(classifier: ThreatClassifier, policy: SeverityPolicy, weights: WeightsSource) -> Self {
        let defaults = ModelConfig::default();
        Self {
            extractor: FeatureExtractor::new(classifier.input_size()),
            classifier,
            policy,
            weights,
            model_name: defaults.name,
            model_version: defaults.version,
            rng: Mutex::new(ChaCha8Rng::from_entropy()),
            latency: LatencyTracker::default(),
        }
    }

    /// Set the model name and version reported in results.
    #[must_use]
    pub fn with_model_info(mut self, name: &str, version: &str) -> Self {
        self.model_name = name.to_string();
        self.model_version = version.to_string();
        self
    }

    /// Replace the random source used when no sample bytes are supplied.
    #[must_use]
    pub fn with_rng(mut self, rng: ChaCha8Rng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Score a sample.
    ///
    /// `raw` is the sample's bytes; `None` takes the synthetic-feature path.
    /// `analysis_time_ms` covers extraction through severity, truncated to
    /// whole milliseconds.
    pub fn detect(
        &self,
        raw: Option<&[u8]>,
        file_name: Option<&str>,
        source_ip: Option<&str>,
    ) -> Result<DetectionResult> {
        let start = Instant::now();

        let sample = raw.map_or(RawSample::Synthetic, RawSample::Bytes);
        let features = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            self.extractor.extract(sample, &mut *rng)
        };

        let prediction = self.classify(&features)?;
        let severity = self.policy.severity(prediction.confidence, prediction.threat_type);

        let elapsed = start.elapsed();
        self.latency.record(elapsed);

        let result = DetectionResult {
            id: Uuid::new_v4(),
            threat_type: prediction.threat_type,
            severity,
            confidence: round2(prediction.confidence * 100.0),
            description: format!(
                "Detected {} with {} severity",
                prediction.threat_type, severity
            ),
            file_name: file_name.map(str::to_string),
            file_size: raw.map(<[u8]>::len),
            source_ip: source_ip.map(str::to_string),
            prediction_scores: PredictionScores::from_probabilities(prediction.probabilities),
            analysis_time_ms: elapsed.as_millis() as u64,
            model_name: self.model_name.clone(),
            model_version: self.model_version.clone(),
            detected_at: Utc::now(),
        };

        tracing::info!(
            threat_type = %result.threat_type,
            severity = %result.severity,
            confidence = result.confidence,
            file_name = result.file_name.as_deref().unwrap_or("-"),
            analysis_time_ms = result.analysis_time_ms,
            "Detection complete"
        );

        Ok(result)
    }

    /// Run the classifier in inference mode on one feature vector.
    pub fn classify(&self, features: &FeatureVector) -> Result<Prediction> {
        let logits = self
            .classifier
            .forward_features(std::slice::from_ref(features), false)?;
        let probs = softmax(&logits)?;

        let logits: Vec<f32> = logits
            .squeeze(0)
            .and_then(|t| t.to_vec1())
            .map_err(|e| ThreatError::Model(format!("Failed to extract logits: {e}")))?;
        let probs: Vec<f32> = probs
            .squeeze(0)
            .and_then(|t| t.to_vec1())
            .map_err(|e| ThreatError::Model(format!("Failed to extract probabilities: {e}")))?;

        if probs.len() != NUM_CLASSES || logits.len() != NUM_CLASSES {
            return Err(ThreatError::Model(format!(
                "Expected {NUM_CLASSES} output classes, got {}",
                probs.len()
            )));
        }

        let best = argmax_first(&probs);
        let threat_type = ThreatClass::from_index(best)
            .ok_or_else(|| ThreatError::Model(format!("No threat class for index {best}")))?;

        let mut probabilities = [0.0_f64; NUM_CLASSES];
        for (slot, p) in probabilities.iter_mut().zip(&probs) {
            *slot = f64::from(*p);
        }
        let logits = [logits[0], logits[1], logits[2]];

        tracing::debug!(
            raw_logits = ?logits,
            softmax = ?probabilities,
            top_class = %threat_type,
            "Classifier output"
        );

        Ok(Prediction {
            logits,
            probabilities,
            threat_type,
            confidence: probabilities[best],
        })
    }

    /// Where the classifier's parameters came from.
    #[must_use]
    pub fn weights_source(&self) -> &WeightsSource {
        &self.weights
    }

    /// Latency statistics over recent detections, or `None` before the first.
    #[must_use]
    pub fn latency_stats(&self) -> Option<LatencyStats> {
        self.latency.stats()
    }

    #[must_use]
    pub fn classifier(&self) -> &ThreatClassifier {
        &self.classifier
    }

    #[must_use]
    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    #[must_use]
    pub fn policy(&self) -> &SeverityPolicy {
        &self.policy
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use threatlens_core::SeverityTier;

    fn detector(seed: u64) -> ThreatDetector {
        let model = ModelConfig {
            input_size: 64,
            seed: Some(seed),
            ..ModelConfig::default()
        };
        ThreatDetector::from_config(&model, &SeverityConfig::default(), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_round2() {
        assert!((round2(12.345_678) - 12.35).abs() < 1e-12);
        assert!((round2(99.994) - 99.99).abs() < 1e-12);
        assert!((round2(0.0)).abs() < 1e-12);
    }

    #[test]
    fn test_detect_populates_metadata() {
        let d = detector(1);
        let result = d
            .detect(Some(&[1u8, 2, 3, 4][..]), Some("a.bin"), Some("10.0.0.1"))
            .unwrap();
        assert_eq!(result.file_name.as_deref(), Some("a.bin"));
        assert_eq!(result.source_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(result.file_size, Some(4));
        assert_eq!(result.model_name, "ThreatDetectionCNN");
        assert_eq!(result.model_version, "1.0.0");
        assert_eq!(
            result.description,
            format!("Detected {} with {} severity", result.threat_type, result.severity)
        );
    }

    #[test]
    fn test_confidence_is_top_score_rounded() {
        let d = detector(2);
        let result = d.detect(Some(&b"hello world"[..]), None, None).unwrap();
        let top = result.prediction_scores.get(result.threat_type);
        assert!((result.confidence - round2(top)).abs() < 1e-9);
        for (_, score) in result.prediction_scores.iter() {
            assert!(score <= top);
        }
    }

    #[test]
    fn test_severity_uses_unrounded_confidence() {
        let d = detector(3);
        let fv = d.extractor().from_bytes(b"payload");
        let prediction = d.classify(&fv).unwrap();
        let expected = d.policy().severity(prediction.confidence, prediction.threat_type);
        let result = d.detect(Some(&b"payload"[..]), None, None).unwrap();
        assert_eq!(result.severity, expected);
        assert!(SeverityTier::DESCENDING.contains(&result.severity));
    }

    #[test]
    fn test_synthetic_path_without_bytes() {
        let d = detector(4);
        let result = d.detect(None, None, None).unwrap();
        assert_eq!(result.file_size, None);
        assert!((result.prediction_scores.total() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_latency_is_recorded() {
        let d = detector(5);
        assert!(d.latency_stats().is_none());
        d.detect(Some(&[0u8; 10][..]), None, None).unwrap();
        d.detect(Some(&[9u8; 10][..]), None, None).unwrap();
        assert_eq!(d.latency_stats().unwrap().count, 2);
    }

    #[test]
    fn test_random_init_is_reported() {
        let d = detector(6);
        assert_eq!(d.weights_source(), &WeightsSource::RandomInit);
    }

    #[test]
    fn test_invalid_model_config_is_rejected() {
        let model = ModelConfig {
            input_size: 12,
            ..ModelConfig::default()
        };
        assert!(ThreatDetector::from_config(&model, &SeverityConfig::default(), &Device::Cpu).is_err());
    }
}
