//! Core types, errors, and configuration for ThreatLens
//!
//! This crate contains the foundational types shared by the detection engine and
//! the training pipeline: the fixed threat taxonomy, severity tiers, the detection
//! result record, the error enum, and the YAML configuration tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Threat taxonomy
// ---------------------------------------------------------------------------

/// Number of threat classes the classifier distinguishes.
pub const NUM_CLASSES: usize = 3;

/// Threat category predicted by the classifier.
///
/// The ordinal of each variant is the index of its logit in the classifier
/// output and must never change: `0 = malware`, `1 = zero_day`, `2 = apt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatClass {
    /// Known malicious software.
    Malware,
    /// Previously unseen exploit.
    ZeroDay,
    /// Advanced persistent threat.
    Apt,
}

impl ThreatClass {
    /// All classes in ordinal order.
    pub const ALL: [ThreatClass; NUM_CLASSES] =
        [ThreatClass::Malware, ThreatClass::ZeroDay, ThreatClass::Apt];

    /// Ordinal index of this class in the classifier output.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Malware => 0,
            Self::ZeroDay => 1,
            Self::Apt => 2,
        }
    }

    /// Map a classifier output index back to a class.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Lower-case label used on the wire and in reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Malware => "malware",
            Self::ZeroDay => "zero_day",
            Self::Apt => "apt",
        }
    }
}

impl std::fmt::Display for ThreatClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ThreatClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "malware" => Ok(Self::Malware),
            "zero_day" => Ok(Self::ZeroDay),
            "apt" => Ok(Self::Apt),
            _ => Err(format!("unknown threat type: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Discrete risk bucket derived from confidence and threat class.
///
/// Variants are declared in ascending order so that `Ord` compares by risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityTier {
    /// Low risk, or confidence below every threshold.
    Low,
    /// Medium risk.
    Medium,
    /// High risk; prompt attention needed.
    High,
    /// Most severe; immediate attention required.
    Critical,
}

impl SeverityTier {
    /// All tiers from most to least severe.
    pub const DESCENDING: [SeverityTier; 4] = [
        SeverityTier::Critical,
        SeverityTier::High,
        SeverityTier::Medium,
        SeverityTier::Low,
    ];

    /// Lower-case label used on the wire and in reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for SeverityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SeverityTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Low" | "low" | "LOW" => Ok(Self::Low),
            "Medium" | "medium" | "MEDIUM" => Ok(Self::Medium),
            "High" | "high" | "HIGH" => Ok(Self::High),
            "Critical" | "critical" | "CRITICAL" => Ok(Self::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Detection result
// ---------------------------------------------------------------------------

/// Softmax output scaled to percentages, one entry per [`ThreatClass`].
///
/// Serializes as an object with exactly the keys `malware`, `zero_day` and `apt`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionScores {
    pub malware: f64,
    pub zero_day: f64,
    pub apt: f64,
}

impl PredictionScores {
    /// Build percentage scores from class probabilities in `[0, 1]`.
    #[must_use]
    pub fn from_probabilities(probs: [f64; NUM_CLASSES]) -> Self {
        Self {
            malware: probs[0] * 100.0,
            zero_day: probs[1] * 100.0,
            apt: probs[2] * 100.0,
        }
    }

    /// Score for a single class.
    #[must_use]
    pub fn get(&self, class: ThreatClass) -> f64 {
        match class {
            ThreatClass::Malware => self.malware,
            ThreatClass::ZeroDay => self.zero_day,
            ThreatClass::Apt => self.apt,
        }
    }

    /// Iterate `(class, score)` pairs in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = (ThreatClass, f64)> + '_ {
        ThreatClass::ALL.into_iter().map(|c| (c, self.get(c)))
    }

    /// Sum of all class scores; 100 up to floating-point error.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.malware + self.zero_day + self.apt
    }
}

/// Result of scoring one sample. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Unique identifier for this detection.
    pub id: Uuid,
    /// Predicted threat class (argmax of the softmax output).
    pub threat_type: ThreatClass,
    /// Severity derived from `threat_type` and the top probability.
    pub severity: SeverityTier,
    /// Top softmax probability as a percentage, rounded to two decimals.
    pub confidence: f64,
    /// Human-readable summary, e.g. `Detected apt with critical severity`.
    pub description: String,
    /// Name of the scanned file, if known.
    pub file_name: Option<String>,
    /// Raw input size in bytes, when bytes were supplied.
    pub file_size: Option<usize>,
    /// Network source of the sample, if known.
    pub source_ip: Option<String>,
    /// Per-class probabilities as percentages.
    pub prediction_scores: PredictionScores,
    /// Wall-clock analysis time, truncated to whole milliseconds.
    pub analysis_time_ms: u64,
    /// Name of the model that produced the result.
    pub model_name: String,
    /// Version of the model that produced the result.
    pub model_version: String,
    /// When the detection completed.
    pub detected_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Per-threat-type aggregate over a set of detections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatTypeStats {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    /// Mean reported confidence (percentage).
    pub mean_confidence: f64,
}

/// Aggregate counts of detections grouped by threat type and severity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatStatistics {
    pub by_type: BTreeMap<ThreatClass, ThreatTypeStats>,
}

impl ThreatStatistics {
    /// Aggregate a collection of detection results.
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a DetectionResult>) -> Self {
        let mut by_type: BTreeMap<ThreatClass, ThreatTypeStats> = BTreeMap::new();
        let mut confidence_sums: BTreeMap<ThreatClass, f64> = BTreeMap::new();

        for result in results {
            let stats = by_type.entry(result.threat_type).or_default();
            stats.total += 1;
            match result.severity {
                SeverityTier::Critical => stats.critical += 1,
                SeverityTier::High => stats.high += 1,
                SeverityTier::Medium => stats.medium += 1,
                SeverityTier::Low => stats.low += 1,
            }
            *confidence_sums.entry(result.threat_type).or_default() += result.confidence;
        }

        for (class, stats) in &mut by_type {
            let sum = confidence_sums.get(class).copied().unwrap_or(0.0);
            stats.mean_confidence = sum / stats.total as f64;
        }

        Self { by_type }
    }

    /// Total number of detections across all types.
    #[must_use]
    pub fn total(&self) -> usize {
        self.by_type.values().map(|s| s.total).sum()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for the detector and training pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreatLensConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub severity: SeverityConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ThreatLensConfig {
    /// Check every section for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.severity.validate()?;
        self.training.validate()
    }
}

/// Load a [`ThreatLensConfig`] from a YAML file at `path`.
///
/// # Errors
///
/// Returns [`ThreatError::Config`] if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<ThreatLensConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ThreatError::Config(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    serde_yaml::from_str(&contents)
        .map_err(|e| ThreatError::Config(format!("Failed to parse config YAML: {e}")))
}

/// Classifier and inference configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Length of every feature vector. Must be a positive multiple of 8.
    #[serde(default = "default_input_size")]
    pub input_size: usize,
    /// Parameter snapshot to load at startup; random init when absent or missing.
    #[serde(default)]
    pub weights_path: Option<String>,
    /// Model name reported in detection results.
    #[serde(default = "default_model_name")]
    pub name: String,
    /// Model version reported in detection results.
    #[serde(default = "default_model_version")]
    pub version: String,
    /// Seed for parameter init and synthetic features; entropy when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_input_size() -> usize {
    1024
}

fn default_model_name() -> String {
    "ThreatDetectionCNN".to_string()
}

fn default_model_version() -> String {
    "1.0.0".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_size: default_input_size(),
            weights_path: None,
            name: default_model_name(),
            version: default_model_version(),
            seed: None,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.input_size % 8 != 0 {
            return Err(ThreatError::Config(format!(
                "model.input_size must be a positive multiple of 8, got {}",
                self.input_size
            )));
        }
        Ok(())
    }
}

/// Confidence thresholds for each severity tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityConfig {
    #[serde(default = "default_critical_threshold")]
    pub critical: f64,
    #[serde(default = "default_high_threshold")]
    pub high: f64,
    #[serde(default = "default_medium_threshold")]
    pub medium: f64,
    #[serde(default = "default_low_threshold")]
    pub low: f64,
    /// APT detections strictly above this confidence are always critical.
    #[serde(default = "default_apt_escalation")]
    pub apt_escalation: f64,
}

fn default_critical_threshold() -> f64 {
    0.95
}

fn default_high_threshold() -> f64 {
    0.85
}

fn default_medium_threshold() -> f64 {
    0.70
}

fn default_low_threshold() -> f64 {
    0.50
}

fn default_apt_escalation() -> f64 {
    0.70
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            critical: default_critical_threshold(),
            high: default_high_threshold(),
            medium: default_medium_threshold(),
            low: default_low_threshold(),
            apt_escalation: default_apt_escalation(),
        }
    }
}

impl SeverityConfig {
    /// `(tier, threshold)` pairs from most to least severe.
    #[must_use]
    pub fn ordered_thresholds(&self) -> [(SeverityTier, f64); 4] {
        [
            (SeverityTier::Critical, self.critical),
            (SeverityTier::High, self.high),
            (SeverityTier::Medium, self.medium),
            (SeverityTier::Low, self.low),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        let ordered = self.ordered_thresholds();
        for (tier, value) in ordered
            .iter()
            .copied()
            .chain(std::iter::once((SeverityTier::Critical, self.apt_escalation)))
        {
            if !(0.0..=1.0).contains(&value) {
                return Err(ThreatError::Config(format!(
                    "severity threshold for {tier} must be within [0, 1], got {value}"
                )));
            }
        }
        for pair in ordered.windows(2) {
            if pair[0].1 <= pair[1].1 {
                return Err(ThreatError::Config(format!(
                    "severity thresholds must be strictly descending: {}={} is not above {}={}",
                    pair[0].0, pair[0].1, pair[1].0, pair[1].1
                )));
            }
        }
        Ok(())
    }
}

/// Hyperparameters and dataset sizes for fitting the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_train_samples")]
    pub train_samples: usize,
    #[serde(default = "default_val_samples")]
    pub val_samples: usize,
    #[serde(default = "default_training_seed")]
    pub seed: u64,
    /// Strength of the class-dependent signal in synthetic data (0 = pure noise).
    #[serde(default)]
    pub class_separation: f32,
    /// Where the fitted snapshot is written.
    #[serde(default = "default_output_path")]
    pub output_path: String,
}

fn default_epochs() -> usize {
    10
}

fn default_batch_size() -> usize {
    32
}

fn default_learning_rate() -> f64 {
    0.001
}

fn default_train_samples() -> usize {
    1000
}

fn default_val_samples() -> usize {
    200
}

fn default_training_seed() -> u64 {
    42
}

fn default_output_path() -> String {
    "models/threat_classifier.safetensors".to_string()
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            train_samples: default_train_samples(),
            val_samples: default_val_samples(),
            seed: default_training_seed(),
            class_separation: 0.0,
            output_path: default_output_path(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(ThreatError::Config("training.epochs must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(ThreatError::Config(
                "training.batch_size must be positive".into(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ThreatError::Config(format!(
                "training.learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if self.class_separation < 0.0 {
            return Err(ThreatError::Config(
                "training.class_separation must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: `text` (human-readable) or `json` (structured).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Core error types.
#[derive(thiserror::Error, Debug)]
pub enum ThreatError {
    /// Tensor, layer, or parameter-store failure.
    #[error("Model error: {0}")]
    Model(String),

    /// A feature batch does not have the configured length.
    #[error("Shape violation: expected feature length {expected}, got {actual}")]
    Shape {
        /// Configured input size.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// Training loop failure.
    #[error("Training error: {0}")]
    Training(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for `std::result::Result<T, ThreatError>`.
pub type Result<T> = std::result::Result<T, ThreatError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
