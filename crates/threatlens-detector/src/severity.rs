//! Severity policy: maps a prediction's confidence and class to a [`SeverityTier`].
//!
//! Thresholds are held as an explicit list of `(tier, threshold)` pairs in
//! strictly descending order and scanned front to back; the first threshold
//! the confidence meets or exceeds wins. APT detections are escalated to
//! critical ahead of the scan once confidence is strictly above the escalation
//! threshold.
//!
//! | Tier     | Threshold |
//! |----------|-----------|
//! | critical | 0.95      |
//! | high     | 0.85      |
//! | medium   | 0.70      |
//! | low      | 0.50      |
//!
//! Confidence below every threshold is reported as `low`.

use threatlens_core::{Result, SeverityConfig, SeverityTier, ThreatClass, ThreatError};

/// Deterministic mapping from `(confidence, threat class)` to a severity tier.
#[derive(Debug, Clone, PartialEq)]
pub struct SeverityPolicy {
    /// Tier thresholds, strictly descending.
    tiers: Vec<(SeverityTier, f64)>,
    /// APT confidence strictly above this value is always critical.
    apt_escalation: f64,
}

impl SeverityPolicy {
    /// Build a policy from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ThreatError::Config`] if the thresholds are not strictly
    /// descending or fall outside `[0, 1]`.
    pub fn from_config(config: &SeverityConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tiers: config.ordered_thresholds().to_vec(),
            apt_escalation: config.apt_escalation,
        })
    }

    /// Build a policy from explicit `(tier, threshold)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ThreatError::Config`] if `tiers` is empty or not strictly
    /// descending.
    pub fn new(tiers: Vec<(SeverityTier, f64)>, apt_escalation: f64) -> Result<Self> {
        if tiers.is_empty() {
            return Err(ThreatError::Config("severity policy needs at least one tier".into()));
        }
        if tiers.windows(2).any(|w| w[0].1 <= w[1].1) {
            return Err(ThreatError::Config(
                "severity thresholds must be strictly descending".into(),
            ));
        }
        Ok(Self {
            tiers,
            apt_escalation,
        })
    }

    /// Severity for a prediction with top-class probability `confidence` in `[0, 1]`.
    #[must_use]
    pub fn severity(&self, confidence: f64, threat_type: ThreatClass) -> SeverityTier {
        if threat_type == ThreatClass::Apt && confidence > self.apt_escalation {
            return SeverityTier::Critical;
        }

        self.tiers
            .iter()
            .find(|(_, threshold)| confidence >= *threshold)
            .map(|(tier, _)| *tier)
            .unwrap_or(SeverityTier::Low)
    }

    /// The ordered `(tier, threshold)` pairs this policy scans.
    #[must_use]
    pub fn tiers(&self) -> &[(SeverityTier, f64)] {
        &self.tiers
    }
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        let config = SeverityConfig::default();
        Self {
            tiers: config.ordered_thresholds().to_vec(),
            apt_escalation: config.apt_escalation,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_cases() {
        let policy = SeverityPolicy::default();
        assert_eq!(policy.severity(0.71, ThreatClass::Apt), SeverityTier::Critical);
        assert_eq!(policy.severity(0.96, ThreatClass::Malware), SeverityTier::Critical);
        assert_eq!(policy.severity(0.86, ThreatClass::Malware), SeverityTier::High);
        assert_eq!(policy.severity(0.40, ThreatClass::ZeroDay), SeverityTier::Low);
    }

    #[test]
    fn test_apt_escalation_is_strict() {
        let policy = SeverityPolicy::default();
        assert_ne!(policy.severity(0.70, ThreatClass::Apt), SeverityTier::Critical);
        // Exactly 0.70 falls through to the generic scan and meets medium.
        assert_eq!(policy.severity(0.70, ThreatClass::Apt), SeverityTier::Medium);
        assert_eq!(policy.severity(0.65, ThreatClass::Apt), SeverityTier::Low);
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let policy = SeverityPolicy::default();
        assert_eq!(policy.severity(0.95, ThreatClass::ZeroDay), SeverityTier::Critical);
        assert_eq!(policy.severity(0.85, ThreatClass::ZeroDay), SeverityTier::High);
        assert_eq!(policy.severity(0.70, ThreatClass::Malware), SeverityTier::Medium);
        assert_eq!(policy.severity(0.50, ThreatClass::Malware), SeverityTier::Low);
        assert_eq!(policy.severity(0.0, ThreatClass::Malware), SeverityTier::Low);
    }

    #[test]
    fn test_non_apt_high_confidence_is_not_escalated_early() {
        let policy = SeverityPolicy::default();
        assert_eq!(policy.severity(0.80, ThreatClass::Malware), SeverityTier::Medium);
        assert_eq!(policy.severity(0.80, ThreatClass::Apt), SeverityTier::Critical);
    }

    #[test]
    fn test_default_matches_config_defaults() {
        let from_config = SeverityPolicy::from_config(&SeverityConfig::default()).unwrap();
        assert_eq!(from_config, SeverityPolicy::default());
        let order: Vec<SeverityTier> = from_config.tiers().iter().map(|(t, _)| *t).collect();
        assert_eq!(order, SeverityTier::DESCENDING.to_vec());
    }

    #[test]
    fn test_custom_tiers() {
        let policy = SeverityPolicy::new(
            vec![(SeverityTier::High, 0.6), (SeverityTier::Medium, 0.3)],
            0.9,
        )
        .unwrap();
        assert_eq!(policy.severity(0.61, ThreatClass::Malware), SeverityTier::High);
        assert_eq!(policy.severity(0.31, ThreatClass::Apt), SeverityTier::Medium);
        assert_eq!(policy.severity(0.1, ThreatClass::ZeroDay), SeverityTier::Low);
    }

    #[test]
    fn test_rejects_unordered_tiers() {
        assert!(SeverityPolicy::new(
            vec![(SeverityTier::Medium, 0.5), (SeverityTier::High, 0.8)],
            0.7
        )
        .is_err());
        assert!(SeverityPolicy::new(Vec::new(), 0.7).is_err());

        let config = SeverityConfig {
            medium: 0.9,
            ..SeverityConfig::default()
        };
        assert!(SeverityPolicy::from_config(&config).is_err());
    }
}
