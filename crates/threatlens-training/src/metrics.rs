//! Validation metrics for threat classifier training.
//!
//! Computes confusion-matrix-derived metrics from predicted and ground-truth
//! class indices. Rows of the confusion matrix are true classes, columns are
//! predictions, both in [`ThreatClass::index`] order.

use threatlens_core::{ThreatClass, NUM_CLASSES};

/// One-vs-rest metrics for a single class.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of samples whose true class is this one.
    pub support: usize,
}

/// Multi-class validation metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub macro_f1: f64,
    pub per_class: [ClassMetrics; NUM_CLASSES],
    pub confusion: [[usize; NUM_CLASSES]; NUM_CLASSES],
}

impl ClassificationMetrics {
    /// Metrics for one class.
    #[must_use]
    pub fn class(&self, class: ThreatClass) -> &ClassMetrics {
        &self.per_class[class.index()]
    }

    /// Number of samples counted in the confusion matrix.
    #[must_use]
    pub fn total(&self) -> usize {
        self.confusion.iter().flatten().sum()
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

/// Compute validation metrics from predicted and ground-truth class indices.
///
/// Pairs with an index outside the three classes are ignored.
pub fn compute_classification_metrics(predictions: &[u32], labels: &[u32]) -> ClassificationMetrics {
    assert_eq!(
        predictions.len(),
        labels.len(),
        "predictions and labels must have same length"
    );

    let mut confusion = [[0usize; NUM_CLASSES]; NUM_CLASSES];
    for (&pred, &label) in predictions.iter().zip(labels.iter()) {
        let (pred, label) = (pred as usize, label as usize);
        if pred < NUM_CLASSES && label < NUM_CLASSES {
            confusion[label][pred] += 1;
        }
    }

    let total: usize = confusion.iter().flatten().sum();
    let correct: usize = (0..NUM_CLASSES).map(|c| confusion[c][c]).sum();

    let mut per_class = [ClassMetrics::default(); NUM_CLASSES];
    for (c, metrics) in per_class.iter_mut().enumerate() {
        let tp = confusion[c][c];
        let support: usize = confusion[c].iter().sum();
        let predicted: usize = confusion.iter().map(|row| row[c]).sum();

        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        *metrics = ClassMetrics {
            precision,
            recall,
            f1,
            support,
        };
    }

    let macro_f1 = per_class.iter().map(|m| m.f1).sum::<f64>() / NUM_CLASSES as f64;

    ClassificationMetrics {
        accuracy: ratio(correct, total),
        macro_f1,
        per_class,
        confusion,
    }
}

impl std::fmt::Display for ClassificationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "acc={:.4} macro_f1={:.4}", self.accuracy, self.macro_f1)?;
        for class in ThreatClass::ALL {
            let m = self.class(class);
            write!(
                f,
                " | {class}: p={:.3} r={:.3} f1={:.3} n={}",
                m.precision, m.recall, m.f1, m.support
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let labels = vec![0, 1, 2, 0, 1, 2];
        let m = compute_classification_metrics(&labels, &labels);
        assert!((m.accuracy - 1.0).abs() < 1e-9);
        assert!((m.macro_f1 - 1.0).abs() < 1e-9);
        for class in ThreatClass::ALL {
            assert!((m.class(class).precision - 1.0).abs() < 1e-9);
            assert_eq!(m.class(class).support, 2);
        }
    }

    #[test]
    fn test_all_wrong() {
        let preds = vec![1, 2, 0];
        let labels = vec![0, 1, 2];
        let m = compute_classification_metrics(&preds, &labels);
        assert!((m.accuracy).abs() < 1e-9);
        assert!((m.macro_f1).abs() < 1e-9);
        assert_eq!(m.confusion[0][1], 1);
        assert_eq!(m.confusion[1][2], 1);
        assert_eq!(m.confusion[2][0], 1);
    }

    #[test]
    fn test_mixed() {
        // malware: 2 right, 1 predicted as apt; zero_day: 1 right; apt: 1 right, 1 as malware
        let labels = vec![0, 0, 0, 1, 2, 2];
        let preds = vec![0, 0, 2, 1, 2, 0];
        let m = compute_classification_metrics(&preds, &labels);
        assert_eq!(m.total(), 6);
        assert!((m.accuracy - 4.0 / 6.0).abs() < 1e-9);

        let malware = m.class(ThreatClass::Malware);
        assert!((malware.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((malware.recall - 2.0 / 3.0).abs() < 1e-9);

        let apt = m.class(ThreatClass::Apt);
        assert!((apt.precision - 0.5).abs() < 1e-9);
        assert!((apt.recall - 0.5).abs() < 1e-9);

        let expected_macro = (2.0 / 3.0 + 1.0 + 0.5) / 3.0;
        assert!((m.macro_f1 - expected_macro).abs() < 1e-9);
    }

    #[test]
    fn test_empty() {
        let m = compute_classification_metrics(&[], &[]);
        assert!((m.accuracy).abs() < 1e-9);
        assert!((m.macro_f1).abs() < 1e-9);
        assert_eq!(m.total(), 0);
    }

    #[test]
    fn test_out_of_range_ignored() {
        let m = compute_classification_metrics(&[0, 7], &[0, 1]);
        assert_eq!(m.total(), 1);
        assert!((m.accuracy - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_display_names_classes() {
        let m = compute_classification_metrics(&[0, 1, 2], &[0, 1, 2]);
        let s = m.to_string();
        assert!(s.starts_with("acc=1.0000"));
        assert!(s.contains("zero_day:"));
    }
}
