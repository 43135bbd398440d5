//! Fits a small classifier on balanced synthetic data and checks that it
//! learns, persists, and reloads.

use candle_core::{Device, Tensor};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use threatlens_core::{SeverityConfig, ThreatClass};
use threatlens_detector::{SeverityPolicy, ThreatClassifier, ThreatDetector, WeightsSource};
use threatlens_training::{train, SyntheticDataset, TrainConfig};

const INPUT_SIZE: usize = 64;

#[test]
fn training_beats_random_guessing_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("models").join("threat_classifier.safetensors");

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let generator = SyntheticDataset::new(INPUT_SIZE).with_class_separation(2.0);
    let train_set = generator.generate(999, &mut rng);
    let val_set = generator.generate(201, &mut rng);
    assert_eq!(train_set.class_counts(), [333, 333, 333]);

    let classifier = ThreatClassifier::new_random(INPUT_SIZE, &Device::Cpu, &mut rng).unwrap();
    let config = TrainConfig {
        epochs: 5,
        output_path: Some(snapshot.clone()),
        ..TrainConfig::default()
    };

    let report = train(&classifier, &train_set, &val_set, &config).unwrap();
    assert_eq!(report.history.len(), 5);
    assert_eq!(report.saved_to.as_deref(), Some(snapshot.as_path()));
    assert!(snapshot.exists());

    for (i, epoch) in report.history.iter().enumerate() {
        assert_eq!(epoch.epoch, i + 1);
        assert!(epoch.train_loss.is_finite());
        assert!(epoch.val_loss.is_finite());
        assert_eq!(epoch.val_metrics.total(), 201);
    }

    let last = report.final_epoch().unwrap();
    assert!(
        last.val_accuracy > 1.0 / 3.0,
        "validation accuracy {} did not beat chance",
        last.val_accuracy
    );
    assert!(report.history[0].train_loss > last.train_loss);

    // The snapshot reproduces the fitted classifier exactly.
    let (restored, source) =
        ThreatClassifier::load_or_random(Some(snapshot.as_path()), INPUT_SIZE, &Device::Cpu, &mut rng).unwrap();
    assert!(matches!(source, WeightsSource::Snapshot(_)));

    let fixed_input = Tensor::from_vec(
        val_set.features[0].as_slice().to_vec(),
        INPUT_SIZE,
        &Device::Cpu,
    )
    .unwrap();
    let expected: Vec<f32> = classifier.forward_t(&fixed_input, false).unwrap().flatten_all().unwrap().to_vec1().unwrap();
    let actual: Vec<f32> = restored.forward_t(&fixed_input, false).unwrap().flatten_all().unwrap().to_vec1().unwrap();
    assert_eq!(expected, actual);
}

#[test]
fn trained_classifier_serves_detections() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let generator = SyntheticDataset::new(INPUT_SIZE).with_class_separation(2.0);
    let train_set = generator.generate(300, &mut rng);
    let val_set = generator.generate(30, &mut rng);

    let classifier = ThreatClassifier::new_random(INPUT_SIZE, &Device::Cpu, &mut rng).unwrap();
    let config = TrainConfig {
        epochs: 2,
        ..TrainConfig::default()
    };
    train(&classifier, &train_set, &val_set, &config).unwrap();

    let policy = SeverityPolicy::from_config(&SeverityConfig::default()).unwrap();
    let detector = ThreatDetector::new(classifier, policy, WeightsSource::RandomInit);

    let sample: Vec<u8> = (0..INPUT_SIZE as u32).map(|i| (i * 31 % 256) as u8).collect();
    let result = detector
        .detect(Some(sample.as_slice()), Some("sample.bin"), None)
        .unwrap();
    assert!(ThreatClass::ALL.contains(&result.threat_type));
    assert!((result.prediction_scores.total() - 100.0).abs() < 1e-3);
    assert_eq!(detector.latency_stats().unwrap().count, 1);
}
