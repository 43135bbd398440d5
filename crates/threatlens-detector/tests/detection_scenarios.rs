//! End-to-end detection scenarios against seeded, randomly initialised models.

use candle_core::{DType, Device, Tensor};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use threatlens_core::{ModelConfig, SeverityConfig, ThreatClass};
use threatlens_detector::{
    SeverityPolicy, ThreatClassifier, ThreatDetector, WeightsSource, DEFAULT_INPUT_SIZE,
};

fn seeded_detector(input_size: usize, seed: u64) -> ThreatDetector {
    let model = ModelConfig {
        input_size,
        seed: Some(seed),
        ..ModelConfig::default()
    };
    ThreatDetector::from_config(&model, &SeverityConfig::default(), &Device::Cpu).unwrap()
}

#[test]
fn zero_input_of_2048_bytes_produces_complete_result() {
    let detector = seeded_detector(DEFAULT_INPUT_SIZE, 42);
    let input = vec![0u8; 2048];

    let result = detector.detect(Some(input.as_slice()), Some("zeros.bin"), None).unwrap();

    let json = serde_json::to_value(&result).unwrap();
    let scores = json["prediction_scores"].as_object().unwrap();
    let mut keys: Vec<&str> = scores.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["apt", "malware", "zero_day"]);

    assert!((result.prediction_scores.total() - 100.0).abs() < 1e-3);

    let (best, best_score) = result
        .prediction_scores
        .iter()
        .fold((ThreatClass::Malware, f64::MIN), |acc, (class, score)| {
            if score > acc.1 {
                (class, score)
            } else {
                acc
            }
        });
    assert_eq!(result.threat_type, best);
    assert!((result.confidence - (best_score * 100.0).round() / 100.0).abs() < 1e-9);

    assert_eq!(result.file_size, Some(2048));
    assert_eq!(json["threat_type"], result.threat_type.as_str());
    assert_eq!(detector.weights_source(), &WeightsSource::RandomInit);
}

#[test]
fn detect_is_idempotent_for_identical_input() {
    let detector = seeded_detector(128, 9);
    let input: Vec<u8> = (0..300).map(|i| (i * 13 % 256) as u8).collect();

    let first = detector.detect(Some(input.as_slice()), None, None).unwrap();
    let second = detector.detect(Some(input.as_slice()), None, None).unwrap();

    assert_eq!(first.threat_type, second.threat_type);
    assert_eq!(first.severity, second.severity);
    assert_eq!(first.confidence, second.confidence);
    assert_eq!(first.prediction_scores, second.prediction_scores);
    assert_ne!(first.id, second.id);
}

#[test]
fn scores_sum_to_one_hundred_for_varied_inputs() {
    let detector = seeded_detector(64, 3);
    let inputs: Vec<Vec<u8>> = vec![
        Vec::new(),
        vec![255; 10],
        (0..=255).collect(),
        vec![7; 5000],
    ];
    for input in &inputs {
        let result = detector.detect(Some(input.as_slice()), None, None).unwrap();
        assert!((result.prediction_scores.total() - 100.0).abs() < 1e-3);
        assert!((0.0..=100.0).contains(&result.confidence));
    }
    let synthetic = detector.detect(None, None, Some("192.168.1.100")).unwrap();
    assert!((synthetic.prediction_scores.total() - 100.0).abs() < 1e-3);
}

#[test]
fn snapshot_round_trip_reproduces_logits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threat_classifier.safetensors");

    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let original = ThreatClassifier::new_random(128, &Device::Cpu, &mut rng).unwrap();
    original.save(&path).unwrap();

    let (restored, source) =
        ThreatClassifier::load_or_random(Some(path.as_path()), 128, &Device::Cpu, &mut rng).unwrap();
    assert!(source.is_trained());

    let fixed_input = Tensor::arange(0u32, 128, &Device::Cpu)
        .unwrap()
        .to_dtype(DType::F32)
        .unwrap();
    let a: Vec<f32> = original.forward_t(&fixed_input, false).unwrap().flatten_all().unwrap().to_vec1().unwrap();
    let b: Vec<f32> = restored.forward_t(&fixed_input, false).unwrap().flatten_all().unwrap().to_vec1().unwrap();
    assert_eq!(a, b);
}

#[test]
fn detector_from_config_loads_existing_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.safetensors");

    let mut rng = ChaCha8Rng::seed_from_u64(21);
    let classifier = ThreatClassifier::new_random(64, &Device::Cpu, &mut rng).unwrap();
    classifier.save(&path).unwrap();

    let model = ModelConfig {
        input_size: 64,
        weights_path: Some(path.display().to_string()),
        seed: Some(1),
        ..ModelConfig::default()
    };
    let from_snapshot =
        ThreatDetector::from_config(&model, &SeverityConfig::default(), &Device::Cpu).unwrap();
    assert!(from_snapshot.weights_source().is_trained());

    let direct = ThreatDetector::new(classifier, SeverityPolicy::default(), WeightsSource::RandomInit);
    let input = b"\x7fELF\x02\x01\x01";
    let a = from_snapshot.detect(Some(&input[..]), None, None).unwrap();
    let b = direct.detect(Some(&input[..]), None, None).unwrap();
    assert_eq!(a.prediction_scores, b.prediction_scores);
}

#[test]
fn mismatched_snapshot_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small.safetensors");

    let mut rng = ChaCha8Rng::seed_from_u64(2);
    ThreatClassifier::new_random(64, &Device::Cpu, &mut rng)
        .unwrap()
        .save(&path)
        .unwrap();

    assert!(ThreatClassifier::load(&path, 128, &Device::Cpu).is_err());
}
