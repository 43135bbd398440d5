//! ThreatLens command-line entry point.
//!
//! Subcommands:
//!   train   -- Fit the classifier on synthetic data and write a parameter snapshot
//!   detect  -- Score a file (or a synthetic sample) and print the result as JSON
//!   demo    -- Score three random-byte samples and print a summary

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};
use threatlens_core::{load_config, DetectionResult, LoggingConfig, ThreatLensConfig, ThreatStatistics};
use threatlens_detector::{select_device, ThreatClassifier, ThreatDetector};
use threatlens_training::{train, SyntheticDataset, TrainConfig};

#[derive(Parser)]
#[command(name = "threatlens", about = "Byte-level threat classification")]
struct Cli {
    /// YAML configuration file. Falls back to `THREATLENS_CONFIG`, then defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train the classifier on synthetic data.
    Train {
        /// Number of epochs.
        #[arg(long)]
        epochs: Option<usize>,

        /// Mini-batch size.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Learning rate.
        #[arg(long)]
        lr: Option<f64>,

        /// Class-dependent signal strength in the synthetic data.
        #[arg(long)]
        class_separation: Option<f32>,

        /// Output path for trained model weights.
        #[arg(long)]
        output: Option<String>,

        /// Random seed.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Score a single sample.
    Detect {
        /// File to score. Without it a synthetic feature vector is used.
        path: Option<PathBuf>,

        /// Source address to record on the result.
        #[arg(long)]
        source_ip: Option<String>,
    },

    /// Score three random-byte demo samples.
    Demo,
}

const DEMO_SOURCE_IP: &str = "192.168.1.100";
const DEMO_SAMPLES: [(&str, usize); 3] = [
    ("suspicious_payload.exe", 2048),
    ("unknown_script.ps1", 1024),
    ("encrypted_data.bin", 4096),
];

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_threatlens_config(cli.config.as_deref())?;
    init_tracing(&config.logging);
    config.validate()?;

    match cli.command {
        Command::Train {
            epochs,
            batch_size,
            lr,
            class_separation,
            output,
            seed,
        } => {
            let mut config = config;
            let training = &mut config.training;
            if let Some(epochs) = epochs {
                training.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                training.batch_size = batch_size;
            }
            if let Some(lr) = lr {
                training.learning_rate = lr;
            }
            if let Some(separation) = class_separation {
                training.class_separation = separation;
            }
            if let Some(output) = output {
                training.output_path = output;
            }
            if let Some(seed) = seed {
                training.seed = seed;
            }
            config.validate()?;
            run_train(&config)
        }
        Command::Detect { path, source_ip } => {
            run_detect(&config, path.as_deref(), source_ip.as_deref())
        }
        Command::Demo => run_demo(&config),
    }
}

/// Load configuration from `--config`, the `THREATLENS_CONFIG` environment
/// variable, or defaults, in that order.
fn load_threatlens_config(cli_path: Option<&Path>) -> anyhow::Result<ThreatLensConfig> {
    let path = cli_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("THREATLENS_CONFIG").ok().map(PathBuf::from));

    match path {
        Some(path) => load_config(&path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(ThreatLensConfig::default()),
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run_train(config: &ThreatLensConfig) -> anyhow::Result<()> {
    let training = &config.training;
    let device = select_device();
    let mut rng = ChaCha8Rng::seed_from_u64(training.seed);

    let generator = SyntheticDataset::new(config.model.input_size)
        .with_class_separation(training.class_separation);
    let train_set = generator.generate(training.train_samples, &mut rng);
    let val_set = generator.generate(training.val_samples, &mut rng);

    let classifier = ThreatClassifier::new_random(config.model.input_size, &device, &mut rng)?;
    let report = train(&classifier, &train_set, &val_set, &TrainConfig::from(training))?;

    println!(
        "{:>5}  {:>10}  {:>9}  {:>8}  {:>7}",
        "epoch", "train_loss", "train_acc", "val_loss", "val_acc"
    );
    println!("{:-<48}", "");
    for epoch in &report.history {
        println!(
            "{:>5}  {:>10.4}  {:>9.4}  {:>8.4}  {:>7.4}",
            epoch.epoch,
            epoch.train_loss,
            epoch.train_accuracy,
            epoch.val_loss,
            epoch.val_accuracy
        );
    }
    println!("{:-<48}", "");

    if let Some(last) = report.final_epoch() {
        println!("Final epoch {}: {}", last.epoch, last.val_metrics);
    }
    if let Some(path) = &report.saved_to {
        println!("Model saved to: {}", path.display());
    }
    Ok(())
}

fn build_detector(config: &ThreatLensConfig) -> anyhow::Result<ThreatDetector> {
    let device = select_device();
    let detector = ThreatDetector::from_config(&config.model, &config.severity, &device)?;
    if !detector.weights_source().is_trained() {
        tracing::warn!("Classifier is randomly initialised; predictions carry no signal");
    }
    Ok(detector)
}

fn run_detect(
    config: &ThreatLensConfig,
    path: Option<&Path>,
    source_ip: Option<&str>,
) -> anyhow::Result<()> {
    let detector = build_detector(config)?;

    let result = match path {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading sample {}", path.display()))?;
            let file_name = path.file_name().and_then(|n| n.to_str());
            detector.detect(Some(bytes.as_slice()), file_name, source_ip)?
        }
        None => detector.detect(None, None, source_ip)?,
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_demo(config: &ThreatLensConfig) -> anyhow::Result<()> {
    let detector = build_detector(config)?;
    let mut rng = match config.model.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let mut results: Vec<DetectionResult> = Vec::with_capacity(DEMO_SAMPLES.len());
    for (file_name, size) in DEMO_SAMPLES {
        let mut bytes = vec![0u8; size];
        rng.fill_bytes(&mut bytes);
        let result = detector.detect(Some(bytes.as_slice()), Some(file_name), Some(DEMO_SOURCE_IP))?;

        println!("{file_name} ({size} bytes)");
        println!("  threat:     {}", result.threat_type);
        println!("  severity:   {}", result.severity);
        println!("  confidence: {:.2}%", result.confidence);
        println!(
            "  scores:     malware={:.2} zero_day={:.2} apt={:.2}",
            result.prediction_scores.malware,
            result.prediction_scores.zero_day,
            result.prediction_scores.apt
        );
        println!("  time:       {} ms", result.analysis_time_ms);
        results.push(result);
    }

    let stats = ThreatStatistics::from_results(&results);
    println!("\n{} detections", stats.total());
    for (class, s) in &stats.by_type {
        println!(
            "  {:<9} total={} critical={} high={} medium={} low={} mean_confidence={:.2}",
            class.as_str(),
            s.total,
            s.critical,
            s.high,
            s.medium,
            s.low,
            s.mean_confidence
        );
    }

    if let Some(latency) = detector.latency_stats() {
        println!(
            "latency: p50={:?} p95={:?} max={:?}",
            latency.p50, latency.p95, latency.max
        );
    }
    Ok(())
}
