//! Fixed-length feature extraction from raw sample bytes.
//!
//! Every sample, whatever its size, becomes a vector of exactly `input_size`
//! values normalised to zero mean and unit variance over the sample itself:
//!
//! 1. Take the first `input_size` bytes as integers in `[0, 255]`.
//! 2. Zero-pad at the tail when fewer bytes are available; extra bytes are ignored.
//! 3. Subtract the sample mean and divide by `std + 1e-8`.
//!
//! When no bytes are supplied the extractor draws `input_size` standard-normal
//! values from the caller's random source instead.

use rand::Rng;
use rand_distr::StandardNormal;

/// Default feature vector length.
pub const DEFAULT_INPUT_SIZE: usize = 1024;

/// Added to the standard deviation so constant inputs normalise to zeros.
pub const NORMALIZATION_EPSILON: f64 = 1e-8;

/// A per-sample normalised feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    /// Normalise raw values to zero mean and unit variance.
    ///
    /// Statistics are computed over `raw` alone, in `f64`, using the population
    /// standard deviation.
    #[must_use]
    pub fn normalized(raw: &[f64]) -> Self {
        if raw.is_empty() {
            return Self(Vec::new());
        }
        let n = raw.len() as f64;
        let mean = raw.iter().sum::<f64>() / n;
        let variance = raw.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let denom = variance.sqrt() + NORMALIZATION_EPSILON;

        Self(raw.iter().map(|v| ((v - mean) / denom) as f32).collect())
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

/// Input to the extractor.
#[derive(Debug, Clone, Copy)]
pub enum RawSample<'a> {
    /// File contents or a captured traffic buffer.
    Bytes(&'a [u8]),
    /// No data available; draw a synthetic standard-normal vector.
    Synthetic,
}

/// Turns raw samples into fixed-length [`FeatureVector`]s.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor {
    input_size: usize,
}

impl FeatureExtractor {
    #[must_use]
    pub fn new(input_size: usize) -> Self {
        Self { input_size }
    }

    /// Length of every vector this extractor produces.
    #[must_use]
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Extract features from `sample`, drawing from `rng` only for
    /// [`RawSample::Synthetic`].
    pub fn extract<R: Rng + ?Sized>(&self, sample: RawSample<'_>, rng: &mut R) -> FeatureVector {
        match sample {
            RawSample::Bytes(bytes) => self.from_bytes(bytes),
            RawSample::Synthetic => self.synthetic(rng),
        }
    }

    /// Truncate or zero-pad `bytes` to `input_size`, then normalise.
    #[must_use]
    pub fn from_bytes(&self, bytes: &[u8]) -> FeatureVector {
        let mut raw = vec![0.0_f64; self.input_size];
        for (slot, &byte) in raw.iter_mut().zip(bytes) {
            *slot = f64::from(byte);
        }
        FeatureVector::normalized(&raw)
    }

    /// Draw `input_size` independent standard-normal values, then normalise.
    pub fn synthetic<R: Rng + ?Sized>(&self, rng: &mut R) -> FeatureVector {
        let raw: Vec<f64> = (0..self.input_size)
            .map(|_| rng.sample(StandardNormal))
            .collect();
        FeatureVector::normalized(&raw)
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
