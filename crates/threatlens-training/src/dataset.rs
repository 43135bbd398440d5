//! Labelled feature datasets and the synthetic generator used for training.
//!
//! Labels cycle through the three threat classes (`i mod 3`), so any count
//! that is a multiple of 3 is exactly balanced.

use candle_core::{Device, Tensor};
use rand::Rng;
use rand_distr::StandardNormal;
use threatlens_core::{Result, ThreatClass, ThreatError, NUM_CLASSES};
use threatlens_detector::FeatureVector;

/// Feature vectors paired with ground-truth classes.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub features: Vec<FeatureVector>,
    pub labels: Vec<ThreatClass>,
}

impl Dataset {
    /// Pair features with labels.
    ///
    /// # Errors
    ///
    /// Returns [`ThreatError::Training`] when the two lengths differ or the
    /// feature vectors are not all the same length.
    pub fn new(features: Vec<FeatureVector>, labels: Vec<ThreatClass>) -> Result<Self> {
        if features.len() != labels.len() {
            return Err(ThreatError::Training(format!(
                "{} feature vectors but {} labels",
                features.len(),
                labels.len()
            )));
        }
        if let Some(first) = features.first() {
            if let Some(bad) = features.iter().find(|fv| fv.len() != first.len()) {
                return Err(ThreatError::Shape {
                    expected: first.len(),
                    actual: bad.len(),
                });
            }
        }
        Ok(Self { features, labels })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Length of each feature vector, or 0 for an empty dataset.
    #[must_use]
    pub fn input_size(&self) -> usize {
        self.features.first().map_or(0, FeatureVector::len)
    }

    /// Number of samples per class, indexed by [`ThreatClass::index`].
    #[must_use]
    pub fn class_counts(&self) -> [usize; NUM_CLASSES] {
        let mut counts = [0; NUM_CLASSES];
        for label in &self.labels {
            counts[label.index()] += 1;
        }
        counts
    }

    /// Stack into an `[N, L]` f32 input tensor and an `[N]` u32 label tensor.
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        let input_size = self.input_size();
        let mut flat = Vec::with_capacity(self.len() * input_size);
        for fv in &self.features {
            flat.extend_from_slice(fv.as_slice());
        }
        let inputs = Tensor::from_vec(flat, (self.len(), input_size), device)
            .map_err(|e| ThreatError::Training(format!("Failed to build input tensor: {e}")))?;

        let labels: Vec<u32> = self.labels.iter().map(|c| c.index() as u32).collect();
        let labels = Tensor::from_vec(labels, self.len(), device)
            .map_err(|e| ThreatError::Training(format!("Failed to build label tensor: {e}")))?;

        Ok((inputs, labels))
    }
}

/// Generator for standard-normal training data.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticDataset {
    input_size: usize,
    class_separation: f32,
}

impl SyntheticDataset {
    /// Pure-noise generator: features carry no information about the label.
    #[must_use]
    pub fn new(input_size: usize) -> Self {
        Self {
            input_size,
            class_separation: 0.0,
        }
    }

    /// Add `separation` to segment `c` (one third of the positions) of every
    /// class-`c` sample before normalisation.
    #[must_use]
    pub fn with_class_separation(mut self, separation: f32) -> Self {
        self.class_separation = separation;
        self
    }

    /// Draw `count` samples from `rng`; sample `i` is labelled `i mod 3`.
    ///
    /// Each sample is renormalised to zero mean and unit variance over its own
    /// values, like extracted byte features, so the output is not the raw
    /// standard-normal draw.
    pub fn generate<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Dataset {
        let segment = self.input_size / NUM_CLASSES;
        let offset = f64::from(self.class_separation);

        let mut features = Vec::with_capacity(count);
        let mut labels = Vec::with_capacity(count);
        for i in 0..count {
            let class = ThreatClass::ALL[i % NUM_CLASSES];
            let mut raw: Vec<f64> = (0..self.input_size)
                .map(|_| rng.sample(StandardNormal))
                .collect();
            if offset != 0.0 {
                let start = class.index() * segment;
                for v in &mut raw[start..start + segment] {
                    *v += offset;
                }
            }
            features.push(FeatureVector::normalized(&raw));
            labels.push(class);
        }

        tracing::debug!(
            count,
            input_size = self.input_size,
            class_separation = self.class_separation,
            "Generated synthetic dataset"
        );

        Dataset { features, labels }
    }
}
