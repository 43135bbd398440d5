//! Mini-batch iteration over pre-loaded tensors.

use candle_core::Tensor;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use threatlens_core::{Result, ThreatError};

/// Mini-batch iterator over `[N, L]` inputs and `[N]` labels.
///
/// Iterates in dataset order until [`reshuffle`](Self::reshuffle) is called.
/// The final batch is smaller when `N` is not a multiple of the batch size.
pub struct BatchIterator {
    inputs: Tensor,
    labels: Tensor,
    indices: Vec<usize>,
    batch_size: usize,
    pos: usize,
}

impl BatchIterator {
    /// # Errors
    ///
    /// Returns [`ThreatError::Training`] when `batch_size` is zero or the
    /// inputs and labels disagree on the number of rows.
    pub fn new(inputs: Tensor, labels: Tensor, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(ThreatError::Training("batch_size must be positive".into()));
        }
        let n = inputs
            .dim(0)
            .map_err(|e| ThreatError::Training(format!("inputs dim error: {e}")))?;
        let n_labels = labels
            .dim(0)
            .map_err(|e| ThreatError::Training(format!("labels dim error: {e}")))?;
        if n != n_labels {
            return Err(ThreatError::Training(format!(
                "{n} input rows but {n_labels} labels"
            )));
        }
        Ok(Self {
            inputs,
            labels,
            indices: (0..n).collect(),
            batch_size,
            pos: 0,
        })
    }

    /// Reshuffle for a new epoch using a seeded RNG derived from base seed + epoch.
    pub fn reshuffle(&mut self, seed: u64, epoch: usize) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
        self.indices.shuffle(&mut rng);
        self.pos = 0;
    }

    /// Restart the current order without reshuffling.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Number of batches in one full pass.
    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    /// Returns the next mini-batch, or `None` once the epoch is exhausted.
    pub fn next_batch(&mut self) -> Result<Option<(Tensor, Tensor)>> {
        let n = self.indices.len();
        if self.pos >= n {
            return Ok(None);
        }

        let end = (self.pos + self.batch_size).min(n);
        let batch_idx: Vec<u32> = self.indices[self.pos..end]
            .iter()
            .map(|&i| i as u32)
            .collect();
        self.pos = end;

        let select = || -> candle_core::Result<(Tensor, Tensor)> {
            let idx_tensor = Tensor::new(batch_idx.as_slice(), self.inputs.device())?;
            Ok((
                self.inputs.index_select(&idx_tensor, 0)?,
                self.labels.index_select(&idx_tensor, 0)?,
            ))
        };
        select()
            .map(Some)
            .map_err(|e| ThreatError::Training(format!("Failed to gather batch: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn fixture(n: usize) -> (Tensor, Tensor) {
        let device = Device::Cpu;
        let inputs = Tensor::arange(0u32, (n * 4) as u32, &device)
            .unwrap()
            .to_dtype(DType::F32)
            .unwrap()
            .reshape((n, 4))
            .unwrap();
        let labels = Tensor::arange(0u32, n as u32, &device).unwrap();
        (inputs, labels)
    }

    #[test]
    fn test_batch_iterator_exhausts() {
        let (inputs, labels) = fixture(10);
        let mut iter = BatchIterator::new(inputs, labels, 3).unwrap();
        iter.reshuffle(42, 0);

        let mut sizes = Vec::new();
        while let Some((x, y)) = iter.next_batch().unwrap() {
            assert_eq!(x.dim(0).unwrap(), y.dim(0).unwrap());
            sizes.push(y.dim(0).unwrap());
        }
        assert_eq!(iter.num_batches(), 4); // ceil(10/3)
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn test_unshuffled_iteration_keeps_order() {
        let (inputs, labels) = fixture(5);
        let mut iter = BatchIterator::new(inputs, labels, 2).unwrap();
        let mut seen = Vec::new();
        while let Some((_, y)) = iter.next_batch().unwrap() {
            seen.extend(y.to_vec1::<u32>().unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);

        iter.rewind();
        assert!(iter.next_batch().unwrap().is_some());
    }

    #[test]
    fn test_reshuffle_covers_every_row_once() {
        let (inputs, labels) = fixture(9);
        let mut iter = BatchIterator::new(inputs, labels, 4).unwrap();
        iter.reshuffle(7, 3);

        let mut seen = Vec::new();
        while let Some((x, y)) = iter.next_batch().unwrap() {
            // Rows stay paired with their labels.
            let firsts: Vec<f32> = x.narrow(1, 0, 1).unwrap().flatten_all().unwrap().to_vec1().unwrap();
            let ys: Vec<u32> = y.to_vec1().unwrap();
            for (f, l) in firsts.iter().zip(&ys) {
                assert_eq!(*f as u32, l * 4);
            }
            seen.extend(ys);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..9).collect::<Vec<u32>>());
    }

    #[test]
    fn test_rejects_bad_construction() {
        let (inputs, labels) = fixture(4);
        assert!(BatchIterator::new(inputs.clone(), labels.clone(), 0).is_err());
        let short = labels.narrow(0, 0, 3).unwrap();
        assert!(BatchIterator::new(inputs, short, 2).is_err());
    }
}
