//! Compute device selection: CUDA > Metal > CPU fallback.

use candle_core::Device;

/// Select the device the classifier runs on.
///
/// Tries CUDA first (when compiled with the `cuda` feature), then Metal
/// (when compiled with the `metal` feature), then falls back to CPU.
pub fn select_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => {
                tracing::info!(device = "cuda:0", "Selected compute device");
                return device;
            }
            Err(e) => {
                tracing::warn!(error = %e, "CUDA feature enabled but no GPU available, falling back");
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => {
                tracing::info!(device = "metal:0", "Selected compute device");
                return device;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Metal feature enabled but no device available, falling back");
            }
        }
    }

    tracing::debug!(device = "cpu", "Selected compute device");
    Device::Cpu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    #[test]
    fn test_cpu_is_the_default_device() {
        assert!(select_device().is_cpu());
    }
}
