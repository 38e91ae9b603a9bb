//! Mel-scale filterbank: dense and sparse (CSR) triangular filters, a
//! pseudo-inverse for reverse mapping, and a process-scoped LRU cache keyed
//! by configuration hash.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use libetude_core::error::{LibetudeError, Result};

/// Mel-scale conversion curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MelScaleType {
    /// `2595 * log10(1 + f/700)`.
    Htk,
    /// The Slaney/Auditory Toolbox formula (linear below 1 kHz).
    Slaney,
}

impl MelScaleType {
    fn hz_to_mel(self, hz: f64) -> f64 {
        match self {
            MelScaleType::Htk => 2595.0 * (1.0 + hz / 700.0).log10(),
            MelScaleType::Slaney => {
                const F_SP: f64 = 200.0 / 3.0;
                const MIN_LOG_HZ: f64 = 1000.0;
                let min_log_mel = MIN_LOG_HZ / F_SP;
                let logstep = (6.4f64).ln() / 27.0;
                if hz < MIN_LOG_HZ {
                    hz / F_SP
                } else {
                    min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
                }
            }
        }
    }

    fn mel_to_hz(self, mel: f64) -> f64 {
        match self {
            MelScaleType::Htk => 700.0 * (10f64.powf(mel / 2595.0) - 1.0),
            MelScaleType::Slaney => {
                const F_SP: f64 = 200.0 / 3.0;
                const MIN_LOG_HZ: f64 = 1000.0;
                let min_log_mel = MIN_LOG_HZ / F_SP;
                let logstep = (6.4f64).ln() / 27.0;
                if mel < min_log_mel {
                    mel * F_SP
                } else {
                    MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
                }
            }
        }
    }
}

/// Configuration identifying one filterbank; hashed to key the process
/// cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MelConfig {
    pub n_fft: usize,
    pub n_mels: usize,
    pub fmin: f64,
    pub fmax: f64,
    pub sample_rate: u32,
    pub scale: MelScaleType,
    pub normalize: bool,
}

impl Hash for MelConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.n_fft.hash(state);
        self.n_mels.hash(state);
        self.fmin.to_bits().hash(state);
        self.fmax.to_bits().hash(state);
        self.sample_rate.hash(state);
        self.scale.hash(state);
        self.normalize.hash(state);
    }
}

/// One non-zero triangular-filter entry in the CSR form.
#[derive(Debug, Clone, Copy)]
pub struct CsrEntry {
    pub col: usize,
    pub value: f32,
}

/// A mel filterbank: dense matrix, CSR-equivalent sparse form, and a
/// pseudo-inverse for the reverse (mel -> linear) mapping.
#[derive(Debug, Clone)]
pub struct MelFilterbank {
    config: MelConfig,
    /// `[n_mels][n_fft/2 + 1]`, row-major dense form.
    dense: Vec<Vec<f32>>,
    /// CSR rows, same shape as `dense` with zeros dropped.
    sparse_rows: Vec<Vec<CsrEntry>>,
    /// `[n_fft/2 + 1][n_mels]`: the normalized-transpose pseudo-inverse
    /// (see `create`'s doc comment for why this form was chosen).
    pseudo_inverse: Vec<Vec<f32>>,
}

impl MelFilterbank {
    /// Builds triangular filters between `config.fmin` and `config.fmax` in
    /// the chosen mel scale, converts breakpoints to FFT bin indices, and
    /// derives the sparse form and pseudo-inverse.
    ///
    /// Open design decision: the pseudo-inverse is the row-normalized
    /// transpose of the dense filterbank (each mel filter's contribution is
    /// redistributed back to its linear bins in proportion to the forward
    /// weight), not a full Moore-Penrose pseudo-inverse — the spec names
    /// this as an explicit open alternative, and the normalized transpose
    /// avoids an SVD dependency this crate otherwise has no use for.
    pub fn create(config: MelConfig) -> Result<Self> {
        if config.n_mels == 0 || config.n_fft == 0 {
            return Err(LibetudeError::invalid_argument("n_mels and n_fft must be non-zero"));
        }
        if config.fmax <= config.fmin {
            return Err(LibetudeError::invalid_argument("fmax must exceed fmin"));
        }

        let bins = config.n_fft / 2 + 1;
        let mel_min = config.scale.hz_to_mel(config.fmin);
        let mel_max = config.scale.hz_to_mel(config.fmax);
        let breakpoints: Vec<f64> = (0..config.n_mels + 2)
            .map(|i| mel_min + (mel_max - mel_min) * i as f64 / (config.n_mels + 1) as f64)
            .map(|mel| config.scale.mel_to_hz(mel))
            .collect();
        let bin_of_hz = |hz: f64| -> f64 { hz * config.n_fft as f64 / config.sample_rate as f64 };
        let bin_points: Vec<f64> = breakpoints.iter().map(|&hz| bin_of_hz(hz)).collect();

        let mut dense = vec![vec![0.0f32; bins]; config.n_mels];
        for m in 0..config.n_mels {
            let (left, center, right) = (bin_points[m], bin_points[m + 1], bin_points[m + 2]);
            for (k, slot) in dense[m].iter_mut().enumerate() {
                let k = k as f64;
                let weight = if k >= left && k <= center && center > left {
                    (k - left) / (center - left)
                } else if k > center && k <= right && right > center {
                    (right - k) / (right - center)
                } else {
                    0.0
                };
                *slot = weight.max(0.0) as f32;
            }
            if config.normalize {
                let sum: f32 = dense[m].iter().sum();
                if sum > 0.0 {
                    for slot in &mut dense[m] {
                        *slot /= sum;
                    }
                }
            }
        }

        let sparse_rows = dense
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|&(_, &v)| v != 0.0)
                    .map(|(col, &value)| CsrEntry { col, value })
                    .collect()
            })
            .collect();

        let mut pseudo_inverse = vec![vec![0.0f32; config.n_mels]; bins];
        let col_sums: Vec<f32> = (0..bins)
            .map(|k| dense.iter().map(|row| row[k]).sum())
            .collect();
        for k in 0..bins {
            if col_sums[k] <= 0.0 {
                continue;
            }
            for (m, row) in dense.iter().enumerate() {
                pseudo_inverse[k][m] = row[k] / col_sums[k];
            }
        }

        Ok(Self { config, dense, sparse_rows, pseudo_inverse })
    }

    pub fn config(&self) -> MelConfig {
        self.config
    }

    pub fn dense(&self) -> &[Vec<f32>] {
        &self.dense
    }

    pub fn sparse_rows(&self) -> &[Vec<CsrEntry>] {
        &self.sparse_rows
    }

    /// Forward transform: `mel_frame = filterbank x spectrogram_frame`.
    /// Uses the sparse path when `simd` is requested (fewer multiplies per
    /// row), the dense path otherwise.
    pub fn forward(&self, spectrogram_frame: &[f32], simd: bool) -> Result<Vec<f32>> {
        let bins = self.config.n_fft / 2 + 1;
        if spectrogram_frame.len() != bins {
            return Err(LibetudeError::invalid_argument("spectrogram frame length mismatch"));
        }
        if simd {
            Ok(self
                .sparse_rows
                .iter()
                .map(|row| row.iter().map(|e| e.value * spectrogram_frame[e.col]).sum())
                .collect())
        } else {
            Ok(self
                .dense
                .iter()
                .map(|row| row.iter().zip(spectrogram_frame).map(|(&w, &x)| w * x).sum())
                .collect())
        }
    }

    /// Batch forward transform over every frame in `spectrogram`.
    pub fn forward_batch(&self, spectrogram: &[Vec<f32>], simd: bool) -> Result<Vec<Vec<f32>>> {
        spectrogram.iter().map(|frame| self.forward(frame, simd)).collect()
    }

    /// Reverse transform: `linear_frame = pseudo_inverse x mel_frame`,
    /// clipped to non-negative.
    pub fn reverse(&self, mel_frame: &[f32]) -> Result<Vec<f32>> {
        if mel_frame.len() != self.config.n_mels {
            return Err(LibetudeError::invalid_argument("mel frame length mismatch"));
        }
        Ok(self
            .pseudo_inverse
            .iter()
            .map(|row| row.iter().zip(mel_frame).map(|(&w, &x)| w * x).sum::<f32>().max(0.0))
            .collect())
    }
}

/// A process-scoped filterbank cache keyed by configuration hash, with LRU
/// eviction once `capacity` is exceeded.
pub struct FilterbankCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

struct CacheInner {
    entries: HashMap<u64, std::sync::Arc<MelFilterbank>>,
    order: Vec<u64>,
}

impl FilterbankCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner { entries: HashMap::new(), order: Vec::new() }),
            capacity: capacity.max(1),
        }
    }

    fn key(config: &MelConfig) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();
        config.hash(&mut hasher);
        hasher.finish()
    }

    /// Returns the cached filterbank for `config`, building (and caching)
    /// one if absent. Evicts the least-recently-used entry if this insert
    /// pushes the cache over capacity.
    pub fn get_or_create(&self, config: MelConfig) -> Result<std::sync::Arc<MelFilterbank>> {
        let key = Self::key(&config);
        let mut inner = self.inner.lock().expect("filterbank cache mutex poisoned");
        if let Some(existing) = inner.entries.get(&key).cloned() {
            inner.order.retain(|&k| k != key);
            inner.order.push(key);
            return Ok(existing);
        }
        drop(inner);

        let built = std::sync::Arc::new(MelFilterbank::create(config)?);
        let mut inner = self.inner.lock().expect("filterbank cache mutex poisoned");
        inner.entries.insert(key, built.clone());
        inner.order.push(key);
        while inner.order.len() > self.capacity {
            let oldest = inner.order.remove(0);
            inner.entries.remove(&oldest);
        }
        Ok(built)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("filterbank cache mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MelConfig {
        MelConfig {
            n_fft: 512,
            n_mels: 40,
            fmin: 0.0,
            fmax: 8000.0,
            sample_rate: 16000,
            scale: MelScaleType::Htk,
            normalize: true,
        }
    }

    #[test]
    fn rows_are_non_negative_and_sum_to_one_when_normalized() {
        let fb = MelFilterbank::create(test_config()).unwrap();
        for row in fb.dense() {
            assert!(row.iter().all(|&v| v >= 0.0));
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4 || sum == 0.0);
        }
    }

    #[test]
    fn sparse_and_dense_forms_are_row_equivalent() {
        let fb = MelFilterbank::create(test_config()).unwrap();
        for (row, sparse) in fb.dense().iter().zip(fb.sparse_rows()) {
            for entry in sparse {
                assert_eq!(row[entry.col], entry.value);
            }
            assert_eq!(row.iter().filter(|&&v| v != 0.0).count(), sparse.len());
        }
    }

    #[test]
    fn forward_dense_and_sparse_paths_agree() {
        let fb = MelFilterbank::create(test_config()).unwrap();
        let frame = vec![1.0f32; 512 / 2 + 1];
        let dense_out = fb.forward(&frame, false).unwrap();
        let sparse_out = fb.forward(&frame, true).unwrap();
        for (a, b) in dense_out.iter().zip(sparse_out.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn reverse_clips_to_non_negative() {
        let fb = MelFilterbank::create(test_config()).unwrap();
        let mel_frame = vec![-1.0f32; 40];
        let out = fb.reverse(&mel_frame).unwrap();
        assert!(out.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn cache_returns_same_instance_on_repeat_config() {
        let cache = FilterbankCache::new(2);
        let a = cache.get_or_create(test_config()).unwrap();
        let b = cache.get_or_create(test_config()).unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn mel_round_trip_mse_below_100() {
        let config = MelConfig {
            n_fft: 1024,
            n_mels: 80,
            fmin: 0.0,
            fmax: 8000.0,
            sample_rate: 16000,
            scale: MelScaleType::Htk,
            normalize: true,
        };
        let fb = MelFilterbank::create(config).unwrap();
        let bins = config.n_fft / 2 + 1;
        let spectrum = vec![1.0f32; bins];

        let mel_frame = fb.forward(&spectrum, false).unwrap();
        assert!(mel_frame.iter().all(|&v| v > 0.0));

        let reconstructed = fb.reverse(&mel_frame).unwrap();
        let mse: f32 =
            spectrum.iter().zip(&reconstructed).map(|(a, b)| (a - b).powi(2)).sum::<f32>() / bins as f32;
        assert!(mse < 100.0, "round-trip MSE {mse} exceeds 100");
    }

    #[test]
    fn cache_evicts_lru_past_capacity() {
        let cache = FilterbankCache::new(1);
        let mut first = test_config();
        cache.get_or_create(first).unwrap();
        first.n_mels = 80;
        cache.get_or_create(first).unwrap();
        assert_eq!(cache.len(), 1);
    }
}
