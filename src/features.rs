use std::f32::consts::PI;
use std::path::{Path, PathBuf};

use mel_filter::{mel, NormalizationFactor};
use ndarray::{Array1, Array2, Axis};
use realfft::RealFftPlanner;
use rustdct::{Dct2, DctPlanner};
use rustfft::num_complex::Complex;

use crate::audio::{load_audio, resample};
use crate::config::FeatureConfig;
use crate::error::{Error, Result};

pub const FEATURE_SIZE: usize = 40;

/// Time-averaged MFCCs of one recording.
pub type FeatureVector = Array1<f32>;

/// Turns waveforms into fixed-length MFCC summaries.
///
/// The window and mel filterbank are computed once; FFT and DCT plans are
/// made per call so the extractor can be shared across rayon workers.
pub struct FeatureExtractor {
    config: FeatureConfig,
    window: Vec<f32>,
    /// [n_mels, n_fft / 2 + 1]
    mel_filters: Array2<f32>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        let n_fft = config.n_fft;
        let bins = n_fft / 2 + 1;
        let filters = mel::<f32>(
            config.sample_rate as usize,
            n_fft,
            Some(config.n_mels),
            None,
            None,
            false,
            NormalizationFactor::One,
        );
        let mut mel_filters = Array2::<f32>::zeros((config.n_mels, bins));
        for (mut row, filt) in mel_filters.outer_iter_mut().zip(filters.iter()) {
            for (dst, &w) in row.iter_mut().zip(filt.iter()) {
                *dst = w;
            }
        }

        Self {
            window: hann_window(n_fft),
            mel_filters,
            config,
        }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Load, resample and summarise an audio file.
    pub fn extract_file(&self, path: &Path) -> Result<FeatureVector> {
        let audio = load_audio(path)?;
        let samples = resample(&audio.samples, audio.sample_rate, self.config.sample_rate)?;
        if samples.is_empty() {
            return Err(Error::EmptyAudio(path.to_path_buf()));
        }
        self.extract(&samples)
    }

    /// MFCC matrix of already resampled audio, averaged over frames.
    pub fn extract(&self, samples: &[f32]) -> Result<FeatureVector> {
        if samples.is_empty() {
            return Err(Error::EmptyAudio(PathBuf::new()));
        }
        self.mfcc(samples)?
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::EmptyAudio(PathBuf::new()))
    }

    /// Full MFCC matrix, one row per frame.
    pub fn mfcc(&self, samples: &[f32]) -> Result<Array2<f32>> {
        let power = self.power_spectrogram(samples)?;
        let mut mel_db = power.dot(&self.mel_filters.t());
        power_to_db(&mut mel_db, self.config.top_db);

        let n_mels = self.config.n_mels;
        let n_mfcc = self.config.n_mfcc.min(n_mels);
        let dct = DctPlanner::<f32>::new().plan_dct2(n_mels);
        // rustdct is unnormalized, scale to the orthonormal DCT-II.
        let first = (1.0 / n_mels as f32).sqrt();
        let rest = (2.0 / n_mels as f32).sqrt();

        let mut out = Array2::<f32>::zeros((mel_db.nrows(), n_mfcc));
        let mut buffer = vec![0.0f32; n_mels];
        for (frame, mut coeffs) in mel_db.outer_iter().zip(out.outer_iter_mut()) {
            buffer.iter_mut().zip(frame.iter()).for_each(|(b, &v)| *b = v);
            dct.process_dct2(&mut buffer);
            for (k, c) in coeffs.iter_mut().enumerate() {
                *c = buffer[k] * if k == 0 { first } else { rest };
            }
        }
        Ok(out)
    }

    /// Centered, zero padded frames through a Hann window, |FFT|^2.
    fn power_spectrogram(&self, samples: &[f32]) -> Result<Array2<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let pad = n_fft / 2;

        let mut padded = vec![0.0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);
        let frames = 1 + (padded.len() - n_fft) / hop;

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);
        let mut input = fft.make_input_vec();
        let mut spectrum: Vec<Complex<f32>> = fft.make_output_vec();

        let mut power = Array2::<f32>::zeros((frames, n_fft / 2 + 1));
        for (f, mut row) in power.outer_iter_mut().enumerate() {
            let start = f * hop;
            for ((dst, &s), &w) in input
                .iter_mut()
                .zip(&padded[start..start + n_fft])
                .zip(&self.window)
            {
                *dst = s * w;
            }
            fft.process(&mut input, &mut spectrum)?;
            for (p, c) in row.iter_mut().zip(spectrum.iter()) {
                *p = c.norm_sqr();
            }
        }
        Ok(power)
    }
}

/// Periodic Hann window.
fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / len as f32).cos())
        .collect()
}

/// Power to decibels in place, clipped to `top_db` below the peak.
fn power_to_db(values: &mut Array2<f32>, top_db: f32) {
    values.mapv_inplace(|v| 10.0 * v.max(1e-10).log10());
    let peak = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let floor = peak - top_db;
    values.mapv_inplace(|v| v.max(floor));
}
