use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("WAV decoding error: {0}")]
    Wav(#[from] hound::Error),
    #[error("MP3 decoding error: {0}")]
    Mp3(#[from] minimp3::Error),
    #[error("no audio samples in {0}")]
    EmptyAudio(PathBuf),
    #[error("failed to build resampler: {0}")]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),
    #[error("resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
    #[error("FFT failed: {0}")]
    Fft(#[from] realfft::FftError),
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("failed to read checkpoint: {0}")]
    ReadNpz(#[from] ndarray_npy::ReadNpzError),
    #[error("failed to write checkpoint: {0}")]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),
    #[error("malformed checkpoint: {0}")]
    Checkpoint(String),
    #[error("unknown label {0:?}, expected \"parkinson\" or \"notParkinson\"")]
    UnknownLabel(String),
    #[error("unknown class code {0}")]
    UnknownClass(usize),
    #[error("index {index} out of range for dataset of {len} samples")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("{features} feature vectors but {labels} labels")]
    LengthMismatch { features: usize, labels: usize },
    #[error("feature vector {index} has {found} values, expected {expected}")]
    FeatureWidth {
        expected: usize,
        found: usize,
        index: usize,
    },
    #[error("model expects {found} input features but the extractor produces {expected}")]
    InputWidth { expected: usize, found: usize },
    #[error("missing dataset directory {0}")]
    MissingDirectory(PathBuf),
    #[error("{0} split is empty")]
    EmptySplit(&'static str),
    #[error("loss became non-finite at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
