//! Parkinson's speech classifier.
//!
//! Recordings are reduced to 40 time-averaged MFCCs and classified by a
//! two-layer LSTM with a small dense head. Everything runs on `ndarray`,
//! including the hand-written backward pass and the Adam optimizer.

pub mod audio;
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod model;
pub mod optim;
pub mod predict;
pub mod train;

pub use config::{FeatureConfig, TrainingConfig};
pub use dataset::{Batch, BatchLoader, Dataset, DatasetSplits, Label, Order};
pub use error::{Error, Result};
pub use features::{FeatureExtractor, FeatureVector, FEATURE_SIZE};
pub use model::{Mode, SequenceClassifier};
pub use predict::{DirectoryPrediction, Predictor, Tally};
pub use train::{evaluate, train, train_and_evaluate, LossTrace, TrainingReport};
