use std::fmt;
use std::path::{Path, PathBuf};

use log::debug;
use ndarray::Axis;

use crate::dataset::{wav_files, Label};
use crate::error::{Error, Result};
use crate::features::FeatureExtractor;
use crate::model::SequenceClassifier;

/// Per-class counts over a set of predictions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub parkinson: usize,
    pub not_parkinson: usize,
}

impl Tally {
    pub fn add(&mut self, label: Label) {
        match label {
            Label::Parkinson => self.parkinson += 1,
            Label::NotParkinson => self.not_parkinson += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.parkinson + self.not_parkinson
    }

    /// Share of Parkinson's predictions in percent, `None` without predictions.
    pub fn parkinson_percentage(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.parkinson as f64 * 100.0 / total as f64),
        }
    }
}

impl FromIterator<Label> for Tally {
    fn from_iter<I: IntoIterator<Item = Label>>(iter: I) -> Self {
        let mut tally = Tally::default();
        for label in iter {
            tally.add(label);
        }
        tally
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(percentage) = self.parkinson_percentage() {
            writeln!(
                f,
                "The percentage of Parkinson's predictions is: {percentage:.2}%"
            )?;
        }
        writeln!(f, "Parkinson's: {}", self.parkinson)?;
        write!(f, "Not Parkinson's: {}", self.not_parkinson)
    }
}

/// Predictions for every file of a directory.
#[derive(Debug, Clone, Default)]
pub struct DirectoryPrediction {
    pub predictions: Vec<(PathBuf, Label)>,
    pub tally: Tally,
}

/// Single-file inference with a trained classifier.
pub struct Predictor {
    model: SequenceClassifier,
    extractor: FeatureExtractor,
}

impl Predictor {
    /// Fails when the model's input width differs from the extractor's output.
    pub fn new(model: SequenceClassifier, extractor: FeatureExtractor) -> Result<Self> {
        let expected = extractor.config().n_mfcc;
        let found = model.input_size();
        if found != expected {
            return Err(Error::InputWidth { expected, found });
        }
        Ok(Self { model, extractor })
    }

    pub fn predict_file(&self, path: &Path) -> Result<Label> {
        let features = self.extractor.extract_file(path)?;
        let batch = features.insert_axis(Axis(0));
        let class = self.model.predict(&batch)[0];
        let label = Label::from_code(class)?;
        debug!("{}: class {class}", path.display());
        Ok(label)
    }

    /// Classify every `*.wav` file directly inside `dir`, in name order.
    pub fn predict_directory(&self, dir: &Path) -> Result<DirectoryPrediction> {
        let mut result = DirectoryPrediction::default();
        for path in wav_files(dir)? {
            let label = self.predict_file(&path)?;
            result.tally.add(label);
            result.predictions.push((path, label));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_of_three() {
        let tally: Tally = [0, 1, 0]
            .into_iter()
            .map(|c| Label::from_code(c).unwrap())
            .collect();
        assert_eq!(2, tally.parkinson);
        assert_eq!(1, tally.not_parkinson);
        assert_eq!(
            "66.67",
            format!("{:.2}", tally.parkinson_percentage().unwrap())
        );
        assert_eq!(
            "The percentage of Parkinson's predictions is: 66.67%\nParkinson's: 2\nNot Parkinson's: 1",
            tally.to_string()
        );
    }

    #[test]
    fn test_model_width_must_match_extractor() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let model = SequenceClassifier::new(13, 4, 1, 2, 0.0, &mut StdRng::seed_from_u64(0));
        assert!(matches!(
            Predictor::new(model, FeatureExtractor::default()),
            Err(Error::InputWidth {
                expected: 40,
                found: 13
            })
        ));
    }

    #[test]
    fn test_empty_tally() {
        let tally = Tally::default();
        assert_eq!(None, tally.parkinson_percentage());
        assert_eq!("Parkinson's: 0\nNot Parkinson's: 0", tally.to_string());
    }
}
