use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::features::{FeatureExtractor, FeatureVector};

pub const SPLITS: [&str; 3] = ["train", "test", "validation"];
pub const CATEGORIES: [&str; 3] = [
    "elderlyHealthyControl",
    "peopleWithParkinson",
    "youngHealthyControl",
];
const PARKINSON_CATEGORY: &str = "peopleWithParkinson";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Label {
    Parkinson,
    NotParkinson,
}

impl Label {
    pub const ALL: [Label; 2] = [Label::Parkinson, Label::NotParkinson];

    /// Integer class used by the loss and the network output.
    pub fn code(self) -> usize {
        match self {
            Label::Parkinson => 0,
            Label::NotParkinson => 1,
        }
    }

    pub fn from_code(code: usize) -> Result<Self> {
        match code {
            0 => Ok(Label::Parkinson),
            1 => Ok(Label::NotParkinson),
            other => Err(Error::UnknownClass(other)),
        }
    }

    /// Label implied by a dataset category directory.
    pub fn from_category(category: &str) -> Self {
        if category == PARKINSON_CATEGORY {
            Label::Parkinson
        } else {
            Label::NotParkinson
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Parkinson => "parkinson",
            Label::NotParkinson => "notParkinson",
        }
    }
}

impl FromStr for Label {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "parkinson" => Ok(Label::Parkinson),
            "notParkinson" => Ok(Label::NotParkinson),
            other => Err(Error::UnknownLabel(other.to_string())),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Parkinson => f.write_str("Parkinson's"),
            Label::NotParkinson => f.write_str("Not Parkinson's"),
        }
    }
}

/// Feature vectors paired with their labels.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    features: Vec<FeatureVector>,
    labels: Vec<Label>,
}

impl Dataset {
    pub fn new(features: Vec<FeatureVector>, labels: Vec<Label>) -> Result<Self> {
        if features.len() != labels.len() {
            return Err(Error::LengthMismatch {
                features: features.len(),
                labels: labels.len(),
            });
        }
        if let Some(expected) = features.first().map(|f| f.len()) {
            if let Some((index, f)) = features
                .iter()
                .enumerate()
                .find(|(_, f)| f.len() != expected)
            {
                return Err(Error::FeatureWidth {
                    expected,
                    found: f.len(),
                    index,
                });
            }
        }
        Ok(Self { features, labels })
    }

    /// Build from label strings, rejecting anything but the two known categories.
    pub fn from_strings<S: AsRef<str>>(features: Vec<FeatureVector>, labels: &[S]) -> Result<Self> {
        let labels = labels
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<Label>>>()?;
        Self::new(features, labels)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Feature vector and integer class code at `index`.
    pub fn get(&self, index: usize) -> Result<(&FeatureVector, usize)> {
        match (self.features.get(index), self.labels.get(index)) {
            (Some(features), Some(label)) => Ok((features, label.code())),
            _ => Err(Error::IndexOutOfRange {
                index,
                len: self.len(),
            }),
        }
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn feature_size(&self) -> Option<usize> {
        self.features.first().map(|f| f.len())
    }

    fn push(&mut self, features: FeatureVector, label: Label) {
        self.features.push(features);
        self.labels.push(label);
    }
}

/// The three disjoint splits of the corpus.
#[derive(Debug, Clone, Default)]
pub struct DatasetSplits {
    pub train: Dataset,
    pub test: Dataset,
    pub validation: Dataset,
}

impl DatasetSplits {
    /// Walk `root/<split>/<category>/<subject>/trimmed/*.wav` and extract features.
    pub fn load(root: &Path, extractor: &FeatureExtractor) -> Result<Self> {
        let mut splits = DatasetSplits::default();
        for split in SPLITS {
            let files = list_split(root, split)?;
            info!("{split}: extracting features from {} files", files.len());
            let dataset = extract_all(&files, extractor)?;
            match split {
                "train" => splits.train = dataset,
                "test" => splits.test = dataset,
                _ => splits.validation = dataset,
            }
        }
        Ok(splits)
    }
}

fn list_split(root: &Path, split: &str) -> Result<Vec<(PathBuf, Label)>> {
    let mut files = Vec::new();
    for category in CATEGORIES {
        let dir = root.join(split).join(category);
        if !dir.is_dir() {
            return Err(Error::MissingDirectory(dir));
        }
        let label = Label::from_category(category);
        for subject in sorted_entries(&dir)?.into_iter().filter(|p| p.is_dir()) {
            let trimmed = subject.join("trimmed");
            if !trimmed.is_dir() {
                debug!("Skipping {}: no trimmed folder", subject.display());
                continue;
            }
            files.extend(wav_files(&trimmed)?.into_iter().map(|p| (p, label)));
        }
    }
    Ok(files)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()).map_err(|e| Error::io(dir, e)))
        .collect::<Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

/// All `*.wav` files directly inside `dir`, sorted.
pub fn wav_files(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "wav"))
        .collect())
}

fn extract_all(files: &[(PathBuf, Label)], extractor: &FeatureExtractor) -> Result<Dataset> {
    let pb = ProgressBar::new(files.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("{msg} {bar:40} {pos}/{len} ETA {eta}") {
        pb.set_style(style);
    }
    pb.set_message("MFCC");

    let features = files
        .par_iter()
        .map(|(path, _)| {
            let features = extractor.extract_file(path);
            pb.inc(1);
            features
        })
        .collect::<Result<Vec<_>>>()?;
    pb.finish_and_clear();

    let mut dataset = Dataset::default();
    for (features, (_, label)) in features.into_iter().zip(files) {
        dataset.push(features, *label);
    }
    Ok(dataset)
}

/// Iteration order of a `BatchLoader` pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Order {
    /// Same order every pass.
    Sequential,
    /// Reshuffled every pass.
    Shuffled,
}

/// A mini-batch: stacked feature rows and their class codes.
#[derive(Debug, Clone)]
pub struct Batch {
    pub inputs: Array2<f32>,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Groups dataset entries into mini-batches, the last one possibly short.
pub struct BatchLoader<'a> {
    dataset: &'a Dataset,
    batch_size: usize,
    order: Order,
}

impl<'a> BatchLoader<'a> {
    pub fn new(dataset: &'a Dataset, batch_size: usize, order: Order) -> Self {
        assert!(batch_size > 0, "Batch size must be positive");
        Self {
            dataset,
            batch_size,
            order,
        }
    }

    /// Number of batches in one pass.
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// One pass over the dataset. `rng` is only consulted for `Order::Shuffled`.
    pub fn batches<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<Batch>> {
        let mut indices = (0..self.dataset.len()).collect::<Vec<_>>();
        if self.order == Order::Shuffled {
            indices.shuffle(rng);
        }
        indices
            .chunks(self.batch_size)
            .map(|chunk| self.collate(chunk))
            .collect()
    }

    fn collate(&self, indices: &[usize]) -> Result<Batch> {
        let width = self.dataset.feature_size().unwrap_or(0);
        let mut inputs = Array2::<f32>::zeros((indices.len(), width));
        let mut labels = Vec::with_capacity(indices.len());
        for (mut row, &i) in inputs.outer_iter_mut().zip(indices) {
            let (features, label) = self.dataset.get(i)?;
            row.assign(features);
            labels.push(label);
        }
        Ok(Batch { inputs, labels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn dataset(n: usize) -> Dataset {
        let features = (0..n).map(|i| Array1::from_elem(4, i as f32)).collect();
        let labels = (0..n)
            .map(|i| if i % 3 == 0 { "parkinson" } else { "notParkinson" })
            .collect::<Vec<_>>();
        Dataset::from_strings(features, &labels).unwrap()
    }

    mod labels {
        use super::super::*;

        #[test]
        fn test_codes() {
            assert_eq!(0, Label::Parkinson.code());
            assert_eq!(1, Label::NotParkinson.code());
            for label in Label::ALL {
                assert_eq!(label, Label::from_code(label.code()).unwrap());
                assert_eq!(label, label.as_str().parse().unwrap());
            }
            assert!(matches!(Label::from_code(2), Err(Error::UnknownClass(2))));
        }

        #[test]
        fn test_unknown_string() {
            assert!(matches!(
                "youngHealthyControl".parse::<Label>(),
                Err(Error::UnknownLabel(_))
            ));
        }

        #[test]
        fn test_category() {
            assert_eq!(Label::Parkinson, Label::from_category("peopleWithParkinson"));
            assert_eq!(Label::NotParkinson, Label::from_category("elderlyHealthyControl"));
            assert_eq!(Label::NotParkinson, Label::from_category("youngHealthyControl"));
        }

        #[test]
        fn test_display() {
            assert_eq!("Parkinson's", Label::Parkinson.to_string());
            assert_eq!("Not Parkinson's", Label::NotParkinson.to_string());
        }
    }

    #[test]
    fn test_len_and_lookup() {
        let ds = dataset(10);
        assert_eq!(10, ds.len());
        for i in 0..ds.len() {
            let (features, label) = ds.get(i).unwrap();
            assert!(label <= 1);
            assert_eq!(i as f32, features[0]);
        }
        assert_eq!(0, ds.get(0).unwrap().1);
        assert_eq!(1, ds.get(1).unwrap().1);
    }

    #[test]
    fn test_lookup_out_of_range() {
        let ds = dataset(3);
        assert!(matches!(
            ds.get(3),
            Err(Error::IndexOutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_unknown_label_rejected() {
        let features = vec![Array1::zeros(4)];
        assert!(matches!(
            Dataset::from_strings(features, &["healthy"]),
            Err(Error::UnknownLabel(_))
        ));
    }

    #[test]
    fn test_length_mismatch() {
        assert!(matches!(
            Dataset::new(vec![Array1::zeros(4)], vec![]),
            Err(Error::LengthMismatch { features: 1, labels: 0 })
        ));
    }

    #[test]
    fn test_mixed_feature_widths() {
        let features = vec![Array1::zeros(4), Array1::zeros(4), Array1::zeros(3)];
        assert!(matches!(
            Dataset::new(features, vec![Label::Parkinson; 3]),
            Err(Error::FeatureWidth {
                expected: 4,
                found: 3,
                index: 2
            })
        ));
    }

    #[test]
    fn test_batch_sizes() {
        let ds = dataset(70);
        let loader = BatchLoader::new(&ds, 32, Order::Sequential);
        let batches = loader.batches(&mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(3, loader.len());
        assert_eq!(
            vec![32, 32, 6],
            batches.iter().map(Batch::len).collect::<Vec<_>>()
        );
        assert_eq!((32, 4), batches[0].inputs.dim());
    }

    #[test]
    fn test_sequential_order_is_stable() {
        let ds = dataset(40);
        let loader = BatchLoader::new(&ds, 32, Order::Sequential);
        let mut rng = StdRng::seed_from_u64(1);
        let first = loader.batches(&mut rng).unwrap();
        let second = loader.batches(&mut rng).unwrap();
        assert_eq!(first[0].inputs, second[0].inputs);
        assert_eq!(0.0, first[0].inputs[[0, 0]]);
        assert_eq!(39.0, first[1].inputs[[7, 0]]);
    }

    #[test]
    fn test_shuffled_pass_covers_all() {
        let ds = dataset(75);
        let loader = BatchLoader::new(&ds, 32, Order::Shuffled);
        let mut rng = StdRng::seed_from_u64(7);
        let first = loader.batches(&mut rng).unwrap();
        let second = loader.batches(&mut rng).unwrap();

        let mut seen = first
            .iter()
            .flat_map(|b| b.inputs.column(0).to_vec())
            .map(|v| v as usize)
            .collect::<Vec<_>>();
        seen.sort_unstable();
        assert_eq!((0..75).collect::<Vec<_>>(), seen);
        assert_ne!(first[0].inputs, second[0].inputs);
    }

    #[test]
    fn test_batch_labels_follow_rows() {
        let ds = dataset(9);
        let loader = BatchLoader::new(&ds, 4, Order::Shuffled);
        for batch in loader.batches(&mut StdRng::seed_from_u64(3)).unwrap() {
            for (row, &label) in batch.inputs.outer_iter().zip(&batch.labels) {
                let index = row[0] as usize;
                assert_eq!(ds.get(index).unwrap().1, label);
            }
        }
    }
}
