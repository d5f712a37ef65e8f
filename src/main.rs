use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::info;

use parkinson_voice::{
    train_and_evaluate, DatasetSplits, FeatureExtractor, Predictor, SequenceClassifier,
    TrainingConfig,
};

const DEFAULT_MODEL: &str = "models/audio_classifier.npz";

#[derive(Parser)]
#[command(about = "Classifies speech recordings as Parkinson's or not.")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a model on a dataset tree and save it.
    Train {
        /// Dataset root containing train/, test/ and validation/.
        #[arg(short, long)]
        dataset: PathBuf,

        /// Output weight file.
        #[arg(short, long, default_value = DEFAULT_MODEL)]
        model: PathBuf,

        /// Number of epochs.
        #[arg(short, long, default_value_t = 35)]
        epochs: usize,

        /// Seed for weight init, dropout and shuffling.
        #[arg(long)]
        seed: Option<u64>,

        /// Write the per-epoch losses to this .npz file.
        #[arg(long)]
        loss_trace: Option<PathBuf>,
    },
    /// Classify every .wav file in a directory.
    Predict {
        /// Directory with the recordings to classify.
        directory: PathBuf,

        /// Weight file.
        #[arg(short, long, default_value = DEFAULT_MODEL)]
        model: PathBuf,

        /// Dataset root, used to train when the weight file is missing.
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Train again even if the weight file exists.
        #[arg(long, default_value_t = false)]
        retrain: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::parse().command {
        Command::Train {
            dataset,
            model,
            epochs,
            seed,
            loss_trace,
        } => {
            let config = TrainingConfig {
                epochs,
                seed,
                ..TrainingConfig::default()
            };
            run_training(&dataset, &model, &config, loss_trace.as_deref())?;
        }
        Command::Predict {
            directory,
            model,
            dataset,
            retrain,
        } => {
            let classifier = if retrain || !model.is_file() {
                let Some(dataset) = dataset else {
                    bail!(
                        "{} not found, pass --dataset to train a model first",
                        model.display()
                    );
                };
                run_training(&dataset, &model, &TrainingConfig::default(), None)?
            } else {
                SequenceClassifier::load(&model)
                    .with_context(|| format!("Loading weights from {}", model.display()))?
            };
            run_prediction(classifier, &directory)?;
        }
    }

    Ok(())
}

fn run_training(
    dataset: &Path,
    model: &Path,
    config: &TrainingConfig,
    loss_trace: Option<&Path>,
) -> anyhow::Result<SequenceClassifier> {
    let extractor = FeatureExtractor::default();
    let splits = DatasetSplits::load(dataset, &extractor)
        .with_context(|| format!("Loading dataset from {}", dataset.display()))?;

    if let Some(parent) = model.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Creating {}", parent.display()))?;
    }

    let (classifier, report) = train_and_evaluate(&splits, config, model)?;
    match report.accuracy {
        Some(accuracy) => println!("Accuracy: {accuracy}%"),
        None => println!("Accuracy: n/a, empty test split"),
    }

    if let Some(path) = loss_trace {
        report
            .losses
            .save(path)
            .with_context(|| format!("Saving loss trace to {}", path.display()))?;
        info!("Loss trace saved to {}", path.display());
    }

    Ok(classifier)
}

fn run_prediction(classifier: SequenceClassifier, directory: &Path) -> anyhow::Result<()> {
    let predictor = Predictor::new(classifier, FeatureExtractor::default())?;
    let result = predictor
        .predict_directory(directory)
        .with_context(|| format!("Classifying files in {}", directory.display()))?;

    for (path, label) in &result.predictions {
        println!(
            "The predicted class for the audio file {} is: {label}",
            path.display()
        );
    }
    println!("{}", result.tally);

    Ok(())
}
