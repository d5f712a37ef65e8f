use std::f32::consts::PI;
use std::fs;
use std::path::Path;

use parkinson_voice::{
    train_and_evaluate, DatasetSplits, Error, FeatureExtractor, Label, Predictor,
    SequenceClassifier, TrainingConfig, FEATURE_SIZE,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn write_tone(path: &Path, freq: f32, rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..rate / 4 {
        let v = 0.4 * (2.0 * PI * freq * i as f32 / rate as f32).sin();
        writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn write_silence(path: &Path, rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..rate / 4 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// A one-unit model that answers Parkinson's for audible recordings and
/// Not Parkinson's for digital silence.
///
/// Silence floors every mel band at -100 dB, so the first MFCC is
/// sqrt(128) * -100, about -1131. Anything audible sits far above -1100.
fn loudness_model() -> SequenceClassifier {
    let mut model = SequenceClassifier::new(FEATURE_SIZE, 1, 1, 1, 0.0, &mut StdRng::seed_from_u64(0));
    let params = model.parameters_mut();
    for mut tensor in params.tensors_mut() {
        tensor.fill(0.0);
    }
    // Gates i, f, g, o: input and output gates open, cell input follows
    // the first coefficient around -1100.
    let lstm = &mut params.lstm[0];
    lstm.bias_ih[0] = 10.0;
    lstm.bias_ih[3] = 10.0;
    lstm.weight_ih[[2, 0]] = 0.1;
    lstm.bias_ih[2] = 110.0;
    params.hidden_layer.weight[[0, 0]] = 1.0;
    // Without activation the bias picks class 1, an audible input pushes class 0.
    params.output_layer.weight[[0, 0]] = 10.0;
    params.output_layer.bias[1] = 1.0;
    model
}

/// root/<split>/<category>/<subject>/trimmed/*.wav, two subjects per category.
fn build_tree(root: &Path) {
    for split in ["train", "test", "validation"] {
        for (c, category) in [
            "elderlyHealthyControl",
            "peopleWithParkinson",
            "youngHealthyControl",
        ]
        .into_iter()
        .enumerate()
        {
            for subject in ["A", "B"] {
                let dir = root.join(split).join(category).join(subject).join("trimmed");
                fs::create_dir_all(&dir).unwrap();
                let base = 200.0 + 400.0 * c as f32;
                write_tone(&dir.join("a.wav"), base, 16000);
                write_tone(&dir.join("b.wav"), base * 1.5, 16000);
                fs::write(dir.join("notes.txt"), "ignored").unwrap();
            }
        }
    }
    // A subject without recordings is skipped.
    fs::create_dir_all(root.join("train/youngHealthyControl/C")).unwrap();
}

#[test]
fn test_load_dataset_tree() {
    let dir = tempfile::tempdir().unwrap();
    build_tree(dir.path());

    let splits = DatasetSplits::load(dir.path(), &FeatureExtractor::default()).unwrap();
    for split in [&splits.train, &splits.test, &splits.validation] {
        assert_eq!(12, split.len());
        assert_eq!(Some(FEATURE_SIZE), split.feature_size());
        let parkinson = split.labels().iter().filter(|&&l| l == Label::Parkinson).count();
        assert_eq!(4, parkinson);
    }
}

#[test]
fn test_missing_category_fails() {
    let dir = tempfile::tempdir().unwrap();
    build_tree(dir.path());
    fs::remove_dir_all(dir.path().join("validation/peopleWithParkinson")).unwrap();

    assert!(matches!(
        DatasetSplits::load(dir.path(), &FeatureExtractor::default()),
        Err(Error::MissingDirectory(_))
    ));
}

#[test]
fn test_train_save_and_predict() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("dataset");
    build_tree(&data);
    let checkpoint = dir.path().join("model.npz");

    let extractor = FeatureExtractor::default();
    let splits = DatasetSplits::load(&data, &extractor).unwrap();
    let config = TrainingConfig {
        epochs: 2,
        seed: Some(7),
        ..TrainingConfig::default()
    };
    let (model, report) = train_and_evaluate(&splits, &config, &checkpoint).unwrap();
    assert_eq!(2, report.losses.len());
    let accuracy = report.accuracy.unwrap();
    assert!((0.0..=100.0).contains(&accuracy));

    let loaded = SequenceClassifier::load(&checkpoint).unwrap();
    assert_eq!(model, loaded);

    let recordings = dir.path().join("recordings");
    fs::create_dir_all(&recordings).unwrap();
    for (i, freq) in [220.0, 880.0, 440.0].into_iter().enumerate() {
        write_tone(&recordings.join(format!("{i}.wav")), freq, 22050);
    }
    fs::write(recordings.join("readme.md"), "not audio").unwrap();

    let predictor = Predictor::new(loaded, extractor).unwrap();
    let result = predictor.predict_directory(&recordings).unwrap();
    assert_eq!(3, result.predictions.len());
    assert_eq!(3, result.tally.total());
    assert_eq!(recordings.join("0.wav"), result.predictions[0].0);

    // Same input, same weights, same answer.
    let again = predictor.predict_file(&recordings.join("0.wav")).unwrap();
    assert_eq!(result.predictions[0].1, again);
}

#[test]
fn test_directory_tally() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("0.wav"), 300.0, 22050);
    write_silence(&dir.path().join("1.wav"), 22050);
    write_tone(&dir.path().join("2.wav"), 500.0, 16000);

    let predictor = Predictor::new(loudness_model(), FeatureExtractor::default()).unwrap();
    let result = predictor.predict_directory(dir.path()).unwrap();

    let labels: Vec<Label> = result.predictions.iter().map(|(_, l)| *l).collect();
    assert_eq!(
        vec![Label::Parkinson, Label::NotParkinson, Label::Parkinson],
        labels
    );
    assert_eq!(2, result.tally.parkinson);
    assert_eq!(1, result.tally.not_parkinson);
    assert_eq!(
        "66.67",
        format!("{:.2}", result.tally.parkinson_percentage().unwrap())
    );
}
