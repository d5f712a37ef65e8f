/// Parameters of the MFCC front end. Defaults follow librosa's `mfcc`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureConfig {
    pub sample_rate: u32,
    pub n_mfcc: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    /// Dynamic range kept below the loudest mel bin, in dB.
    pub top_db: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            n_mfcc: 40,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            top_db: 80.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub hidden_size: usize,
    pub head_size: usize,
    pub num_layers: usize,
    pub dropout: f32,
    /// Seed for weight init, dropout masks and evaluation shuffling.
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 35,
            batch_size: 32,
            learning_rate: 9e-6,
            hidden_size: 128,
            head_size: 64,
            num_layers: 2,
            dropout: 0.5,
            seed: None,
        }
    }
}
