use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use hound::SampleFormat;
use minimp3::{Decoder, Error as Mp3Error, Frame};
use rubato::{FftFixedInOut, Resampler};

use crate::error::{Error, Result};

const RESAMPLE_CHUNK: usize = 1024;

/// Mono waveform with amplitudes in [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Average interleaved frames down to a single channel.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Load all samples from a WAV file, integer PCM of any depth or 32-bit float.
pub fn load_wav(path: &Path) -> Result<AudioSample> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = hound::WavReader::new(BufReader::new(file))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok(AudioSample {
        samples: downmix(&interleaved, spec.channels as usize),
        sample_rate: spec.sample_rate,
    })
}

/// Load samples from an MP3 file using the `minimp3` decoder.
pub fn load_mp3(path: &Path) -> Result<AudioSample> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut decoder = Decoder::new(file);
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;
    loop {
        match decoder.next_frame() {
            Ok(Frame {
                data,
                sample_rate: sr,
                channels,
                ..
            }) => {
                if sample_rate == 0 {
                    sample_rate = sr as u32;
                }
                let frame: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                samples.extend(downmix(&frame, channels));
            }
            Err(Mp3Error::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    if sample_rate == 0 {
        return Err(Error::EmptyAudio(path.to_path_buf()));
    }
    Ok(AudioSample {
        samples,
        sample_rate,
    })
}

/// Load a mono waveform, choosing the decoder by file extension.
pub fn load_audio(path: &Path) -> Result<AudioSample> {
    let is_mp3 = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp3"));
    let audio = if is_mp3 { load_mp3(path)? } else { load_wav(path)? };
    if audio.samples.is_empty() {
        return Err(Error::EmptyAudio(path.to_path_buf()));
    }
    Ok(audio)
}

/// Resample a mono signal with rubato's FFT resampler.
///
/// The input is fed in fixed chunks and the tail is zero padded until the
/// resampler has flushed all of it. The resampler's output delay is dropped
/// from the front, leaving `ceil(len * to_rate / from_rate)` samples aligned
/// with the input.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let expected = (samples.len() as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;

    let mut resampler =
        FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 1)?;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut chunk = Vec::new();
    let mut pos = 0;
    while output.len() < expected + delay {
        let frames = resampler.input_frames_next();
        chunk.clear();
        chunk.resize(frames, 0.0f32);
        let end = (pos + frames).min(samples.len());
        if pos < end {
            chunk[..end - pos].copy_from_slice(&samples[pos..end]);
        }
        pos = end;

        let out = resampler.process(&[chunk.as_slice()], None)?;
        output.extend_from_slice(&out[0]);
    }
    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}
