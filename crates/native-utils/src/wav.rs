//! A WAV file that plays the part of a microphone.
//!
//! The file is decoded up front, mixed to mono, resampled to the live input
//! rate and then released in real time so downstream framing sees the same
//! cadence a capture device would produce.

use crate::audio::{LIVE_INPUT_SAMPLE_RATE, StreamResampler, downmix};
use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Samples released per tick (100 ms at 16 kHz).
pub const WAV_CHUNK_SAMPLES: usize = 1600;

/// Loads a WAV file as 16 kHz mono float samples.
pub fn load_mono_16k(path: &Path) -> Result<Vec<f32>> {
    let mut reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("Failed to read float WAV samples")?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .context("Failed to read integer WAV samples")?
        }
    };

    let mono = downmix(&interleaved, spec.channels as usize);
    let mut resampler = StreamResampler::new(spec.sample_rate, LIVE_INPUT_SAMPLE_RATE, 1024)?;
    let samples = resampler.process(&mono);
    tracing::debug!(
        "Loaded {} ({} Hz, {}ch) as {} samples at 16 kHz",
        path.display(),
        spec.sample_rate,
        spec.channels,
        samples.len()
    );
    Ok(samples)
}

/// Streams `samples` into `frames_tx` in real time. The task ends when the
/// samples run out or the receiver is dropped.
pub fn play_into(samples: Vec<f32>, frames_tx: mpsc::Sender<Vec<f32>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_millis(
            (WAV_CHUNK_SAMPLES as u64 * 1000) / LIVE_INPUT_SAMPLE_RATE as u64,
        );
        let mut ticker = tokio::time::interval(period);
        for chunk in samples.chunks(WAV_CHUNK_SAMPLES) {
            ticker.tick().await;
            if frames_tx.send(chunk.to_vec()).await.is_err() {
                tracing::debug!("WAV receiver dropped, stopping playback.");
                return;
            }
        }
        tracing::info!("WAV input exhausted.");
    })
}
