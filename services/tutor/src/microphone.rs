//! Microphone sources for the orchestrator: a WAV file played in real time,
//! and (with the `cpal` feature) the host's capture device.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tutor_core::realtime_api::{Microphone, MicrophoneCapture, MicrophoneTrack};
use tutor_native_utils::wav;

/// Chunks buffered between the source and the orchestrator's framing task.
const SAMPLE_QUEUE: usize = 64;

/// Plays a WAV file as if it were spoken into a microphone.
pub struct WavMicrophone {
    path: PathBuf,
}

impl WavMicrophone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

struct PlaybackTrack {
    playback: Option<JoinHandle<()>>,
}

impl MicrophoneTrack for PlaybackTrack {
    fn stop(&mut self) -> Result<()> {
        if let Some(playback) = self.playback.take() {
            playback.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl Microphone for WavMicrophone {
    async fn acquire(&self) -> Result<MicrophoneCapture> {
        let path = self.path.clone();
        let samples = tokio::task::spawn_blocking(move || wav::load_mono_16k(&path))
            .await
            .context("WAV loader panicked")??;
        tracing::info!("Using {} as the microphone ({} samples).", self.path.display(), samples.len());

        let (tx, rx) = mpsc::channel(SAMPLE_QUEUE);
        let playback = wav::play_into(samples, tx);
        Ok(MicrophoneCapture {
            samples: rx,
            track: Box::new(PlaybackTrack {
                playback: Some(playback),
            }),
        })
    }
}

#[cfg(feature = "cpal")]
pub use device::DeviceMicrophone;

#[cfg(feature = "cpal")]
mod device {
    use super::*;
    use tutor_native_utils::capture::{CaptureHandle, start_capture};

    /// The host's input device, opened fresh on every `acquire`.
    pub struct DeviceMicrophone {
        device_name: Option<String>,
    }

    impl DeviceMicrophone {
        pub fn new(device_name: Option<String>) -> Self {
            Self { device_name }
        }
    }

    struct DeviceTrack(CaptureHandle);

    impl MicrophoneTrack for DeviceTrack {
        fn stop(&mut self) -> Result<()> {
            self.0.stop();
            Ok(())
        }
    }

    #[async_trait]
    impl Microphone for DeviceMicrophone {
        async fn acquire(&self) -> Result<MicrophoneCapture> {
            let (tx, rx) = mpsc::channel(SAMPLE_QUEUE);
            let device_name = self.device_name.clone();
            let handle = tokio::task::spawn_blocking(move || start_capture(device_name, tx))
                .await
                .context("capture start panicked")??;
            Ok(MicrophoneCapture {
                samples: rx,
                track: Box::new(DeviceTrack(handle)),
            })
        }
    }
}
