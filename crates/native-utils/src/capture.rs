//! Microphone capture on a dedicated thread.
//!
//! `cpal::Stream` is not `Send`, so the stream is built, played and dropped on
//! its own thread. The device callback pushes mono samples into a ring buffer;
//! the thread drains it, resamples to 16 kHz and forwards chunks to an async
//! channel.

use crate::audio::{LIVE_INPUT_SAMPLE_RATE, StreamResampler};
use crate::device::get_or_default_input;
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

/// Device samples buffered between the callback and the capture thread.
const RING_CAPACITY: usize = 48_000;
/// Input chunk handed to the resampler.
const RESAMPLE_CHUNK: usize = 1024;

/// Owns the capture thread. Dropping it stops the device.
pub struct CaptureHandle {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Stops the stream and joins the thread. Safe to call more than once.
    pub fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Microphone capture thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens the input device and starts forwarding 16 kHz mono chunks to `frames_tx`.
///
/// Returns once the device is playing, or with the error that prevented it.
pub fn start_capture(
    device_name: Option<String>,
    frames_tx: mpsc::Sender<Vec<f32>>,
) -> Result<CaptureHandle> {
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let (init_tx, init_rx) = std_mpsc::channel::<Result<()>>();

    let thread = thread::Builder::new()
        .name("mic-capture".to_string())
        .spawn(move || {
            if let Err(e) = run_capture(device_name, frames_tx, stop_rx, &init_tx) {
                let _ = init_tx.send(Err(e));
            }
        })
        .context("Failed to spawn capture thread")?;

    match init_rx.recv() {
        Ok(Ok(())) => Ok(CaptureHandle {
            stop_tx,
            thread: Some(thread),
        }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(anyhow::anyhow!("capture thread exited before reporting status"))
        }
    }
}

fn run_capture(
    device_name: Option<String>,
    frames_tx: mpsc::Sender<Vec<f32>>,
    stop_rx: std_mpsc::Receiver<()>,
    init_tx: &std_mpsc::Sender<Result<()>>,
) -> Result<()> {
    let device = get_or_default_input(device_name)?;
    let supported = device
        .default_input_config()
        .context("Failed to get default input config")?;
    let config: cpal::StreamConfig = supported.config();
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;

    tracing::info!(
        "Capturing from {:?}: {} Hz, {} channels",
        device.name().unwrap_or_default(),
        sample_rate,
        channels
    );

    let (producer, mut consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, producer, channels),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, producer, channels),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, producer, channels),
        other => return Err(anyhow::anyhow!("unsupported sample format {other:?}")),
    }
    .context("Failed to build input stream")?;
    stream.play().context("Failed to start input stream")?;

    let mut resampler = StreamResampler::new(sample_rate, LIVE_INPUT_SAMPLE_RATE, RESAMPLE_CHUNK)?;
    let _ = init_tx.send(Ok(()));

    let mut scratch = Vec::with_capacity(RING_CAPACITY);
    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(std_mpsc::TryRecvError::Disconnected) => break,
            Err(std_mpsc::TryRecvError::Empty) => {}
        }

        scratch.clear();
        while let Some(sample) = consumer.try_pop() {
            scratch.push(sample);
        }
        if scratch.is_empty() {
            thread::sleep(Duration::from_millis(5));
            continue;
        }

        let resampled = resampler.process(&scratch);
        if resampled.is_empty() {
            continue;
        }
        match frames_tx.try_send(resampled) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Microphone consumer is behind, dropping audio");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }

    drop(stream);
    tracing::info!("Microphone capture stopped.");
    Ok(())
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: HeapProd<f32>,
    channels: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for frame in data.chunks(channels.max(1)) {
                let mono =
                    frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32;
                let _ = producer.try_push(mono);
            }
        },
        move |err| tracing::error!("An error occurred on input stream: {}", err),
        None,
    )
}
