use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Sample rate the live model endpoint expects for microphone audio.
pub const LIVE_INPUT_SAMPLE_RATE: u32 = 16_000;
/// MIME tag attached to every outbound frame.
pub const LIVE_INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";
/// Number of samples in one microphone frame.
pub const FRAME_SAMPLES: usize = 4096;
/// Upper bound for a single frame: one second of input audio.
pub const MAX_FRAME_SAMPLES: usize = LIVE_INPUT_SAMPLE_RATE as usize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("audio frame has no samples")]
    EmptyFrame,
    #[error("audio frame has {len} samples, at most {max} allowed")]
    FrameTooLong { len: usize, max: usize },
    #[error("PCM16 payload has odd byte length {0}")]
    OddByteLength(usize),
    #[error("invalid base64 payload: {0}")]
    InvalidEncoding(String),
}

/// One immutable unit of outbound audio: little-endian PCM16, mono, 16 kHz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pcm: Vec<u8>,
    mime_type: &'static str,
}

impl AudioFrame {
    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }

    /// The text-safe form sent over the wire.
    pub fn to_base64(&self) -> String {
        encode_text(&self.pcm)
    }
}

/// Quantizes one float sample to int16 with `round(sample * 32767)`, clamped.
pub fn quantize(sample: f32) -> i16 {
    (sample * i16::MAX as f32)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Builds an outbound frame from float samples in `[-1, 1]`.
pub fn encode_frame(samples: &[f32]) -> Result<AudioFrame, CodecError> {
    if samples.is_empty() {
        return Err(CodecError::EmptyFrame);
    }
    if samples.len() > MAX_FRAME_SAMPLES {
        return Err(CodecError::FrameTooLong {
            len: samples.len(),
            max: MAX_FRAME_SAMPLES,
        });
    }

    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        pcm.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    Ok(AudioFrame {
        pcm,
        mime_type: LIVE_INPUT_MIME_TYPE,
    })
}

/// Converts float samples to int16 with the fixed-point convention of the
/// avatar service's audio format.
///
/// Negative samples scale by 32768 and positive ones by 32767, so both ends of
/// `[-1, 1]` land exactly on the int16 limits.
pub fn pcm_from_float_buffer(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let s = sample.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Encodes raw bytes into the base64 wire form.
pub fn encode_text(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Exact inverse of [`encode_text`].
pub fn decode_to_bytes(text: &str) -> Result<Vec<u8>, CodecError> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| CodecError::InvalidEncoding(e.to_string()))
}

/// Interprets little-endian bytes as int16 samples.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Result<Vec<i16>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddByteLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Decodes a base64 PCM16 payload back into float samples.
pub fn decode_f32(text: &str) -> Result<Vec<f32>, CodecError> {
    let bytes = decode_to_bytes(text)?;
    Ok(pcm16_from_bytes(&bytes)?
        .into_iter()
        .map(|v| v as f32 / i16::MAX as f32)
        .collect())
}

/// Averages interleaved channels down to mono.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|c| c.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Mono resampler that accepts arbitrarily sized input and keeps the remainder
/// between calls. Passes audio through untouched when the rates match.
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(in_rate: u32, out_rate: u32, chunk_size: usize) -> anyhow::Result<Self> {
        let inner = if in_rate == out_rate {
            None
        } else {
            Some(create_resampler(in_rate as f64, out_rate as f64, chunk_size)?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.inner.as_mut() else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(&[chunk.as_slice()], None) {
                Ok(mut channels) => {
                    if let Some(mono) = channels.pop() {
                        out.extend(mono);
                    }
                }
                Err(e) => tracing::warn!("failed to resample audio chunk: {}", e),
            }
        }
        out
    }
}
