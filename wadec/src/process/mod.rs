//! Frame decoding on top of a native core.
//!
//! Each codec decoder stages one frame at a time through its
//! [`MemoryArena`](crate::native::arena::MemoryArena) and reports the
//! result as a [`FrameOutcome`]. Everything else (batching, error policy,
//! position bookkeeping) is shared through [`FrameDecoder`].

pub mod mpeg;
pub mod ogg_opus;
pub mod opus;

use std::fmt;

use crate::fail_or_collect;
use crate::utils::errors::DecoderError;

/// What a decode entry point does when a frame fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Return the first frame error as [`DecoderError::Frame`].
    FailFast,
    /// Log the error, count the frame as zero samples and keep going.
    #[default]
    CollectErrors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderPhase {
    Uninitialized,
    Initializing,
    Ready,
    Decoding,
    Freed,
}

impl fmt::Display for DecoderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecoderPhase::Uninitialized => "uninitialized",
            DecoderPhase::Initializing => "initializing",
            DecoderPhase::Ready => "ready",
            DecoderPhase::Decoding => "decoding",
            DecoderPhase::Freed => "freed",
        };
        f.write_str(name)
    }
}

impl DecoderPhase {
    pub fn can_decode(self) -> bool {
        matches!(self, DecoderPhase::Ready | DecoderPhase::Decoding)
    }
}

/// A failed frame and where it sat in the input.
///
/// `relative_*` positions count from the start of the call that decoded the
/// frame; `total_*` counters are the decoder's lifetime totals before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub message: String,
    pub frame_length: usize,
    pub relative_frame_number: u64,
    pub relative_input_bytes: u64,
    pub relative_output_samples: u64,
    pub total_frame_number: u64,
    pub total_input_bytes: u64,
    pub total_output_samples: u64,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (frame {}, {} bytes, input offset {}, output sample {})",
            self.message,
            self.total_frame_number,
            self.frame_length,
            self.total_input_bytes,
            self.total_output_samples
        )
    }
}

/// Lifetime counters of one decoder instance. Survive `reset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeTotals {
    pub frames: u64,
    pub input_bytes: u64,
    pub output_samples: u64,
}

/// Planar float audio from one decode call.
///
/// Every channel holds exactly `samples_decoded` samples.
#[derive(Debug, Default, PartialEq)]
pub struct DecodedAudio {
    channel_data: Vec<Vec<f32>>,
    samples_decoded: usize,
    sample_rate: u32,
    errors: Vec<ErrorRecord>,
}

impl DecodedAudio {
    pub fn new(
        channel_data: Vec<Vec<f32>>,
        samples_decoded: usize,
        sample_rate: u32,
        errors: Vec<ErrorRecord>,
    ) -> Self {
        debug_assert!(channel_data.iter().all(|c| c.len() == samples_decoded));
        Self {
            channel_data,
            samples_decoded,
            sample_rate,
            errors,
        }
    }

    pub fn channel_data(&self) -> &[Vec<f32>] {
        &self.channel_data
    }

    pub fn channels(&self) -> usize {
        self.channel_data.len()
    }

    pub fn samples_decoded(&self) -> usize {
        self.samples_decoded
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// Hands the channel buffers to the caller without copying.
    pub fn into_channel_data(self) -> Vec<Vec<f32>> {
        self.channel_data
    }
}

/// Result of pushing one frame through a native decode entry point.
#[derive(Debug, PartialEq)]
pub enum FrameOutcome {
    /// One buffer per output channel, all the same length.
    Samples(Vec<Vec<f32>>),
    /// The frame was rejected; the message is already formatted.
    Error(String),
}

/// Formats a native error code as `"<lib> <code> <text>"`.
pub(crate) fn describe_error(lib: &str, table: &[(i32, &str)], code: i32) -> String {
    let text = table
        .iter()
        .find(|(c, _)| *c == code)
        .map_or("Unknown Error", |(_, text)| text);
    format!("{lib} {code} {text}")
}

pub(crate) fn oversized_frame(len: usize, capacity: usize) -> FrameOutcome {
    FrameOutcome::Error(format!(
        "input frame of {len} bytes exceeds staging capacity {capacity}"
    ))
}

pub trait FrameDecoder {
    fn phase(&self) -> DecoderPhase;

    /// Channels in the decoded output. Decoders that learn the layout from
    /// the stream report what they have seen so far.
    fn output_channels(&self) -> usize;

    /// 0 while the core has not reported one yet.
    fn sample_rate(&self) -> u32;

    /// Size of the input staging buffer in bytes.
    fn input_capacity(&self) -> usize;

    fn totals(&self) -> DecodeTotals;

    fn totals_mut(&mut self) -> &mut DecodeTotals;

    /// Decodes one frame through the core. Native error codes are reported as
    /// [`FrameOutcome::Error`]; `Err` is reserved for failures of the decoder
    /// itself (wrong phase, arena, poisoned core).
    fn decode_raw(&mut self, frame: &[u8]) -> Result<FrameOutcome, DecoderError>;

    /// Destroys the native decoder and releases every staging buffer.
    fn free(&mut self) -> Result<(), DecoderError>;

    /// Frees and re-creates the native decoder with the same configuration.
    fn reset(&mut self) -> Result<(), DecoderError>;

    fn decode_frames<F: AsRef<[u8]>>(
        &mut self,
        frames: &[F],
        policy: ErrorPolicy,
    ) -> Result<DecodedAudio, DecoderError>
    where
        Self: Sized,
    {
        let mut channel_data = vec![Vec::new(); self.output_channels()];
        let mut errors = Vec::new();
        let mut frame_number = 0u64;
        let mut input_bytes = 0u64;
        let mut output_samples = 0u64;

        for frame in frames {
            let frame = frame.as_ref();

            let samples = match self.decode_raw(frame)? {
                FrameOutcome::Samples(decoded) => {
                    let samples = decoded.first().map_or(0, Vec::len);
                    // channels that appear mid-call are silent before they start
                    if channel_data.len() < decoded.len() {
                        channel_data.resize(decoded.len(), vec![0.0; output_samples as usize]);
                    }
                    let mut decoded = decoded.into_iter();
                    for dest in channel_data.iter_mut() {
                        match decoded.next() {
                            Some(channel) if dest.is_empty() => *dest = channel,
                            Some(channel) => dest.extend_from_slice(&channel),
                            None => dest.resize(dest.len() + samples, 0.0),
                        }
                    }
                    samples
                }
                FrameOutcome::Error(message) => {
                    let totals = self.totals();
                    fail_or_collect!(
                        policy,
                        errors,
                        ErrorRecord {
                            message,
                            frame_length: frame.len(),
                            relative_frame_number: frame_number,
                            relative_input_bytes: input_bytes,
                            relative_output_samples: output_samples,
                            total_frame_number: totals.frames,
                            total_input_bytes: totals.input_bytes,
                            total_output_samples: totals.output_samples,
                        }
                    );
                    0
                }
            };

            frame_number += 1;
            input_bytes += frame.len() as u64;
            output_samples += samples as u64;

            let totals = self.totals_mut();
            totals.frames += 1;
            totals.input_bytes += frame.len() as u64;
            totals.output_samples += samples as u64;
        }

        Ok(DecodedAudio::new(
            channel_data,
            output_samples as usize,
            self.sample_rate(),
            errors,
        ))
    }

    fn decode_frame(&mut self, frame: &[u8], policy: ErrorPolicy) -> Result<DecodedAudio, DecoderError>
    where
        Self: Sized,
    {
        self.decode_frames(&[frame], policy)
    }

    /// Decodes a byte stream by splitting it into input-capacity chunks.
    fn decode(&mut self, data: &[u8], policy: ErrorPolicy) -> Result<DecodedAudio, DecoderError>
    where
        Self: Sized,
    {
        let chunks: Vec<&[u8]> = data.chunks(self.input_capacity().max(1)).collect();
        self.decode_frames(&chunks, policy)
    }
}
