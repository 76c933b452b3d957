//! Opus frame decoding through a core's `opus_frame_*` entry points.

use std::sync::Arc;

use log::{debug, warn};

use super::{
    DecodeTotals, DecoderPhase, FrameDecoder, FrameOutcome, describe_error, oversized_frame,
};
use crate::native::arena::{MemoryArena, View};
use crate::native::{OpusEntryPoints, SharedCore, lock_core};
use crate::utils::errors::{ConfigError, DecoderError};

pub const OPUS_SAMPLE_RATE: u32 = 48_000;

/// 120 ms at 256 kbit/s, per channel.
pub const INPUT_BYTES_PER_CHANNEL: usize = 3840;

/// 120 ms at 48 kHz, the longest Opus frame.
pub const OUTPUT_CHANNEL_SIZE: usize = 5760;

const MAX_FORCE_STEREO_CHANNELS: u8 = 8;

/// Value of a mapping table entry for a silent channel.
const SILENT_CHANNEL: u8 = 255;

pub const OPUS_ERRORS: &[(i32, &str)] = &[
    (-1, "OPUS_BAD_ARG: One or more invalid/out of range arguments"),
    (-2, "OPUS_BUFFER_TOO_SMALL: Not enough bytes allocated in the buffer"),
    (-3, "OPUS_INTERNAL_ERROR: An internal error was detected"),
    (-4, "OPUS_INVALID_PACKET: The compressed data passed is corrupted"),
    (-5, "OPUS_UNIMPLEMENTED: Invalid/unsupported request number"),
    (-6, "OPUS_INVALID_STATE: An encoder or decoder structure is invalid or already freed"),
    (-7, "OPUS_ALLOC_FAIL: Memory allocation has failed"),
];

/// Decoder options as they arrive from a container parser. Unset fields
/// take channel mapping family 0 defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpusDecoderOptions {
    pub channels: Option<u8>,
    pub stream_count: Option<u8>,
    pub coupled_stream_count: Option<u8>,
    pub channel_mapping_table: Option<Vec<u8>>,
    pub pre_skip: Option<u16>,
    pub force_stereo: bool,
}

impl OpusDecoderOptions {
    pub fn validate(self) -> Result<OpusDecoderConfig, ConfigError> {
        OpusDecoderConfig::try_from(self)
    }
}

/// Validated, immutable Opus decoder configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusDecoderConfig {
    channels: u8,
    stream_count: u8,
    coupled_stream_count: u8,
    channel_mapping_table: Vec<u8>,
    pre_skip: u16,
    force_stereo: bool,
}

impl Default for OpusDecoderConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            stream_count: 1,
            coupled_stream_count: 1,
            channel_mapping_table: vec![0, 1],
            pre_skip: 0,
            force_stereo: false,
        }
    }
}

impl TryFrom<OpusDecoderOptions> for OpusDecoderConfig {
    type Error = ConfigError;

    fn try_from(options: OpusDecoderOptions) -> Result<Self, ConfigError> {
        let channels = options.channels.unwrap_or(2);
        if channels == 0 {
            return Err(ConfigError::InvalidChannels(0));
        }

        // channel mapping family >= 1
        if channels > 2
            && (options.stream_count.is_none()
                || options.coupled_stream_count.is_none()
                || options.channel_mapping_table.is_none())
        {
            return Err(ConfigError::MissingTopology { channels });
        }

        let stream_count = options.stream_count.unwrap_or(1);
        let coupled_stream_count = options.coupled_stream_count.unwrap_or(channels - 1);
        let channel_mapping_table = options
            .channel_mapping_table
            .unwrap_or_else(|| if channels == 2 { vec![0, 1] } else { vec![0] });

        if channel_mapping_table.len() != channels as usize {
            return Err(ConfigError::MappingLength {
                expected: channels as usize,
                actual: channel_mapping_table.len(),
            });
        }
        if coupled_stream_count > stream_count {
            return Err(ConfigError::CoupledExceedsStreams {
                coupled: coupled_stream_count,
                streams: stream_count,
            });
        }

        let decoded_streams = stream_count as u32 + coupled_stream_count as u32;
        if decoded_streams > 255 {
            return Err(ConfigError::TooManyStreams(decoded_streams));
        }
        for (index, &value) in channel_mapping_table.iter().enumerate() {
            if value != SILENT_CHANNEL && value as u32 >= decoded_streams {
                return Err(ConfigError::MappingOutOfRange {
                    index,
                    value,
                    max: decoded_streams,
                });
            }
        }

        let force_stereo = options.force_stereo && channels <= MAX_FORCE_STEREO_CHANNELS && channels != 2;
        if options.force_stereo && !force_stereo {
            debug!("forceStereo ignored for {channels} channels");
        }

        Ok(Self {
            channels,
            stream_count,
            coupled_stream_count,
            channel_mapping_table,
            pre_skip: options.pre_skip.unwrap_or(0),
            force_stereo,
        })
    }
}

impl OpusDecoderConfig {
    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn stream_count(&self) -> u8 {
        self.stream_count
    }

    pub fn coupled_stream_count(&self) -> u8 {
        self.coupled_stream_count
    }

    pub fn channel_mapping_table(&self) -> &[u8] {
        &self.channel_mapping_table
    }

    pub fn pre_skip(&self) -> u16 {
        self.pre_skip
    }

    pub fn force_stereo(&self) -> bool {
        self.force_stereo
    }

    pub fn output_channels(&self) -> usize {
        if self.force_stereo { 2 } else { self.channels as usize }
    }

    pub fn input_capacity(&self) -> usize {
        INPUT_BYTES_PER_CHANNEL * self.channels as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct NativeDecoder {
    handle: u32,
    input: View<u8>,
    output: View<f32>,
}

pub struct OpusDecoder<C: OpusEntryPoints> {
    config: OpusDecoderConfig,
    core: SharedCore<C>,
    arena: MemoryArena,
    native: Option<NativeDecoder>,
    phase: DecoderPhase,
    totals: DecodeTotals,
}

impl<C: OpusEntryPoints> OpusDecoder<C> {
    /// Creates the native decoder and its staging buffers.
    pub fn new(core: SharedCore<C>, config: OpusDecoderConfig) -> Result<Self, DecoderError> {
        let mut decoder = Self {
            config,
            core,
            arena: MemoryArena::new(),
            native: None,
            phase: DecoderPhase::Uninitialized,
            totals: DecodeTotals::default(),
        };
        decoder.init()?;
        Ok(decoder)
    }

    pub fn config(&self) -> &OpusDecoderConfig {
        &self.config
    }

    fn init(&mut self) -> Result<(), DecoderError> {
        self.phase = DecoderPhase::Initializing;

        let core = Arc::clone(&self.core);
        let mut core = lock_core(&core)?;

        match self.create_native(&mut *core) {
            Ok(native) => {
                self.native = Some(native);
                self.phase = DecoderPhase::Ready;
                Ok(())
            }
            Err(e) => {
                self.arena.free(&mut *core);
                self.phase = DecoderPhase::Uninitialized;
                Err(e)
            }
        }
    }

    fn create_native(&mut self, core: &mut C) -> Result<NativeDecoder, DecoderError> {
        let config = &self.config;

        let mapping = self.arena.allocate::<u8, _>(core, config.channels as usize)?;
        self.arena.write_bytes(core, &mapping, &config.channel_mapping_table)?;

        let handle = core.opus_frame_decoder_create(
            config.channels as i32,
            config.stream_count as i32,
            config.coupled_stream_count as i32,
            mapping.ptr(),
            config.pre_skip as i32,
            config.force_stereo as i32,
        );
        if handle == 0 {
            return Err(DecoderError::CreateFailed);
        }

        let input = self.arena.allocate(core, config.input_capacity());
        let output = self
            .arena
            .allocate(core, OUTPUT_CHANNEL_SIZE * config.output_channels());
        match (input, output) {
            (Ok(input), Ok(output)) => Ok(NativeDecoder {
                handle,
                input,
                output,
            }),
            (Err(e), _) | (_, Err(e)) => {
                core.opus_frame_decoder_destroy(handle);
                Err(e.into())
            }
        }
    }
}

impl<C: OpusEntryPoints> FrameDecoder for OpusDecoder<C> {
    fn phase(&self) -> DecoderPhase {
        self.phase
    }

    fn output_channels(&self) -> usize {
        self.config.output_channels()
    }

    fn sample_rate(&self) -> u32 {
        OPUS_SAMPLE_RATE
    }

    fn input_capacity(&self) -> usize {
        self.config.input_capacity()
    }

    fn totals(&self) -> DecodeTotals {
        self.totals
    }

    fn totals_mut(&mut self) -> &mut DecodeTotals {
        &mut self.totals
    }

    fn decode_raw(&mut self, frame: &[u8]) -> Result<FrameOutcome, DecoderError> {
        let native = match self.native {
            Some(native) if self.phase.can_decode() => native,
            _ => {
                return Err(DecoderError::InvalidState {
                    operation: "decode",
                    phase: self.phase,
                });
            }
        };

        if frame.len() > native.input.len() {
            return Ok(oversized_frame(frame.len(), native.input.len()));
        }

        let core = Arc::clone(&self.core);
        let mut core = lock_core(&core)?;

        self.arena.write_bytes(&mut *core, &native.input, frame)?;
        let result = core.opus_frame_decode_float_deinterleaved(
            native.handle,
            native.input.ptr(),
            frame.len() as u32,
            native.output.ptr(),
        );
        self.phase = DecoderPhase::Decoding;

        if result < 0 {
            return Ok(FrameOutcome::Error(describe_error("libopus", OPUS_ERRORS, result)));
        }

        let samples = result as usize;
        let channels = (0..self.config.output_channels())
            .map(|channel| self.arena.read(&*core, &native.output, channel * samples, samples))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FrameOutcome::Samples(channels))
    }

    fn free(&mut self) -> Result<(), DecoderError> {
        if self.phase == DecoderPhase::Freed {
            return Ok(());
        }

        let core = Arc::clone(&self.core);
        let mut core = lock_core(&core)?;

        if let Some(native) = self.native.take() {
            core.opus_frame_decoder_destroy(native.handle);
        }
        self.arena.free(&mut *core);
        self.phase = DecoderPhase::Freed;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), DecoderError> {
        self.free()?;
        self.init()
    }
}

impl<C: OpusEntryPoints> Drop for OpusDecoder<C> {
    fn drop(&mut self) {
        if let Err(e) = self.free() {
            warn!("Opus decoder was not released: {e}");
        }
    }
}
