//! Ogg Opus stream decoding through a core's `ogg_opus_decoder_*` entry points.
//!
//! The core demuxes pages itself, so input is any slice of the container
//! stream rather than one Opus packet. The channel layout is only known
//! once the core has parsed the identification header; the core reports it
//! through an out-pointer on every successful call.

use std::sync::Arc;

use log::{debug, warn};

use super::opus::OPUS_SAMPLE_RATE;
use super::{
    DecodeTotals, DecoderPhase, FrameDecoder, FrameOutcome, describe_error, oversized_frame,
};
use crate::native::arena::{MemoryArena, View};
use crate::native::{OggOpusEntryPoints, SharedCore, lock_core};
use crate::utils::errors::{ArenaError, DecoderError};

/// Bytes of container stream passed to the core per call.
pub const INPUT_CAPACITY: usize = 32 * 1024;

/// Floats staged per channel.
pub const OUTPUT_CHANNEL_SIZE: usize = 120 * 48 * 32;

/// Most channels opusfile decodes to.
pub const MAX_OUTPUT_CHANNELS: usize = 8;

pub const OPUSFILE_ERRORS: &[(i32, &str)] = &[
    (-1, "OP_FALSE: A request did not succeed."),
    (-3, "OP_HOLE: There was a hole in the page sequence numbers (e.g., a page was corrupt or missing)."),
    (-128, "OP_EREAD: An underlying read, seek, or tell operation failed when it should have succeeded."),
    (-129, "OP_EFAULT: A NULL pointer was passed where one was unexpected, or an internal memory allocation failed, or an internal library error was encountered."),
    (-130, "OP_EIMPL: The stream used a feature that is not implemented, such as an unsupported channel family."),
    (-131, "OP_EINVAL: One or more parameters to a function were invalid."),
    (-132, "OP_ENOTFORMAT: A purported Ogg Opus stream did not begin with an Ogg page, a purported header packet did not start with one of the required strings, \"OpusHead\" or \"OpusTags\", or a link in a chained file was encountered that did not contain any logical Opus streams."),
    (-133, "OP_EBADHEADER: A required header packet was not properly formatted, contained illegal values, or was missing altogether."),
    (-134, "OP_EVERSION: The ID header contained an unrecognized version number."),
    (-136, "OP_EBADPACKET: An audio packet failed to decode properly. This is usually caused by a multistream Ogg packet where the durations of the individual Opus packets contained in it are not all the same."),
    (-137, "OP_EBADLINK: We failed to find data we had seen before, or the bitstream structure was sufficiently malformed that seeking to the target destination was impossible."),
    (-138, "OP_ENOSEEK: An operation that requires seeking was requested on an unseekable stream."),
    (-139, "OP_EBADTIMESTAMP: The first or last granule position of a link failed basic validity checks."),
    (-140, "Input buffer overflow"),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OggOpusDecoderConfig {
    /// Downmix to two channels inside the core.
    pub force_stereo: bool,
}

#[derive(Debug, Clone, Copy)]
struct NativeDecoder {
    handle: u32,
    input: View<u8>,
    output: View<f32>,
    channels_decoded: View<u32>,
}

pub struct OggOpusDecoder<C: OggOpusEntryPoints> {
    config: OggOpusDecoderConfig,
    core: SharedCore<C>,
    arena: MemoryArena,
    native: Option<NativeDecoder>,
    phase: DecoderPhase,
    channels: usize,
    totals: DecodeTotals,
}

impl<C: OggOpusEntryPoints> OggOpusDecoder<C> {
    pub fn new(core: SharedCore<C>, config: OggOpusDecoderConfig) -> Result<Self, DecoderError> {
        let mut decoder = Self {
            config,
            core,
            arena: MemoryArena::new(),
            native: None,
            phase: DecoderPhase::Uninitialized,
            channels: 0,
            totals: DecodeTotals::default(),
        };
        decoder.init()?;
        Ok(decoder)
    }

    pub fn config(&self) -> OggOpusDecoderConfig {
        self.config
    }

    fn init(&mut self) -> Result<(), DecoderError> {
        self.phase = DecoderPhase::Initializing;

        let core = Arc::clone(&self.core);
        let mut core = lock_core(&core)?;

        let force_stereo = self.config.force_stereo as i32;
        let created = stage(&mut self.arena, &mut *core)
            .map_err(DecoderError::from)
            .and_then(|(input, output, channels_decoded)| {
                match core.ogg_opus_decoder_create(force_stereo) {
                    0 => Err(DecoderError::CreateFailed),
                    handle => Ok(NativeDecoder {
                        handle,
                        input,
                        output,
                        channels_decoded,
                    }),
                }
            });

        match created {
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
}

fn stage<C: OggOpusEntryPoints>(
    arena: &mut MemoryArena,
    core: &mut C,
) -> Result<(View<u8>, View<f32>, View<u32>), ArenaError> {
    Ok((
        arena.allocate(core, INPUT_CAPACITY)?,
        arena.allocate(core, OUTPUT_CHANNEL_SIZE * MAX_OUTPUT_CHANNELS)?,
        arena.allocate(core, 1)?,
    ))
}

impl<C: OggOpusEntryPoints> FrameDecoder for OggOpusDecoder<C> {
    fn phase(&self) -> DecoderPhase {
        self.phase
    }

    /// 0 until the core has parsed the stream header.
    fn output_channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        OPUS_SAMPLE_RATE
    }

    fn input_capacity(&self) -> usize {
        INPUT_CAPACITY
    }

    fn totals(&self) -> DecodeTotals {
        self.totals
    }

    fn totals_mut(&mut self) -> &mut DecodeTotals {
        &mut self.totals
    }

    fn decode_raw(&mut self, chunk: &[u8]) -> Result<FrameOutcome, DecoderError> {
        let native = match self.native {
            Some(native) if self.phase.can_decode() => native,
            _ => {
                return Err(DecoderError::InvalidState {
                    operation: "decode",
                    phase: self.phase,
                });
            }
        };

        if chunk.len() > INPUT_CAPACITY {
            return Ok(oversized_frame(chunk.len(), INPUT_CAPACITY));
        }

        let core = Arc::clone(&self.core);
        let mut core = lock_core(&core)?;

        self.arena.write_bytes(&mut *core, &native.input, chunk)?;
        let result = core.ogg_opus_decoder_decode(
            native.handle,
            native.input.ptr(),
            chunk.len() as u32,
            native.channels_decoded.ptr(),
            native.output.ptr(),
        );
        self.phase = DecoderPhase::Decoding;

        if result < 0 {
            return Ok(FrameOutcome::Error(describe_error(
                "libopusfile",
                OPUSFILE_ERRORS,
                result,
            )));
        }

        let reported = self
            .arena
            .read(&*core, &native.channels_decoded, 0, 1)?
            .first()
            .copied()
            .unwrap_or(0) as usize;
        let channels = reported.min(MAX_OUTPUT_CHANNELS);
        if channels != self.channels {
            debug!("Ogg Opus stream decodes to {channels} channels");
            self.channels = channels;
        }

        let samples = result as usize;
        let channel_data = (0..channels)
            .map(|channel| self.arena.read(&*core, &native.output, channel * samples, samples))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FrameOutcome::Samples(channel_data))
    }

    fn free(&mut self) -> Result<(), DecoderError> {
        if self.phase == DecoderPhase::Freed {
            return Ok(());
        }

        let core = Arc::clone(&self.core);
        let mut core = lock_core(&core)?;

        if let Some(native) = self.native.take() {
            core.ogg_opus_decoder_free(native.handle);
        }
        self.arena.free(&mut *core);
        self.phase = DecoderPhase::Freed;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), DecoderError> {
        self.free()?;
        self.channels = 0;
        self.init()
    }
}

impl<C: OggOpusEntryPoints> Drop for OggOpusDecoder<C> {
    fn drop(&mut self) {
        if let Err(e) = self.free() {
            warn!("Ogg Opus decoder was not released: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::native::fake::{FakeCore, OPUS_FRAME_SAMPLES};
    use crate::process::ErrorPolicy;

    fn decoder(
        force_stereo: bool,
    ) -> Result<(SharedCore<FakeCore>, OggOpusDecoder<FakeCore>), DecoderError> {
        let core = Arc::new(Mutex::new(FakeCore::new()));
        let decoder = OggOpusDecoder::new(Arc::clone(&core), OggOpusDecoderConfig { force_stereo })?;
        Ok((core, decoder))
    }

    fn header(channels: u8) -> Vec<u8> {
        let mut page = b"OggS".to_vec();
        page.push(channels);
        page.extend_from_slice(&[0; 23]);
        page
    }

    #[test]
    fn channel_count_comes_from_the_core() -> Result<(), DecoderError> {
        let (_core, mut decoder) = decoder(false)?;
        assert_eq!(decoder.output_channels(), 0);

        let chunks = [header(6), vec![10; 300], vec![20; 300]];
        let decoded = decoder.decode_frames(&chunks, ErrorPolicy::FailFast)?;

        assert_eq!(decoder.output_channels(), 6);
        assert_eq!(decoded.channels(), 6);
        assert_eq!(decoded.samples_decoded(), 2 * OPUS_FRAME_SAMPLES);
        assert_eq!(decoded.sample_rate(), OPUS_SAMPLE_RATE);
        let fifth = &decoded.channel_data()[5];
        assert!((fifth[0] - 10.5).abs() < 1e-6);
        assert!((fifth[OPUS_FRAME_SAMPLES] - 20.5).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn force_stereo_reaches_the_core() -> Result<(), DecoderError> {
        let (_core, mut decoder) = decoder(true)?;

        decoder.decode_frame(&header(6), ErrorPolicy::FailFast)?;
        let decoded = decoder.decode_frame(&[3; 100], ErrorPolicy::FailFast)?;
        assert_eq!(decoded.channels(), 2);
        assert_eq!(decoded.samples_decoded(), OPUS_FRAME_SAMPLES);
        Ok(())
    }

    #[test]
    fn stream_is_fed_in_input_sized_chunks() -> Result<(), DecoderError> {
        let (_core, mut decoder) = decoder(false)?;
        let mut stream = header(2);
        stream.resize(INPUT_CAPACITY * 3 + 1, 7);

        let decoded = decoder.decode(&stream, ErrorPolicy::FailFast)?;
        // the first chunk holds the header and yields nothing
        assert_eq!(decoded.samples_decoded(), 3 * OPUS_FRAME_SAMPLES);
        assert_eq!(decoder.totals().frames, 4);
        assert_eq!(decoder.totals().input_bytes, stream.len() as u64);
        Ok(())
    }

    #[test]
    fn opusfile_errors_are_described() -> Result<(), DecoderError> {
        let (_core, mut decoder) = decoder(false)?;

        let decoded = decoder.decode_frame(b"RIFF....", ErrorPolicy::CollectErrors)?;
        assert_eq!(decoded.samples_decoded(), 0);
        assert!(
            decoded.errors()[0]
                .message
                .starts_with("libopusfile -132 OP_ENOTFORMAT: A purported Ogg Opus stream")
        );

        decoder.decode_frame(&header(1), ErrorPolicy::FailFast)?;
        match decoder.decode_frame(&[0xFF; 4], ErrorPolicy::FailFast) {
            Err(DecoderError::Frame(record)) => {
                assert!(record.message.starts_with("libopusfile -136 OP_EBADPACKET"));
                assert_eq!(record.total_frame_number, 2);
            }
            other => panic!("expected a frame error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn overflow_and_unknown_codes() {
        assert_eq!(
            describe_error("libopusfile", OPUSFILE_ERRORS, -140),
            "libopusfile -140 Input buffer overflow"
        );
        assert_eq!(
            describe_error("libopusfile", OPUSFILE_ERRORS, -135),
            "libopusfile -135 Unknown Error"
        );
    }

    #[test]
    fn out_pointer_is_tracked_and_released() -> Result<(), DecoderError> {
        let (core, mut decoder) = decoder(false)?;
        assert_eq!(decoder.arena.tracked().len(), 3);
        assert_eq!(decoder.arena.tracked()[2].byte_len, 4);

        decoder.decode_frame(&header(2), ErrorPolicy::FailFast)?;
        decoder.reset()?;
        assert_eq!(decoder.output_channels(), 0);
        assert_eq!(core.lock().unwrap().destroyed(), 1);

        drop(decoder);
        let core = core.lock().unwrap();
        assert_eq!(core.live_allocations(), 0);
        assert_eq!(core.live_decoders(), 0);
        assert_eq!(core.frees(), 6);
        Ok(())
    }

    #[test]
    fn failed_allocation_leaves_nothing_behind() {
        let core = Arc::new(Mutex::new(FakeCore::new()));
        core.lock().unwrap().fail_allocations(true);

        let result = OggOpusDecoder::new(Arc::clone(&core), OggOpusDecoderConfig::default());
        assert!(matches!(result, Err(DecoderError::Arena(_))));

        let core = core.lock().unwrap();
        assert_eq!(core.live_decoders(), 0);
        assert_eq!(core.live_allocations(), 0);
    }
}
