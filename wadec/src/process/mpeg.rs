//! MPEG audio (layers I-III) decoding through a core's `mpeg_*` entry points.
//!
//! Output is always stereo. The native decoder only knows the stream's
//! sample rate after it has seen a frame, so the rate is queried once after
//! the first decode and cached.

use std::sync::Arc;

use log::{debug, warn};

use super::{
    DecodeTotals, DecoderPhase, FrameDecoder, FrameOutcome, describe_error, oversized_frame,
};
use crate::native::arena::{MemoryArena, View};
use crate::native::{MpegEntryPoints, SharedCore, lock_core};
use crate::utils::errors::{ArenaError, DecoderError};

/// Largest MPEG frame: layer II at 384 kbit/s, 8 kHz, with padding.
pub const INPUT_CAPACITY: usize = 2889;

/// Four layer III frames of 1152 samples.
pub const OUTPUT_CHANNEL_SIZE: usize = 4 * 1152;

pub const MPEG_ERRORS: &[(i32, &str)] = &[
    (-1, "MPG123_ERR: Generic Error"),
    (-10, "MPG123_NEED_MORE: More input data is needed to decode a frame"),
    (-11, "MPG123_NEW_FORMAT: Output format changed"),
    (-12, "MPG123_DONE: Decoding of the stream has finished"),
];

#[derive(Debug, Clone, Copy)]
struct NativeDecoder {
    handle: u32,
    input: View<u8>,
    left: View<f32>,
    right: View<f32>,
}

pub struct MpegDecoder<C: MpegEntryPoints> {
    core: SharedCore<C>,
    arena: MemoryArena,
    native: Option<NativeDecoder>,
    phase: DecoderPhase,
    sample_rate: u32,
    totals: DecodeTotals,
}

impl<C: MpegEntryPoints> MpegDecoder<C> {
    pub fn new(core: SharedCore<C>) -> Result<Self, DecoderError> {
        let mut decoder = Self {
            core,
            arena: MemoryArena::new(),
            native: None,
            phase: DecoderPhase::Uninitialized,
            sample_rate: 0,
            totals: DecodeTotals::default(),
        };
        decoder.init()?;
        Ok(decoder)
    }

    fn init(&mut self) -> Result<(), DecoderError> {
        self.phase = DecoderPhase::Initializing;

        let core = Arc::clone(&self.core);
        let mut core = lock_core(&core)?;

        let handle = core.mpeg_frame_decoder_create();
        if handle == 0 {
            self.phase = DecoderPhase::Uninitialized;
            return Err(DecoderError::CreateFailed);
        }

        match stage(&mut self.arena, &mut *core) {
            Ok((input, left, right)) => {
                self.native = Some(NativeDecoder {
                    handle,
                    input,
                    left,
                    right,
                });
                self.phase = DecoderPhase::Ready;
                Ok(())
            }
            Err(e) => {
                core.mpeg_frame_decoder_destroy(handle);
                self.arena.free(&mut *core);
                self.phase = DecoderPhase::Uninitialized;
                Err(e.into())
            }
        }
    }
}

fn stage<C: MpegEntryPoints>(
    arena: &mut MemoryArena,
    core: &mut C,
) -> Result<(View<u8>, View<f32>, View<f32>), ArenaError> {
    Ok((
        arena.allocate(core, INPUT_CAPACITY)?,
        arena.allocate(core, OUTPUT_CHANNEL_SIZE)?,
        arena.allocate(core, OUTPUT_CHANNEL_SIZE)?,
    ))
}

impl<C: MpegEntryPoints> FrameDecoder for MpegDecoder<C> {
    fn phase(&self) -> DecoderPhase {
        self.phase
    }

    fn output_channels(&self) -> usize {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
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

        if frame.len() > INPUT_CAPACITY {
            return Ok(oversized_frame(frame.len(), INPUT_CAPACITY));
        }

        let core = Arc::clone(&self.core);
        let mut core = lock_core(&core)?;

        self.arena.write_bytes(&mut *core, &native.input, frame)?;
        let result = core.mpeg_decode_float_deinterleaved(
            native.handle,
            native.input.ptr(),
            frame.len() as u32,
            native.left.ptr(),
            native.right.ptr(),
        );
        self.phase = DecoderPhase::Decoding;

        if self.sample_rate == 0 {
            self.sample_rate = core.mpeg_get_sample_rate(native.handle);
            if self.sample_rate != 0 {
                debug!("MPEG stream sample rate is {} Hz", self.sample_rate);
            }
        }

        if result < 0 {
            return Ok(FrameOutcome::Error(describe_error("libmpg123", MPEG_ERRORS, result)));
        }

        let samples = result as usize;
        Ok(FrameOutcome::Samples(vec![
            self.arena.read(&*core, &native.left, 0, samples)?,
            self.arena.read(&*core, &native.right, 0, samples)?,
        ]))
    }

    fn free(&mut self) -> Result<(), DecoderError> {
        if self.phase == DecoderPhase::Freed {
            return Ok(());
        }

        let core = Arc::clone(&self.core);
        let mut core = lock_core(&core)?;

        if let Some(native) = self.native.take() {
            core.mpeg_frame_decoder_destroy(native.handle);
        }
        self.arena.free(&mut *core);
        self.phase = DecoderPhase::Freed;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), DecoderError> {
        self.free()?;
        self.sample_rate = 0;
        self.init()
    }
}

impl<C: MpegEntryPoints> Drop for MpegDecoder<C> {
    fn drop(&mut self) {
        if let Err(e) = self.free() {
            warn!("MPEG decoder was not released: {e}");
        }
    }
}
