//! The call surface of an instantiated codec core.
//!
//! A core is opaque compiled code exposing an allocator, a deallocator, a
//! flat little-endian linear memory and a handful of integer-only codec
//! entry points. Everything above this module talks to a core through the
//! traits defined here; how a core is actually instantiated (a WebAssembly
//! runtime, a native build) is up to the embedder.

pub mod arena;
pub mod registry;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::utils::errors::CoreError;

/// A core instance shared between every decoder created from one module.
pub type SharedCore<C> = Arc<Mutex<C>>;

pub(crate) fn lock_core<C>(core: &SharedCore<C>) -> Result<MutexGuard<'_, C>, CoreError> {
    core.lock().map_err(|_| CoreError::Poisoned)
}

/// Allocator and linear memory exported by a core.
pub trait LinearMemory {
    /// Returns the address of `size` fresh bytes, or 0 when allocation fails.
    fn malloc(&mut self, size: u32) -> u32;
    fn free(&mut self, ptr: u32);
    fn memory(&self) -> &[u8];
    fn memory_mut(&mut self) -> &mut [u8];
}

/// Opus entry points. Returned handles are 0 on failure; decode returns the
/// number of samples per channel or a negative libopus error code.
pub trait OpusEntryPoints: LinearMemory {
    fn opus_frame_decoder_create(
        &mut self,
        channels: i32,
        streams: i32,
        coupled_streams: i32,
        mapping: u32,
        pre_skip: i32,
        force_stereo: i32,
    ) -> u32;

    /// Writes channel `i` to `output[i * n..(i + 1) * n]` for `n` decoded samples.
    fn opus_frame_decode_float_deinterleaved(
        &mut self,
        decoder: u32,
        input: u32,
        input_len: u32,
        output: u32,
    ) -> i32;

    fn opus_frame_decoder_destroy(&mut self, decoder: u32);
}

/// opusfile entry points for whole Ogg Opus streams fed in arbitrary chunks.
pub trait OggOpusEntryPoints: LinearMemory {
    fn ogg_opus_decoder_create(&mut self, force_stereo: i32) -> u32;

    /// Stores the decoded channel count as a `u32` at `channels_decoded` and
    /// writes channel `i` to `output[i * n..(i + 1) * n]`. Returns `n`, which
    /// is 0 while the core is still buffering pages, or a negative opusfile
    /// error code.
    fn ogg_opus_decoder_decode(
        &mut self,
        decoder: u32,
        input: u32,
        input_len: u32,
        channels_decoded: u32,
        output: u32,
    ) -> i32;

    fn ogg_opus_decoder_free(&mut self, decoder: u32);
}

/// mpg123 entry points, always stereo output.
pub trait MpegEntryPoints: LinearMemory {
    fn mpeg_frame_decoder_create(&mut self) -> u32;

    fn mpeg_decode_float_deinterleaved(
        &mut self,
        decoder: u32,
        input: u32,
        input_len: u32,
        left: u32,
        right: u32,
    ) -> i32;

    /// 0 until the first frame has been decoded.
    fn mpeg_get_sample_rate(&mut self, decoder: u32) -> u32;

    fn mpeg_frame_decoder_destroy(&mut self, decoder: u32);
}

/// A fixed-size value stored little-endian in linear memory.
pub trait Element: Copy + Default + Debug {
    const SIZE: usize;

    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, dst: &mut [u8]);
}

macro_rules! impl_element {
    ($($t:ty),+) => { $(
        impl Element for $t {
            const SIZE: usize = size_of::<$t>();

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_le_bytes(raw)
            }

            #[inline]
            fn write_le(self, dst: &mut [u8]) {
                dst[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }
        }
    )+ }
}

impl_element!(u8, i8, u16, i16, u32, i32, f32);
