//! An in-process stand-in for a compiled codec core.
//!
//! Memory is a growable byte vector handed out by a bump allocator. The
//! Opus side decodes any frame of two or more bytes to 960 samples per
//! channel and rejects shorter ones with `OPUS_INVALID_PACKET`; the MPEG
//! side decodes four or more bytes to 1152 samples and reports 44.1 kHz
//! once a frame has been decoded. The Ogg Opus side expects a first chunk
//! starting with `OggS` whose fifth byte is the channel count, then decodes
//! every later chunk to 960 samples per channel.

use std::collections::HashMap;

use super::{LinearMemory, MpegEntryPoints, OggOpusEntryPoints, OpusEntryPoints};

pub const OPUS_FRAME_SAMPLES: usize = 960;
pub const MPEG_FRAME_SAMPLES: usize = 1152;
pub const MPEG_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug)]
enum FakeDecoder {
    Opus { output_channels: usize },
    Mpeg { decoded: bool },
    OggOpus { force_stereo: bool, channels: Option<usize> },
}

#[derive(Debug)]
pub struct FakeCore {
    memory: Vec<u8>,
    next: u32,
    live: HashMap<u32, u32>,
    frees: usize,
    fail_allocations: bool,
    decoders: HashMap<u32, FakeDecoder>,
    next_handle: u32,
    destroyed: usize,
}

impl Default for FakeCore {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCore {
    pub fn new() -> Self {
        Self {
            memory: vec![0; 64],
            next: 8,
            live: HashMap::new(),
            frees: 0,
            fail_allocations: false,
            decoders: HashMap::new(),
            next_handle: 1,
            destroyed: 0,
        }
    }

    pub fn fail_allocations(&mut self, fail: bool) {
        self.fail_allocations = fail;
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn frees(&self) -> usize {
        self.frees
    }

    pub fn live_decoders(&self) -> usize {
        self.decoders.len()
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed
    }

    fn create(&mut self, decoder: FakeDecoder) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.decoders.insert(handle, decoder);
        handle
    }

    fn write_u32(&mut self, ptr: u32, value: u32) {
        let at = ptr as usize;
        self.memory[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn write_f32(&mut self, ptr: u32, index: usize, value: f32) {
        let at = ptr as usize + index * 4;
        self.memory[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Writes `value` to `samples` floats starting at element `first`.
    fn fill(&mut self, ptr: u32, first: usize, samples: usize, value: f32) {
        for i in 0..samples {
            self.write_f32(ptr, first + i, value);
        }
    }
}

impl LinearMemory for FakeCore {
    fn malloc(&mut self, size: u32) -> u32 {
        if self.fail_allocations {
            return 0;
        }

        let ptr = self.next;
        self.next = (ptr + size.max(1)).next_multiple_of(8);
        if self.memory.len() < self.next as usize {
            self.memory.resize(self.next as usize, 0);
        }
        self.live.insert(ptr, size);
        ptr
    }

    fn free(&mut self, ptr: u32) {
        let released = self.live.remove(&ptr);
        assert!(released.is_some(), "double free of {ptr:#X}");
        self.frees += 1;
    }

    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }
}

impl OpusEntryPoints for FakeCore {
    fn opus_frame_decoder_create(
        &mut self,
        channels: i32,
        _streams: i32,
        _coupled_streams: i32,
        mapping: u32,
        _pre_skip: i32,
        force_stereo: i32,
    ) -> u32 {
        if !self.live.contains_key(&mapping) {
            return 0;
        }
        let output_channels = if force_stereo != 0 { 2 } else { channels as usize };
        self.create(FakeDecoder::Opus { output_channels })
    }

    fn opus_frame_decode_float_deinterleaved(
        &mut self,
        decoder: u32,
        input: u32,
        input_len: u32,
        output: u32,
    ) -> i32 {
        let output_channels = match self.decoders.get(&decoder) {
            Some(FakeDecoder::Opus { output_channels }) => *output_channels,
            _ => return -6,
        };
        if input_len < 2 {
            return -4;
        }

        let first = self.memory[input as usize] as f32;
        for channel in 0..output_channels {
            let value = first + channel as f32 / 10.0;
            self.fill(output, channel * OPUS_FRAME_SAMPLES, OPUS_FRAME_SAMPLES, value);
        }
        OPUS_FRAME_SAMPLES as i32
    }

    fn opus_frame_decoder_destroy(&mut self, decoder: u32) {
        if self.decoders.remove(&decoder).is_some() {
            self.destroyed += 1;
        }
    }
}

impl MpegEntryPoints for FakeCore {
    fn mpeg_frame_decoder_create(&mut self) -> u32 {
        self.create(FakeDecoder::Mpeg { decoded: false })
    }

    fn mpeg_decode_float_deinterleaved(
        &mut self,
        decoder: u32,
        input: u32,
        input_len: u32,
        left: u32,
        right: u32,
    ) -> i32 {
        match self.decoders.get_mut(&decoder) {
            Some(FakeDecoder::Mpeg { decoded }) => *decoded = true,
            _ => return -1,
        }
        if input_len < 4 {
            return -10;
        }

        let first = self.memory[input as usize] as f32;
        self.fill(left, 0, MPEG_FRAME_SAMPLES, first);
        self.fill(right, 0, MPEG_FRAME_SAMPLES, -first);
        MPEG_FRAME_SAMPLES as i32
    }

    fn mpeg_get_sample_rate(&mut self, decoder: u32) -> u32 {
        match self.decoders.get(&decoder) {
            Some(FakeDecoder::Mpeg { decoded: true }) => MPEG_SAMPLE_RATE,
            _ => 0,
        }
    }

    fn mpeg_frame_decoder_destroy(&mut self, decoder: u32) {
        if self.decoders.remove(&decoder).is_some() {
            self.destroyed += 1;
        }
    }
}

impl OggOpusEntryPoints for FakeCore {
    fn ogg_opus_decoder_create(&mut self, force_stereo: i32) -> u32 {
        self.create(FakeDecoder::OggOpus {
            force_stereo: force_stereo != 0,
            channels: None,
        })
    }

    fn ogg_opus_decoder_decode(
        &mut self,
        decoder: u32,
        input: u32,
        input_len: u32,
        channels_decoded: u32,
        output: u32,
    ) -> i32 {
        let (force_stereo, channels) = match self.decoders.get(&decoder) {
            Some(FakeDecoder::OggOpus {
                force_stereo,
                channels,
            }) => (*force_stereo, *channels),
            _ => return -129,
        };
        if input_len == 0 {
            return -131;
        }

        let at = input as usize;
        let chunk = self.memory[at..at + input_len as usize].to_vec();

        let Some(channels) = channels else {
            if !chunk.starts_with(b"OggS") || chunk.len() < 5 {
                return -132;
            }
            let channels = if force_stereo { 2 } else { chunk[4].max(1) as usize };
            if let Some(FakeDecoder::OggOpus { channels: known, .. }) =
                self.decoders.get_mut(&decoder)
            {
                *known = Some(channels);
            }
            self.write_u32(channels_decoded, channels as u32);
            return 0;
        };

        if chunk[0] == 0xFF {
            return -136;
        }

        self.write_u32(channels_decoded, channels as u32);
        for channel in 0..channels {
            let value = chunk[0] as f32 + channel as f32 / 10.0;
            self.fill(output, channel * OPUS_FRAME_SAMPLES, OPUS_FRAME_SAMPLES, value);
        }
        OPUS_FRAME_SAMPLES as i32
    }

    fn ogg_opus_decoder_free(&mut self, decoder: u32) {
        if self.decoders.remove(&decoder).is_some() {
            self.destroyed += 1;
        }
    }
}
