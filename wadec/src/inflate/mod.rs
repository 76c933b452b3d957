//! DEFLATE (RFC 1951) decompression for embedded core resources.
//!
//! The engine is a straightforward block loop over a [`BitCursor`]: stored
//! blocks are copied verbatim, fixed blocks reuse two process-wide trees and
//! dynamic blocks rebuild the working trees in place. Output is only handed
//! back once the final block has been decoded in full.

pub mod huffman;
pub mod tables;

use log::{debug, trace};

use crate::utils::bitstream_io::BitCursor;
use crate::utils::errors::DataError;
use huffman::{CODE_LENGTH_SYMBOLS, HuffmanTree};
use tables::{
    BASE_TABLE_LEN, CODE_LENGTH_ORDER, DISTANCE_BASE, DISTANCE_BITS, LENGTH_BASE, LENGTH_BITS,
    LENGTH_CODES,
};

/// HLIT (max 288) + HDIST (max 32).
const MAX_CODE_LENGTHS: usize = 320;

/// Per-stream block accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InflateStats {
    pub stored_blocks: u32,
    pub fixed_blocks: u32,
    pub dynamic_blocks: u32,
    /// Bytes of the source consumed up to the end of the final block.
    pub input_bytes: u64,
    pub output_bytes: u64,
}

impl InflateStats {
    pub fn blocks(&self) -> u32 {
        self.stored_blocks + self.fixed_blocks + self.dynamic_blocks
    }
}

struct InflateState<'a> {
    cursor: BitCursor<'a>,
    dest: Vec<u8>,
}

impl InflateState<'_> {
    fn inflate_block_data(&mut self, lt: &HuffmanTree, dt: &HuffmanTree) -> Result<(), DataError> {
        loop {
            let symbol = lt.decode_symbol(&mut self.cursor)?;

            if symbol < 256 {
                self.dest.push(symbol as u8);
                continue;
            }

            if symbol == 256 {
                return Ok(());
            }

            let index = (symbol - 257) as usize;
            if index >= LENGTH_CODES {
                return Err(DataError::InvalidLengthSymbol(symbol));
            }
            let length = self
                .cursor
                .read_bits(LENGTH_BITS[index] as u32, LENGTH_BASE[index] as u32)?
                as usize;

            let dist_symbol = dt.decode_symbol(&mut self.cursor)?;
            let index = dist_symbol as usize;
            if index >= BASE_TABLE_LEN {
                return Err(DataError::InvalidDistanceSymbol(dist_symbol));
            }
            let distance = self
                .cursor
                .read_bits(DISTANCE_BITS[index] as u32, DISTANCE_BASE[index] as u32)?
                as usize;

            let available = self.dest.len();
            if distance > available {
                return Err(DataError::DistanceTooFar {
                    distance,
                    available,
                });
            }

            // the source window may overlap the bytes being written
            let start = available - distance;
            self.dest.reserve(length);
            for i in start..start + length {
                let byte = self.dest[i];
                self.dest.push(byte);
            }
        }
    }

    fn inflate_stored_block(&mut self) -> Result<(), DataError> {
        self.cursor.align();

        let len = self.cursor.get_u16()?;
        let nlen = self.cursor.get_u16()?;
        if len != !nlen {
            return Err(DataError::StoredLengthMismatch { len, nlen });
        }

        self.cursor.copy_bytes(&mut self.dest, len as usize)
    }

    fn decode_trees(
        &mut self,
        lengths: &mut [u8; MAX_CODE_LENGTHS],
        code_tree: &mut HuffmanTree,
        lt: &mut HuffmanTree,
        dt: &mut HuffmanTree,
    ) -> Result<(), DataError> {
        let hlit = self.cursor.read_bits(5, 257)? as usize;
        let hdist = self.cursor.read_bits(5, 1)? as usize;
        let hclen = self.cursor.read_bits(4, 4)? as usize;

        lengths[..CODE_LENGTH_SYMBOLS].fill(0);
        for &symbol in &CODE_LENGTH_ORDER[..hclen] {
            lengths[symbol as usize] = self.cursor.read_bits(3, 0)? as u8;
        }
        code_tree.rebuild(&lengths[..CODE_LENGTH_SYMBOLS])?;

        let total = hlit + hdist;
        let mut num = 0;
        while num < total {
            let symbol = code_tree.decode_symbol(&mut self.cursor)?;

            let (value, count) = match symbol {
                0..=15 => {
                    lengths[num] = symbol as u8;
                    num += 1;
                    continue;
                }
                16 => {
                    if num == 0 {
                        return Err(DataError::RepeatWithoutPrevious);
                    }
                    (lengths[num - 1], self.cursor.read_bits(2, 3)?)
                }
                17 => (0, self.cursor.read_bits(3, 3)?),
                18 => (0, self.cursor.read_bits(7, 11)?),
                _ => return Err(DataError::InvalidCodeLengthSymbol(symbol)),
            };

            let end = num + count as usize;
            if end > total {
                return Err(DataError::CodeLengthOverflow {
                    count: end,
                    expected: total,
                });
            }
            lengths[num..end].fill(value);
            num = end;
        }

        trace!("dynamic trees: HLIT={hlit} HDIST={hdist} HCLEN={hclen}");

        lt.rebuild(&lengths[..hlit])?;
        dt.rebuild(&lengths[hlit..total])?;
        Ok(())
    }
}

/// Decompresses one DEFLATE stream, reusing its working trees across blocks.
pub struct Inflater<'a> {
    state: InflateState<'a>,
    ltree: HuffmanTree,
    dtree: HuffmanTree,
    code_tree: HuffmanTree,
    lengths: [u8; MAX_CODE_LENGTHS],
    stats: InflateStats,
}

impl<'a> Inflater<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self::with_capacity(source, source.len() * 4)
    }

    /// `capacity` is a hint for the inflated size.
    pub fn with_capacity(source: &'a [u8], capacity: usize) -> Self {
        Self {
            state: InflateState {
                cursor: BitCursor::new(source),
                dest: Vec::with_capacity(capacity),
            },
            ltree: HuffmanTree::default(),
            dtree: HuffmanTree::default(),
            code_tree: HuffmanTree::default(),
            lengths: [0; MAX_CODE_LENGTHS],
            stats: InflateStats::default(),
        }
    }

    pub fn run(mut self) -> Result<(Vec<u8>, InflateStats), DataError> {
        loop {
            let bfinal = self.state.cursor.get()?;
            let btype = self.state.cursor.read_bits(2, 0)? as u8;

            trace!(
                "block {} at bit {}: BTYPE={btype} BFINAL={bfinal}",
                self.stats.blocks(),
                self.state.cursor.position()
            );

            match btype {
                0 => {
                    self.state.inflate_stored_block()?;
                    self.stats.stored_blocks += 1;
                }
                1 => {
                    self.state.inflate_block_data(
                        HuffmanTree::fixed_literal(),
                        HuffmanTree::fixed_distance(),
                    )?;
                    self.stats.fixed_blocks += 1;
                }
                2 => {
                    self.state.decode_trees(
                        &mut self.lengths,
                        &mut self.code_tree,
                        &mut self.ltree,
                        &mut self.dtree,
                    )?;
                    self.state.inflate_block_data(&self.ltree, &self.dtree)?;
                    self.stats.dynamic_blocks += 1;
                }
                _ => return Err(DataError::InvalidBlockType(btype)),
            }

            if bfinal {
                break;
            }
        }

        self.stats.input_bytes = self.state.cursor.bytes_consumed();
        self.stats.output_bytes = self.state.dest.len() as u64;

        debug!(
            "Inflated {} -> {} bytes ({} stored, {} fixed, {} dynamic blocks)",
            self.stats.input_bytes,
            self.stats.output_bytes,
            self.stats.stored_blocks,
            self.stats.fixed_blocks,
            self.stats.dynamic_blocks
        );

        Ok((self.state.dest, self.stats))
    }
}

/// Inflates a raw DEFLATE stream. Trailing bytes after the final block are ignored.
pub fn inflate(source: &[u8]) -> Result<Vec<u8>, DataError> {
    Inflater::new(source).run().map(|(data, _)| data)
}

pub fn inflate_with_stats(source: &[u8]) -> Result<(Vec<u8>, InflateStats), DataError> {
    Inflater::new(source).run()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use bitstream_io::{BitWrite, BitWriter, LittleEndian};
    use flate2::Compression;
    use flate2::write::DeflateEncoder;

    use super::huffman::CanonicalCode;
    use super::*;

    fn deflate(data: &[u8], level: Compression) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), level);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn sample_text(len: usize) -> Vec<u8> {
        let words = ["opus ", "mpeg ", "frame ", "decoder ", "stream ", "channel ", "sample "];
        let mut seed = 0x2545_f491u32;
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            out.extend_from_slice(words[seed as usize % words.len()].as_bytes());
        }
        out.truncate(len);
        out
    }

    /// Writes header fields LSB first and Huffman codes MSB first.
    struct StreamWriter {
        bw: BitWriter<Vec<u8>, LittleEndian>,
    }

    impl StreamWriter {
        fn new() -> Self {
            Self {
                bw: BitWriter::endian(Vec::new(), LittleEndian),
            }
        }

        fn bits(&mut self, n: u32, value: u32) {
            self.bw.write_var(n, value).unwrap();
        }

        fn code(&mut self, code: CanonicalCode) {
            for i in (0..code.length).rev() {
                self.bw.write_bit((code.code >> i) & 1 == 1).unwrap();
            }
        }

        fn finish(mut self) -> Vec<u8> {
            self.bw.byte_align().unwrap();
            self.bw.into_writer()
        }
    }

    fn codes_by_symbol(tree: &HuffmanTree) -> Vec<Option<CanonicalCode>> {
        let mut table = vec![None; huffman::MAX_SYMBOLS];
        for code in tree.canonical_codes() {
            table[code.symbol as usize] = Some(code);
        }
        table
    }

    #[test]
    fn round_trips_dynamic_blocks() {
        let original = sample_text(48 * 1024);
        let compressed = deflate(&original, Compression::default());

        let (data, stats) = inflate_with_stats(&compressed).unwrap();
        assert_eq!(data, original);
        assert!(stats.dynamic_blocks > 0);
        assert_eq!(stats.output_bytes, original.len() as u64);
        assert!(stats.input_bytes > 0 && stats.input_bytes <= compressed.len() as u64);
    }

    #[test]
    fn round_trips_stored_blocks() {
        let original = sample_text(100_000);
        let compressed = deflate(&original, Compression::none());

        let (data, stats) = inflate_with_stats(&compressed).unwrap();
        assert_eq!(data, original);
        assert!(stats.stored_blocks >= 2);
    }

    #[test]
    fn round_trips_every_level() {
        let original = sample_text(5000);
        for level in 0..=9 {
            let compressed = deflate(&original, Compression::new(level));
            assert_eq!(inflate(&compressed).unwrap(), original, "level {level}");
        }
    }

    #[test]
    fn fixed_block_with_overlapping_copy() -> Result<(), DataError> {
        let lt = codes_by_symbol(HuffmanTree::fixed_literal());
        let dt = codes_by_symbol(HuffmanTree::fixed_distance());

        let mut w = StreamWriter::new();
        w.bits(1, 1);
        w.bits(2, 1);
        w.code(lt[b'a' as usize].unwrap());
        w.code(lt[b'b' as usize].unwrap());
        // length 6, distance 2
        w.code(lt[260].unwrap());
        w.code(dt[1].unwrap());
        w.code(lt[256].unwrap());

        let (data, stats) = inflate_with_stats(&w.finish())?;
        assert_eq!(data, b"abababab");
        assert_eq!(stats.fixed_blocks, 1);
        Ok(())
    }

    #[test]
    fn dynamic_block_with_repeat_codes() -> Result<(), DataError> {
        let mut lit_lengths = [0u8; 259];
        lit_lengths[b'a' as usize] = 2;
        lit_lengths[b'b' as usize] = 2;
        lit_lengths[256] = 2;
        lit_lengths[257] = 3;
        lit_lengths[258] = 3;
        let dist_lengths = [3u8, 3, 2, 1];

        let mut cl_lengths = [0u8; CODE_LENGTH_SYMBOLS];
        cl_lengths[18] = 2;
        cl_lengths[2] = 2;
        cl_lengths[1] = 3;
        cl_lengths[3] = 3;
        cl_lengths[16] = 3;
        cl_lengths[17] = 3;

        let cl = codes_by_symbol(&HuffmanTree::from_lengths(&cl_lengths)?);
        let lt = codes_by_symbol(&HuffmanTree::from_lengths(&lit_lengths)?);
        let dt = codes_by_symbol(&HuffmanTree::from_lengths(&dist_lengths)?);

        let mut w = StreamWriter::new();
        w.bits(1, 1);
        w.bits(2, 2);
        w.bits(5, 259 - 257);
        w.bits(5, 4 - 1);
        w.bits(4, 18 - 4);
        for &symbol in &CODE_LENGTH_ORDER[..18] {
            w.bits(3, cl_lengths[symbol as usize] as u32);
        }

        // 0..=96 unused
        w.code(cl[18].unwrap());
        w.bits(7, 97 - 11);
        // 'a', 'b'
        w.code(cl[2].unwrap());
        w.code(cl[2].unwrap());
        // 99..=255 unused: 138 + 8 + 11
        w.code(cl[18].unwrap());
        w.bits(7, 138 - 11);
        w.code(cl[17].unwrap());
        w.bits(3, 8 - 3);
        w.code(cl[18].unwrap());
        w.bits(7, 0);
        // 256, 257
        w.code(cl[2].unwrap());
        w.code(cl[3].unwrap());
        // 258 and distance codes 0, 1 repeat the previous length
        w.code(cl[16].unwrap());
        w.bits(2, 0);
        // distance codes 2, 3
        w.code(cl[2].unwrap());
        w.code(cl[1].unwrap());

        w.code(lt[b'a' as usize].unwrap());
        w.code(lt[b'b' as usize].unwrap());
        // length 4, distance 2
        w.code(lt[258].unwrap());
        w.code(dt[1].unwrap());
        // length 3, distance 4
        w.code(lt[257].unwrap());
        w.code(dt[3].unwrap());
        w.code(lt[256].unwrap());

        let (data, stats) = inflate_with_stats(&w.finish())?;
        assert_eq!(data, b"ababababa");
        assert_eq!(stats.dynamic_blocks, 1);
        Ok(())
    }

    #[test]
    fn stored_length_must_match_complement() {
        let stream = [0x01, 0x05, 0x00, 0x00, 0x00, b'h', b'e', b'l', b'l', b'o'];
        assert!(matches!(
            inflate(&stream),
            Err(DataError::StoredLengthMismatch { len: 5, nlen: 0 })
        ));

        let stream = [0x01, 0x05, 0x00, 0xFA, 0xFF, b'h', b'e', b'l', b'l', b'o'];
        assert_eq!(inflate(&stream).unwrap(), b"hello");
    }

    #[test]
    fn empty_stored_block() {
        let stream = [0x01, 0x00, 0x00, 0xFF, 0xFF];
        assert!(inflate(&stream).unwrap().is_empty());
    }

    #[test]
    fn rejects_reserved_block_type() {
        assert!(matches!(inflate(&[0x07]), Err(DataError::InvalidBlockType(3))));
    }

    #[test]
    fn truncated_stream_fails() {
        let compressed = deflate(&sample_text(4096), Compression::default());
        for cut in [1, compressed.len() / 2, compressed.len() - 1] {
            assert!(inflate(&compressed[..cut]).is_err(), "cut at {cut}");
        }
        assert!(inflate(&[]).is_err());

        // stored block promising more bytes than remain
        let stream = [0x01, 0x05, 0x00, 0xFA, 0xFF, b'h', b'i'];
        assert!(matches!(inflate(&stream), Err(DataError::UnexpectedEof { .. })));
    }

    #[test]
    fn distance_before_output_start() {
        let lt = codes_by_symbol(HuffmanTree::fixed_literal());
        let dt = codes_by_symbol(HuffmanTree::fixed_distance());

        let mut w = StreamWriter::new();
        w.bits(1, 1);
        w.bits(2, 1);
        w.code(lt[b'a' as usize].unwrap());
        w.code(lt[257].unwrap());
        w.code(dt[1].unwrap());
        w.code(lt[256].unwrap());

        assert!(matches!(
            inflate(&w.finish()),
            Err(DataError::DistanceTooFar { distance: 2, available: 1 })
        ));
    }

    #[test]
    fn rejects_unused_length_and_distance_symbols() {
        let lt = codes_by_symbol(HuffmanTree::fixed_literal());
        let dt = codes_by_symbol(HuffmanTree::fixed_distance());

        let mut w = StreamWriter::new();
        w.bits(1, 1);
        w.bits(2, 1);
        w.code(lt[286].unwrap());
        assert!(matches!(inflate(&w.finish()), Err(DataError::InvalidLengthSymbol(286))));

        let mut w = StreamWriter::new();
        w.bits(1, 1);
        w.bits(2, 1);
        w.code(lt[b'a' as usize].unwrap());
        w.code(lt[257].unwrap());
        w.code(dt[30].unwrap());
        assert!(matches!(inflate(&w.finish()), Err(DataError::InvalidDistanceSymbol(30))));
    }

    #[test]
    fn repeat_needs_a_previous_length() {
        let mut w = StreamWriter::new();
        w.bits(1, 1);
        w.bits(2, 2);
        w.bits(5, 0);
        w.bits(5, 0);
        w.bits(4, 0);
        // code length code: 16 -> 1 bit, 0 -> 1 bit
        for length in [1, 0, 0, 1] {
            w.bits(3, length);
        }
        // symbols 0 and 16 get codes 0 and 1
        w.bits(1, 1);
        w.bits(2, 0);

        assert!(matches!(inflate(&w.finish()), Err(DataError::RepeatWithoutPrevious)));
    }
}
