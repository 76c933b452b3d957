//! Canonical Huffman trees for DEFLATE.
//!
//! A tree is stored as a code length count table plus the symbols sorted in
//! canonical order. Decoding walks the code one bit at a time, comparing the
//! running code value against the number of codes of each length, so no
//! flat lookup table is ever built.

use std::sync::OnceLock;

use crate::utils::bitstream_io::BitCursor;
use crate::utils::errors::DataError;

pub const MAX_CODE_LENGTH: usize = 15;

/// Largest alphabet: 288 literal/length symbols.
pub const MAX_SYMBOLS: usize = 288;

pub const LITERAL_SYMBOLS: usize = 288;
pub const DISTANCE_SYMBOLS: usize = 32;
pub const CODE_LENGTH_SYMBOLS: usize = 19;

#[derive(Debug, Clone)]
pub struct HuffmanTree {
    /// `counts[len]` is the number of symbols with a code of `len` bits.
    counts: [u16; MAX_CODE_LENGTH + 1],
    /// Symbols ordered by (code length, symbol value).
    symbols: [u16; MAX_SYMBOLS],
}

/// A single assigned code, most significant bit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalCode {
    pub symbol: u16,
    pub code: u16,
    pub length: u8,
}

impl Default for HuffmanTree {
    fn default() -> Self {
        Self {
            counts: [0; MAX_CODE_LENGTH + 1],
            symbols: [0; MAX_SYMBOLS],
        }
    }
}

static FIXED_LITERAL: OnceLock<HuffmanTree> = OnceLock::new();
static FIXED_DISTANCE: OnceLock<HuffmanTree> = OnceLock::new();

impl HuffmanTree {
    pub fn from_lengths(lengths: &[u8]) -> Result<Self, DataError> {
        let mut tree = Self::default();
        tree.rebuild(lengths)?;
        Ok(tree)
    }

    /// Rebuilds the tree in place from per-symbol code lengths (0 = unused).
    ///
    /// Over-subscribed length sets are rejected. Incomplete sets are
    /// accepted; decoding an unassigned code fails with
    /// [`DataError::IncompleteCode`].
    pub fn rebuild(&mut self, lengths: &[u8]) -> Result<(), DataError> {
        debug_assert!(lengths.len() <= MAX_SYMBOLS);

        self.counts = [0; MAX_CODE_LENGTH + 1];
        for &len in lengths {
            if len as usize > MAX_CODE_LENGTH {
                return Err(DataError::CodeLengthTooLong(len));
            }
            self.counts[len as usize] += 1;
        }
        self.counts[0] = 0;

        let mut left = 1i32;
        for (length, &count) in self.counts.iter().enumerate().skip(1) {
            left = (left << 1) - count as i32;
            if left < 0 {
                return Err(DataError::OversubscribedCode { length });
            }
        }

        let mut offsets = [0u16; MAX_CODE_LENGTH + 1];
        let mut sum = 0;
        for (offset, &count) in offsets.iter_mut().zip(&self.counts) {
            *offset = sum;
            sum += count;
        }

        for (symbol, &len) in lengths.iter().enumerate() {
            if len != 0 {
                let slot = &mut offsets[len as usize];
                self.symbols[*slot as usize] = symbol as u16;
                *slot += 1;
            }
        }

        Ok(())
    }

    /// Fixed literal/length tree: 0-143 → 8 bits, 144-255 → 9,
    /// 256-279 → 7, 280-287 → 8.
    pub fn fixed_literal() -> &'static HuffmanTree {
        FIXED_LITERAL.get_or_init(|| {
            let mut lengths = [0u8; LITERAL_SYMBOLS];
            lengths[..144].fill(8);
            lengths[144..256].fill(9);
            lengths[256..280].fill(7);
            lengths[280..].fill(8);
            Self::from_lengths(&lengths).unwrap_or_default()
        })
    }

    /// Fixed distance tree: 32 codes of 5 bits.
    pub fn fixed_distance() -> &'static HuffmanTree {
        FIXED_DISTANCE.get_or_init(|| {
            Self::from_lengths(&[5u8; DISTANCE_SYMBOLS]).unwrap_or_default()
        })
    }

    #[inline]
    pub fn decode_symbol(&self, cursor: &mut BitCursor) -> Result<u16, DataError> {
        let mut sum = 0i32;
        let mut cur = 0i32;

        for &count in &self.counts[1..] {
            cur = 2 * cur + cursor.get()? as i32;
            sum += count as i32;
            cur -= count as i32;

            if cur < 0 {
                return Ok(self.symbols[(sum + cur) as usize]);
            }
        }

        Err(DataError::IncompleteCode)
    }

    pub fn counts(&self) -> &[u16; MAX_CODE_LENGTH + 1] {
        &self.counts
    }

    /// Number of symbols with a non-zero code length.
    pub fn symbol_count(&self) -> usize {
        self.counts.iter().map(|&c| c as usize).sum()
    }

    /// Codes as assigned by the canonical construction, shortest first.
    pub fn canonical_codes(&self) -> Vec<CanonicalCode> {
        let mut codes = Vec::with_capacity(self.symbol_count());
        let mut code = 0u16;
        let mut index = 0;

        for (length, &count) in self.counts.iter().enumerate().skip(1) {
            for _ in 0..count {
                codes.push(CanonicalCode {
                    symbol: self.symbols[index],
                    code,
                    length: length as u8,
                });
                code += 1;
                index += 1;
            }
            code <<= 1;
        }

        codes
    }
}
