//! Bitstream reading for DEFLATE parsing.
//!
//! DEFLATE packs header fields and extra bits least-significant bit first,
//! while Huffman codes are consumed one bit at a time by the caller.

use std::io;

use bitstream_io::{BitRead, BitReader, LittleEndian};

use crate::utils::errors::DataError;

#[derive(Debug)]
pub struct BitCursor<'a> {
    bs: BitReader<io::Cursor<&'a [u8]>, LittleEndian>,
    len: u64,
}

impl<'a> BitCursor<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self {
            bs: BitReader::new(io::Cursor::new(source)),
            len: (source.len() as u64) << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> Result<bool, DataError> {
        match self.bs.read_bit() {
            Ok(bit) => Ok(bit),
            Err(e) => Err(self.map_err(e)),
        }
    }

    /// Reads an `n`-bit value (`n <= 16`) and adds `base` to it.
    #[inline(always)]
    pub fn read_bits(&mut self, n: u32, base: u32) -> Result<u32, DataError> {
        if n == 0 {
            return Ok(base);
        }

        match self.bs.read_unsigned_var::<u32>(n) {
            Ok(val) => Ok(val + base),
            Err(e) => Err(self.map_err(e)),
        }
    }

    /// Discards any partial bits up to the next byte boundary.
    #[inline(always)]
    pub fn align(&mut self) {
        self.bs.byte_align();
    }

    #[inline(always)]
    pub fn get_u16(&mut self) -> Result<u16, DataError> {
        self.read_bits(16, 0).map(|v| v as u16)
    }

    /// Appends `len` raw bytes to `dest`. The cursor must be byte aligned.
    pub fn copy_bytes(&mut self, dest: &mut Vec<u8>, len: usize) -> Result<(), DataError> {
        let position = self.position();
        if (len as u64) << 3 > self.len.saturating_sub(position) {
            return Err(DataError::UnexpectedEof {
                position: self.len,
            });
        }

        let start = dest.len();
        dest.resize(start + len, 0);
        match self.bs.read_bytes(&mut dest[start..]) {
            Ok(()) => Ok(()),
            Err(e) => {
                dest.truncate(start);
                Err(self.map_err(e))
            }
        }
    }

    #[inline(always)]
    pub fn position(&mut self) -> u64 {
        self.bs.position_in_bits().unwrap_or(self.len)
    }

    #[inline(always)]
    pub fn available(&mut self) -> u64 {
        self.len.saturating_sub(self.position())
    }

    /// Whole bytes touched so far, counting a partially read byte.
    pub fn bytes_consumed(&mut self) -> u64 {
        self.position().div_ceil(8)
    }

    fn map_err(&mut self, e: io::Error) -> DataError {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            DataError::UnexpectedEof {
                position: self.position(),
            }
        } else {
            DataError::Io(e)
        }
    }
}
