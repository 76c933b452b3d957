//! Supporting infrastructure: bit-level reading and the crate's error types.

pub mod bitstream_io;
pub mod errors;
