//! Orchestration runtime for WebAssembly audio decoders.
//!
//! A decoder core ships as a compiled binary that has been DEFLATE-compressed
//! and armored into printable text. Bringing one up, feeding it frames and
//! collecting planar float output is split across a few layers:
//!
//! 1. [`resource`] strips the armor and hands the payload to [`inflate`].
//! 2. [`native::registry`] instantiates each core once per process and
//!    shares it between decoders.
//! 3. [`native::arena`] tracks every allocation a decoder makes inside the
//!    core's linear memory and releases them all together.
//! 4. [`process`] drives the Opus, Ogg Opus and MPEG entry points frame by frame.
//! 5. [`worker`] moves a decoder onto its own thread behind a request/reply
//!    protocol.
//!
//! ```rust,no_run
//! use wadec::resource::load_resource_with_stats;
//!
//! let armored = std::fs::read_to_string("opus-decoder.wasm.txt")?;
//! let loaded = load_resource_with_stats(&armored)?;
//!
//! println!(
//!     "{} armor, {} bytes inflated from {} blocks",
//!     loaded.header.armor,
//!     loaded.data.len(),
//!     loaded.stats.blocks()
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Raw DEFLATE decompression (RFC 1951).
pub mod inflate;

/// Linear memory, entry points and instance caching for decoder cores.
pub mod native;

/// Frame decoders and their shared decode loop.
pub mod process;

/// Armored resource decoding.
pub mod resource;

pub mod utils;

/// Worker threads and the client that talks to them.
pub mod worker;
