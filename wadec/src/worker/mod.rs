//! Running decoders on dedicated threads behind a request/reply protocol.
//!
//! A [`RpcClient`] owns a worker thread holding exactly one decoder. Every
//! request carries a unique id, and the reply router completes the matching
//! [`Completion`] however the worker orders its answers.

pub mod client;
pub mod handler;
pub mod message;
pub mod pending;

pub use client::{Completion, RpcClient};
pub use handler::RpcWorker;
pub use message::{Command, Reply, Request, Response};
pub use pending::PendingTable;

use crate::native::{MpegEntryPoints, OggOpusEntryPoints, OpusEntryPoints, SharedCore};
use crate::process::mpeg::MpegDecoder;
use crate::process::ogg_opus::{OggOpusDecoder, OggOpusDecoderConfig};
use crate::process::opus::{OpusDecoder, OpusDecoderConfig};
use crate::utils::errors::RpcError;

pub const OPUS_WORKER_NAME: &str = "wadec-opus-decoder";
pub const MPEG_WORKER_NAME: &str = "wadec-mpeg-decoder";
pub const OGG_OPUS_WORKER_NAME: &str = "wadec-ogg-opus-decoder";

/// Spawns a worker that builds an [`OpusDecoder`] on its own thread.
pub fn spawn_opus_worker<C>(core: SharedCore<C>, config: OpusDecoderConfig) -> Result<RpcClient, RpcError>
where
    C: OpusEntryPoints + Send + 'static,
{
    RpcClient::spawn(OPUS_WORKER_NAME, move || OpusDecoder::new(core, config))
}

pub fn spawn_mpeg_worker<C>(core: SharedCore<C>) -> Result<RpcClient, RpcError>
where
    C: MpegEntryPoints + Send + 'static,
{
    RpcClient::spawn(MPEG_WORKER_NAME, move || MpegDecoder::new(core))
}

pub fn spawn_ogg_opus_worker<C>(
    core: SharedCore<C>,
    config: OggOpusDecoderConfig,
) -> Result<RpcClient, RpcError>
where
    C: OggOpusEntryPoints + Send + 'static,
{
    RpcClient::spawn(OGG_OPUS_WORKER_NAME, move || OggOpusDecoder::new(core, config))
}
