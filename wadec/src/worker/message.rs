use std::fmt;

use crate::process::{DecodedAudio, ErrorPolicy};
use crate::utils::errors::WorkerError;

/// Everything a client can ask of its worker.
///
/// Binary arguments are owned, so the worker decodes from buffers that no
/// longer belong to the sender.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// Completes once the worker's decoder is initialized.
    Ready,
    Reset,
    /// Frees the decoder and stops the worker after replying.
    Free,
    Decode {
        data: Vec<u8>,
        policy: ErrorPolicy,
    },
    DecodeFrame {
        frame: Vec<u8>,
        policy: ErrorPolicy,
    },
    DecodeFrames {
        frames: Vec<Vec<u8>>,
        policy: ErrorPolicy,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ready => "ready",
            Command::Reset => "reset",
            Command::Free => "free",
            Command::Decode { .. } => "decode",
            Command::DecodeFrame { .. } => "decodeFrame",
            Command::DecodeFrames { .. } => "decodeFrames",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
pub struct Request {
    pub id: i64,
    pub command: Command,
}

#[derive(Debug, PartialEq)]
pub enum Response {
    Ack,
    /// Channel buffers move to the receiving thread with the reply.
    Decoded(DecodedAudio),
}

#[derive(Debug)]
pub struct Reply {
    pub id: i64,
    pub outcome: Result<Response, WorkerError>,
}
