//! The worker side: one decoder, driven by requests from a channel.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{Receiver, Sender};

use log::{error, info, trace};

use super::message::{Command, Reply, Request, Response};
use crate::process::FrameDecoder;
use crate::utils::errors::{DecoderError, WorkerError};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Owns exactly one decoder and answers requests for it.
pub struct RpcWorker<D> {
    decoder: Result<D, String>,
}

impl<D: FrameDecoder> RpcWorker<D> {
    /// Builds the decoder on the current thread. A failed or panicking
    /// factory leaves the worker answering every request with
    /// [`WorkerError::Init`].
    pub fn start<F>(factory: F) -> Self
    where
        F: FnOnce() -> Result<D, DecoderError>,
    {
        let decoder = match catch_unwind(AssertUnwindSafe(factory)) {
            Ok(Ok(decoder)) => Ok(decoder),
            Ok(Err(e)) => Err(format!("{:#}", anyhow::Error::new(e))),
            Err(payload) => Err(panic_message(payload.as_ref())),
        };

        if let Err(message) = &decoder {
            error!("Decoder failed to initialize: {message}");
        }

        Self { decoder }
    }

    pub fn handle(&mut self, request: Request) -> Reply {
        let Request { id, command } = request;
        let name = command.name();
        trace!("worker: request {id} {name}");

        let outcome = match &mut self.decoder {
            Ok(decoder) => catch_unwind(AssertUnwindSafe(|| execute(decoder, command)))
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    error!("Worker panicked while handling {name}: {message}");
                    Err(WorkerError::Panicked {
                        command: name,
                        message,
                    })
                }),
            Err(_) if matches!(command, Command::Free) => Ok(Response::Ack),
            Err(message) => Err(WorkerError::Init(message.clone())),
        };

        Reply { id, outcome }
    }

    /// Serves requests until `free` has been answered or either channel closes.
    pub fn run(mut self, requests: Receiver<Request>, replies: Sender<Reply>) {
        info!("Decoder worker started");

        for request in requests.iter() {
            let last = matches!(request.command, Command::Free);
            if replies.send(self.handle(request)).is_err() || last {
                break;
            }
        }

        // requests close before replies, so a client whose send succeeded
        // is always failed by the reply router
        drop(requests);
        drop(replies);
        info!("Decoder worker stopped");
    }
}

fn execute<D: FrameDecoder>(decoder: &mut D, command: Command) -> Result<Response, WorkerError> {
    let response = match command {
        Command::Ready => Response::Ack,
        Command::Reset => {
            decoder.reset()?;
            Response::Ack
        }
        Command::Free => {
            decoder.free()?;
            Response::Ack
        }
        Command::Decode { data, policy } => Response::Decoded(decoder.decode(&data, policy)?),
        Command::DecodeFrame { frame, policy } => {
            Response::Decoded(decoder.decode_frame(&frame, policy)?)
        }
        Command::DecodeFrames { frames, policy } => {
            Response::Decoded(decoder.decode_frames(&frames, policy)?)
        }
    };
    Ok(response)
}
