//! The caller side: a handle to a decoder living on its own thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use super::handler::RpcWorker;
use super::message::{Command, Reply, Request, Response};
use super::pending::PendingTable;
use crate::process::{DecodedAudio, ErrorPolicy, FrameDecoder};
use crate::utils::errors::{DecoderError, RpcError};

type Outcome = Result<Response, RpcError>;

/// One request in flight. Dropping it discards the reply.
#[derive(Debug)]
pub struct Completion {
    id: i64,
    command: &'static str,
    rx: Receiver<Outcome>,
}

impl Completion {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn wait(self) -> Outcome {
        self.rx.recv().unwrap_or(Err(RpcError::Disconnected))
    }

    pub fn wait_ack(self) -> Result<(), RpcError> {
        let command = self.command;
        match self.wait()? {
            Response::Ack => Ok(()),
            Response::Decoded(_) => Err(RpcError::UnexpectedResponse { command }),
        }
    }

    pub fn wait_decoded(self) -> Result<DecodedAudio, RpcError> {
        let command = self.command;
        match self.wait()? {
            Response::Decoded(decoded) => Ok(decoded),
            Response::Ack => Err(RpcError::UnexpectedResponse { command }),
        }
    }
}

/// Sends commands to a worker thread and routes its replies back by id.
///
/// Requests may be issued from any number of threads and resolve in
/// whatever order the worker answers them.
pub struct RpcClient {
    name: String,
    requests: Option<Sender<Request>>,
    pending: Arc<PendingTable<Outcome>>,
    next_id: AtomicI64,
    worker: Option<JoinHandle<()>>,
    router: Option<JoinHandle<()>>,
}

impl RpcClient {
    /// Starts a worker thread named `name` and builds its decoder there with
    /// `factory`.
    pub fn spawn<D, F>(name: &str, factory: F) -> Result<Self, RpcError>
    where
        D: FrameDecoder + 'static,
        F: FnOnce() -> Result<D, DecoderError> + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (reply_tx, reply_rx) = mpsc::channel::<Reply>();

        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || RpcWorker::start(factory).run(request_rx, reply_tx))?;

        let pending = Arc::new(PendingTable::default());
        let router = {
            let pending = Arc::clone(&pending);
            thread::Builder::new()
                .name(format!("{name}-replies"))
                .spawn(move || route_replies(reply_rx, &pending))?
        };

        debug!("Spawned worker thread {name}");

        Ok(Self {
            name: name.to_string(),
            requests: Some(request_tx),
            pending,
            next_id: AtomicI64::new(i64::MIN),
            worker: Some(worker),
            router: Some(router),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests still waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Posts `command` and returns without waiting for the worker.
    pub fn send(&self, command: Command) -> Completion {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = command.name();
        let rx = self.pending.register(id);

        let delivered = self
            .requests
            .as_ref()
            .is_some_and(|tx| tx.send(Request { id, command }).is_ok());
        if !delivered {
            self.pending.resolve(id, Err(RpcError::Disconnected));
        }

        Completion {
            id,
            command: name,
            rx,
        }
    }

    /// Waits until the worker's decoder is initialized.
    pub fn ready(&self) -> Result<(), RpcError> {
        self.send(Command::Ready).wait_ack()
    }

    pub fn reset(&self) -> Result<(), RpcError> {
        self.send(Command::Reset).wait_ack()
    }

    pub fn decode(&self, data: Vec<u8>, policy: ErrorPolicy) -> Result<DecodedAudio, RpcError> {
        self.send(Command::Decode { data, policy }).wait_decoded()
    }

    pub fn decode_frame(&self, frame: Vec<u8>, policy: ErrorPolicy) -> Result<DecodedAudio, RpcError> {
        self.send(Command::DecodeFrame { frame, policy })
            .wait_decoded()
    }

    pub fn decode_frames(
        &self,
        frames: Vec<Vec<u8>>,
        policy: ErrorPolicy,
    ) -> Result<DecodedAudio, RpcError> {
        self.send(Command::DecodeFrames { frames, policy })
            .wait_decoded()
    }

    /// Frees the worker's decoder and joins the worker thread.
    pub fn free(mut self) -> Result<(), RpcError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), RpcError> {
        let Some(requests) = self.requests.take() else {
            return Ok(());
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.pending.register(id);
        if requests.send(Request { id, command: Command::Free }).is_err() {
            self.pending.resolve(id, Err(RpcError::Disconnected));
        }
        drop(requests);

        let result = Completion {
            id,
            command: "free",
            rx,
        }
        .wait_ack();

        for handle in [self.worker.take(), self.router.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!("Thread of worker {} panicked", self.name);
            }
        }
        debug!("Worker {} shut down", self.name);

        result
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            debug!("Worker {} did not free cleanly: {e}", self.name);
        }
    }
}

fn route_replies(replies: Receiver<Reply>, pending: &PendingTable<Outcome>) {
    for Reply { id, outcome } in replies.iter() {
        if !pending.resolve(id, outcome.map_err(RpcError::from)) {
            warn!("Dropping reply for unknown request {id}");
        }
    }

    let failed = pending.fail_all(|| Err(RpcError::Disconnected));
    if failed > 0 {
        warn!("Worker stopped with {failed} requests outstanding");
    }
}
