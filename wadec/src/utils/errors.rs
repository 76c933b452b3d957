use crate::process::{DecoderPhase, ErrorRecord};

/// Applies an [`ErrorPolicy`](crate::process::ErrorPolicy) to a frame error record.
///
/// Under `FailFast` the enclosing function returns the record as a
/// [`DecoderError::Frame`]; under `CollectErrors` the record is logged and
/// pushed onto the given list.
#[macro_export]
macro_rules! fail_or_collect {
    ($policy:expr, $errors:expr, $record:expr $(,)?) => {{
        let record = $record;
        match $policy {
            $crate::process::ErrorPolicy::FailFast => {
                return Err($crate::utils::errors::DecoderError::Frame(Box::new(record)));
            }
            $crate::process::ErrorPolicy::CollectErrors => {
                ::log::warn!("{}", record);
                $errors.push(record);
            }
        }
    }};
}

#[derive(thiserror::Error, Debug)]
pub enum DataError {
    #[error("Invalid block type {0}")]
    InvalidBlockType(u8),

    #[error("Stored block length {len:#06X} does not match its complement {nlen:#06X}")]
    StoredLengthMismatch { len: u16, nlen: u16 },

    #[error("Unexpected end of stream at bit {position}")]
    UnexpectedEof { position: u64 },

    #[error("Over-subscribed Huffman code at length {length}")]
    OversubscribedCode { length: usize },

    #[error("Code length {0} exceeds the maximum of 15")]
    CodeLengthTooLong(u8),

    #[error("Huffman code exhausted without matching a symbol")]
    IncompleteCode,

    #[error("Repeat code 16 with no previous code length")]
    RepeatWithoutPrevious,

    #[error("Code length repeat overruns the alphabet: {count} > {expected}")]
    CodeLengthOverflow { count: usize, expected: usize },

    #[error("Invalid code length symbol {0}")]
    InvalidCodeLengthSymbol(u16),

    #[error("Invalid literal/length symbol {0}")]
    InvalidLengthSymbol(u16),

    #[error("Invalid distance symbol {0}")]
    InvalidDistanceSymbol(u16),

    #[error("Distance {distance} reaches before the start of output ({available} bytes written)")]
    DistanceTooFar { distance: usize, available: usize },

    #[error("I/O error while reading bitstream: {0}")]
    Io(std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ResourceError {
    #[error("Encoded resource is too short for a header: {0} characters")]
    TooShort(usize),

    #[error("Invalid dynEncode header: {0:?}")]
    InvalidHeader(String),

    #[error("Embedded resource failed to inflate")]
    Data(#[from] DataError),
}

#[derive(thiserror::Error, Debug)]
pub enum ArenaError {
    #[error("Native allocator returned null for {bytes} bytes")]
    AllocationFailed { bytes: usize },

    #[error("Allocation size overflows: {count} elements of {size} bytes")]
    SizeOverflow { count: usize, size: usize },

    #[error("View at {ptr:#X} ({bytes} bytes) exceeds linear memory of {memory} bytes")]
    OutOfBounds { ptr: u32, bytes: usize, memory: usize },

    #[error("View from generation {view} used after arena was freed (now generation {arena})")]
    StaleView { view: u64, arena: u64 },

    #[error("View belongs to arena {owner}, not arena {arena}")]
    ForeignView { owner: u64, arena: u64 },

    #[error("{len} elements do not fit in a view of {capacity} elements")]
    Overflow { len: usize, capacity: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("Bootstrap of core module {module} failed")]
    Bootstrap {
        module: String,
        #[source]
        source: ResourceError,
    },

    #[error("Instantiation of core module {module} failed")]
    Instantiate {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Core instance lock poisoned")]
    Poisoned,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(
        "Invalid Opus Decoder Options for multichannel decoding: {channels} channels require streamCount, coupledStreamCount and channelMappingTable"
    )]
    MissingTopology { channels: u8 },

    #[error("channels must be between 1 and 255. Got {0}")]
    InvalidChannels(u32),

    #[error("channelMappingTable must have one entry per channel: expected {expected}, got {actual}")]
    MappingLength { expected: usize, actual: usize },

    #[error("coupledStreamCount {coupled} exceeds streamCount {streams}")]
    CoupledExceedsStreams { coupled: u8, streams: u8 },

    #[error("streamCount + coupledStreamCount must not exceed 255. Got {0}")]
    TooManyStreams(u32),

    #[error("channelMappingTable[{index}] = {value} exceeds the {max} decoded streams")]
    MappingOutOfRange { index: usize, value: u8, max: u32 },
}

#[derive(thiserror::Error, Debug)]
pub enum DecoderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Arena(#[from] ArenaError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Cannot {operation} while decoder is {phase}")]
    InvalidState {
        operation: &'static str,
        phase: DecoderPhase,
    },

    #[error("Native decoder create returned null")]
    CreateFailed,

    #[error("{0}")]
    Frame(Box<ErrorRecord>),
}

#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Decoder(#[from] DecoderError),

    #[error("Decoder failed to initialize on the worker: {0}")]
    Init(String),

    #[error("Worker panicked while handling {command}: {message}")]
    Panicked {
        command: &'static str,
        message: String,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    #[error("Worker thread is no longer running")]
    Disconnected,

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Worker answered {command} with an unexpected response")]
    UnexpectedResponse { command: &'static str },

    #[error("Failed to spawn worker thread")]
    Spawn(#[from] std::io::Error),
}
