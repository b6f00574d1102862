//! Error taxonomy for the monitor core.
//!
//! Mirrors `flux::shared::NetworkError` in spirit: small hand-rolled enums,
//! an `io::Error` conversion that routes `WouldBlock` away from the error
//! path, and no panics escaping the public API.

use std::fmt;
use std::io;

/// Fails construction of the monitor outright: the readiness queue or the
/// internal management pipe could not be created.
#[derive(Debug)]
pub enum SetupError {
    Queue(io::Error),
    ManagementPipe(io::Error),
    /// A per-instance communicator (the Unix-domain connect or pipe open
    /// issued for an `Add`) could not be built. Kept distinct from
    /// `ManagementPipe` so a bad instance socket path never reads back as a
    /// failure of the internal management channel.
    InstanceCommunicator(io::Error),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Queue(err) => write!(f, "failed to create readiness queue: {err}"),
            SetupError::ManagementPipe(err) => write!(f, "failed to create management pipe: {err}"),
            SetupError::InstanceCommunicator(err) => write!(f, "failed to set up instance connection: {err}"),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Queue(err) | SetupError::ManagementPipe(err) | SetupError::InstanceCommunicator(err) => Some(err),
        }
    }
}

/// Returned synchronously from `Add`/`Execute`/`Cancel`/`Close`. Does not
/// take the monitor down.
#[derive(Debug)]
pub enum SubmissionError {
    /// The management writer's bounded mailbox could not accept the record
    /// without blocking.
    ChannelFull,
    /// The event loop has already exited.
    LoopClosed,
    /// The management record could not be serialized to JSON.
    Marshal(serde_json::Error),
}

impl fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionError::ChannelFull => write!(f, "management channel is full"),
            SubmissionError::LoopClosed => write!(f, "event loop is no longer running"),
            SubmissionError::Marshal(err) => write!(f, "failed to marshal management record: {err}"),
        }
    }
}

impl std::error::Error for SubmissionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SubmissionError::Marshal(err) => Some(err),
            _ => None,
        }
    }
}

impl From<WriterError> for SubmissionError {
    fn from(err: WriterError) -> Self {
        match err {
            WriterError::ChannelFull => SubmissionError::ChannelFull,
            WriterError::Closed => SubmissionError::LoopClosed,
        }
    }
}

/// Errors surfaced by [`crate::writer::SerialWriter::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterError {
    /// The bounded request queue could not accept the payload without
    /// blocking.
    ChannelFull,
    /// The writer thread has already terminated after a fatal error.
    Closed,
}

impl fmt::Display for WriterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriterError::ChannelFull => write!(f, "writer queue is full"),
            WriterError::Closed => write!(f, "writer has terminated"),
        }
    }
}

impl std::error::Error for WriterError {}

/// The outcome recorded for a single queued write, delivered back to the
/// submitter via the per-request completion slot.
#[derive(Debug)]
pub enum WriteOutcome {
    Written,
    SocketClosed,
    Io(io::Error),
}

/// Errors surfaced while draining a connection in [`crate::reader::FramingReader`].
#[derive(Debug)]
pub enum ReadError {
    /// The peer closed the connection (a zero-byte read).
    EndOfStream,
    /// An unrecoverable OS-level I/O error.
    Io(io::Error),
    /// The residual bytes left after extracting whatever complete JSON
    /// values were available do not form a valid prefix of a JSON value.
    Framing(serde_json::Error),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::EndOfStream => write!(f, "peer closed the connection"),
            ReadError::Io(err) => write!(f, "I/O error: {err}"),
            ReadError::Framing(err) => write!(f, "framing error: {err}"),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadError::Io(err) => Some(err),
            ReadError::Framing(err) => Some(err),
            ReadError::EndOfStream => None,
        }
    }
}

/// Returned from [`crate::monitor::Monitor::add`].
#[derive(Debug)]
pub enum AddError {
    /// Could not even get the management record onto the event loop.
    Submission(SubmissionError),
    /// The event loop accepted the record but the connection attempt
    /// itself failed; carries the communicator's error message.
    Rejected(String),
    /// The monitor was closed before a reply arrived.
    Closed,
}

impl fmt::Display for AddError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddError::Submission(err) => write!(f, "could not submit add request: {err}"),
            AddError::Rejected(msg) => write!(f, "instance could not be added: {msg}"),
            AddError::Closed => write!(f, "monitor closed before the add request was acknowledged"),
        }
    }
}

impl std::error::Error for AddError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AddError::Submission(err) => Some(err),
            _ => None,
        }
    }
}

/// Returned from [`crate::monitor::ExecuteResult::get`].
#[derive(Debug)]
pub enum ExecuteError {
    /// The request carried no correlation id, so its outcome can never be
    /// observed; the request was still written to the instance.
    NoCorrelationId,
    /// The instance replied with a QAPI error object.
    Qapi(serde_json::Value),
    /// The request was explicitly cancelled, or its instance disconnected
    /// while the request was outstanding.
    Canceled,
    /// The wait exceeded the caller-supplied deadline.
    Timeout,
    /// The monitor was closed before a reply arrived.
    Closed,
    /// Could not submit the execute request in the first place.
    Submission(SubmissionError),
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteError::NoCorrelationId => write!(f, "request carries no id and cannot be awaited"),
            ExecuteError::Qapi(value) => write!(f, "instance returned an error: {value}"),
            ExecuteError::Canceled => write!(f, "request was cancelled"),
            ExecuteError::Timeout => write!(f, "timed out waiting for a reply"),
            ExecuteError::Closed => write!(f, "monitor closed before a reply arrived"),
            ExecuteError::Submission(err) => write!(f, "could not submit execute request: {err}"),
        }
    }
}

impl std::error::Error for ExecuteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecuteError::Submission(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors from the readiness queue itself. Anything other than
/// `Interrupted` here is loop-fatal (spec.md §7 `LoopFatal`).
#[derive(Debug)]
pub enum QueueError {
    /// The underlying OS polling primitive could not be created.
    Setup(io::Error),
    /// `wait()` failed for a reason other than being interrupted.
    Io(io::Error),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Setup(err) => write!(f, "failed to create readiness queue: {err}"),
            QueueError::Io(err) => write!(f, "readiness queue wait failed: {err}"),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueError::Setup(err) | QueueError::Io(err) => Some(err),
        }
    }
}
