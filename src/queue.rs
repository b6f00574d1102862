//! Readiness queue: a thin wrapper over `mio`'s portable epoll (Linux) /
//! kqueue (other Unix) backend (spec.md §4.1).
//!
//! Registration is always edge-triggered and read-only; the consumer is
//! responsible for draining a ready fd until it observes `WouldBlock`
//! before returning to [`ReadinessQueue::wait`]. Spurious/interrupted waits
//! are absorbed here and reported as an empty batch rather than propagated.

use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

use crate::error::QueueError;

/// Opaque handle identifying a registered fd. Wraps `mio::Token` so callers
/// outside this module never need to depend on `mio` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueToken(pub usize);

impl From<QueueToken> for Token {
    fn from(token: QueueToken) -> Self {
        Token(token.0)
    }
}

impl From<Token> for QueueToken {
    fn from(token: Token) -> Self {
        QueueToken(token.0)
    }
}

pub struct ReadinessQueue {
    poll: Poll,
    events: Events,
}

/// Capacity of the batch returned from a single `wait()` call. Oversized
/// batches just mean more `wait()` round trips, not missed events — mio
/// re-reports any fd that's still ready on the next call.
const EVENTS_CAPACITY: usize = 1024;

impl ReadinessQueue {
    pub fn new() -> Result<Self, QueueError> {
        let poll = Poll::new().map_err(QueueError::Setup)?;
        Ok(ReadinessQueue {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
        })
    }

    /// Registers `source` for edge-triggered read-readiness under `token`.
    /// Idempotent from the caller's perspective is not guaranteed by mio for
    /// `register` itself (registering a fd twice is an error); callers must
    /// not re-register a still-registered fd.
    pub fn add<S: Source + ?Sized>(&self, source: &mut S, token: QueueToken) -> io::Result<()> {
        self.poll.registry().register(source, token.into(), Interest::READABLE)
    }

    /// Deregisters `source`. Deregistering an fd the OS no longer knows
    /// about (e.g. already closed) is treated as a no-op success, matching
    /// the "delete is idempotent" contract in spec.md §4.1.
    pub fn delete<S: Source + ?Sized>(&self, source: &mut S) -> io::Result<()> {
        match self.poll.registry().deregister(source) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Blocks until at least one registered fd is ready to read, or the
    /// timeout elapses. Returns the tokens of ready fds in arbitrary order;
    /// unknown tokens are never produced since only this wrapper issues
    /// them. A `WouldBlock`/interrupted wait yields an empty batch rather
    /// than an error.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<QueueToken>, QueueError> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => Ok(self.events.iter().map(|event| event.token().into()).collect()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(Vec::new()),
            Err(err) => Err(QueueError::Io(err)),
        }
    }
}
