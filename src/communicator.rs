//! Communicator: one reader handle + one writer handle bundled under a
//! single idempotent close (spec.md §4.4). Two concrete forms: a connected
//! Unix-domain stream (conceptually one fd serving both directions) and an
//! anonymous pipe pair (distinct read/write fds), built for
//! `CommConfig::Pipe`-configured instances (the internal management channel
//! sets up its own pipe directly in `eventloop.rs`, bypassing this type).

use std::io;
use std::net::Shutdown;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::sync::atomic::{AtomicBool, Ordering};

use mio::net::UnixStream as MioUnixStream;
use mio::unix::pipe;

use crate::error::SetupError;
use crate::queue::{QueueToken, ReadinessQueue};
use crate::types::CommConfig;
use crate::writer::SerialWriter;

/// The readable half registered in the readiness queue. Exists so
/// [`crate::eventloop::EventLoop`] can register/deregister without caring
/// which concrete variant it holds.
pub enum Reader {
    UnixDomain(MioUnixStream),
    Pipe(pipe::Receiver),
}

impl io::Read for Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Reader::UnixDomain(stream) => io::Read::read(stream, buf),
            Reader::Pipe(recv) => io::Read::read(recv, buf),
        }
    }
}

impl mio::event::Source for Reader {
    fn register(&mut self, registry: &mio::Registry, token: mio::Token, interests: mio::Interest) -> io::Result<()> {
        match self {
            Reader::UnixDomain(stream) => stream.register(registry, token, interests),
            Reader::Pipe(recv) => recv.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &mio::Registry, token: mio::Token, interests: mio::Interest) -> io::Result<()> {
        match self {
            Reader::UnixDomain(stream) => stream.reregister(registry, token, interests),
            Reader::Pipe(recv) => recv.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        match self {
            Reader::UnixDomain(stream) => stream.deregister(registry),
            Reader::Pipe(recv) => recv.deregister(registry),
        }
    }
}

/// Bundles a registered reader with the serial writer thread that owns the
/// other half of the connection.
pub struct Communicator {
    reader: Reader,
    writer: SerialWriter,
    closed: AtomicBool,
}

impl Communicator {
    /// Builds a communicator from a `CommConfig`, per spec.md §4.4.
    pub fn build(config: &CommConfig, log: slog::Logger) -> Result<Self, SetupError> {
        match config {
            CommConfig::UnixDomain { socket_path } => Self::connect_unix(socket_path, log),
            CommConfig::Pipe => Self::open_pipe(log),
        }
    }

    fn connect_unix(socket_path: &str, log: slog::Logger) -> Result<Self, SetupError> {
        let std_stream = StdUnixStream::connect(socket_path).map_err(SetupError::InstanceCommunicator)?;
        std_stream
            .set_nonblocking(true)
            .map_err(SetupError::InstanceCommunicator)?;

        let writer_half = std_stream.try_clone().map_err(SetupError::InstanceCommunicator)?;

        let reader = Reader::UnixDomain(MioUnixStream::from_std(std_stream));
        let writer = SerialWriter::spawn(writer_half, log);

        Ok(Communicator {
            reader,
            writer,
            closed: AtomicBool::new(false),
        })
    }

    fn open_pipe(log: slog::Logger) -> Result<Self, SetupError> {
        let (sender, receiver) = pipe::new().map_err(SetupError::InstanceCommunicator)?;

        let writer = SerialWriter::spawn(sender, log);

        Ok(Communicator {
            reader: Reader::Pipe(receiver),
            writer,
            closed: AtomicBool::new(false),
        })
    }

    pub fn reader_mut(&mut self) -> &mut Reader {
        &mut self.reader
    }

    pub fn register(&mut self, queue: &ReadinessQueue, token: QueueToken) -> io::Result<()> {
        queue.add(&mut self.reader, token)
    }

    pub fn deregister(&mut self, queue: &ReadinessQueue) -> io::Result<()> {
        queue.delete(&mut self.reader)
    }

    pub fn write(&self, bytes: &[u8]) -> Result<(), crate::error::WriterError> {
        self.writer.write(bytes)
    }

    /// Shuts down and closes both halves unconditionally (a `try_clone`'d
    /// Unix-domain fd pair or a genuinely distinct pipe pair — either way
    /// there's nothing to gate on). Safe to call more than once; only the
    /// first call does anything.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Reader::UnixDomain(stream) = &self.reader {
            let _ = stream.shutdown(Shutdown::Both);
        }

        // The writer's socket half shares the same open file description
        // for the Unix-domain case (it's a `try_clone`), so shutting down
        // one side is enough to unblock any in-flight write; the writer
        // thread's own `Drop` closes its fd when the `SerialWriter` is
        // dropped. Distinct pipe fds are each closed by their own `Drop`
        // (`mio::unix::pipe::{Sender,Receiver}`) once this `Communicator`
        // and its writer are dropped.
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        self.close();
    }
}
