//! Serial writer: one dedicated thread per communicator that drains a
//! bounded FIFO of outbound payloads, retrying transient `WouldBlock`
//! writes after a fixed backoff (spec.md §4.3).

use std::io::{self, Write};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use slog::Logger;

use crate::error::{WriteOutcome, WriterError};

type PendingWrite = (Vec<u8>, SyncSender<WriteOutcome>);

/// Bounded mailbox depth. Mirrors the teacher's choice of small fixed
/// buffer sizes for internal channels rather than an unbounded queue
/// (`examples/original_source/src/client/dispatcher.go`'s `bufferSize`
/// parameter, generalized to a concrete constant here since callers of
/// this crate have no equivalent knob to tune it with).
const QUEUE_CAPACITY: usize = 256;

/// How long to sleep between write attempts after a `WouldBlock`.
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

pub struct SerialWriter {
    queue: SyncSender<PendingWrite>,
    handle: Option<JoinHandle<()>>,
}

impl SerialWriter {
    /// Spawns the writer thread over `sink`. `sink` must already be in
    /// non-blocking mode; the writer only ever retries on `WouldBlock`, it
    /// never blocks the OS thread on I/O itself.
    pub fn spawn<W>(mut sink: W, log: Logger) -> Self
    where
        W: Write + Send + 'static,
    {
        let (tx, rx): (SyncSender<PendingWrite>, Receiver<PendingWrite>) = mpsc::sync_channel(QUEUE_CAPACITY);

        let handle = thread::spawn(move || {
            Self::run(&mut sink, &rx, &log);
        });

        SerialWriter {
            queue: tx,
            handle: Some(handle),
        }
    }

    /// Submits `bytes` for transmission. Non-blocking submission: returns
    /// `ChannelFull` immediately rather than waiting for queue space, then
    /// blocks on the per-request completion slot for the actual write
    /// outcome. `bytes` is copied so the caller may reuse its buffer.
    pub fn write(&self, bytes: &[u8]) -> Result<(), WriterError> {
        let (completion_tx, completion_rx) = mpsc::sync_channel(1);

        match self.queue.try_send((bytes.to_vec(), completion_tx)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(WriterError::ChannelFull),
            Err(TrySendError::Disconnected(_)) => return Err(WriterError::Closed),
        }

        match completion_rx.recv() {
            Ok(WriteOutcome::Written) => Ok(()),
            Ok(WriteOutcome::SocketClosed) | Ok(WriteOutcome::Io(_)) | Err(_) => Err(WriterError::Closed),
        }
    }

    fn run(sink: &mut dyn Write, rx: &Receiver<PendingWrite>, log: &Logger) {
        loop {
            let (bytes, completion) = match rx.recv() {
                Ok(item) => item,
                Err(_) => return, // Submitter side dropped; nothing left to do.
            };

            match Self::write_all_retrying(sink, &bytes, log) {
                Ok(()) => {
                    let _ = completion.send(WriteOutcome::Written);
                }
                Err(outcome) => {
                    slog::warn!(log, "writer terminating after fatal error"; "error" => format!("{outcome:?}"));
                    let _ = completion.send(outcome);
                    return;
                }
            }
        }
    }

    fn write_all_retrying(sink: &mut dyn Write, bytes: &[u8], log: &Logger) -> Result<(), WriteOutcome> {
        let mut offset = 0;

        while offset < bytes.len() {
            match sink.write(&bytes[offset..]) {
                Ok(0) => return Err(WriteOutcome::SocketClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(RETRY_BACKOFF);
                }
                Err(err) => {
                    slog::debug!(log, "write failed"; "error" => %err);
                    return Err(WriteOutcome::Io(err));
                }
            }
        }

        Ok(())
    }
}

impl Drop for SerialWriter {
    fn drop(&mut self) {
        // Dropping `queue` disconnects the channel, which unblocks the
        // thread's `recv()` and lets it exit on its own.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// A mock sink that blocks a fixed number of writes with `WouldBlock`
    /// before accepting data, and can simulate a zero-byte (closed) write.
    struct MockSink {
        blocks_remaining: usize,
        closed: bool,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for MockSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.closed {
                return Ok(0);
            }
            if self.blocks_remaining > 0 {
                self.blocks_remaining -= 1;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn discard_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn writes_after_retrying_wouldblock() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = MockSink {
            blocks_remaining: 2,
            closed: false,
            written: written.clone(),
        };
        let writer = SerialWriter::spawn(sink, discard_logger());

        writer.write(b"hello").unwrap();

        assert_eq!(&*written.lock().unwrap(), b"hello");
    }

    #[test]
    fn socket_closed_terminates_writer() {
        let sink = MockSink {
            blocks_remaining: 0,
            closed: true,
            written: Arc::new(Mutex::new(Vec::new())),
        };
        let writer = SerialWriter::spawn(sink, discard_logger());

        assert!(writer.write(b"hello").is_err());
        // Subsequent writes observe the terminated state.
        assert!(writer.write(b"again").is_err());
    }
}
