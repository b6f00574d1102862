//! Async queue / event loop (spec.md §4.5): the hard core of the system.
//! A single thread blocks on the readiness queue, drains whichever fds
//! report readable, and either acts on a decoded management record (for
//! the reserved management endpoint) or emits the extracted values for a
//! regular instance onto the loop's event channel.
//!
//! Grounded on `examples/original_source/src/monitor/internal/sockets/asynqqueue.go`.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use slog::Logger;

use crate::communicator::Communicator;
use crate::error::{ReadError, SetupError, SubmissionError};
use crate::queue::{QueueToken, ReadinessQueue};
use crate::reader::FramingReader;
use crate::types::{Action, CommConfig, ManagementRecord, Request};
use crate::writer::SerialWriter;

/// Reserved token for the internal management pipe; never handed out to a
/// caller-named instance.
const MANAGEMENT_TOKEN: QueueToken = QueueToken(0);
const FIRST_INSTANCE_TOKEN: usize = 1;

/// What the loop emits for one dispatch cycle. Corresponds to the union of
/// fields on the original's single `client.Event` struct, split here into
/// an enum per spec.md §3 `MonitorEvent` minus the `ControlAck` rename
/// (kept separate from the public-facing `MonitorEvent` in `types.rs`,
/// which the facade in `monitor.rs` derives from these).
#[derive(Debug)]
pub enum LoopEvent {
    /// Result of processing an `Add` management record.
    InstanceAdded { id: String, error: Option<String> },
    /// A registered instance's connection ended (peer close or fatal I/O).
    InstanceRemoved { id: String },
    /// Result of processing a `Cancel` management record; carries no
    /// payload, only releases whatever dispatcher slot is waiting on
    /// `request_id`.
    RequestCanceled { request_id: String },
    /// One or more complete JSON values read off a regular instance, in
    /// wire order.
    Data { id: String, values: Vec<Vec<u8>> },
}

struct Instance {
    comm: Communicator,
    framing: FramingReader,
}

pub struct EventLoop {
    management_writer: SerialWriter,
}

impl EventLoop {
    /// Creates the readiness queue, the internal management pipe, and
    /// spawns the single event-loop thread. Returns a handle usable from
    /// any thread to submit management actions, and the receiving end of
    /// the loop's event stream (single-consumer, meant for the facade's
    /// translator thread).
    pub fn spawn(log: Logger) -> Result<(Self, Receiver<LoopEvent>), SetupError> {
        let queue = ReadinessQueue::new().map_err(|err| match err {
            crate::error::QueueError::Setup(io_err) => SetupError::Queue(io_err),
            crate::error::QueueError::Io(io_err) => SetupError::Queue(io_err),
        })?;

        let (sender, receiver) = mio::unix::pipe::new().map_err(SetupError::ManagementPipe)?;
        let management_writer = SerialWriter::spawn(sender, log.clone());
        let mut management_reader = crate::communicator::Reader::Pipe(receiver);

        queue
            .add(&mut management_reader, MANAGEMENT_TOKEN)
            .map_err(SetupError::ManagementPipe)?;

        let (events_tx, events_rx) = mpsc::channel();

        thread::spawn(move || {
            LoopState {
                queue,
                instances: HashMap::new(),
                tokens: HashMap::new(),
                next_token: FIRST_INSTANCE_TOKEN,
                management_reader,
                management_framing: FramingReader::new(),
                events: events_tx,
                log,
            }
            .run();
        });

        Ok((EventLoop { management_writer }, events_rx))
    }

    pub fn submit_add(&self, id: impl Into<String>, config: CommConfig) -> Result<(), SubmissionError> {
        self.submit(ManagementRecord::add(id, config))
    }

    pub fn submit_execute(&self, id: impl Into<String>, request: Request) -> Result<(), SubmissionError> {
        self.submit(ManagementRecord::execute(id, request))
    }

    pub fn submit_cancel(&self, request_id: impl Into<String>) -> Result<(), SubmissionError> {
        self.submit(ManagementRecord::cancel(request_id))
    }

    pub fn submit_close(&self) -> Result<(), SubmissionError> {
        self.submit(ManagementRecord::close())
    }

    fn submit(&self, record: ManagementRecord) -> Result<(), SubmissionError> {
        let bytes = serde_json::to_vec(&record).map_err(SubmissionError::Marshal)?;
        self.management_writer.write(&bytes).map_err(SubmissionError::from)
    }
}

struct LoopState {
    queue: ReadinessQueue,
    instances: HashMap<String, Instance>,
    tokens: HashMap<QueueToken, String>,
    next_token: usize,
    management_reader: crate::communicator::Reader,
    management_framing: FramingReader,
    events: Sender<LoopEvent>,
    log: Logger,
}

impl LoopState {
    fn run(mut self) {
        loop {
            let ready = match self.queue.wait(None) {
                Ok(tokens) => tokens,
                Err(err) => {
                    slog::error!(self.log, "readiness queue wait failed, loop exiting"; "error" => %err);
                    return;
                }
            };

            for token in ready {
                if token == MANAGEMENT_TOKEN {
                    if !self.handle_management_readable() {
                        return; // Close record processed, or fatal management read.
                    }
                } else if let Some(id) = self.tokens.get(&token).cloned() {
                    self.handle_instance_readable(&id);
                }
            }
        }
    }

    /// Returns `false` when the loop should stop (Close record processed,
    /// or the management endpoint itself failed — spec.md §4.5 "for the
    /// management endpoint this is a fatal condition").
    fn handle_management_readable(&mut self) -> bool {
        let (values, err) = self.management_framing.read(&mut self.management_reader);

        for value in &values {
            match serde_json::from_slice::<ManagementRecord>(value) {
                Ok(record) => {
                    if !self.apply_management_record(record) {
                        return false;
                    }
                }
                Err(decode_err) => {
                    slog::warn!(self.log, "could not decode management record"; "error" => %decode_err);
                }
            }
        }

        if let Some(read_err) = err {
            match read_err {
                ReadError::Framing(decode_err) => {
                    slog::warn!(self.log, "framing error on management pipe"; "error" => %decode_err);
                    true
                }
                ReadError::EndOfStream | ReadError::Io(_) => {
                    slog::error!(self.log, "management endpoint died, loop exiting"; "error" => %read_err);
                    false
                }
            }
        } else {
            true
        }
    }

    /// Returns `false` when a `Close` record was processed.
    fn apply_management_record(&mut self, record: ManagementRecord) -> bool {
        match record.action {
            Action::Add => {
                if let Some(add) = record.add {
                    self.handle_add(add.id, add.config);
                } else {
                    slog::error!(self.log, "missing communication config for Add action");
                }
                true
            }
            Action::Cancel => {
                if let Some(cancel) = record.cancel {
                    let _ = self.events.send(LoopEvent::RequestCanceled { request_id: cancel.id });
                } else {
                    slog::error!(self.log, "missing cancel config for Cancel action");
                }
                true
            }
            Action::Execute => {
                if let Some(execute) = record.execute {
                    self.handle_execute(execute.id, execute.request);
                } else {
                    slog::error!(self.log, "missing execute config for Execute action");
                }
                true
            }
            Action::Close => {
                self.handle_close();
                false
            }
        }
    }

    fn handle_add(&mut self, id: String, config: CommConfig) {
        match Communicator::build(&config, self.log.clone()) {
            Ok(mut comm) => {
                let token = QueueToken(self.next_token);
                self.next_token += 1;

                if let Err(err) = comm.register(&self.queue, token) {
                    slog::error!(self.log, "could not register instance fd"; "instance" => &id, "error" => %err);
                    let _ = self.events.send(LoopEvent::InstanceAdded {
                        id,
                        error: Some(err.to_string()),
                    });
                    return;
                }

                self.tokens.insert(token, id.clone());
                self.instances.insert(
                    id.clone(),
                    Instance {
                        comm,
                        framing: FramingReader::new(),
                    },
                );

                let _ = self.events.send(LoopEvent::InstanceAdded { id, error: None });
            }
            Err(err) => {
                let _ = self.events.send(LoopEvent::InstanceAdded {
                    id,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    fn handle_execute(&mut self, id: String, request: Request) {
        let Some(instance) = self.instances.get(&id) else {
            slog::warn!(self.log, "execute submitted for unknown instance"; "instance" => &id);
            return;
        };

        match serde_json::to_vec(&request) {
            Ok(bytes) => {
                if let Err(err) = instance.comm.write(&bytes) {
                    // Writer errors are contained: logged, loop continues.
                    slog::warn!(self.log, "write failed for instance"; "instance" => &id, "error" => %err);
                }
            }
            Err(err) => {
                slog::error!(self.log, "could not marshal execute request"; "error" => %err);
            }
        }
    }

    fn handle_close(&mut self) {
        for (_, instance) in self.instances.drain() {
            instance.comm.close();
        }
    }

    fn handle_instance_readable(&mut self, id: &str) {
        let Some(instance) = self.instances.get_mut(id) else {
            return;
        };

        let (values, err) = instance.framing.read(instance.comm.reader_mut());

        if !values.is_empty() {
            let _ = self.events.send(LoopEvent::Data {
                id: id.to_string(),
                values,
            });
        }

        match err {
            None => {}
            Some(ReadError::Framing(decode_err)) => {
                // Contained: bad bytes discarded up to the failure point,
                // connection stays open (spec.md §4.2, §7).
                slog::warn!(self.log, "framing error on instance"; "instance" => id, "error" => %decode_err);
            }
            Some(ReadError::EndOfStream) | Some(ReadError::Io(_)) => {
                self.remove_instance(id);
            }
        }
    }

    fn remove_instance(&mut self, id: &str) {
        if let Some(mut instance) = self.instances.remove(id) {
            let _ = instance.comm.deregister(&self.queue);
            instance.comm.close();
            self.tokens.retain(|_, name| name != id);
            let _ = self.events.send(LoopEvent::InstanceRemoved { id: id.to_string() });
        }
    }
}
