//! Public facade (spec.md §4.7): composes the event loop with two
//! dispatchers and an ownership tracker behind a single translator thread
//! that classifies raw instance bytes and routes them.
//!
//! Grounded on `examples/original_source/src/monitor/monitor.go`, which
//! wires the same pieces (its `AsyncQueue`, its two `Dispatcher[T]`
//! instances keyed by instance name and by request id, and its
//! `Executor`'s per-instance id set) behind one `Monitor` struct.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;
use slog::Logger;

use crate::dispatcher::Dispatcher;
use crate::error::{AddError, ExecuteError, SubmissionError};
use crate::eventloop::{EventLoop, LoopEvent};
use crate::ownership::OwnershipTracker;
use crate::types::{CommConfig, DataKind, InstanceKind, MonitorEvent, Request};

/// Depth of the public events channel. Sized the same as the loop's
/// internal bookkeeping channels (spec.md §4.3's `QUEUE_CAPACITY`); a slow
/// consumer drops `Data` messages rather than stalling the translator.
const MESSAGES_CAPACITY: usize = 256;

/// What a correlated reply resolves to, delivered through the per-request
/// `Dispatcher` slot.
#[derive(Debug, Clone)]
enum ResultOutcome {
    Value(Value),
    Qapi(Value),
    Canceled,
}

/// A pending correlated request. `Get` blocks (optionally with a deadline)
/// until the instance replies, the request is cancelled, its instance
/// disconnects, or the monitor closes.
pub struct ExecuteResult {
    reply: Option<Receiver<ResultOutcome>>,
}

impl ExecuteResult {
    /// Blocks indefinitely for the outcome.
    pub fn get(self) -> Result<Value, ExecuteError> {
        self.get_timeout(None)
    }

    /// Blocks for at most `timeout`, or indefinitely if `None`.
    pub fn get_timeout(self, timeout: Option<Duration>) -> Result<Value, ExecuteError> {
        let Some(reply) = self.reply else {
            return Err(ExecuteError::NoCorrelationId);
        };

        let outcome = match timeout {
            None => reply.recv().map_err(|_| ExecuteError::Closed),
            Some(duration) => reply.recv_timeout(duration).map_err(|err| match err {
                RecvTimeoutError::Timeout => ExecuteError::Timeout,
                RecvTimeoutError::Disconnected => ExecuteError::Closed,
            }),
        }?;

        match outcome {
            ResultOutcome::Value(value) => Ok(value),
            ResultOutcome::Qapi(value) => Err(ExecuteError::Qapi(value)),
            ResultOutcome::Canceled => Err(ExecuteError::Canceled),
        }
    }
}

pub struct Monitor {
    event_loop: EventLoop,
    add_dispatcher: Arc<Dispatcher<Option<String>>>,
    result_dispatcher: Arc<Dispatcher<ResultOutcome>>,
    ownership: Arc<OwnershipTracker>,
    messages: Mutex<Receiver<MonitorEvent>>,
    translator: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    /// Builds a monitor logging to a stderr terminal sink (spec.md §6: no
    /// backend *selection* is exposed here, but the ambient stack still
    /// carries structured logging by default). Pass a caller-built
    /// [`Logger`] to [`Monitor::with_logger`] to redirect it.
    pub fn new() -> Result<Self, crate::error::SetupError> {
        Self::with_logger(crate::logging::default_logger())
    }

    pub fn with_logger(log: Logger) -> Result<Self, crate::error::SetupError> {
        let (event_loop, events_rx) = EventLoop::spawn(log.clone())?;
        let add_dispatcher = Arc::new(Dispatcher::spawn());
        let result_dispatcher = Arc::new(Dispatcher::spawn());
        let ownership = Arc::new(OwnershipTracker::spawn());
        let (messages_tx, messages_rx): (SyncSender<MonitorEvent>, Receiver<MonitorEvent>) =
            mpsc::sync_channel(MESSAGES_CAPACITY);

        let translator = thread::spawn({
            let add_dispatcher = add_dispatcher.clone();
            let result_dispatcher = result_dispatcher.clone();
            let ownership = ownership.clone();
            move || translate(events_rx, add_dispatcher, result_dispatcher, ownership, messages_tx, log)
        });

        Ok(Monitor {
            event_loop,
            add_dispatcher,
            result_dispatcher,
            ownership,
            messages: Mutex::new(messages_rx),
            translator: Mutex::new(Some(translator)),
        })
    }

    /// Registers a new instance and blocks until the connection attempt
    /// either succeeds or fails.
    pub fn add(&self, instance: impl Into<String>, config: CommConfig) -> Result<(), AddError> {
        let instance = instance.into();
        let reply = self.add_dispatcher.enqueue(instance.clone());

        if let Err(err) = self.event_loop.submit_add(instance.clone(), config) {
            // Submission never reached the loop, so nothing will ever post
            // to this subscription on its own; release it here instead of
            // leaving it dangling for a retried `add` with the same name to
            // hit the duplicate-id path forever (spec.md §4.7).
            self.add_dispatcher.post(instance, Some(err.to_string()));
            return Err(AddError::Submission(err));
        }

        match reply.recv() {
            Ok(None) => Ok(()),
            Ok(Some(message)) => Err(AddError::Rejected(message)),
            Err(_) => Err(AddError::Closed),
        }
    }

    /// Writes `request` to `instance`. If `request` carries a correlation
    /// id the returned [`ExecuteResult`] observes the reply; otherwise
    /// `ExecuteResult::get` fails immediately with
    /// [`ExecuteError::NoCorrelationId`] once called, while the request is
    /// still sent.
    pub fn execute(&self, instance: impl Into<String>, request: Request) -> Result<ExecuteResult, SubmissionError> {
        let instance = instance.into();
        let request_id = request.request_id().to_string();

        let reply = if request_id.is_empty() {
            None
        } else {
            self.ownership.track(instance.clone(), request_id.clone());
            Some(self.result_dispatcher.enqueue(request_id.clone()))
        };

        if let Err(err) = self.event_loop.submit_execute(instance, request) {
            if !request_id.is_empty() {
                self.ownership.untrack_by_id(request_id);
            }
            return Err(err);
        }

        Ok(ExecuteResult { reply })
    }

    /// Cancels a previously submitted request by its correlation id.
    /// A no-op if the id is unknown or has already been answered.
    pub fn cancel(&self, request_id: impl Into<String>) -> Result<(), SubmissionError> {
        self.event_loop.submit_cancel(request_id)
    }

    /// Shuts the monitor down: closes every instance connection, stops the
    /// event loop, and drains the public event stream.
    pub fn close(&self) -> Result<(), SubmissionError> {
        self.event_loop.submit_close()
    }

    /// Blocks for the next public event, or returns `None` once the
    /// monitor has fully closed.
    pub fn next_message(&self) -> Option<MonitorEvent> {
        self.messages.lock().unwrap().recv().ok()
    }

    /// Blocks for at most `timeout` for the next public event.
    pub fn next_message_timeout(&self, timeout: Duration) -> Option<MonitorEvent> {
        self.messages.lock().unwrap().recv_timeout(timeout).ok()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        let _ = self.close();
        self.add_dispatcher.cancel();
        self.result_dispatcher.cancel();
        self.ownership.shutdown();
        if let Some(handle) = self.translator.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// Classifies and routes every [`LoopEvent`] until the event loop shuts
/// down, at which point `events_rx` closes and this thread returns
/// (dropping `messages_tx`, which ends [`Monitor::next_message`]'s stream
/// for callers).
fn translate(
    events_rx: Receiver<LoopEvent>,
    add_dispatcher: Arc<Dispatcher<Option<String>>>,
    result_dispatcher: Arc<Dispatcher<ResultOutcome>>,
    ownership: Arc<OwnershipTracker>,
    messages_tx: SyncSender<MonitorEvent>,
    log: Logger,
) {
    while let Ok(event) = events_rx.recv() {
        match event {
            LoopEvent::InstanceAdded { id, error } => {
                let kind = if error.is_none() {
                    InstanceKind::Added
                } else {
                    InstanceKind::Removed
                };
                add_dispatcher.post(id.clone(), error);
                let _ = messages_tx.send(MonitorEvent::Instance { instance: id, kind });
            }
            LoopEvent::InstanceRemoved { id } => {
                // Two emissions for one disconnect, per the monitor facade's
                // event translator: an `InstanceMessage{Removed}` (the
                // error-handling design's documented InstanceFatal outcome)
                // and a best-effort `DataMessage{Generic, payload=nil}` for
                // consumers only watching the data stream.
                for request_id in ownership.take_for_instance(&id) {
                    result_dispatcher.post(request_id, ResultOutcome::Canceled);
                }
                try_send_generic_nil(&messages_tx, &id);
                let _ = messages_tx.send(MonitorEvent::Instance {
                    instance: id,
                    kind: InstanceKind::Removed,
                });
            }
            LoopEvent::RequestCanceled { request_id } => {
                ownership.untrack_by_id(request_id.clone());
                result_dispatcher.post(request_id, ResultOutcome::Canceled);
            }
            LoopEvent::Data { id, values } => {
                for value in values {
                    route_value(&id, value, &result_dispatcher, &ownership, &messages_tx, &log);
                }
            }
        }
    }
}

fn route_value(
    instance: &str,
    value: Vec<u8>,
    result_dispatcher: &Dispatcher<ResultOutcome>,
    ownership: &OwnershipTracker,
    messages_tx: &SyncSender<MonitorEvent>,
    log: &Logger,
) {
    let envelope: crate::types::RawEnvelope = match serde_json::from_slice(&value) {
        Ok(envelope) => envelope,
        Err(err) => {
            slog::warn!(log, "instance payload was not a JSON object"; "instance" => instance, "error" => %err);
            try_send_data(messages_tx, instance, DataKind::Generic, value);
            return;
        }
    };

    match envelope.classify() {
        crate::types::EnvelopeKind::Event => {
            try_send_data(messages_tx, instance, DataKind::Event, value);
        }
        crate::types::EnvelopeKind::Result => {
            if let Some(id) = envelope.id.filter(|id| !id.is_empty()) {
                let result = envelope.result.flatten().unwrap_or(Value::Null);
                ownership.untrack_by_id(id.clone());
                result_dispatcher.post(id, ResultOutcome::Value(result));
            }
            try_send_data(messages_tx, instance, DataKind::Result, value);
        }
        crate::types::EnvelopeKind::ErrorResult => {
            if let Some(id) = envelope.id.filter(|id| !id.is_empty()) {
                let error = envelope.error.unwrap_or(Value::Null);
                ownership.untrack_by_id(id.clone());
                result_dispatcher.post(id, ResultOutcome::Qapi(error));
            }
            try_send_data(messages_tx, instance, DataKind::Result, value);
        }
        crate::types::EnvelopeKind::Generic => {
            try_send_data(messages_tx, instance, DataKind::Generic, value);
        }
    }
}

/// Best-effort delivery for data messages (spec.md §4.7 supplement): a slow
/// or absent consumer drops the payload rather than stalling the
/// translator thread, unlike the blocking sends used for instance
/// added/removed transitions above.
fn try_send_data(messages_tx: &SyncSender<MonitorEvent>, instance: &str, kind: DataKind, payload: Vec<u8>) {
    let _ = messages_tx.try_send(MonitorEvent::Data {
        instance: instance.to_string(),
        kind,
        payload: Some(payload),
    });
}

fn try_send_generic_nil(messages_tx: &SyncSender<MonitorEvent>, instance: &str) {
    let _ = messages_tx.try_send(MonitorEvent::Data {
        instance: instance.to_string(),
        kind: DataKind::Generic,
        payload: None,
    });
}
