//! Generic single-use subscription table (spec.md §4.6), grounded on
//! `examples/original_source/src/client/dispatcher.go`'s `Dispatcher[T]`.
//!
//! State (the id -> slot map) lives entirely inside one dedicated thread;
//! everyone else talks to it over two channels, so the map is never touched
//! concurrently (spec.md §5 "Locking discipline").

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::{self, JoinHandle};

enum Command<T> {
    Enqueue {
        id: String,
        reply: SyncSender<Receiver<T>>,
    },
    Post {
        id: String,
        payload: T,
    },
    Cancel,
}

/// A handle to a running dispatcher thread. Dropping it does not stop the
/// thread by itself — call [`Dispatcher::cancel`] (or drop the last
/// `Sender` clone) to shut it down.
pub struct Dispatcher<T> {
    commands: Sender<Command<T>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Dispatcher<T> {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || Self::run(rx));

        Dispatcher {
            commands: tx,
            handle: Some(handle),
        }
    }

    /// Registers a subscription for `id` and returns a receiver that will
    /// yield exactly one `T`, or observe the channel close empty if the
    /// subscription is rejected as a duplicate, cancelled, or the
    /// dispatcher itself shuts down first.
    ///
    /// Per spec.md §4.6: a second `Enqueue` for an id that already has an
    /// outstanding subscription gets a receiver that is closed immediately
    /// with no payload.
    pub fn enqueue(&self, id: impl Into<String>) -> Receiver<T> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let sent = self.commands.send(Command::Enqueue {
            id: id.into(),
            reply: reply_tx,
        });

        match sent {
            Ok(()) => match reply_rx.recv() {
                Ok(receiver) => receiver,
                // Dispatcher thread died before replying; hand back an
                // already-closed receiver.
                Err(_) => {
                    let (_, rx) = mpsc::sync_channel(0);
                    rx
                }
            },
            Err(_) => {
                let (_, rx) = mpsc::sync_channel(0);
                rx
            }
        }
    }

    /// Delivers `payload` to the subscriber registered for `id`, if any.
    /// The send into the subscriber's single-slot channel is best-effort:
    /// if the slot can't accept without blocking, the payload is dropped
    /// and the slot is closed anyway (spec.md §4.6, preserved per the Open
    /// Question in spec.md §9 rather than switched to a blocking send).
    pub fn post(&self, id: impl Into<String>, payload: T) {
        let _ = self.commands.send(Command::Post { id: id.into(), payload });
    }

    /// Closes every outstanding slot and stops the dispatcher thread.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }

    fn run(rx: Receiver<Command<T>>) {
        let mut subscriptions: HashMap<String, SyncSender<T>> = HashMap::new();

        while let Ok(command) = rx.recv() {
            match command {
                Command::Enqueue { id, reply } => {
                    let (tx, rx) = mpsc::sync_channel(1);
                    if subscriptions.contains_key(&id) {
                        // Duplicate: hand back an already-closed receiver
                        // by dropping `tx` before replying.
                        drop(tx);
                    } else {
                        subscriptions.insert(id, tx);
                    }
                    let _ = reply.send(rx);
                }
                Command::Post { id, payload } => {
                    if let Some(slot) = subscriptions.remove(&id) {
                        let _ = slot.try_send(payload);
                    }
                }
                Command::Cancel => {
                    subscriptions.clear();
                    return;
                }
            }
        }
    }
}

impl<T> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn delivers_exactly_one_value_to_its_subscriber() {
        let dispatcher: Dispatcher<u32> = Dispatcher::spawn();
        let rx = dispatcher.enqueue("r1");
        dispatcher.post("r1", 42);
        assert_eq!(rx.recv().unwrap(), 42);
        // Slot is closed after delivery.
        assert!(rx.recv().is_err());
    }

    #[test]
    fn duplicate_enqueue_closes_the_second_handle_empty() {
        let dispatcher: Dispatcher<u32> = Dispatcher::spawn();
        let first = dispatcher.enqueue("dup");
        let second = dispatcher.enqueue("dup");

        assert!(second.recv_timeout(Duration::from_millis(200)).is_err());

        dispatcher.post("dup", 1);
        assert_eq!(first.recv().unwrap(), 1);
    }

    #[test]
    fn cancel_closes_outstanding_slots() {
        let dispatcher: Dispatcher<u32> = Dispatcher::spawn();
        let rx = dispatcher.enqueue("r1");
        dispatcher.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn post_with_no_subscriber_is_dropped_silently() {
        let dispatcher: Dispatcher<u32> = Dispatcher::spawn();
        // No panic, no deadlock.
        dispatcher.post("nobody-home", 7);
        dispatcher.cancel();
    }
}
