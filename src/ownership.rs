//! Tracks which outstanding request ids belong to which instance, so a
//! disconnect can cancel every request still waiting on that instance.
//!
//! Grounded on `examples/original_source/src/client/executor.go`'s
//! `Executor`, which keeps the same instance -> pending-ids association in
//! a map mutated only from its own goroutine and drains it wholesale on
//! `Cancel`. Here that goroutine becomes a dedicated thread behind two
//! fire-and-forget commands and one request/reply command, following the
//! same single-owner-thread shape as [`crate::dispatcher::Dispatcher`].

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::{self, JoinHandle};

enum Command {
    Track { instance: String, request_id: String },
    UntrackById { request_id: String },
    TakeForInstance { instance: String, reply: SyncSender<Vec<String>> },
    Shutdown,
}

pub struct OwnershipTracker {
    commands: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl OwnershipTracker {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || Self::run(rx));
        OwnershipTracker {
            commands: tx,
            handle: Some(handle),
        }
    }

    pub fn track(&self, instance: impl Into<String>, request_id: impl Into<String>) {
        let _ = self.commands.send(Command::Track {
            instance: instance.into(),
            request_id: request_id.into(),
        });
    }

    /// Stops tracking `request_id`, wherever it's currently filed. A no-op
    /// if it isn't tracked (already answered, or carried no id).
    pub fn untrack_by_id(&self, request_id: impl Into<String>) {
        let _ = self.commands.send(Command::UntrackById {
            request_id: request_id.into(),
        });
    }

    /// Removes and returns every request id still tracked under
    /// `instance`. Empty if the instance had none outstanding or the
    /// tracker has already shut down.
    pub fn take_for_instance(&self, instance: impl Into<String>) -> Vec<String> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        if self
            .commands
            .send(Command::TakeForInstance {
                instance: instance.into(),
                reply: reply_tx,
            })
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.recv().unwrap_or_default()
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    fn run(rx: Receiver<Command>) {
        let mut by_instance: HashMap<String, HashSet<String>> = HashMap::new();
        let mut instance_of: HashMap<String, String> = HashMap::new();

        while let Ok(command) = rx.recv() {
            match command {
                Command::Track { instance, request_id } => {
                    instance_of.insert(request_id.clone(), instance.clone());
                    by_instance.entry(instance).or_default().insert(request_id);
                }
                Command::UntrackById { request_id } => {
                    if let Some(instance) = instance_of.remove(&request_id) {
                        if let Some(ids) = by_instance.get_mut(&instance) {
                            ids.remove(&request_id);
                            if ids.is_empty() {
                                by_instance.remove(&instance);
                            }
                        }
                    }
                }
                Command::TakeForInstance { instance, reply } => {
                    let ids = by_instance.remove(&instance).unwrap_or_default();
                    for id in &ids {
                        instance_of.remove(id);
                    }
                    let _ = reply.send(ids.into_iter().collect());
                }
                Command::Shutdown => return,
            }
        }
    }
}

impl Drop for OwnershipTracker {
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
    fn disconnect_returns_exactly_the_requests_tracked_for_that_instance() {
        let tracker = OwnershipTracker::spawn();
        tracker.track("qemu0", "r1");
        tracker.track("qemu0", "r2");
        tracker.track("qemu1", "r3");

        let mut taken = tracker.take_for_instance("qemu0");
        taken.sort();
        assert_eq!(taken, vec!["r1".to_string(), "r2".to_string()]);
        assert_eq!(tracker.take_for_instance("qemu0"), Vec::<String>::new());
        assert_eq!(tracker.take_for_instance("qemu1"), vec!["r3".to_string()]);
    }

    #[test]
    fn untrack_by_id_removes_a_single_pending_request() {
        let tracker = OwnershipTracker::spawn();
        tracker.track("qemu0", "r1");
        tracker.track("qemu0", "r2");
        tracker.untrack_by_id("r1");

        assert_eq!(tracker.take_for_instance("qemu0"), vec!["r2".to_string()]);
    }

    #[test]
    fn shutdown_stops_the_thread_and_future_calls_return_empty() {
        let tracker = OwnershipTracker::spawn();
        tracker.track("qemu0", "r1");
        tracker.shutdown();
        // Give the thread a moment to observe the shutdown command.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(tracker.take_for_instance("qemu0"), Vec::<String>::new());
    }
}
