//! The task side of a bounded run.
//!
//! A task reports its result through a [`Completion`]. Reporting never
//! blocks: either the value is handed over or it is dropped. A task whose
//! caller has already given up therefore still finishes, and its channel is
//! freed with it.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::trace;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How a completion channel hands the result to the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    /// One-slot buffer: the report always succeeds immediately, and the
    /// value waits for the caller or is freed with the channel.
    #[default]
    Buffered,

    /// No buffer: the value is handed over only if the caller is waiting at
    /// that instant, otherwise it is dropped.
    ///
    /// A task that finishes before its caller starts waiting loses its
    /// result, and the caller sees a timeout or cancellation.
    Rendezvous,
}

impl CompletionMode {
    /// Channel capacity for this mode
    pub fn capacity(self) -> usize {
        match self {
            CompletionMode::Buffered => 1,
            CompletionMode::Rendezvous => 0,
        }
    }

    /// Lowercase name of the mode
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionMode::Buffered => "buffered",
            CompletionMode::Rendezvous => "rendezvous",
        }
    }
}

impl fmt::Display for CompletionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompletionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buffered" => Ok(CompletionMode::Buffered),
            "rendezvous" | "unbuffered" => Ok(CompletionMode::Rendezvous),
            other => Err(format!("unknown completion mode: {}", other)),
        }
    }
}

/// What happened to a reported value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The value reached the channel
    Delivered,

    /// Nobody could take the value; it was dropped
    Dropped,
}

/// One-shot reporting handle given to a task.
///
/// Dropping it without calling [`deliver`](Self::deliver) tells the caller
/// the task ended without a result.
pub struct Completion<R> {
    sender: Sender<R>,
    mode: CompletionMode,
    abandoned: Arc<AtomicU64>,
}

impl<R> Completion<R> {
    /// Hand `value` to the caller without blocking
    pub fn deliver(self, value: R) -> Delivery {
        match self.sender.try_send(value) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.abandoned.fetch_add(1, Ordering::Relaxed);
                trace!("No caller for {} completion, dropping result", self.mode);
                Delivery::Dropped
            }
        }
    }

    /// Mode of the underlying channel
    pub fn mode(&self) -> CompletionMode {
        self.mode
    }
}

impl<R> fmt::Debug for Completion<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("mode", &self.mode).finish()
    }
}

/// Marks the end of a task's first stage.
///
/// Handed to two-phase tasks. The caller's deadline only covers the time
/// until the checkpoint is reached.
#[derive(Debug)]
pub struct Checkpoint {
    completion: Completion<()>,
}

impl Checkpoint {
    /// Signal the caller that the first stage is done.
    ///
    /// Returns `false` if the caller is no longer waiting; the task may skip
    /// its remaining work since nobody will see the result.
    pub fn reach(self) -> bool {
        self.completion.deliver(()) == Delivery::Delivered
    }
}

/// Create a completion handle and the receiver the caller waits on
pub(crate) fn channel<R>(
    mode: CompletionMode,
    abandoned: &Arc<AtomicU64>,
) -> (Completion<R>, Receiver<R>) {
    let (sender, receiver) = bounded(mode.capacity());
    let completion = Completion {
        sender,
        mode,
        abandoned: Arc::clone(abandoned),
    };
    (completion, receiver)
}

/// Create a checkpoint and the receiver the caller waits on
pub(crate) fn checkpoint(
    mode: CompletionMode,
    abandoned: &Arc<AtomicU64>,
) -> (Checkpoint, Receiver<()>) {
    let (completion, receiver) = channel(mode, abandoned);
    (Checkpoint { completion }, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn counter() -> Arc<AtomicU64> {
        Arc::new(AtomicU64::new(0))
    }

    #[test]
    fn test_buffered_delivers_without_waiting_caller() {
        let abandoned = counter();
        let (completion, receiver) = channel(CompletionMode::Buffered, &abandoned);

        assert_eq!(completion.deliver(5), Delivery::Delivered);
        assert_eq!(receiver.recv().unwrap(), 5);
        assert_eq!(abandoned.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_buffered_drops_after_caller_left() {
        let abandoned = counter();
        let (completion, receiver) = channel(CompletionMode::Buffered, &abandoned);
        drop(receiver);

        assert_eq!(completion.deliver(5), Delivery::Dropped);
        assert_eq!(abandoned.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_rendezvous_drops_without_waiting_caller() {
        let abandoned = counter();
        let (completion, receiver) = channel(CompletionMode::Rendezvous, &abandoned);

        // Receiver exists but nobody is blocked on it
        assert_eq!(completion.deliver(5), Delivery::Dropped);
        assert!(receiver.try_recv().is_err());
        assert_eq!(abandoned.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_rendezvous_delivers_to_waiting_caller() {
        let abandoned = counter();
        let (completion, receiver) = channel(CompletionMode::Rendezvous, &abandoned);

        let waiter = thread::spawn(move || receiver.recv_timeout(Duration::from_secs(2)));

        // Keep offering until the waiter is parked on the channel
        let mut delivered = false;
        for _ in 0..200 {
            let attempt = Completion {
                sender: completion.sender.clone(),
                mode: completion.mode(),
                abandoned: Arc::clone(&abandoned),
            };
            if attempt.deliver(9) == Delivery::Delivered {
                delivered = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        assert!(delivered);
        assert_eq!(waiter.join().unwrap().unwrap(), 9);
    }

    #[test]
    fn test_dropped_completion_disconnects() {
        let abandoned = counter();
        let (completion, receiver) = channel::<u8>(CompletionMode::Buffered, &abandoned);
        drop(completion);
        assert!(receiver.recv().is_err());
    }

    #[test]
    fn test_checkpoint_reports_absent_caller() {
        let abandoned = counter();
        let (checkpoint, receiver) = checkpoint(CompletionMode::Buffered, &abandoned);
        drop(receiver);
        assert!(!checkpoint.reach());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(
            "Rendezvous".parse::<CompletionMode>().unwrap(),
            CompletionMode::Rendezvous
        );
        assert_eq!(
            "buffered".parse::<CompletionMode>().unwrap(),
            CompletionMode::Buffered
        );
        assert!("blocking".parse::<CompletionMode>().is_err());
    }
}
