use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::error::Error;

/// The three states every watcher in this crate moves through.
///
/// `Initializing` permits discovery but suppresses emission; `Alive` emits
/// normally; `Disposed` is terminal and makes every operation a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Initializing,
    Alive,
    Disposed,
}

/// Outcome of the initial scan, broadcast through the `ready` signal.
#[derive(Debug, Clone)]
pub enum ReadyState {
    Pending,
    Ok,
    Err(Arc<Error>),
}

/// Tracks the lifecycle state and the one-shot-but-multiply-observable
/// `ready` signal.
///
/// `ready` is a `tokio::sync::watch` channel rather than a `oneshot` because
/// both the original caller and a concurrent `close()` need to independently
/// observe whether initialization has settled; `watch::Receiver` supports a
/// synchronous `borrow()` and an async `changed().await`, covering both of
/// the access patterns the concurrency model requires.
pub struct Lifecycle {
    state: Mutex<WatchState>,
    ready_tx: watch::Sender<ReadyState>,
    ready_rx: watch::Receiver<ReadyState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Pending);
        Self {
            state: Mutex::new(WatchState::Initializing),
            ready_tx,
            ready_rx,
        }
    }

    pub fn state(&self) -> WatchState {
        *self.state.lock().unwrap()
    }

    pub fn is_alive(&self) -> bool {
        self.state() == WatchState::Alive
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == WatchState::Disposed
    }

    /// Transition `Initializing -> Alive` and resolve `ready` successfully.
    /// A no-op if already past `Initializing`.
    pub fn mark_alive(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == WatchState::Initializing {
            *state = WatchState::Alive;
            drop(state);
            log::debug!("watcher lifecycle: initializing -> alive");
            let _ = self.ready_tx.send(ReadyState::Ok);
        }
    }

    /// Transition to `Disposed` and reject `ready` with `err`.
    /// Used when the initial scan fails.
    pub fn fail_init(&self, err: Error) {
        log::warn!("watcher lifecycle: initial scan failed: {}", err);
        let mut state = self.state.lock().unwrap();
        *state = WatchState::Disposed;
        drop(state);
        let _ = self.ready_tx.send(ReadyState::Err(Arc::new(err)));
    }

    /// Transition to `Disposed` from any state. Idempotent.
    pub fn dispose(&self) {
        let mut state = self.state.lock().unwrap();
        let was_initializing = *state == WatchState::Initializing;
        *state = WatchState::Disposed;
        drop(state);
        log::debug!("watcher lifecycle: -> disposed");
        if was_initializing {
            // close() raced the initial scan: resolve ready with a benign
            // disposed-before-ready outcome so waiters don't hang.
            let _ = self.ready_tx.send(ReadyState::Err(Arc::new(Error::Io(
                std::io::Error::new(std::io::ErrorKind::Other, "closed before ready"),
            ))));
        }
    }

    pub fn ready_receiver(&self) -> watch::Receiver<ReadyState> {
        self.ready_rx.clone()
    }

    /// Wait for the watcher to settle into `Alive` or a failed `Disposed`.
    pub async fn wait_ready(&self) -> Result<(), Arc<Error>> {
        let mut rx = self.ready_rx.clone();
        loop {
            match &*rx.borrow() {
                ReadyState::Ok => return Ok(()),
                ReadyState::Err(e) => return Err(Arc::clone(e)),
                ReadyState::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(Arc::new(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "lifecycle dropped before ready",
                ))));
            }
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
