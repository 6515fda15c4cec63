use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use crate::classifier::Event;
use crate::error::{ClientError, ErrorCode};
use crate::metrics_consts::EVENTS_DISPATCHED;

/// How application-visible events leave the client, fixed at
/// construction. The two modes are mutually exclusive per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchMode {
    /// The caller drives the engine through `poll` and receives events
    /// as return values.
    Pull,
    /// A background loop drives the engine and feeds a bounded channel.
    Push,
}

/// Fan-out point between the poll path and the application. In pull mode
/// events resolved while some other wait was driving the engine (a
/// synchronous commit, a flush) are parked in the backlog and drained by
/// the next `poll`. In push mode they go straight to the channel.
pub(crate) struct EventFan {
    mode: DispatchMode,
    tx: Mutex<Option<mpsc::Sender<Event>>>,
    rx: Mutex<Option<mpsc::Receiver<Event>>>,
    backlog: Mutex<VecDeque<Event>>,
}

impl EventFan {
    pub(crate) fn new(mode: DispatchMode, capacity: usize) -> Self {
        let (tx, rx) = match mode {
            DispatchMode::Push => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (Some(tx), Some(rx))
            }
            DispatchMode::Pull => (None, None),
        };
        Self {
            mode,
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
            backlog: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// The push-mode channel. Take-once; a second take (or any take in
    /// pull mode) is a caller mixing modes.
    pub(crate) fn take_receiver(&self) -> Result<mpsc::Receiver<Event>, ClientError> {
        match self.mode {
            DispatchMode::Pull => Err(ClientError::new(
                ErrorCode::InvalidState,
                "events channel is not enabled for this client",
            )),
            DispatchMode::Push => self
                .rx
                .lock()
                .expect("event receiver lock")
                .take()
                .ok_or_else(|| {
                    ClientError::new(ErrorCode::InvalidState, "events channel already taken")
                }),
        }
    }

    /// Hand an event to the application side. Push mode applies channel
    /// backpressure to the poll loop; pull mode parks it for `poll`.
    pub(crate) async fn emit(&self, event: Event) {
        metrics::counter!(EVENTS_DISPATCHED).increment(1);
        match self.mode {
            DispatchMode::Push => {
                let tx = self.tx.lock().expect("event sender lock").clone();
                match tx {
                    Some(tx) => {
                        if tx.send(event).await.is_err() {
                            debug!("event channel receiver dropped; event discarded");
                        }
                    }
                    None => debug!("event channel closed; event discarded"),
                }
            }
            DispatchMode::Pull => {
                self.backlog.lock().expect("backlog lock").push_back(event);
            }
        }
    }

    pub(crate) fn pop_backlog(&self) -> Option<Event> {
        self.backlog.lock().expect("backlog lock").pop_front()
    }

    /// Drop the sender so the channel closes once buffered events drain.
    pub(crate) fn close(&self) {
        self.tx.lock().expect("event sender lock").take();
    }
}
