use super::State;
use crate::Error;
use futures::channel::{mpsc, oneshot};
use std::time::Duration;

/// Work queued at one spoke, as reported by its link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Load {
    /// Number of matched requests (including the one in service).
    pub requests: usize,

    /// Pairs still to be produced for the oldest request.
    pub pairs: u32,

    /// Expected time to produce `pairs` (if known).
    pub expected: Option<Duration>,
}

/// Message types that can be sent to the [`Actor`](super::Actor).
pub enum Message {
    /// A spoke's queue changed.
    Load { spoke: usize, load: Load },

    /// A request left service at a spoke (completed or failed).
    Completed { spoke: usize },

    /// The window with the given id reached its end.
    WindowEnd { spoke: usize, window: u64 },

    /// The next slot of the static schedule begins.
    Boundary,

    /// A slot finished switching and may be reassigned.
    SlotFree,

    /// Query the current scheduling state.
    State { responder: oneshot::Sender<State> },
}

/// Ingress mailbox for [`Actor`](super::Actor).
///
/// Messages are never dropped and sending never waits (so alarm callbacks can use it).
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::UnboundedSender<Message>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        Self { sender }
    }

    /// Create the handle the link serving `spoke` uses to report to the hub.
    pub fn attach(&self, spoke: usize) -> Attachment {
        Attachment {
            mailbox: self.clone(),
            spoke,
        }
    }

    /// Get the current scheduling state.
    pub async fn state(&mut self) -> Result<State, Error> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .unbounded_send(Message::State { responder })
            .map_err(|_| Error::Closed)?;
        receiver.await.map_err(|_| Error::Closed)
    }

    fn send(&self, message: Message) {
        let _ = self.sender.unbounded_send(message);
    }
}

/// Connection from the link serving one spoke to its hub.
#[derive(Clone)]
pub struct Attachment {
    mailbox: Mailbox,
    spoke: usize,
}

impl Attachment {
    /// Index of the spoke.
    pub fn spoke(&self) -> usize {
        self.spoke
    }

    pub(crate) fn load(&self, load: Load) {
        self.mailbox.send(Message::Load {
            spoke: self.spoke,
            load,
        });
    }

    pub(crate) fn completed(&self) {
        self.mailbox.send(Message::Completed { spoke: self.spoke });
    }
}
