use crate::{Error, Keep, Pairs, Request};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};
use std::time::SystemTime;

/// Message types that can be sent to the [`Actor`](super::Actor).
pub enum Message {
    /// Register a request from one of the link's endpoints.
    ///
    /// The responder is notified once the request has been accepted (or rejected). Generated
    /// pairs (or a request-level failure) are sent over `events`.
    Submit {
        node: String,
        request: Request,
        events: mpsc::UnboundedSender<Result<Keep, Error>>,
        responder: oneshot::Sender<Result<(), Error>>,
    },

    /// Withdraw a request that has not yet been matched.
    Withdraw {
        node: String,
        id: u64,
        responder: oneshot::Sender<Result<(), Error>>,
    },

    /// Allow attempts to start (until the given time, if any).
    Open { until: Option<SystemTime> },

    /// Stop starting new attempts.
    Close,
}

/// Ingress mailbox for [`Actor`](super::Actor).
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    /// Submit `request` on behalf of `node`.
    ///
    /// Returns as soon as the link has accepted the request. Pairs are delivered over the
    /// returned stream once the peer has submitted a matching request.
    pub async fn submit(&mut self, node: &str, request: Request) -> Result<Pairs, Error> {
        let id = request.id;
        let (events, receiver) = mpsc::unbounded();
        let (responder, response) = oneshot::channel();
        self.sender
            .send(Message::Submit {
                node: node.to_string(),
                request,
                events,
                responder,
            })
            .await
            .map_err(|_| Error::Closed)?;
        response.await.map_err(|_| Error::Closed)??;
        Ok(Pairs::new(id, receiver))
    }

    /// Withdraw the request `id` previously submitted by `node`.
    pub async fn withdraw(&mut self, node: &str, id: u64) -> Result<(), Error> {
        let (responder, response) = oneshot::channel();
        self.sender
            .send(Message::Withdraw {
                node: node.to_string(),
                id,
                responder,
            })
            .await
            .map_err(|_| Error::Closed)?;
        response.await.map_err(|_| Error::Closed)?
    }

    /// Allow attempts until `until` (or indefinitely).
    pub(crate) async fn open(&mut self, until: Option<SystemTime>) {
        let _ = self.sender.send(Message::Open { until }).await;
    }

    /// Stop starting new attempts.
    pub(crate) async fn close(&mut self) {
        let _ = self.sender.send(Message::Close).await;
    }
}
