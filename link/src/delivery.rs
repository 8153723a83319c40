//! Two-phase delivery of generated pairs to programs.

use crate::{BellState, Error, Qubit};
use futures::{
    channel::{mpsc, oneshot},
    Stream, StreamExt,
};
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::SystemTime,
};

/// Classical description of a generated pair, released at label-ready time.
///
/// Both endpoints of a pair receive identical deliveries.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    /// Sequence assigned by the link when the request was matched.
    pub sequence: u64,

    /// Index of the pair within its request (starting at 0).
    pub pair: u32,

    /// State announced for the pair.
    pub bell_state: BellState,

    /// Expected fidelity of the pair with [Delivery::bell_state].
    pub goodness: f64,

    /// Time at which the qubit became available in memory.
    pub state_ready: SystemTime,

    /// Time at which this delivery became available.
    pub label_ready: SystemTime,
}

/// One half of a generated pair, handed to a program at state-ready time.
///
/// The qubit can be used immediately. Anything depending on which pair this is (or which Bell
/// state it is in) must wait for [Keep::label].
pub struct Keep {
    qubit: Qubit,
    sequence: u64,
    state_ready: SystemTime,

    receiver: oneshot::Receiver<Result<Delivery, Error>>,
    delivery: Option<Delivery>,
}

impl Keep {
    pub(crate) fn new(
        qubit: Qubit,
        sequence: u64,
        state_ready: SystemTime,
        receiver: oneshot::Receiver<Result<Delivery, Error>>,
    ) -> Self {
        Self {
            qubit,
            sequence,
            state_ready,
            receiver,
            delivery: None,
        }
    }

    /// The local half of the pair.
    pub fn qubit(&self) -> &Qubit {
        &self.qubit
    }

    /// Take ownership of the local half of the pair.
    pub fn into_qubit(self) -> Qubit {
        self.qubit
    }

    /// Sequence of the request this pair answers.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time at which the qubit became available.
    pub fn state_ready(&self) -> SystemTime {
        self.state_ready
    }

    /// Wait for the classical description of the pair.
    ///
    /// Fails with the error of the request if it failed before the label was released.
    pub async fn label(&mut self) -> Result<Delivery, Error> {
        if let Some(delivery) = &self.delivery {
            return Ok(delivery.clone());
        }
        let delivery = (&mut self.receiver).await.map_err(|_| Error::Closed)??;
        self.delivery = Some(delivery.clone());
        Ok(delivery)
    }
}

/// Stream of the pairs generated for one request, in the order they were produced.
///
/// The stream ends once every requested pair has been delivered. A request-level failure is
/// yielded as the final item.
pub struct Pairs {
    id: u64,
    receiver: mpsc::UnboundedReceiver<Result<Keep, Error>>,
}

impl Pairs {
    pub(crate) fn new(id: u64, receiver: mpsc::UnboundedReceiver<Result<Keep, Error>>) -> Self {
        Self { id, receiver }
    }

    /// Identifier of the request (unique per endpoint and peer).
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Stream for Pairs {
    type Item = Result<Keep, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}
