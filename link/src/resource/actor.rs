use super::{metrics, Config, Mailbox, Message};
use crate::{
    hub::{Attachment, Load},
    model::{Attempt, Model},
    Delivery, Distributor, Error, Herald, Keep, Request,
};
use futures::{
    channel::{mpsc, oneshot},
    future::{self, Either},
    StreamExt,
};
use qnet_runtime::{select, Clock, Handle, Metrics, Spawner};
use qnet_utils::SystemTimeExt;
use rand::RngCore;
use std::{
    collections::VecDeque,
    time::{Duration, SystemTime},
};
use tracing::{debug, trace, warn};

/// Whether new attempts may start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Gate {
    /// The link is not shared.
    Always,
    Closed,
    Open { until: Option<SystemTime> },
}

impl Gate {
    fn is_open(&self, now: SystemTime) -> bool {
        match self {
            Gate::Always => true,
            Gate::Closed => false,
            Gate::Open { until } => until.map_or(true, |until| now < until),
        }
    }
}

/// A request waiting for its peer.
struct Pending {
    request: Request,
    events: mpsc::UnboundedSender<Result<Keep, Error>>,
}

/// One endpoint of a matched request.
struct End {
    id: u64,
    events: mpsc::UnboundedSender<Result<Keep, Error>>,
}

/// A request both endpoints agreed on.
///
/// The actor is the only one to mutate it and the two endpoints only observe it through the
/// events sent to them, so both always see the same outcomes at the same times.
struct Rendezvous {
    sequence: u64,
    purpose: u32,
    number: u32,
    ends: [End; 2],
}

impl Rendezvous {
    /// Send the same event to both endpoints.
    fn notify(&self, event: impl Fn() -> Result<Keep, Error>) {
        for end in &self.ends {
            let _ = end.events.unbounded_send(event());
        }
    }
}

/// Progress of a successful attempt.
enum Phase {
    /// Waiting to bind the pair into memory.
    State { at: SystemTime, label: SystemTime, herald: Herald },

    /// Waiting to release the label to both endpoints.
    Label {
        at: SystemTime,
        state: SystemTime,
        herald: Herald,
        responders: [oneshot::Sender<Result<Delivery, Error>>; 2],
    },
}

/// An attempt in progress.
struct InFlight {
    end: SystemTime,
    succeeded: bool,
    phase: Option<Phase>,
}

impl InFlight {
    fn new(start: SystemTime, attempt: Attempt) -> Self {
        let phase = attempt.success.map(|success| Phase::State {
            at: start + success.state,
            label: start + success.label,
            herald: success.herald,
        });
        Self {
            end: start + attempt.duration,
            succeeded: phase.is_some(),
            phase,
        }
    }

    /// Time of the next step of the attempt.
    fn due(&self) -> SystemTime {
        match &self.phase {
            Some(Phase::State { at, .. }) | Some(Phase::Label { at, .. }) => *at,
            None => self.end,
        }
    }
}

/// The request currently being served.
struct Serving {
    rendezvous: Rendezvous,
    expires: Option<SystemTime>,
    delivered: u32,
    attempts: u64,
    attempt: Option<InFlight>,
}

impl Serving {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires.is_some_and(|expires| now >= expires)
    }
}

/// Owns the attempt model of one physical link and serves the requests of its two endpoints.
pub struct Actor<E: Clock + Spawner + Metrics + RngCore> {
    ////////////////////////////////////////
    // Interfaces
    ////////////////////////////////////////
    context: E,
    model: Box<dyn Model>,
    distributor: Distributor,

    ////////////////////////////////////////
    // Configuration
    ////////////////////////////////////////
    nodes: [String; 2],
    max_attempts: Option<u64>,
    deadline: Option<Duration>,

    ////////////////////////////////////////
    // Messaging
    ////////////////////////////////////////
    mailbox: mpsc::Receiver<Message>,
    hub: Option<Attachment>,

    ////////////////////////////////////////
    // State
    ////////////////////////////////////////
    gate: Gate,
    pending: [VecDeque<Pending>; 2],
    matched: VecDeque<Rendezvous>,
    serving: Option<Serving>,
    next_sequence: u64,

    ////////////////////////////////////////
    // Metrics
    ////////////////////////////////////////
    metrics: metrics::Metrics,
}

impl<E: Clock + Spawner + Metrics + RngCore> Actor<E> {
    /// Create a new actor with the given context and configuration.
    /// Returns the actor and a mailbox for sending messages to it.
    pub fn new(context: E, cfg: Config) -> (Self, Mailbox) {
        let (sender, mailbox) = mpsc::channel(cfg.mailbox_size);
        let metrics = metrics::Metrics::init(context.clone());
        let gate = if cfg.hub.is_some() {
            Gate::Closed
        } else {
            Gate::Always
        };
        (
            Self {
                context,
                model: cfg.model,
                distributor: cfg.distributor,
                nodes: [cfg.a, cfg.b],
                max_attempts: cfg.max_attempts,
                deadline: cfg.deadline,
                mailbox,
                hub: cfg.hub,
                gate,
                pending: [VecDeque::new(), VecDeque::new()],
                matched: VecDeque::new(),
                serving: None,
                next_sequence: 0,
                metrics,
            },
            Mailbox::new(sender),
        )
    }

    /// Start the actor.
    pub fn start(mut self) -> Handle<()> {
        self.context.spawn_ref()(self.run())
    }

    /// Inner run loop called by `start`.
    async fn run(mut self) {
        loop {
            // Make all progress possible at the current time
            self.advance();

            // Wait for the next step of the current attempt (or a message)
            let wake = match self.wake() {
                Some(at) => Either::Left(self.context.sleep_until(at)),
                None => Either::Right(future::pending()),
            };
            select! {
                mail = self.mailbox.next() => {
                    let Some(msg) = mail else {
                        debug!("mailbox closed");
                        break;
                    };
                    match msg {
                        Message::Submit { node, request, events, responder } => {
                            trace!("mailbox: submit");
                            let result = self.handle_submit(&node, request, events);
                            let _ = responder.send(result);
                        }
                        Message::Withdraw { node, id, responder } => {
                            trace!("mailbox: withdraw");
                            let result = self.handle_withdraw(&node, id);
                            let _ = responder.send(result);
                        }
                        Message::Open { until } => {
                            trace!("mailbox: open");
                            self.gate = Gate::Open { until };
                        }
                        Message::Close => {
                            trace!("mailbox: close");
                            self.gate = Gate::Closed;
                        }
                    }
                },
                _ = wake => {},
            }
        }
    }

    fn side(&self, node: &str) -> Result<usize, Error> {
        self.nodes
            .iter()
            .position(|n| n == node)
            .ok_or_else(|| Error::UnknownNode(node.to_string()))
    }

    /// Returns true if `id` is a live request of the endpoint at `side`.
    fn is_live(&self, side: usize, id: u64) -> bool {
        self.pending[side].iter().any(|p| p.request.id == id)
            || self.matched.iter().any(|r| r.ends[side].id == id)
            || self
                .serving
                .as_ref()
                .is_some_and(|s| s.rendezvous.ends[side].id == id)
    }

    fn handle_submit(
        &mut self,
        node: &str,
        request: Request,
        events: mpsc::UnboundedSender<Result<Keep, Error>>,
    ) -> Result<(), Error> {
        let side = self.side(node)?;
        if request.number == 0 {
            return Err(Error::EmptyRequest);
        }
        if self.is_live(side, request.id) {
            debug!(node, id = request.id, "duplicate request");
            return Err(Error::DuplicateRequest(request.id));
        }
        debug!(
            node,
            id = request.id,
            purpose = request.purpose,
            number = request.number,
            role = ?request.role,
            "submitted request"
        );
        self.pending[side].push_back(Pending { request, events });
        self.match_pending();
        Ok(())
    }

    fn handle_withdraw(&mut self, node: &str, id: u64) -> Result<(), Error> {
        let side = self.side(node)?;
        if let Some(index) = self.pending[side].iter().position(|p| p.request.id == id) {
            self.pending[side].remove(index);
            self.metrics.pending.dec();
            debug!(node, id, "withdrew request");
            return Ok(());
        }
        if self.is_live(side, id) {
            return Err(Error::InService(id));
        }
        Err(Error::UnknownRequest(id))
    }

    /// Pair the oldest pending request of each endpoint (for as long as both have one).
    fn match_pending(&mut self) {
        self.metrics
            .pending
            .set((self.pending[0].len() + self.pending[1].len()) as i64);
        let mut matched = false;
        while !self.pending[0].is_empty() && !self.pending[1].is_empty() {
            let (Some(a), Some(b)) = (self.pending[0].pop_front(), self.pending[1].pop_front())
            else {
                break;
            };
            self.metrics.pending.dec();
            self.metrics.pending.dec();

            // Both endpoints must describe the same generation
            if !a.request.matches(&b.request) {
                warn!(
                    a = a.request.id,
                    b = b.request.id,
                    "specification mismatch"
                );
                self.metrics.requests_failed.inc();
                let _ = a.events.unbounded_send(Err(Error::SpecificationMismatch));
                let _ = b.events.unbounded_send(Err(Error::SpecificationMismatch));
                continue;
            }

            // Assign the shared sequence
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            debug!(
                sequence,
                a = a.request.id,
                b = b.request.id,
                number = a.request.number,
                "matched request"
            );
            self.metrics.requests_matched.inc();
            self.matched.push_back(Rendezvous {
                sequence,
                purpose: a.request.purpose,
                number: a.request.number,
                ends: [
                    End {
                        id: a.request.id,
                        events: a.events,
                    },
                    End {
                        id: b.request.id,
                        events: b.events,
                    },
                ],
            });
            matched = true;
        }
        if matched {
            self.report(false);
        }
    }

    /// Time at which the request in service needs attention (if any).
    ///
    /// This is the next step of the current attempt or the deadline of the request, whichever
    /// comes first. The deadline is watched even while no attempt is running (when waiting for a
    /// window of the hub).
    fn wake(&self) -> Option<SystemTime> {
        let serving = self.serving.as_ref()?;
        let due = serving.attempt.as_ref().map(InFlight::due);
        match (due, serving.expires) {
            (Some(due), Some(expires)) => Some(due.min(expires)),
            (due, expires) => due.or(expires),
        }
    }

    /// Perform every step that is due at the current time.
    fn advance(&mut self) {
        loop {
            let now = self.context.current();

            // Admit the oldest matched request
            let mut serving = match self.serving.take() {
                Some(serving) => serving,
                None => {
                    let Some(rendezvous) = self.matched.pop_front() else {
                        return;
                    };
                    debug!(
                        sequence = rendezvous.sequence,
                        purpose = rendezvous.purpose,
                        "admitted request"
                    );
                    Serving {
                        rendezvous,
                        expires: self.deadline.and_then(|deadline| now.checked_add(deadline)),
                        delivered: 0,
                        attempts: 0,
                        attempt: None,
                    }
                }
            };

            // Abandon the request once its deadline passes (steps due at the deadline still run)
            let idle = serving.attempt.as_ref().map_or(true, |attempt| attempt.due() > now);
            let unfinished = serving.delivered < serving.rendezvous.number;
            if idle && unfinished && serving.is_expired(now) {
                self.fail(serving, Error::GenerationTimeout);
                continue;
            }

            // Start the next attempt (if permitted)
            let Some(mut attempt) = serving.attempt.take() else {
                if !self.gate.is_open(now) {
                    self.serving = Some(serving);
                    return;
                }
                let outcome = self.model.attempt(&mut self.context, serving.attempts);
                trace!(
                    sequence = serving.rendezvous.sequence,
                    cycle = serving.attempts,
                    success = outcome.success.is_some(),
                    "started attempt"
                );
                serving.attempts += 1;
                self.metrics.attempts.inc();
                serving.attempt = Some(InFlight::new(now, outcome));
                self.serving = Some(serving);
                continue;
            };
            if attempt.due() > now {
                serving.attempt = Some(attempt);
                self.serving = Some(serving);
                return;
            }

            let mut labeled = false;
            match attempt.phase.take() {
                Some(Phase::State { label, herald, .. }) => {
                    // Bind both halves into memory
                    let [a, b] = match self.distributor.distribute(&mut self.context, herald) {
                        Ok(qubits) => qubits,
                        Err(err) => {
                            self.fail(serving, err);
                            continue;
                        }
                    };
                    let sequence = serving.rendezvous.sequence;
                    let (first, first_receiver) = oneshot::channel();
                    let (second, second_receiver) = oneshot::channel();
                    let halves = [(a, first_receiver), (b, second_receiver)];
                    for (end, (qubit, receiver)) in serving.rendezvous.ends.iter().zip(halves) {
                        let keep = Keep::new(qubit, sequence, now, receiver);
                        let _ = end.events.unbounded_send(Ok(keep));
                    }
                    debug!(
                        sequence,
                        pair = serving.delivered,
                        state_ready = now.epoch_nanos(),
                        "delivered state"
                    );
                    attempt.phase = Some(Phase::Label {
                        at: label,
                        state: now,
                        herald,
                        responders: [first, second],
                    });
                }
                Some(Phase::Label {
                    state,
                    herald,
                    responders,
                    ..
                }) => {
                    // Release the label to both endpoints
                    let delivery = Delivery {
                        sequence: serving.rendezvous.sequence,
                        pair: serving.delivered,
                        bell_state: herald.bell_state,
                        goodness: herald.fidelity,
                        state_ready: state,
                        label_ready: now,
                    };
                    debug!(
                        sequence = delivery.sequence,
                        pair = delivery.pair,
                        bell_state = %delivery.bell_state,
                        goodness = delivery.goodness,
                        label_ready = now.epoch_nanos(),
                        "delivered label"
                    );
                    for responder in responders {
                        let _ = responder.send(Ok(delivery.clone()));
                    }
                    serving.delivered += 1;
                    self.metrics.pairs.inc();
                    labeled = serving.delivered < serving.rendezvous.number;
                }
                None => {
                    // The attempt is over
                    if !attempt.succeeded {
                        self.metrics.failures.inc();
                    }
                    if serving.delivered >= serving.rendezvous.number {
                        self.complete(serving);
                        continue;
                    }
                    let exhausted = self
                        .max_attempts
                        .is_some_and(|max| serving.attempts >= max);
                    if exhausted || serving.is_expired(now) {
                        self.fail(serving, Error::GenerationTimeout);
                        continue;
                    }
                    self.serving = Some(serving);
                    continue;
                }
            }
            serving.attempt = Some(attempt);
            self.serving = Some(serving);

            // Keep the hub's estimate of the remaining work current
            if labeled {
                self.report(false);
            }
        }
    }

    fn complete(&mut self, serving: Serving) {
        debug!(
            sequence = serving.rendezvous.sequence,
            attempts = serving.attempts,
            "completed request"
        );
        drop(serving);
        self.report(true);
    }

    fn fail(&mut self, mut serving: Serving, err: Error) {
        // A pair whose label was not yet released never completes
        if let Some(Phase::Label { responders, .. }) =
            serving.attempt.take().and_then(|attempt| attempt.phase)
        {
            for responder in responders {
                let _ = responder.send(Err(err.clone()));
            }
        }
        warn!(
            sequence = serving.rendezvous.sequence,
            delivered = serving.delivered,
            attempts = serving.attempts,
            ?err,
            "request failed"
        );
        self.metrics.requests_failed.inc();
        serving.rendezvous.notify(|| Err(err.clone()));
        self.report(true);
    }

    /// Tell the hub (if any) about the remaining load.
    fn report(&self, completed: bool) {
        let Some(hub) = &self.hub else {
            return;
        };
        let pairs = match &self.serving {
            Some(serving) => serving.rendezvous.number - serving.delivered,
            None => self.matched.front().map_or(0, |r| r.number),
        };
        let expected = self
            .model
            .expected()
            .and_then(|expected| expected.checked_mul(pairs));
        hub.load(Load {
            requests: self.matched.len() + usize::from(self.serving.is_some()),
            pairs,
            expected,
        });
        if completed {
            hub.completed();
        }
    }
}
