use super::{
    metrics,
    schedule::{align, disjoint, schema},
    Config, Load, Mailbox, Message, Policy, State,
};
use crate::resource;
use futures::{channel::mpsc, StreamExt};
use qnet_runtime::{Alarm, Clock, Handle, Metrics, Spawner};
use qnet_utils::{nanos, DurationExt, SystemTimeExt};
use std::{collections::VecDeque, time::SystemTime};
use tracing::{debug, trace, warn};

/// A link sharing the hub's hardware.
pub struct Spoke {
    /// First endpoint of the link.
    pub a: String,

    /// Second endpoint of the link.
    pub b: String,

    /// Mailbox of the link's [`resource::Actor`].
    pub resource: resource::Mailbox,
}

/// A window held by a spoke.
struct Window {
    id: u64,
    opened: SystemTime,

    /// Fires at the end of the window (unless the window is closed early).
    alarm: Option<Alarm>,
}

struct Entry {
    nodes: (String, String),
    resource: resource::Mailbox,
    load: Load,
    window: Option<Window>,

    /// Windows granted to other spokes while this one had queued requests.
    waited: u64,
    warned: bool,
}

/// Decides which spokes of a hub may attempt generation in each time window.
///
/// The scheduling state is owned by the actor and only changes when a window opens or closes.
pub struct Actor<E: Clock + Spawner + Metrics> {
    ////////////////////////////////////////
    // Interfaces
    ////////////////////////////////////////
    context: E,

    ////////////////////////////////////////
    // Configuration
    ////////////////////////////////////////
    policy: Policy,
    max_multiplexing: usize,
    starvation_threshold: u64,

    ////////////////////////////////////////
    // Messaging
    ////////////////////////////////////////
    mailbox: mpsc::UnboundedReceiver<Message>,
    sender: mpsc::UnboundedSender<Message>,

    ////////////////////////////////////////
    // State
    ////////////////////////////////////////
    state: State,
    spokes: Vec<Entry>,
    next_window: u64,

    /// Groups of spokes visited in turn by the static policy.
    schema: Vec<Vec<usize>>,

    /// Next group of the static schedule (if a cycle is running).
    next_slot: Option<usize>,

    /// Slots waiting for the switch time to elapse.
    switching: usize,

    /// Spokes in the order their requests were matched (FIFO policy).
    arrivals: VecDeque<usize>,

    ////////////////////////////////////////
    // Metrics
    ////////////////////////////////////////
    metrics: metrics::Metrics,
}

impl<E: Clock + Spawner + Metrics> Actor<E> {
    /// Create a new actor with the given context and configuration.
    /// Returns the actor and a mailbox for sending messages to it.
    pub fn new(context: E, cfg: Config) -> (Self, Mailbox) {
        let (sender, mailbox) = mpsc::unbounded();
        let metrics = metrics::Metrics::init(context.clone());
        (
            Self {
                context,
                policy: cfg.policy,
                max_multiplexing: cfg.max_multiplexing.max(1),
                starvation_threshold: cfg.starvation_threshold,
                mailbox,
                sender: sender.clone(),
                state: State::Idle,
                spokes: Vec::new(),
                next_window: 0,
                schema: Vec::new(),
                next_slot: None,
                switching: 0,
                arrivals: VecDeque::new(),
                metrics,
            },
            Mailbox::new(sender),
        )
    }

    /// Start the actor.
    ///
    /// The position of each spoke must match the index it was attached with.
    pub fn start(mut self, spokes: Vec<Spoke>) -> Handle<()> {
        self.context.spawn_ref()(self.run(spokes))
    }

    /// Inner run loop called by `start`.
    async fn run(mut self, spokes: Vec<Spoke>) {
        let nodes: Vec<_> = spokes.iter().map(|s| (s.a.clone(), s.b.clone())).collect();
        self.schema = schema(&nodes, self.max_multiplexing);
        self.spokes = spokes
            .into_iter()
            .map(|spoke| Entry {
                nodes: (spoke.a, spoke.b),
                resource: spoke.resource,
                load: Load::default(),
                window: None,
                waited: 0,
                warned: false,
            })
            .collect();
        debug!(spokes = self.spokes.len(), schema = ?self.schema, "hub started");

        while let Some(msg) = self.mailbox.next().await {
            match msg {
                Message::Load { spoke, load } => {
                    trace!("mailbox: load");
                    self.handle_load(spoke, load).await;
                }
                Message::Completed { spoke } => {
                    trace!("mailbox: completed");
                    self.handle_completed(spoke).await;
                }
                Message::WindowEnd { spoke, window } => {
                    trace!("mailbox: window end");
                    self.handle_window_end(spoke, window).await;
                }
                Message::Boundary => {
                    trace!("mailbox: boundary");
                    self.handle_boundary().await;
                }
                Message::SlotFree => {
                    trace!("mailbox: slot free");
                    self.switching = self.switching.saturating_sub(1);
                    self.fill().await;
                }
                Message::State { responder } => {
                    trace!("mailbox: state");
                    let _ = responder.send(self.state.clone());
                }
            }
        }
    }

    fn has_work(&self) -> bool {
        self.spokes.iter().any(|entry| entry.load.requests > 0)
    }

    async fn handle_load(&mut self, spoke: usize, load: Load) {
        let Some(entry) = self.spokes.get_mut(spoke) else {
            warn!(spoke, "load from unknown spoke");
            return;
        };
        let previous = entry.load.requests;
        entry.load = load;
        match self.policy {
            Policy::Static { .. } => {
                if self.next_slot.is_none() && self.has_work() {
                    self.start_cycle();
                }
            }
            Policy::Dynamic { .. } | Policy::Fifo { .. } => {
                if matches!(self.policy, Policy::Fifo { .. }) {
                    for _ in previous..load.requests {
                        self.arrivals.push_back(spoke);
                    }
                }

                // A spoke without queued requests has no use for its window
                if load.requests == 0 && self.close_window(spoke).await {
                    self.release_slot().await;
                }
                self.fill().await;
            }
        }
    }

    async fn handle_completed(&mut self, spoke: usize) {
        match self.policy {
            Policy::Static { .. } => {}
            Policy::Dynamic { .. } => {
                // A window granted at this instant belongs to the spoke's next request
                let now = self.context.current();
                let stale = self
                    .spokes
                    .get(spoke)
                    .and_then(|entry| entry.window.as_ref())
                    .is_some_and(|window| window.opened >= now);
                if stale {
                    return;
                }

                // Windows end independently: only this spoke's window is cut short
                if self.close_window(spoke).await {
                    self.release_slot().await;
                }
            }
            Policy::Fifo { .. } => {
                if let Some(index) = self.arrivals.iter().position(|s| *s == spoke) {
                    self.arrivals.remove(index);
                }
                if self.close_window(spoke).await {
                    self.release_slot().await;
                }
            }
        }
    }

    async fn handle_window_end(&mut self, spoke: usize, window: u64) {
        let current = self
            .spokes
            .get(spoke)
            .and_then(|entry| entry.window.as_ref())
            .map(|window| window.id);
        if current != Some(window) {
            trace!(spoke, window, "stale window end");
            return;
        }
        self.close_window(spoke).await;
        if !matches!(self.policy, Policy::Static { .. }) {
            self.release_slot().await;
        }
    }

    /// Begin a static cycle at the next multiple of the full cycle time.
    fn start_cycle(&mut self) {
        let Policy::Static {
            time_window,
            switch_time,
        } = self.policy
        else {
            return;
        };
        let cycle = (time_window + switch_time) * self.schema.len() as u32;
        let start = align(self.context.current(), cycle);
        debug!(start = start.epoch_nanos(), "starting cycle");
        self.next_slot = Some(0);
        self.schedule(start, Message::Boundary);
    }

    async fn handle_boundary(&mut self) {
        let Policy::Static {
            time_window,
            switch_time,
        } = self.policy
        else {
            return;
        };
        let Some(slot) = self.next_slot else {
            return;
        };

        // Only begin another cycle if there is something to do
        if slot == 0 && !self.has_work() {
            debug!("cycle ended without work");
            self.next_slot = None;
            return;
        }

        // Open a window for every spoke of the slot
        let now = self.context.current();
        let until = now + time_window;
        let spokes = self.schema.get(slot).cloned().unwrap_or_default();
        for spoke in spokes {
            self.open_window(spoke, Some(until)).await;
        }
        self.next_slot = Some((slot + 1) % self.schema.len().max(1));
        self.schedule(until + switch_time, Message::Boundary);
    }

    /// Hand free slots to waiting spokes (dynamic and FIFO policies).
    async fn fill(&mut self) {
        loop {
            let open: Vec<usize> = self.open();
            if open.len() + self.switching >= self.max_multiplexing {
                return;
            }
            let Some((spoke, until)) = self.select(&open) else {
                return;
            };
            self.open_window(spoke, until).await;
        }
    }

    /// Choose the next spoke to receive a window (and when its window ends).
    fn select(&self, open: &[usize]) -> Option<(usize, Option<SystemTime>)> {
        let eligible = |spoke: usize| {
            let entry = &self.spokes[spoke];
            entry.window.is_none()
                && entry.load.requests > 0
                && open
                    .iter()
                    .all(|other| disjoint(&self.spokes[*other].nodes, &entry.nodes))
        };
        match &self.policy {
            Policy::Static { .. } => None,
            Policy::Dynamic {
                time_window_prefix,
                static_delay,
                default_window,
                ..
            } => {
                // Longest queue wins (ties go to the lowest index)
                let mut best: Option<usize> = None;
                for spoke in (0..self.spokes.len()).filter(|s| eligible(*s)) {
                    let requests = self.spokes[spoke].load.requests;
                    if best.map_or(true, |b| requests > self.spokes[b].load.requests) {
                        best = Some(spoke);
                    }
                }
                let spoke = best?;

                // A window too long to represent stays open until the request is done
                let length = match self.spokes[spoke].load.expected {
                    Some(expected) => nanos(expected.as_nanos_f64() * *time_window_prefix)
                        .checked_add(*static_delay),
                    None => Some(*default_window),
                };
                let until = length.and_then(|length| self.context.current().checked_add(length));
                Some((spoke, until))
            }
            Policy::Fifo { .. } => {
                let spoke = self.arrivals.iter().copied().find(|s| eligible(*s))?;
                Some((spoke, None))
            }
        }
    }

    /// A slot was freed: it can be reassigned once the switch time has elapsed.
    async fn release_slot(&mut self) {
        let switch_time = match self.policy {
            Policy::Static { .. } => return,
            Policy::Dynamic { switch_time, .. } | Policy::Fifo { switch_time } => switch_time,
        };
        if switch_time.is_zero() {
            self.fill().await;
            return;
        }
        self.switching += 1;
        let at = self.context.current() + switch_time;
        self.schedule(at, Message::SlotFree);
    }

    fn schedule(&self, at: SystemTime, message: Message) -> Alarm {
        let sender = self.sender.clone();
        self.context.call_at(at, move || {
            let _ = sender.unbounded_send(message);
        })
    }

    fn open(&self) -> Vec<usize> {
        self.spokes
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.window.is_some())
            .map(|(spoke, _)| spoke)
            .collect()
    }

    async fn open_window(&mut self, spoke: usize, until: Option<SystemTime>) {
        let id = self.next_window;
        self.next_window += 1;
        let alarm = until.map(|until| self.schedule(until, Message::WindowEnd { spoke, window: id }));
        let Some(entry) = self.spokes.get_mut(spoke) else {
            return;
        };
        entry.window = Some(Window {
            id,
            opened: self.context.current(),
            alarm,
        });
        entry.waited = 0;
        entry.warned = false;
        entry.resource.open(until).await;
        self.metrics.windows.inc();
        debug!(
            spoke,
            window = id,
            until = until.map(|until| until.epoch_nanos()),
            "opened window"
        );
        self.transition();
    }

    /// Close the window of `spoke` (if it holds one).
    async fn close_window(&mut self, spoke: usize) -> bool {
        let Some(entry) = self.spokes.get_mut(spoke) else {
            return false;
        };
        let Some(window) = entry.window.take() else {
            return false;
        };
        if let Some(alarm) = window.alarm {
            alarm.cancel();
        }
        entry.resource.close().await;
        debug!(spoke, window = window.id, "closed window");

        // Everyone else with queued requests waited one more window
        for (other, entry) in self.spokes.iter_mut().enumerate() {
            if other == spoke || entry.window.is_some() || entry.load.requests == 0 {
                continue;
            }
            entry.waited += 1;
            if entry.waited > self.starvation_threshold && !entry.warned {
                entry.warned = true;
                self.metrics.starvation.inc();
                warn!(
                    spoke = other,
                    waited = entry.waited,
                    requests = entry.load.requests,
                    "scheduling starvation"
                );
            }
        }
        self.transition();
        true
    }

    /// Recompute the scheduling state from the open windows.
    fn transition(&mut self) {
        let state = State::from_open(self.open());
        if state != self.state {
            debug!(from = ?self.state, to = ?state, "transition");
            self.state = state;
        }
    }
}
