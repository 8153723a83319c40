//! Serve the requests of the two endpoints of one physical link.
//!
//! # Design
//!
//! Every physical link is owned by a single [Actor]. Each endpoint submits its requests through
//! a [Mailbox]; requests queue per endpoint and the oldest request of one endpoint is paired with
//! the oldest request of the other. Two paired requests must ask for the same `purpose` and
//! `number` (with complementary roles), otherwise both are failed with
//! [`Error::SpecificationMismatch`](crate::Error::SpecificationMismatch).
//!
//! A successful pairing is assigned the next per-link `sequence` and waits to be served. Requests
//! are served one at a time, in the order they were paired. Serving a request runs the link's
//! [`Model`](crate::model::Model) one attempt after another (attempts never overlap) until the
//! requested number of pairs has been produced, the attempt budget is exhausted or the deadline
//! passes. Pairs labeled before a timeout are kept by the endpoints. The deadline is enforced at
//! the instant it passes, even while the link waits for a hub window: an attempt still running
//! then is abandoned.
//!
//! When the link is part of a [hub](crate::hub), attempts only start while the hub has granted
//! the link a window. An attempt in progress when the window ends runs to completion.

mod actor;
pub use actor::Actor;
mod config;
pub use config::Config;
mod ingress;
pub use ingress::{Mailbox, Message};
mod metrics;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{Attempt, Depolarise, Model, Perfect, Success},
        BellState, Delivery, Distributor, Error, Herald, Keep, Memory, Pairs, Request, Role,
    };
    use futures::StreamExt;
    use qnet_macros::test_traced;
    use qnet_runtime::{deterministic, Clock, Metrics, Runner, Spawner};
    use rand::RngCore;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn at(nanos: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(nanos)
    }

    /// Succeeds (with a perfect pair) only on the listed cycles of each request.
    struct Scripted {
        cycle: Duration,
        successes: Vec<u64>,
    }

    impl Model for Scripted {
        fn attempt(&self, _: &mut dyn RngCore, cycle: u64) -> Attempt {
            if !self.successes.contains(&cycle) {
                return Attempt::failure(self.cycle);
            }
            Attempt {
                duration: self.cycle,
                success: Some(Success {
                    state: self.cycle,
                    label: self.cycle,
                    herald: Herald::perfect(),
                }),
            }
        }

        fn success_probability(&self) -> f64 {
            0.0
        }

        fn cycle_time(&self) -> Duration {
            self.cycle
        }
    }

    struct Link {
        model: Box<dyn Model>,
        capacity: usize,
        max_attempts: Option<u64>,
        deadline: Option<Duration>,
    }

    impl Link {
        fn new(model: impl Model) -> Self {
            Self {
                model: Box::new(model),
                capacity: 64,
                max_attempts: None,
                deadline: None,
            }
        }

        fn start(self, context: &deterministic::Context) -> (Mailbox, Distributor) {
            let distributor = Distributor::new(
                Memory::new("alice", self.capacity),
                Memory::new("bob", self.capacity),
            );
            let (actor, mailbox) = Actor::new(
                context.with_label("link"),
                Config {
                    a: "alice".to_string(),
                    b: "bob".to_string(),
                    model: self.model,
                    distributor: distributor.clone(),
                    max_attempts: self.max_attempts,
                    deadline: self.deadline,
                    hub: None,
                    mailbox_size: 1024,
                },
            );
            actor.start();
            (mailbox, distributor)
        }
    }

    fn perfect(nanos: u64) -> Perfect {
        Perfect::new(Duration::from_nanos(nanos)).unwrap()
    }

    fn request(id: u64, number: u32, role: Role) -> Request {
        Request {
            id,
            purpose: 0,
            number,
            role,
        }
    }

    async fn submit_both(mailbox: &mut Mailbox, id: u64, number: u32) -> (Pairs, Pairs) {
        let first = mailbox
            .submit("alice", request(id, number, Role::Create))
            .await
            .unwrap();
        let second = mailbox
            .submit("bob", request(id, number, Role::Receive))
            .await
            .unwrap();
        (first, second)
    }

    /// Drain both streams, checking that every pair is seen identically at both ends.
    async fn collect(first: &mut Pairs, second: &mut Pairs) -> (Vec<Keep>, Option<Error>) {
        let mut keeps = Vec::new();
        loop {
            let (a, b) = (first.next().await, second.next().await);
            match (a, b) {
                (None, None) => return (keeps, None),
                (Some(Ok(mut a)), Some(Ok(mut b))) => {
                    assert_eq!(a.state_ready(), b.state_ready());
                    assert!(a.qubit().entangled_with(b.qubit()));
                    assert_eq!(a.label().await.unwrap(), b.label().await.unwrap());
                    keeps.push(a);
                }
                (Some(Err(a)), Some(Err(b))) => {
                    assert_eq!(a, b);
                    return (keeps, Some(a));
                }
                _ => panic!("endpoints observed different outcomes"),
            }
        }
    }

    async fn deliveries(keeps: &mut [Keep]) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for keep in keeps {
            deliveries.push(keep.label().await.unwrap());
        }
        deliveries
    }

    #[test_traced]
    fn test_sequences_follow_matching_order() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (mut mailbox, _) = Link::new(perfect(100)).start(&context);
            let (mut a0, mut b0) = submit_both(&mut mailbox, 0, 2).await;
            let (mut a1, mut b1) = submit_both(&mut mailbox, 1, 1).await;

            let (mut keeps, err) = collect(&mut a0, &mut b0).await;
            assert!(err.is_none());
            let first = deliveries(&mut keeps).await;
            let (mut keeps, err) = collect(&mut a1, &mut b1).await;
            assert!(err.is_none());
            let second = deliveries(&mut keeps).await;

            // Pairs of the first request come first, then the second request is served
            assert_eq!(first.len(), 2);
            assert!(first.iter().all(|d| d.sequence == 0));
            assert_eq!(first[0].pair, 0);
            assert_eq!(first[1].pair, 1);
            assert_eq!(first[0].label_ready, at(100));
            assert_eq!(first[1].label_ready, at(200));
            assert_eq!(second.len(), 1);
            assert_eq!(second[0].sequence, 1);
            assert_eq!(second[0].label_ready, at(300));

            let metrics = context.encode();
            assert!(metrics.contains("link_attempts_total 3"));
            assert!(metrics.contains("link_pairs_total 3"));
            assert!(metrics.contains("link_requests_matched_total 2"));
        });
    }

    #[test_traced]
    fn test_matching_waits_for_peer() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (mut mailbox, _) = Link::new(perfect(100)).start(&context);
            let mut first = mailbox
                .submit("alice", request(0, 1, Role::Create))
                .await
                .unwrap();

            // Nothing is generated while the peer has not asked
            context.sleep(Duration::from_nanos(1_000)).await;
            let mut second = mailbox
                .submit("bob", request(7, 1, Role::Receive))
                .await
                .unwrap();
            assert_eq!(second.id(), 7);
            let (mut keeps, err) = collect(&mut first, &mut second).await;
            assert!(err.is_none());
            let delivery = keeps[0].label().await.unwrap();
            assert_eq!(delivery.state_ready, at(1_100));
            assert_eq!(delivery.label_ready, at(1_100));
        });
    }

    #[test_traced]
    fn test_duplicate_request() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (mut mailbox, _) = Link::new(perfect(100)).start(&context);
            let _pairs = mailbox
                .submit("alice", request(0, 1, Role::Create))
                .await
                .unwrap();
            let result = mailbox.submit("alice", request(0, 2, Role::Create)).await;
            assert!(matches!(result, Err(Error::DuplicateRequest(0))));

            // The same identifier is fine for the other endpoint
            let result = mailbox.submit("bob", request(0, 1, Role::Receive)).await;
            assert!(result.is_ok());
        });
    }

    #[test_traced]
    fn test_invalid_requests() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (mut mailbox, _) = Link::new(perfect(100)).start(&context);
            let result = mailbox.submit("alice", request(0, 0, Role::Create)).await;
            assert!(matches!(result, Err(Error::EmptyRequest)));
            let result = mailbox.submit("eve", request(0, 1, Role::Create)).await;
            assert!(matches!(result, Err(Error::UnknownNode(node)) if node == "eve"));
        });
    }

    #[test_traced]
    fn test_specification_mismatch() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (mut mailbox, _) = Link::new(perfect(100)).start(&context);
            let mut first = mailbox
                .submit("alice", request(0, 3, Role::Create))
                .await
                .unwrap();
            let mut second = mailbox
                .submit("bob", request(0, 2, Role::Receive))
                .await
                .unwrap();

            // Both endpoints fail at the same time without any attempt
            let (keeps, err) = collect(&mut first, &mut second).await;
            assert!(keeps.is_empty());
            assert_eq!(err, Some(Error::SpecificationMismatch));
            assert_eq!(context.current(), UNIX_EPOCH);

            // A failed match does not consume a sequence
            let (mut first, mut second) = submit_both(&mut mailbox, 1, 1).await;
            let (mut keeps, err) = collect(&mut first, &mut second).await;
            assert!(err.is_none());
            assert_eq!(keeps[0].label().await.unwrap().sequence, 0);

            let metrics = context.encode();
            assert!(metrics.contains("link_requests_failed_total 1"));
        });
    }

    #[test_traced]
    fn test_withdraw() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (mut mailbox, _) = Link::new(perfect(100)).start(&context);

            // Unmatched requests can be withdrawn (once)
            let _pairs = mailbox
                .submit("alice", request(0, 1, Role::Create))
                .await
                .unwrap();
            assert_eq!(mailbox.withdraw("alice", 0).await, Ok(()));
            assert_eq!(
                mailbox.withdraw("alice", 0).await,
                Err(Error::UnknownRequest(0))
            );

            // Matched requests cannot
            let (mut first, mut second) = submit_both(&mut mailbox, 1, 2).await;
            assert_eq!(mailbox.withdraw("bob", 1).await, Err(Error::InService(1)));
            let (keeps, err) = collect(&mut first, &mut second).await;
            assert!(err.is_none());
            assert_eq!(keeps.len(), 2);

            // Completed requests are forgotten
            assert_eq!(
                mailbox.withdraw("bob", 1).await,
                Err(Error::UnknownRequest(1))
            );
        });
    }

    #[test_traced]
    fn test_attempt_budget() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut link = Link::new(Scripted {
                cycle: Duration::from_nanos(10),
                successes: vec![],
            });
            link.max_attempts = Some(5);
            let (mut mailbox, _) = link.start(&context);
            let (mut first, mut second) = submit_both(&mut mailbox, 0, 1).await;
            let (keeps, err) = collect(&mut first, &mut second).await;
            assert!(keeps.is_empty());
            assert_eq!(err, Some(Error::GenerationTimeout));
            assert_eq!(context.current(), at(50));

            let metrics = context.encode();
            assert!(metrics.contains("link_attempts_total 5"));
            assert!(metrics.contains("link_failures_total 5"));
        });
    }

    #[test_traced]
    fn test_deadline_keeps_partial_pairs() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut link = Link::new(Scripted {
                cycle: Duration::from_nanos(10),
                successes: vec![0],
            });
            link.deadline = Some(Duration::from_nanos(35));
            let (mut mailbox, distributor) = link.start(&context);
            let (mut first, mut second) = submit_both(&mut mailbox, 0, 3).await;
            let (mut keeps, err) = collect(&mut first, &mut second).await;

            // The attempt in progress at the deadline is abandoned
            assert_eq!(err, Some(Error::GenerationTimeout));
            assert_eq!(context.current(), at(35));
            assert_eq!(keeps.len(), 1);
            assert_eq!(keeps[0].label().await.unwrap().label_ready, at(10));

            // The delivered half is still held in memory
            let alice = &distributor.memories()[0];
            assert_eq!(alice.used(), 1);
            drop(keeps);
            assert_eq!(alice.used(), 0);
        });
    }

    #[test_traced]
    fn test_deadline_before_label() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let model = Depolarise::new(0.9, 1.0, Duration::from_nanos(10)).unwrap();
            let mut link = Link::new(model);
            link.deadline = Some(Duration::from_nanos(7));
            let (mut mailbox, _) = link.start(&context);
            let (mut first, mut second) = submit_both(&mut mailbox, 0, 1).await;

            // The state arrives before the deadline but its label would arrive after it
            let mut keep = first.next().await.unwrap().unwrap();
            assert_eq!(keep.state_ready(), at(5));
            assert_eq!(keep.label().await, Err(Error::GenerationTimeout));
            assert_eq!(context.current(), at(7));
            assert!(matches!(first.next().await, Some(Err(Error::GenerationTimeout))));

            let mut other = second.next().await.unwrap().unwrap();
            assert_eq!(other.label().await, Err(Error::GenerationTimeout));
            assert!(matches!(second.next().await, Some(Err(Error::GenerationTimeout))));
            assert!(context.encode().contains("link_pairs_total 0"));
        });
    }

    #[test_traced]
    fn test_memory_exhausted() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut link = Link::new(perfect(100));
            link.capacity = 1;
            let (mut mailbox, _) = link.start(&context);
            let (mut first, mut second) = submit_both(&mut mailbox, 0, 2).await;
            let (keeps, err) = collect(&mut first, &mut second).await;
            assert_eq!(keeps.len(), 1);
            assert_eq!(err, Some(Error::MemoryExhausted("alice".to_string())));
            assert_eq!(context.current(), at(200));
        });
    }

    #[test_traced]
    fn test_depolarise_two_phase() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let model = Depolarise::new(0.9, 1.0, Duration::from_nanos(10)).unwrap();
            let (mut mailbox, _) = Link::new(model).start(&context);
            let (mut first, mut second) = submit_both(&mut mailbox, 0, 3).await;

            // The first pair's state is ready before its label
            let mut keep = first.next().await.unwrap().unwrap();
            assert_eq!(keep.state_ready(), at(5));
            assert_eq!(context.current(), at(5));
            let delivery = keep.label().await.unwrap();
            assert_eq!(context.current(), at(10));
            assert_eq!(delivery.state_ready, at(5));
            assert_eq!(delivery.label_ready, at(10));
            assert_eq!(delivery.bell_state, BellState::PhiPlus);
            assert_eq!(delivery.goodness, 0.9);

            // Later pairs are ready at the end of their cycle (one cycle each)
            let mut keeps = vec![keep];
            for _ in 0..2 {
                keeps.push(first.next().await.unwrap().unwrap());
            }
            assert!(first.next().await.is_none());
            let delivered = deliveries(&mut keeps).await;
            let labels: Vec<_> = delivered.iter().map(|d| d.label_ready).collect();
            assert_eq!(labels, vec![at(10), at(20), at(30)]);
            assert!(delivered.iter().all(|d| d.state_ready <= d.label_ready));
            assert_eq!(delivered[1].state_ready, at(20));

            // The other endpoint saw the same pairs
            let mut others = Vec::new();
            while let Some(keep) = second.next().await {
                others.push(keep.unwrap());
            }
            assert_eq!(deliveries(&mut others).await, delivered);
        });
    }

    #[test_traced]
    fn test_gate_blocks_attempts() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (_hub, hub) = crate::hub::Actor::new(
                context.with_label("hub"),
                crate::hub::Config::new(crate::hub::Policy::Fifo {
                    switch_time: Duration::ZERO,
                }),
            );
            let (actor, mut mailbox) = Actor::new(
                context.with_label("link"),
                Config {
                    a: "alice".to_string(),
                    b: "bob".to_string(),
                    model: Box::new(perfect(100)),
                    distributor: Distributor::new(Memory::new("alice", 1), Memory::new("bob", 1)),
                    max_attempts: None,
                    deadline: None,
                    hub: Some(hub.attach(0)),
                    mailbox_size: 1024,
                },
            );
            actor.start();
            let (mut first, _second) = submit_both(&mut mailbox, 0, 1).await;

            // Nothing happens until the link is granted a window
            context.sleep(Duration::from_nanos(500)).await;
            mailbox.open(Some(at(550))).await;
            let mut keep = first.next().await.unwrap().unwrap();
            assert_eq!(keep.label().await.unwrap().label_ready, at(600));
        });
    }
}
