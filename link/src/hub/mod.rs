//! Arbitrate access to generation hardware shared by several links.
//!
//! # Overview
//!
//! A hub is a midpoint shared by several node pairs ("spokes"), each served by its own
//! [`resource::Actor`](crate::resource::Actor). The hub [Actor] grants spokes time windows: a link
//! only starts attempts while its spoke holds a window (an attempt already in progress when the
//! window ends is allowed to complete).
//!
//! Up to `max_multiplexing` spokes that share no node may hold a window at once. The scheduling
//! [State] is `Idle`, `Serving` a single spoke or `Multiplexed` across several.
//!
//! # Policies
//!
//! - [Policy::Static]: spokes are grouped into node-disjoint slots (see [schema]) and every slot
//!   receives a window of `time_window` followed by `switch_time` in turn. A cycle starts at the
//!   next multiple of the full cycle time once any spoke has work and repeats while any spoke has
//!   work. Spokes are visited regardless of their load.
//! - [Policy::Dynamic]: a free slot goes to the spoke with the most queued requests and lasts
//!   `time_window_prefix` times the expected time to finish its oldest request (plus
//!   `static_delay`). Each window ends on its own: a spoke finishing early releases its slot
//!   without affecting other spokes, and the slot is reassigned after `switch_time`.
//! - [Policy::Fifo]: one window per matched request, granted in the order requests were
//!   matched and held until the request leaves service.
//!
//! A spoke with queued requests that sees more than `starvation_threshold` windows go to other
//! spokes triggers a (non-fatal) starvation warning.

mod actor;
pub use actor::{Actor, Spoke};
mod config;
pub use config::{Config, Policy, DEFAULT_STARVATION_THRESHOLD};
mod ingress;
pub use ingress::{Attachment, Load, Mailbox};
pub(crate) use ingress::Message;
mod metrics;
mod schedule;
pub use schedule::{align, disjoint, schema, State};
