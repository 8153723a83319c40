use crate::{hub::Attachment, model::Model, Distributor};
use std::time::Duration;

/// Configuration for the [`Actor`](super::Actor).
pub struct Config {
    /// Name of the first endpoint.
    pub a: String,

    /// Name of the second endpoint.
    pub b: String,

    /// Attempt model of the physical link.
    pub model: Box<dyn Model>,

    /// Places generated pairs into the memories of `a` and `b` (in that order).
    pub distributor: Distributor,

    /// Maximum number of attempts made for a single request.
    pub max_attempts: Option<u64>,

    /// Maximum time a single request may spend in service.
    pub deadline: Option<Duration>,

    /// Hub scheduling access to the link (if the link is one spoke of a hub).
    ///
    /// Without a hub, attempts may start at any time.
    pub hub: Option<Attachment>,

    /// The maximum size of the mailbox backlog.
    pub mailbox_size: usize,
}
