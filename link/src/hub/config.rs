use crate::Error;
use std::time::Duration;

/// Default number of windows a spoke may wait before a starvation warning.
pub const DEFAULT_STARVATION_THRESHOLD: u64 = 16;

/// How the hub assigns time windows to spokes.
#[derive(Clone, Debug, PartialEq)]
pub enum Policy {
    /// Fixed-length windows visiting every group of spokes in turn, regardless of load.
    Static {
        time_window: Duration,
        switch_time: Duration,
    },

    /// Windows granted to the spoke with the most queued requests, sized to its expected
    /// remaining service time.
    Dynamic {
        time_window_prefix: f64,
        switch_time: Duration,
        static_delay: Duration,
        default_window: Duration,
    },

    /// One window per matched request in arrival order, open until the request leaves service.
    Fifo { switch_time: Duration },
}

/// Configuration for the [`Actor`](super::Actor).
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub policy: Policy,

    /// Maximum number of (node-disjoint) spokes that may hold a window at once.
    pub max_multiplexing: usize,

    /// Number of windows a spoke with queued requests may wait before a warning is logged.
    pub starvation_threshold: u64,
}

impl Config {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            max_multiplexing: 1,
            starvation_threshold: DEFAULT_STARVATION_THRESHOLD,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_multiplexing == 0 {
            return Err(Error::InvalidSchedule("max_multiplexing must be positive"));
        }
        match &self.policy {
            Policy::Static { time_window, .. } => {
                if time_window.is_zero() {
                    return Err(Error::InvalidSchedule("time_window must be positive"));
                }
            }
            Policy::Dynamic {
                time_window_prefix,
                default_window,
                ..
            } => {
                if !(*time_window_prefix > 0.0) || !time_window_prefix.is_finite() {
                    return Err(Error::InvalidSchedule(
                        "time_window_prefix must be positive",
                    ));
                }
                if default_window.is_zero() {
                    return Err(Error::InvalidSchedule("default_window must be positive"));
                }
            }
            Policy::Fifo { .. } => {}
        }
        Ok(())
    }
}
