//! Serializable description of a network.
//!
//! Durations are given in nanoseconds, lengths in kilometers and speeds in kilometers per second.
//!
//! ```yaml
//! nodes:
//!   - name: alice
//!   - name: bob
//!     memory: 8
//!   - name: charlie
//! links:
//!   - a: alice
//!     b: bob
//!     model:
//!       typ: depolarise
//!       cfg:
//!         fidelity: 0.9
//!         prob_success: 0.5
//!         length: 2.0
//!     max_attempts: 1000
//! hubs:
//!   - name: midpoint
//!     connections:
//!       - node: alice
//!         length: 1.0
//!       - node: charlie
//!         length: 3.0
//!     model:
//!       typ: heralded
//!       cfg:
//!         length: 4.0
//!     schedule:
//!       typ: dynamic
//!       cfg:
//!         switch_time: 500
//! ```

use crate::{
    hub,
    model::{Arm, Depolarise, Detector, Heralded, Model, Perfect},
    Error,
};
use qnet_utils::nanos;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of qubit positions per node.
pub const DEFAULT_MEMORY: usize = crate::memory::DEFAULT_POSITIONS;

/// Default speed of light in fiber (km/s).
pub const DEFAULT_SPEED_OF_LIGHT: f64 = 200_000.0;

fn default_memory() -> usize {
    DEFAULT_MEMORY
}

fn default_speed_of_light() -> f64 {
    DEFAULT_SPEED_OF_LIGHT
}

fn default_p_loss_length() -> f64 {
    0.25
}

fn default_one() -> f64 {
    1.0
}

fn default_modes() -> u32 {
    1
}

fn default_time_window() -> u64 {
    1_000_000
}

fn default_switch_time() -> u64 {
    1_000
}

fn default_default_window() -> u64 {
    40
}

fn default_multiplexing() -> usize {
    1
}

fn default_starvation_threshold() -> u64 {
    hub::DEFAULT_STARVATION_THRESHOLD
}

/// Convert a length (km) into the time light needs to travel it.
fn travel(length: f64, speed_of_light: f64) -> Result<Duration, Error> {
    if !(length >= 0.0) || !length.is_finite() {
        return Err(Error::InvalidLength(length));
    }
    if !(speed_of_light > 0.0) {
        return Err(Error::InvalidConfig(format!(
            "invalid speed of light: {speed_of_light}"
        )));
    }
    Ok(nanos(length / speed_of_light * 1e9))
}

/// Parameters of the [Perfect] model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerfectConfig {
    /// Duration of an attempt (defaults to [`crate::model::DEFAULT_STATE_DELAY`]).
    #[serde(default)]
    pub state_delay: Option<u64>,

    /// Derive the duration of an attempt from the length of the link instead.
    #[serde(default)]
    pub length: Option<f64>,

    #[serde(default = "default_speed_of_light")]
    pub speed_of_light: f64,
}

impl PerfectConfig {
    fn build(&self) -> Result<Perfect, Error> {
        match (self.state_delay, self.length) {
            (Some(_), Some(_)) => Err(Error::InvalidConfig(
                "perfect: state_delay and length are exclusive".into(),
            )),
            (Some(delay), None) => Perfect::new(Duration::from_nanos(delay)),
            (None, Some(length)) => Perfect::new(travel(length, self.speed_of_light)?),
            (None, None) => Ok(Perfect::default()),
        }
    }
}

/// Parameters of the [Depolarise] model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepolariseConfig {
    pub fidelity: f64,
    pub prob_success: f64,

    /// Duration of a cycle.
    #[serde(default)]
    pub t_cycle: Option<u64>,

    /// Derive the duration of a cycle from the length of the link instead.
    #[serde(default)]
    pub length: Option<f64>,

    #[serde(default = "default_speed_of_light")]
    pub speed_of_light: f64,
}

impl DepolariseConfig {
    fn build(&self) -> Result<Depolarise, Error> {
        let cycle = match (self.t_cycle, self.length) {
            (Some(cycle), None) => Duration::from_nanos(cycle),
            (None, Some(length)) => travel(length, self.speed_of_light)?,
            _ => {
                return Err(Error::InvalidConfig(
                    "depolarise: exactly one of t_cycle and length is required".into(),
                ))
            }
        };
        Depolarise::new(self.fidelity, self.prob_success, cycle)
    }
}

/// Parameters of the [Heralded] model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeraldedConfig {
    /// Total length of the link (split evenly between both arms unless overridden).
    pub length: f64,
    #[serde(default)]
    pub length_a: Option<f64>,
    #[serde(default)]
    pub length_b: Option<f64>,

    #[serde(default)]
    pub p_loss_init: f64,
    #[serde(default = "default_p_loss_length")]
    pub p_loss_length: f64,
    #[serde(default = "default_speed_of_light")]
    pub speed_of_light: f64,
    #[serde(default = "default_one")]
    pub emission_fidelity: f64,

    #[serde(default)]
    pub dark_count_probability: f64,
    #[serde(default = "default_one")]
    pub detector_efficiency: f64,
    #[serde(default = "default_one")]
    pub visibility: f64,
    #[serde(default)]
    pub num_resolving: bool,
    #[serde(default = "default_modes")]
    pub num_multiplexing_modes: u32,
}

impl HeraldedConfig {
    fn build(&self) -> Result<Heralded, Error> {
        let arm = |length: Option<f64>| Arm {
            length: length.unwrap_or(self.length / 2.0),
            p_loss_init: self.p_loss_init,
            p_loss_length: self.p_loss_length,
            speed_of_light: self.speed_of_light,
            emission_fidelity: self.emission_fidelity,
        };
        Heralded::new(
            arm(self.length_a),
            arm(self.length_b),
            Detector {
                dark_count_probability: self.dark_count_probability,
                detector_efficiency: self.detector_efficiency,
                visibility: self.visibility,
                num_resolving: self.num_resolving,
                num_multiplexing_modes: self.num_multiplexing_modes,
            },
        )
    }
}

/// Attempt model of a link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "typ", content = "cfg", rename_all = "lowercase")]
pub enum ModelConfig {
    Perfect(PerfectConfig),
    Depolarise(DepolariseConfig),
    Heralded(HeraldedConfig),
}

impl ModelConfig {
    /// Instantiate the model.
    pub fn build(&self) -> Result<Box<dyn Model>, Error> {
        let model: Box<dyn Model> = match self {
            ModelConfig::Perfect(cfg) => Box::new(cfg.build()?),
            ModelConfig::Depolarise(cfg) => Box::new(cfg.build()?),
            ModelConfig::Heralded(cfg) => Box::new(cfg.build()?),
        };
        Ok(model)
    }

    /// Instantiate the model for the spoke of a hub connecting two nodes located `length_a` and
    /// `length_b` away from the hub.
    ///
    /// Heralded links use the two distances as their arms. Other models derive their timing from
    /// the total distance unless it is configured explicitly.
    pub fn build_between(&self, length_a: f64, length_b: f64) -> Result<Box<dyn Model>, Error> {
        let mut cfg = self.clone();
        match &mut cfg {
            ModelConfig::Perfect(cfg) => {
                if cfg.state_delay.is_none() {
                    cfg.length = Some(length_a + length_b);
                }
            }
            ModelConfig::Depolarise(cfg) => {
                if cfg.t_cycle.is_none() {
                    cfg.length = Some(length_a + length_b);
                }
            }
            ModelConfig::Heralded(cfg) => {
                cfg.length = length_a + length_b;
                cfg.length_a = Some(length_a);
                cfg.length_b = Some(length_b);
            }
        }
        cfg.build()
    }
}

/// Parameters of [`hub::Policy::Static`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_time_window")]
    pub time_window: u64,
    #[serde(default = "default_switch_time")]
    pub switch_time: u64,
    #[serde(default = "default_multiplexing")]
    pub max_multiplexing: usize,
    #[serde(default = "default_starvation_threshold")]
    pub starvation_threshold: u64,
}

/// Parameters of [`hub::Policy::Dynamic`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(default = "default_one")]
    pub time_window_prefix: f64,
    #[serde(default = "default_switch_time")]
    pub switch_time: u64,
    #[serde(default)]
    pub static_delay: u64,
    #[serde(default = "default_default_window")]
    pub default_window: u64,
    #[serde(default = "default_multiplexing")]
    pub max_multiplexing: usize,
    #[serde(default = "default_starvation_threshold")]
    pub starvation_threshold: u64,
}

/// Parameters of [`hub::Policy::Fifo`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FifoConfig {
    #[serde(default = "default_switch_time")]
    pub switch_time: u64,
    #[serde(default = "default_multiplexing")]
    pub max_multiplexing: usize,
    #[serde(default = "default_starvation_threshold")]
    pub starvation_threshold: u64,
}

/// Scheduling policy of a hub.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "typ", content = "cfg", rename_all = "lowercase")]
pub enum ScheduleConfig {
    Static(StaticConfig),
    Dynamic(DynamicConfig),
    Fifo(FifoConfig),
}

impl ScheduleConfig {
    /// Create the (validated) configuration of the hub actor.
    pub fn build(&self) -> Result<hub::Config, Error> {
        let (policy, max_multiplexing, starvation_threshold) = match self {
            ScheduleConfig::Static(cfg) => (
                hub::Policy::Static {
                    time_window: Duration::from_nanos(cfg.time_window),
                    switch_time: Duration::from_nanos(cfg.switch_time),
                },
                cfg.max_multiplexing,
                cfg.starvation_threshold,
            ),
            ScheduleConfig::Dynamic(cfg) => (
                hub::Policy::Dynamic {
                    time_window_prefix: cfg.time_window_prefix,
                    switch_time: Duration::from_nanos(cfg.switch_time),
                    static_delay: Duration::from_nanos(cfg.static_delay),
                    default_window: Duration::from_nanos(cfg.default_window),
                },
                cfg.max_multiplexing,
                cfg.starvation_threshold,
            ),
            ScheduleConfig::Fifo(cfg) => (
                hub::Policy::Fifo {
                    switch_time: Duration::from_nanos(cfg.switch_time),
                },
                cfg.max_multiplexing,
                cfg.starvation_threshold,
            ),
        };
        let cfg = hub::Config {
            policy,
            max_multiplexing,
            starvation_threshold,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// A node and its quantum memory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,

    /// Number of qubit positions.
    #[serde(default = "default_memory")]
    pub memory: usize,
}

/// A dedicated link between two nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub a: String,
    pub b: String,
    pub model: ModelConfig,

    /// Maximum number of attempts per request.
    #[serde(default)]
    pub max_attempts: Option<u64>,

    /// Maximum time (ns) a request may spend in service.
    #[serde(default)]
    pub deadline: Option<u64>,
}

/// A node attached to a hub.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub node: String,

    /// Distance (km) between the node and the hub.
    pub length: f64,
}

/// Generation hardware shared by every pair of its connected nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    pub name: String,
    pub connections: Vec<ConnectionConfig>,
    pub model: ModelConfig,
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub max_attempts: Option<u64>,
    #[serde(default)]
    pub deadline: Option<u64>,
}

/// Nodes, links and hubs of a network.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    #[serde(default)]
    pub hubs: Vec<HubConfig>,
}

impl NetworkConfig {
    /// Parse a network from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        serde_yaml::from_str(yaml).map_err(|err| Error::InvalidConfig(err.to_string()))
    }

    /// Render the network as YAML.
    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(|err| Error::InvalidConfig(err.to_string()))
    }
}
