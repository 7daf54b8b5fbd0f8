//! Decentralized Congestion Control.
//!
//! A [`DccController`] ticks every `dcc_interval` and hands the latest CBR
//! samples to one [`CongestionPolicy`], which retunes the stations through the
//! device and service registries.

pub mod adaptive;
pub mod reactive;
pub mod registry;

pub use adaptive::{AdaptiveDcc, AdaptiveParams};
pub use reactive::{ReactiveDcc, ReactiveParameters, ReactiveState, ReactiveTable};
pub use registry::{DeviceRegistry, GenerationService, RadioDevice, ServiceKind, ServiceRegistry};

use crate::error::{Error, Result};
use crate::metrics::CbrTracker;
use crate::network::NodeId;
use crate::scheduler::{Event, EventQueue};
use crate::tx_tracker::TxTracker;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Read side of CBR tracking as seen by the policies.
pub trait CbrSource {
    /// Nodes with at least one closed window.
    fn sampled_nodes(&self) -> Vec<NodeId>;
    fn latest_cbr(&self, node: NodeId) -> Option<f64>;
    /// Unsmoothed samples, oldest first.
    fn raw_cbr(&self, node: NodeId) -> &[f64];
}

pub struct DccContext<'a> {
    pub cbr: &'a dyn CbrSource,
    pub devices: &'a mut DeviceRegistry,
    pub services: &'a mut ServiceRegistry,
    pub tx_tracker: &'a mut TxTracker,
}

pub trait CongestionPolicy: Send + fmt::Debug {
    fn on_tick(&mut self, ctx: &mut DccContext<'_>);
    fn name(&self) -> &str;
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    Reactive,
    Adaptive,
}

impl PolicyKind {
    pub fn name(self) -> &'static str {
        match self {
            PolicyKind::Reactive => "reactive",
            PolicyKind::Adaptive => "adaptive",
        }
    }
}

impl FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "reactive" => Ok(PolicyKind::Reactive),
            "adaptive" => Ok(PolicyKind::Adaptive),
            other => Err(Error::UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters every policy factory is built from.
#[derive(Debug, Clone, Default)]
pub struct DccSettings {
    pub reactive: ReactiveTable,
    pub adaptive: AdaptiveParams,
}

type PolicyFactory = Box<dyn Fn(&DccSettings) -> Box<dyn CongestionPolicy> + Send + Sync>;

pub struct PolicyRegistry {
    policies: HashMap<String, PolicyFactory>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            policies: HashMap::new(),
        };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&mut self) {
        self.register("reactive", |s| Box::new(ReactiveDcc::new(s.reactive.clone())));
        self.register("adaptive", |s| Box::new(AdaptiveDcc::new(s.adaptive)));
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&DccSettings) -> Box<dyn CongestionPolicy> + Send + Sync + 'static,
    {
        self.policies.insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn create(&self, name: &str, settings: &DccSettings) -> Result<Box<dyn CongestionPolicy>> {
        self.policies
            .get(&name.trim().to_lowercase())
            .map(|factory| factory(settings))
            .ok_or_else(|| Error::UnknownPolicy(name.to_string()))
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.policies.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn global() -> &'static PolicyRegistry {
        use std::sync::OnceLock;
        static REGISTRY: OnceLock<PolicyRegistry> = OnceLock::new();
        REGISTRY.get_or_init(PolicyRegistry::new)
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic driver of one congestion policy.
#[derive(Debug, Default)]
pub struct DccController {
    interval: Option<Duration>,
    policy: Option<Box<dyn CongestionPolicy>>,
    devices: Option<DeviceRegistry>,
    services: Option<ServiceRegistry>,
    started: bool,
    ticks: u64,
}

impl DccController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_policy(mut self, policy: Box<dyn CongestionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_devices(mut self, devices: DeviceRegistry) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn with_services(mut self, services: ServiceRegistry) -> Self {
        self.services = Some(services);
        self
    }

    pub fn devices_mut(&mut self) -> Option<&mut DeviceRegistry> {
        self.devices.as_mut()
    }

    pub fn services_mut(&mut self) -> Option<&mut ServiceRegistry> {
        self.services.as_mut()
    }

    pub fn policy(&self) -> Option<&dyn CongestionPolicy> {
        self.policy.as_deref()
    }

    pub fn policy_name(&self) -> &str {
        self.policy.as_ref().map_or("none", |p| p.name())
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Check every prerequisite and schedule the first tick.
    pub fn start(&mut self, queue: &mut EventQueue, cbr: &CbrTracker) -> Result<()> {
        let missing = |missing| Error::MissingPrerequisite {
            component: "DCC",
            missing,
        };
        let interval = self
            .interval
            .filter(|i| !i.is_zero())
            .ok_or_else(|| missing("interval"))?;
        let policy = self.policy.as_ref().ok_or_else(|| missing("policy"))?;
        if self.devices.is_none() {
            return Err(missing("device registry"));
        }
        if self.services.is_none() {
            return Err(missing("service registry"));
        }
        if !cbr.is_started() {
            return Err(missing("CBR source"));
        }

        info!("DCC started: {} policy every {:?}", policy.name(), interval);
        queue.schedule_in(interval, Event::DccTick);
        self.started = true;
        Ok(())
    }

    /// Run the policy once and schedule the next tick.
    pub fn tick(&mut self, queue: &mut EventQueue, cbr: &dyn CbrSource, tx_tracker: &mut TxTracker) {
        let (Some(interval), Some(policy), Some(devices), Some(services)) = (
            self.interval,
            self.policy.as_mut(),
            self.devices.as_mut(),
            self.services.as_mut(),
        ) else {
            return;
        };

        let mut ctx = DccContext {
            cbr,
            devices,
            services,
            tx_tracker,
        };
        policy.on_tick(&mut ctx);
        self.ticks += 1;
        queue.schedule_in(interval, Event::DccTick);
    }

    pub fn reset(&mut self) {
        if let Some(policy) = self.policy.as_mut() {
            policy.reset();
        }
        self.ticks = 0;
        self.started = false;
    }
}
