use crate::network::{MessageType, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Radio side of a station: what reactive DCC retunes.
pub trait RadioDevice {
    fn set_tx_power_dbm(&mut self, dbm: f64);
    fn set_rx_sensitivity_dbm(&mut self, dbm: f64);
}

/// A periodic message generator (CA, CP or VRU basic service).
pub trait GenerationService {
    fn set_generation_interval_ms(&mut self, ms: u64);
    /// Adaptive DCC output: the fraction of channel time this station may use.
    fn set_adaptive_delta(&mut self, delta: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceKind {
    CooperativeAwareness,
    CollectivePerception,
    VruAwareness,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [
        ServiceKind::CooperativeAwareness,
        ServiceKind::CollectivePerception,
        ServiceKind::VruAwareness,
    ];

    pub fn message_type(self) -> MessageType {
        match self {
            ServiceKind::CooperativeAwareness => MessageType::Cam,
            ServiceKind::CollectivePerception => MessageType::Cpm,
            ServiceKind::VruAwareness => MessageType::Vam,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::CooperativeAwareness => "CA",
            ServiceKind::CollectivePerception => "CP",
            ServiceKind::VruAwareness => "VRU",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<NodeId, Box<dyn RadioDevice>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node: NodeId, device: Box<dyn RadioDevice>) {
        self.devices.insert(node, device);
    }

    pub fn get_mut(&mut self, node: NodeId) -> Option<&mut (dyn RadioDevice + 'static)> {
        self.devices.get_mut(&node).map(|d| d.as_mut())
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.devices.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes: Vec<_> = self.devices.keys().collect();
        nodes.sort();
        f.debug_struct("DeviceRegistry").field("nodes", &nodes).finish()
    }
}

/// Node to generation services, at most one per kind.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<NodeId, BTreeMap<ServiceKind, Box<dyn GenerationService>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node: NodeId, kind: ServiceKind, service: Box<dyn GenerationService>) {
        self.services.entry(node).or_default().insert(kind, service);
    }

    pub fn get_mut(&mut self, node: NodeId, kind: ServiceKind) -> Option<&mut (dyn GenerationService + 'static)> {
        self.services
            .get_mut(&node)
            .and_then(|m| m.get_mut(&kind))
            .map(|s| s.as_mut())
    }

    /// Every service registered for `node`, in kind order.
    pub fn for_node(&mut self, node: NodeId) -> impl Iterator<Item = (ServiceKind, &mut Box<dyn GenerationService>)> {
        self.services
            .get_mut(&node)
            .into_iter()
            .flat_map(|m| m.iter_mut().map(|(k, s)| (*k, s)))
    }

    pub fn len(&self) -> usize {
        self.services.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self
            .services
            .iter()
            .map(|(node, kinds)| (*node, kinds.keys().copied().collect::<Vec<_>>()))
            .collect();
        entries.sort();
        f.debug_struct("ServiceRegistry").field("services", &entries).finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn services_are_visited_in_kind_order() {
        let log = Log::default();
        let (_, mut services) = registries(
            &[1],
            &[ServiceKind::VruAwareness, ServiceKind::CooperativeAwareness],
            &log,
        );
        for (_, service) in services.for_node(NodeId::new(1)) {
            service.set_generation_interval_ms(100);
        }
        assert_eq!(services.for_node(NodeId::new(2)).count(), 0);
        assert_eq!(
            *log.borrow(),
            vec![
                Applied::Interval(NodeId::new(1), ServiceKind::CooperativeAwareness, 100),
                Applied::Interval(NodeId::new(1), ServiceKind::VruAwareness, 100),
            ]
        );
        assert_eq!(services.len(), 2);
    }
}
