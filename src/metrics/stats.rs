use crate::network::{MessageType, NodeId, StationClass};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Incremental arithmetic mean: `mean += (v - mean) / count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningMean {
    count: u64,
    mean: f64,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }

    /// 0.0 until the first sample, like every other counter here.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Everything tracked for one slice of the traffic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsBlock {
    pub prr: RunningMean,
    pub latency_ms: RunningMean,
    /// Receivers inside the baseline, per packet with a PRR.
    pub baseline: RunningMean,
    pub tx: u64,
    pub rx: u64,
}

/// One value per station class.
#[derive(Debug, Clone, Default)]
pub struct ClassTable<T> {
    pub vehicle: T,
    pub pedestrian: T,
    pub road_side_unit: T,
}

impl<T> ClassTable<T> {
    pub fn get(&self, class: StationClass) -> &T {
        match class {
            StationClass::Vehicle => &self.vehicle,
            StationClass::Pedestrian => &self.pedestrian,
            StationClass::RoadSideUnit => &self.road_side_unit,
        }
    }

    pub fn get_mut(&mut self, class: StationClass) -> &mut T {
        match class {
            StationClass::Vehicle => &mut self.vehicle,
            StationClass::Pedestrian => &mut self.pedestrian,
            StationClass::RoadSideUnit => &mut self.road_side_unit,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (StationClass, &T)> {
        StationClass::ALL.into_iter().map(move |c| (c, self.get(c)))
    }
}

/// Statistics at four granularities: overall, per station class, per
/// station (partitioned by class) and per message type.
#[derive(Debug, Clone, Default)]
pub struct ScopedStats {
    global: StatsBlock,
    per_class: ClassTable<StatsBlock>,
    per_node: ClassTable<HashMap<NodeId, StatsBlock>>,
    per_message_type: HashMap<MessageType, StatsBlock>,
}

impl ScopedStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, class: StationClass, node: NodeId, message_type: MessageType, f: impl Fn(&mut StatsBlock)) {
        f(&mut self.global);
        f(self.per_class.get_mut(class));
        f(self.per_node.get_mut(class).entry(node).or_default());
        f(self.per_message_type.entry(message_type).or_default());
    }

    pub fn record_tx(&mut self, class: StationClass, node: NodeId, message_type: MessageType) {
        self.update(class, node, message_type, |b| b.tx += 1);
    }

    pub fn record_rx(&mut self, class: StationClass, node: NodeId, message_type: MessageType) {
        self.update(class, node, message_type, |b| b.rx += 1);
    }

    pub fn record_latency(&mut self, class: StationClass, sender: NodeId, message_type: MessageType, latency_ms: f64) {
        self.update(class, sender, message_type, |b| b.latency_ms.push(latency_ms));
    }

    pub fn record_prr(&mut self, class: StationClass, sender: NodeId, message_type: MessageType, prr: f64, receivers: usize) {
        self.update(class, sender, message_type, |b| {
            b.prr.push(prr);
            b.baseline.push(receivers as f64);
        });
    }

    pub fn global(&self) -> &StatsBlock {
        &self.global
    }

    pub fn class(&self, class: StationClass) -> &StatsBlock {
        self.per_class.get(class)
    }

    pub fn node(&self, class: StationClass, node: NodeId) -> Option<&StatsBlock> {
        self.per_node.get(class).get(&node)
    }

    /// Looks a station up without knowing its class.
    pub fn find_node(&self, node: NodeId) -> Option<(StationClass, &StatsBlock)> {
        self.per_node
            .iter()
            .find_map(|(class, map)| map.get(&node).map(|block| (class, block)))
    }

    pub fn message_type(&self, message_type: MessageType) -> Option<&StatsBlock> {
        self.per_message_type.get(&message_type)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (StationClass, NodeId, &StatsBlock)> {
        self.per_node
            .iter()
            .flat_map(|(class, map)| map.iter().map(move |(id, block)| (class, *id, block)))
    }

    /// Mean over stations of a per-station quantity, 0.0 with no stations.
    fn per_node_average(&self, f: impl Fn(&StatsBlock) -> Option<f64>) -> f64 {
        let values: Vec<f64> = self.nodes().filter_map(|(_, _, block)| f(block)).collect();
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    pub fn average_tx_per_node(&self) -> f64 {
        self.per_node_average(|b| (b.tx > 0).then_some(b.tx as f64))
    }

    pub fn average_rx_per_node(&self) -> f64 {
        self.per_node_average(|b| (b.rx > 0).then_some(b.rx as f64))
    }

    pub fn average_baseline_per_node(&self) -> f64 {
        self.per_node_average(|b| (!b.baseline.is_empty()).then(|| b.baseline.mean()))
    }
}
