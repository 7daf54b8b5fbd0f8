use crate::error::{Error, Result};
use crate::network::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub fn dbm_to_w(dbm: f64) -> f64 {
    10f64.powf((dbm - 30.0) / 10.0)
}

pub fn w_to_dbm(w: f64) -> f64 {
    10.0 * w.log10() + 30.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioTechnology {
    #[serde(rename = "80211p")]
    Wifi80211p,
    Nr,
    Lte,
}

impl FromStr for RadioTechnology {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "80211p" | "11p" => Ok(Self::Wifi80211p),
            "nr" => Ok(Self::Nr),
            "lte" | "cv2x" => Ok(Self::Lte),
            other => Err(Error::UnknownTechnology(other.to_string())),
        }
    }
}

impl fmt::Display for RadioTechnology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wifi80211p => f.write_str("80211p"),
            Self::Nr => f.write_str("nr"),
            Self::Lte => f.write_str("lte"),
        }
    }
}

/// Opaque handle of the network device owned by the radio layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceHandle(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxParameters {
    pub technology: RadioTechnology,
    pub device: DeviceHandle,
    pub tx_power_dbm: f64,
    pub bandwidth_hz: f64,
    /// Bandwidth of one resource block, 0 for 802.11p.
    pub rb_bandwidth_hz: f64,
}

impl TxParameters {
    pub fn wifi(device: DeviceHandle, tx_power_dbm: f64, bandwidth_hz: f64) -> Self {
        Self {
            technology: RadioTechnology::Wifi80211p,
            device,
            tx_power_dbm,
            bandwidth_hz,
            rb_bandwidth_hz: 0.0,
        }
    }

    /// NR or LTE device; the resource block width is the channel split evenly.
    pub fn cellular(
        technology: RadioTechnology,
        device: DeviceHandle,
        tx_power_dbm: f64,
        bandwidth_hz: f64,
        resource_blocks: u32,
    ) -> Self {
        let rb_bandwidth_hz = if resource_blocks == 0 {
            0.0
        } else {
            bandwidth_hz / resource_blocks as f64
        };
        Self {
            technology,
            device,
            tx_power_dbm,
            bandwidth_hz,
            rb_bandwidth_hz,
        }
    }

    pub fn tx_power_w(&self) -> f64 {
        dbm_to_w(self.tx_power_dbm)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TxTracker {
    nodes: BTreeMap<NodeId, TxParameters>,
}

impl TxTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the previous entry.
    pub fn insert(&mut self, node: NodeId, params: TxParameters) -> Option<TxParameters> {
        self.nodes.insert(node, params)
    }

    pub fn get(&self, node: NodeId) -> Option<&TxParameters> {
        self.nodes.get(&node)
    }

    pub fn remove(&mut self, node: NodeId) -> Option<TxParameters> {
        self.nodes.remove(&node)
    }

    /// Returns false for nodes that were never registered.
    pub fn update_tx_power(&mut self, node: NodeId, tx_power_dbm: f64) -> bool {
        match self.nodes.get_mut(&node) {
            Some(params) => {
                params.tx_power_dbm = tx_power_dbm;
                true
            }
            None => false,
        }
    }

    pub fn by_technology(&self, technology: RadioTechnology) -> impl Iterator<Item = (NodeId, &TxParameters)> {
        self.nodes
            .iter()
            .filter(move |(_, p)| p.technology == technology)
            .map(|(id, p)| (*id, p))
    }

    pub fn find_by_device(&self, device: DeviceHandle) -> Option<(NodeId, &TxParameters)> {
        self.nodes.iter().find(|(_, p)| p.device == device).map(|(id, p)| (*id, p))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_conversions() {
        assert!((dbm_to_w(30.0) - 1.0).abs() < 1e-12);
        assert!((dbm_to_w(0.0) - 0.001).abs() < 1e-15);
        assert!((w_to_dbm(dbm_to_w(23.0)) - 23.0).abs() < 1e-9);
    }

    #[test]
    fn insert_replaces_and_updates() {
        let mut tracker = TxTracker::new();
        let node = NodeId::new(5);
        assert!(tracker.insert(node, TxParameters::wifi(DeviceHandle(1), 23.0, 10e6)).is_none());

        let old = tracker
            .insert(node, TxParameters::cellular(RadioTechnology::Nr, DeviceHandle(2), 23.0, 20e6, 100))
            .unwrap();
        assert_eq!(old.technology, RadioTechnology::Wifi80211p);
        assert_eq!(tracker.get(node).unwrap().rb_bandwidth_hz, 200e3);

        assert!(tracker.update_tx_power(node, 15.0));
        assert!(!tracker.update_tx_power(NodeId::new(6), 15.0));
        assert_eq!(tracker.find_by_device(DeviceHandle(2)).map(|(id, _)| id), Some(node));
        assert_eq!(tracker.by_technology(RadioTechnology::Nr).count(), 1);
        assert_eq!(tracker.by_technology(RadioTechnology::Lte).count(), 0);
    }
}
