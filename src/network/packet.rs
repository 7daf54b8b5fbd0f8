use super::{MessageType, NodeId, StationClass};
use crate::mobility::GeoPoint;
use crate::scheduler::{SimTime, TimerId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Opaque key correlating a send with its later receptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hex rendering of the encoded packet, identical on both ends of the link.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self(hex::encode(buf))
    }

    pub fn from_id(id: u64) -> Self {
        Self(format!("{id:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A broadcast waiting for its PRR timeout.
#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub fingerprint: Fingerprint,
    pub sender: NodeId,
    pub sender_class: StationClass,
    pub message_type: MessageType,
    pub position: GeoPoint,
    pub sent_at: SimTime,
    pub timer: Option<TimerId>,
    candidates: HashSet<NodeId>,
    received: u32,
}

impl PendingPacket {
    pub fn new(
        fingerprint: Fingerprint,
        sender: NodeId,
        sender_class: StationClass,
        message_type: MessageType,
        position: GeoPoint,
        sent_at: SimTime,
        candidates: HashSet<NodeId>,
    ) -> Self {
        Self {
            fingerprint,
            sender,
            sender_class,
            message_type,
            position,
            sent_at,
            timer: None,
            candidates,
            received: 0,
        }
    }

    pub fn is_candidate(&self, node: NodeId) -> bool {
        self.candidates.contains(&node)
    }

    /// Counts one reception if `receiver` was in range at send time.
    /// Repeated calls for the same receiver count again.
    pub fn record_reception(&mut self, receiver: NodeId) -> bool {
        if self.is_candidate(receiver) {
            self.received += 1;
            true
        } else {
            false
        }
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn receivers(&self) -> usize {
        self.candidates.len()
    }

    /// Stations inside the baseline at send time, the sender included.
    pub fn baseline_size(&self) -> usize {
        self.candidates.len() + 1
    }

    /// `received / (baseline − 1)`, or `None` when nobody but the sender was in range.
    pub fn prr(&self) -> Option<f64> {
        let receivers = self.baseline_size() - 1;
        (receivers > 0).then(|| self.received as f64 / receivers as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(candidates: &[u64]) -> PendingPacket {
        PendingPacket::new(
            Fingerprint::from_id(7),
            NodeId::new(1),
            StationClass::Vehicle,
            MessageType::Cam,
            GeoPoint::new(45.0, 7.0),
            SimTime::ZERO,
            candidates.iter().copied().map(NodeId::new).collect(),
        )
    }

    #[test]
    fn fingerprint_hex_encodes_payload() {
        assert_eq!(Fingerprint::from_bytes(&[0x00, 0xab, 0x10]).as_str(), "00ab10");
    }

    #[test]
    fn only_candidates_count() {
        let mut p = packet(&[2, 3]);
        assert!(p.record_reception(NodeId::new(2)));
        assert!(!p.record_reception(NodeId::new(9)));
        assert_eq!(p.received(), 1);
        assert_eq!(p.prr(), Some(0.5));
    }

    #[test]
    fn lone_sender_has_no_prr() {
        let p = packet(&[]);
        assert_eq!(p.baseline_size(), 1);
        assert_eq!(p.prr(), None);
    }
}
