//! Packet Reception Ratio and one-way latency supervision.
//!
//! When a packet is sent, every known station inside the baseline radius
//! becomes a candidate receiver and a timeout is armed. Receptions by
//! candidates are counted until the timeout fires; then
//! `PRR = received / (baseline - 1)` where the baseline counts the sender too.
//! Packets slower than the timeout count as lost.
//!
//! Latency uses its own table: a send timestamp is kept per fingerprint and
//! consumed by the first reception, whether or not the PRR record is still
//! open. Stamps of packets nobody receives are held until `shutdown`, so the
//! table grows with every lost packet over a run.

use super::stats::ScopedStats;
use crate::error::{Error, Result};
use crate::mobility::{GeoPoint, PositionOracle};
use crate::network::{Fingerprint, MessageType, NodeId, PendingPacket, StationClass};
use crate::scheduler::{Event, EventQueue, SimTime};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASELINE_M: f64 = 150.0;
pub const DEFAULT_PRR_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy)]
struct SendStamp {
    sent_at: SimTime,
    sender: NodeId,
    class: StationClass,
    message_type: MessageType,
}

pub struct PrrSupervisor {
    baseline_m: f64,
    timeout: Duration,
    verbose: bool,
    oracle: Option<Box<dyn PositionOracle>>,
    pending: HashMap<Fingerprint, PendingPacket>,
    stamps: HashMap<Fingerprint, SendStamp>,
    excluded: HashSet<NodeId>,
    classes: HashMap<NodeId, StationClass>,
    stats: ScopedStats,
}

impl std::fmt::Debug for PrrSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrrSupervisor")
            .field("baseline_m", &self.baseline_m)
            .field("timeout", &self.timeout)
            .field("oracle", &self.oracle.is_some())
            .field("pending", &self.pending.len())
            .field("stamps", &self.stamps.len())
            .field("excluded", &self.excluded)
            .finish()
    }
}

impl Default for PrrSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_BASELINE_M)
    }
}

impl PrrSupervisor {
    pub fn new(baseline_m: f64) -> Self {
        Self {
            baseline_m,
            timeout: DEFAULT_PRR_TIMEOUT,
            verbose: false,
            oracle: None,
            pending: HashMap::new(),
            stamps: HashMap::new(),
            excluded: HashSet::new(),
            classes: HashMap::new(),
            stats: ScopedStats::new(),
        }
    }

    /// Receptions later than this count as lost.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn set_position_oracle(&mut self, oracle: Box<dyn PositionOracle>) {
        self.oracle = Some(oracle);
    }

    pub fn baseline_m(&self) -> f64 {
        self.baseline_m
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ignore every packet sent or received by `node`, e.g. pure interferers.
    pub fn add_excluded(&mut self, node: NodeId) {
        self.excluded.insert(node);
    }

    pub fn clear_excluded(&mut self) {
        self.excluded.clear();
    }

    pub fn is_excluded(&self, node: NodeId) -> bool {
        self.excluded.contains(&node)
    }

    /// A packet entered the channel. Builds the candidate receiver set from the
    /// stations inside the baseline radius and arms the PRR timeout.
    pub fn signal_sent(
        &mut self,
        queue: &mut EventQueue,
        fingerprint: Fingerprint,
        position: GeoPoint,
        sender: NodeId,
        class: StationClass,
        message_type: MessageType,
    ) -> Result<()> {
        let oracle = self.oracle.as_deref().ok_or(Error::OracleUnset)?;

        if self.excluded.contains(&sender) {
            return Ok(());
        }
        if self.pending.contains_key(&fingerprint) {
            warn!("Packet {} signalled as sent twice, keeping the first record", fingerprint);
            return Ok(());
        }

        let mut candidates = HashSet::new();
        for (node, node_class) in oracle.known_nodes() {
            self.classes.insert(node, node_class);
            if node == sender || self.excluded.contains(&node) {
                continue;
            }
            let Some(pos) = oracle.position(node) else {
                continue;
            };
            if position.distance_to(&pos) <= self.baseline_m {
                candidates.insert(node);
            }
        }
        self.classes.insert(sender, class);

        let now = queue.now();
        let mut packet = PendingPacket::new(fingerprint.clone(), sender, class, message_type, position, now, candidates);
        packet.timer = Some(queue.schedule_in(self.timeout, Event::ComputePrr(fingerprint.clone())));

        debug!(
            "Node {} sent {} {} with {} receivers in baseline",
            sender,
            message_type,
            fingerprint,
            packet.receivers()
        );

        self.pending.insert(fingerprint.clone(), packet);
        self.stamps.insert(
            fingerprint,
            SendStamp {
                sent_at: now,
                sender,
                class,
                message_type,
            },
        );
        self.stats.record_tx(class, sender, message_type);
        Ok(())
    }

    /// A packet was decoded by `receiver` at `now`.
    ///
    /// Every call by a candidate counts, duplicates included.
    pub fn signal_received(&mut self, now: SimTime, fingerprint: &Fingerprint, receiver: NodeId) -> Result<()> {
        if self.oracle.is_none() {
            return Err(Error::OracleUnset);
        }
        if self.excluded.contains(&receiver) {
            return Ok(());
        }

        // Packets from excluded senders never got a record and fall through here.
        let message_type = match self.pending.get_mut(fingerprint) {
            Some(packet) => {
                packet.record_reception(receiver);
                Some(packet.message_type)
            }
            None => None,
        };

        let stamp = self.stamps.remove(fingerprint);
        if let Some(stamp) = stamp {
            let latency_ms = (now - stamp.sent_at).as_secs_f64() * 1000.0;
            self.stats
                .record_latency(stamp.class, stamp.sender, stamp.message_type, latency_ms);
            if self.verbose {
                println!(
                    "|Latency| ID: {} Current: {} - Average: {}",
                    receiver,
                    latency_ms,
                    self.stats.global().latency_ms.mean()
                );
            }
        }

        if let Some(message_type) = message_type.or(stamp.map(|s| s.message_type)) {
            let class = self.classes.get(&receiver).copied().unwrap_or_default();
            self.stats.record_rx(class, receiver, message_type);
        }
        Ok(())
    }

    /// PRR timeout for `fingerprint`. Returns the PRR folded into the
    /// statistics, `None` if the packet had no receivers or is unknown.
    pub fn compute_prr(&mut self, fingerprint: &Fingerprint) -> Result<Option<f64>> {
        let Some(packet) = self.pending.remove(fingerprint) else {
            return Ok(None);
        };

        let Some(prr) = packet.prr() else {
            debug!("Packet {} had no receivers in baseline, dropped", fingerprint);
            return Ok(None);
        };

        if prr > 1.0 {
            return Err(Error::PrrOutOfRange {
                fingerprint: fingerprint.to_string(),
                prr,
                received: packet.received(),
                receivers: packet.receivers(),
            });
        }

        self.stats.record_prr(
            packet.sender_class,
            packet.sender,
            packet.message_type,
            prr,
            packet.receivers(),
        );

        if self.verbose {
            if packet.sender_class == StationClass::Vehicle {
                if let Some(node) = self.stats.node(packet.sender_class, packet.sender) {
                    println!(
                        "|Number of vehicles in the baseline| Vehicle ID: {} Current: {} - Average: {}",
                        packet.sender,
                        packet.receivers(),
                        node.baseline.mean()
                    );
                }
            }
            println!("|PRR| Current: {} - Average: {}", prr, self.stats.global().prr.mean());
        }
        Ok(Some(prr))
    }

    /// Cancel every armed PRR timeout and forget all open packets.
    pub fn shutdown(&mut self, queue: &mut EventQueue) -> usize {
        let mut cancelled = 0;
        for (_, packet) in self.pending.drain() {
            if let Some(timer) = packet.timer {
                if queue.cancel(timer) {
                    cancelled += 1;
                }
            }
        }
        self.stamps.clear();
        cancelled
    }

    pub fn pending(&self, fingerprint: &Fingerprint) -> Option<&PendingPacket> {
        self.pending.get(fingerprint)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_send_stamp(&self, fingerprint: &Fingerprint) -> bool {
        self.stamps.contains_key(fingerprint)
    }

    pub fn stats(&self) -> &ScopedStats {
        &self.stats
    }

    pub fn average_prr(&self) -> f64 {
        self.stats.global().prr.mean()
    }

    pub fn average_latency_ms(&self) -> f64 {
        self.stats.global().latency_ms.mean()
    }

    pub fn average_prr_node(&self, node: NodeId) -> f64 {
        self.stats.find_node(node).map_or(0.0, |(_, b)| b.prr.mean())
    }

    pub fn average_latency_node(&self, node: NodeId) -> f64 {
        self.stats.find_node(node).map_or(0.0, |(_, b)| b.latency_ms.mean())
    }

    pub fn average_prr_class(&self, class: StationClass) -> f64 {
        self.stats.class(class).prr.mean()
    }

    pub fn average_latency_class(&self, class: StationClass) -> f64 {
        self.stats.class(class).latency_ms.mean()
    }

    pub fn average_prr_message_type(&self, message_type: MessageType) -> f64 {
        self.stats.message_type(message_type).map_or(0.0, |b| b.prr.mean())
    }

    pub fn average_latency_message_type(&self, message_type: MessageType) -> f64 {
        self.stats.message_type(message_type).map_or(0.0, |b| b.latency_ms.mean())
    }

    pub fn total_tx(&self) -> u64 {
        self.stats.global().tx
    }

    pub fn total_rx(&self) -> u64 {
        self.stats.global().rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mobility::StaticOracle;
    use proptest::prelude::*;

    const ORIGIN: GeoPoint = GeoPoint::new(0.0, 0.0);

    fn id(n: u64) -> NodeId {
        NodeId::new(n)
    }

    /// Sender 1 at the origin, then one station per distance (ids 2, 3, ...).
    fn supervisor(distances_m: &[f64]) -> PrrSupervisor {
        let mut oracle = StaticOracle::new().with_node(id(1), StationClass::Vehicle, ORIGIN);
        for (i, d) in distances_m.iter().enumerate() {
            oracle.insert(id(i as u64 + 2), StationClass::Vehicle, ORIGIN.offset_meters(*d, 0.0));
        }
        let mut prr = PrrSupervisor::new(150.0);
        prr.set_position_oracle(Box::new(oracle));
        prr
    }

    fn send(prr: &mut PrrSupervisor, queue: &mut EventQueue, fp: &Fingerprint) {
        prr.signal_sent(queue, fp.clone(), ORIGIN, id(1), StationClass::Vehicle, MessageType::Cam)
            .unwrap();
    }

    #[test]
    fn candidate_set_is_bounded_by_baseline() {
        let mut queue = EventQueue::new();
        let mut prr = supervisor(&[100.0, 200.0, 150.0]);
        let fp = Fingerprint::from_id(1);
        send(&mut prr, &mut queue, &fp);

        let packet = prr.pending(&fp).unwrap();
        assert!(packet.is_candidate(id(2)));
        assert!(!packet.is_candidate(id(3)));
        assert!(!packet.is_candidate(id(1)));
        assert_eq!(packet.receivers(), 2);
        assert_eq!(prr.total_tx(), 1);
    }

    #[test]
    fn missing_oracle_is_fatal() {
        let mut queue = EventQueue::new();
        let mut prr = PrrSupervisor::default();
        let fp = Fingerprint::from_id(1);
        let sent = prr.signal_sent(&mut queue, fp.clone(), ORIGIN, id(1), StationClass::Vehicle, MessageType::Cam);
        assert!(matches!(sent, Err(Error::OracleUnset)));
        assert!(matches!(prr.signal_received(SimTime::ZERO, &fp, id(2)), Err(Error::OracleUnset)));
    }

    #[test]
    fn excluded_nodes_are_ignored() {
        let mut queue = EventQueue::new();
        let mut prr = supervisor(&[10.0, 20.0]);
        prr.add_excluded(id(3));

        let fp = Fingerprint::from_id(1);
        send(&mut prr, &mut queue, &fp);
        assert!(!prr.pending(&fp).unwrap().is_candidate(id(3)));

        prr.signal_received(SimTime::from_millis(1), &fp, id(3)).unwrap();
        assert_eq!(prr.pending(&fp).unwrap().received(), 0);
        assert!(prr.has_send_stamp(&fp));

        prr.add_excluded(id(1));
        let other = Fingerprint::from_id(2);
        send(&mut prr, &mut queue, &other);
        assert!(prr.pending(&other).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn duplicate_receptions_count_twice() {
        let mut queue = EventQueue::new();
        let mut prr = supervisor(&[10.0, 20.0]);
        let fp = Fingerprint::from_id(1);
        send(&mut prr, &mut queue, &fp);

        prr.signal_received(SimTime::from_millis(1), &fp, id(2)).unwrap();
        prr.signal_received(SimTime::from_millis(2), &fp, id(2)).unwrap();
        assert_eq!(prr.pending(&fp).unwrap().received(), 2);

        // Two receptions over two receivers reads as a perfect delivery.
        assert_eq!(prr.compute_prr(&fp).unwrap(), Some(1.0));
    }

    #[test]
    fn duplicates_beyond_baseline_are_fatal() {
        let mut queue = EventQueue::new();
        let mut prr = supervisor(&[10.0]);
        let fp = Fingerprint::from_id(1);
        send(&mut prr, &mut queue, &fp);

        prr.signal_received(SimTime::from_millis(1), &fp, id(2)).unwrap();
        prr.signal_received(SimTime::from_millis(2), &fp, id(2)).unwrap();
        let err = prr.compute_prr(&fp).unwrap_err();
        assert!(matches!(err, Error::PrrOutOfRange { received: 2, receivers: 1, .. }));
    }

    #[test]
    fn lone_sender_does_not_touch_prr() {
        let mut queue = EventQueue::new();
        let mut prr = supervisor(&[500.0]);
        let fp = Fingerprint::from_id(1);
        send(&mut prr, &mut queue, &fp);

        assert_eq!(prr.compute_prr(&fp).unwrap(), None);
        assert!(prr.stats().global().prr.is_empty());
        assert_eq!(prr.pending_count(), 0);
    }

    #[test]
    fn late_reception_updates_latency_only() {
        let mut queue = EventQueue::new();
        let mut prr = supervisor(&[10.0]);
        let fp = Fingerprint::from_id(1);
        send(&mut prr, &mut queue, &fp);

        let (_, event) = queue.pop().unwrap();
        let Event::ComputePrr(fired) = event else {
            panic!("expected PRR timeout");
        };
        assert_eq!(prr.compute_prr(&fired).unwrap(), Some(0.0));

        prr.signal_received(SimTime::from_millis(3500), &fp, id(2)).unwrap();
        assert_eq!(prr.stats().global().prr.count(), 1);
        assert_eq!(prr.average_prr(), 0.0);
        assert!((prr.average_latency_ms() - 3500.0).abs() < 1e-9);
        assert!(!prr.has_send_stamp(&fp));
    }

    #[test]
    fn latency_is_taken_from_first_reception() {
        let mut queue = EventQueue::new();
        let mut prr = supervisor(&[10.0, 20.0]);
        let fp = Fingerprint::from_id(1);
        send(&mut prr, &mut queue, &fp);

        prr.signal_received(SimTime::from_millis(4), &fp, id(2)).unwrap();
        prr.signal_received(SimTime::from_millis(9), &fp, id(3)).unwrap();
        assert_eq!(prr.stats().global().latency_ms.count(), 1);
        assert!((prr.average_latency_node(id(1)) - 4.0).abs() < 1e-9);
        assert!((prr.average_latency_message_type(MessageType::Cam) - 4.0).abs() < 1e-9);
        assert_eq!(prr.total_rx(), 2);
        assert_eq!(prr.pending(&fp).unwrap().received(), 2);
    }

    #[test]
    fn unknown_fingerprint_is_a_no_op() {
        let mut prr = supervisor(&[10.0]);
        let fp = Fingerprint::from_id(99);
        prr.signal_received(SimTime::from_millis(1), &fp, id(2)).unwrap();
        assert_eq!(prr.compute_prr(&fp).unwrap(), None);
        assert_eq!(prr.total_rx(), 0);
    }

    #[test]
    fn shutdown_cancels_pending_timers() {
        let mut queue = EventQueue::new();
        let mut prr = supervisor(&[10.0]);
        for i in 0..5 {
            send(&mut prr, &mut queue, &Fingerprint::from_id(i));
        }
        assert_eq!(prr.shutdown(&mut queue), 5);
        assert!(queue.is_empty());
        assert_eq!(prr.pending_count(), 0);
    }

    proptest! {
        #[test]
        fn prr_is_received_over_receivers(receivers in 1usize..20, seed in any::<u64>()) {
            let distances: Vec<f64> = (0..receivers).map(|i| 1.0 + i as f64).collect();
            let mut queue = EventQueue::new();
            let mut prr = supervisor(&distances);
            let fp = Fingerprint::from_id(seed);
            send(&mut prr, &mut queue, &fp);

            let delivered = (seed as usize) % (receivers + 1);
            for r in 0..delivered {
                prr.signal_received(SimTime::from_millis(1), &fp, id(r as u64 + 2)).unwrap();
            }

            let value = prr.compute_prr(&fp).unwrap().unwrap();
            prop_assert!((0.0..=1.0).contains(&value));
            prop_assert!((value - delivered as f64 / receivers as f64).abs() < 1e-12);
        }

        #[test]
        fn repeated_deliveries_are_all_counted(receivers in 1usize..8, repeats in 1u32..16) {
            let distances: Vec<f64> = (0..receivers).map(|i| 1.0 + i as f64).collect();
            let mut queue = EventQueue::new();
            let mut prr = supervisor(&distances);
            let fp = Fingerprint::from_id(7);
            send(&mut prr, &mut queue, &fp);

            for k in 1..=repeats {
                prr.signal_received(SimTime::from_millis(u64::from(k)), &fp, id(2)).unwrap();
                prop_assert_eq!(prr.pending(&fp).unwrap().received(), k);
            }

            let result = prr.compute_prr(&fp);
            if repeats as usize <= receivers {
                let expected = f64::from(repeats) / receivers as f64;
                prop_assert!(matches!(result, Ok(Some(v)) if (v - expected).abs() < 1e-12));
            } else {
                prop_assert!(matches!(result, Err(Error::PrrOutOfRange { .. })), "got {:?}", result);
            }
        }
    }
}
