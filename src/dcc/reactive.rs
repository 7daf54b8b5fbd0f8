//! Reactive DCC: a five-level state machine driven by the smoothed CBR.

use super::{CongestionPolicy, DccContext};
use crate::network::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReactiveState {
    Relaxed,
    Active1,
    Active2,
    Active3,
    Restrictive,
}

impl ReactiveState {
    pub const ALL: [ReactiveState; 5] = [
        ReactiveState::Relaxed,
        ReactiveState::Active1,
        ReactiveState::Active2,
        ReactiveState::Active3,
        ReactiveState::Restrictive,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// One level more restrictive, saturating.
    pub fn up(self) -> Self {
        Self::ALL[(self.index() + 1).min(Self::ALL.len() - 1)]
    }

    /// One level more relaxed, saturating.
    pub fn down(self) -> Self {
        Self::ALL[self.index().saturating_sub(1)]
    }
}

impl fmt::Display for ReactiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactiveParameters {
    pub cbr_threshold: f64,
    pub tx_power_dbm: f64,
    pub generation_interval_ms: u64,
    pub sensitivity_dbm: f64,
}

impl ReactiveParameters {
    pub const fn new(cbr_threshold: f64, tx_power_dbm: f64, generation_interval_ms: u64, sensitivity_dbm: f64) -> Self {
        Self {
            cbr_threshold,
            tx_power_dbm,
            generation_interval_ms,
            sensitivity_dbm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReactiveTable {
    pub relaxed: ReactiveParameters,
    pub active1: ReactiveParameters,
    pub active2: ReactiveParameters,
    pub active3: ReactiveParameters,
    pub restrictive: ReactiveParameters,
}

impl Default for ReactiveTable {
    /// ETSI TS 102 687 reactive table.
    fn default() -> Self {
        Self {
            relaxed: ReactiveParameters::new(0.30, 33.0, 100, -95.0),
            active1: ReactiveParameters::new(0.40, 25.0, 200, -95.0),
            active2: ReactiveParameters::new(0.50, 20.0, 400, -95.0),
            active3: ReactiveParameters::new(0.60, 15.0, 500, -95.0),
            restrictive: ReactiveParameters::new(1.00, -10.0, 1000, -65.0),
        }
    }
}

impl ReactiveTable {
    pub fn get(&self, state: ReactiveState) -> &ReactiveParameters {
        match state {
            ReactiveState::Relaxed => &self.relaxed,
            ReactiveState::Active1 => &self.active1,
            ReactiveState::Active2 => &self.active2,
            ReactiveState::Active3 => &self.active3,
            ReactiveState::Restrictive => &self.restrictive,
        }
    }

    fn threshold(&self, state: ReactiveState) -> f64 {
        self.get(state).cbr_threshold
    }

    /// First level whose threshold exceeds `cbr`, Restrictive if none does.
    pub fn initial_state(&self, cbr: f64) -> ReactiveState {
        ReactiveState::ALL
            .into_iter()
            .find(|s| self.threshold(*s) > cbr)
            .unwrap_or(ReactiveState::Restrictive)
    }

    pub fn next_state(&self, previous: Option<ReactiveState>, cbr: f64) -> ReactiveState {
        let Some(current) = previous else {
            return self.initial_state(cbr);
        };
        if cbr > self.threshold(current) {
            current.up()
        } else if current != ReactiveState::Relaxed && cbr < self.threshold(current.down()) {
            current.down()
        } else {
            current
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReactiveDcc {
    table: ReactiveTable,
    states: HashMap<NodeId, ReactiveState>,
}

impl ReactiveDcc {
    pub fn new(table: ReactiveTable) -> Self {
        Self {
            table,
            states: HashMap::new(),
        }
    }

    pub fn state(&self, node: NodeId) -> Option<ReactiveState> {
        self.states.get(&node).copied()
    }

    pub fn table(&self) -> &ReactiveTable {
        &self.table
    }
}

impl CongestionPolicy for ReactiveDcc {
    fn on_tick(&mut self, ctx: &mut DccContext<'_>) {
        for node in ctx.cbr.sampled_nodes() {
            let Some(cbr) = ctx.cbr.latest_cbr(node) else {
                continue;
            };
            let previous = self.states.get(&node).copied();
            let next = self.table.next_state(previous, cbr);
            if previous == Some(next) {
                continue;
            }

            let params = *self.table.get(next);
            if let Some(device) = ctx.devices.get_mut(node) {
                device.set_tx_power_dbm(params.tx_power_dbm);
                device.set_rx_sensitivity_dbm(params.sensitivity_dbm);
            }
            for (_, service) in ctx.services.for_node(node) {
                service.set_generation_interval_ms(params.generation_interval_ms);
            }
            ctx.tx_tracker.update_tx_power(node, params.tx_power_dbm);

            debug!(
                "Node {} CBR {:.3}: {} -> {}",
                node,
                cbr,
                previous.map_or_else(|| "unset".to_string(), |s| s.to_string()),
                next
            );
            self.states.insert(node, next);
        }
    }

    fn name(&self) -> &str {
        "reactive"
    }

    fn reset(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcc::ServiceKind;
    use crate::dcc::registry::testing::*;
    use crate::dcc::tests::FixedCbr;
    use crate::tx_tracker::{DeviceHandle, TxParameters, TxTracker};
    use proptest::prelude::*;

    #[test]
    fn first_sample_picks_first_exceeding_threshold() {
        let mut table = ReactiveTable::default();
        table.relaxed.cbr_threshold = 0.20;
        table.active1.cbr_threshold = 0.30;
        assert_eq!(table.next_state(None, 0.25), ReactiveState::Active1);
        assert_eq!(table.next_state(None, 0.10), ReactiveState::Relaxed);
        assert_eq!(table.next_state(None, 1.0), ReactiveState::Restrictive);
    }

    #[test]
    fn saturates_at_restrictive_then_holds() {
        let table = ReactiveTable::default();
        let mut state = table.next_state(None, 0.0);
        let mut path = vec![state];
        for _ in 0..6 {
            state = table.next_state(Some(state), 0.95);
            path.push(state);
        }
        assert_eq!(
            path,
            vec![
                ReactiveState::Relaxed,
                ReactiveState::Active1,
                ReactiveState::Active2,
                ReactiveState::Active3,
                ReactiveState::Restrictive,
                ReactiveState::Restrictive,
                ReactiveState::Restrictive,
            ]
        );
        assert_eq!(table.next_state(Some(ReactiveState::Restrictive), 1.0), ReactiveState::Restrictive);
        assert_eq!(table.next_state(Some(ReactiveState::Restrictive), 0.55), ReactiveState::Active3);
    }

    #[test]
    fn relaxes_one_level_at_a_time() {
        let table = ReactiveTable::default();
        let mut state = ReactiveState::Restrictive;
        let mut steps = 0;
        while state != ReactiveState::Relaxed {
            state = table.next_state(Some(state), 0.0);
            steps += 1;
        }
        assert_eq!(steps, 4);
        assert_eq!(table.next_state(Some(state), 0.0), ReactiveState::Relaxed);
    }

    #[test]
    fn applies_parameters_only_on_change() {
        let log = Log::default();
        let (mut devices, mut services) = registries(&[1], &[ServiceKind::CooperativeAwareness], &log);
        let node = NodeId::new(1);
        let mut tx = TxTracker::new();
        tx.insert(node, TxParameters::wifi(DeviceHandle(0), 23.0, 10e6));

        let mut dcc = ReactiveDcc::default();
        let mut cbr = FixedCbr::default();
        cbr.set(node, 0.45);

        for _ in 0..2 {
            let mut ctx = DccContext {
                cbr: &cbr,
                devices: &mut devices,
                services: &mut services,
                tx_tracker: &mut tx,
            };
            dcc.on_tick(&mut ctx);
        }

        assert_eq!(dcc.state(node), Some(ReactiveState::Active2));
        assert_eq!(
            *log.borrow(),
            vec![
                Applied::TxPower(node, 20.0),
                Applied::Sensitivity(node, -95.0),
                Applied::Interval(node, ServiceKind::CooperativeAwareness, 400),
            ]
        );
        assert_eq!(tx.get(node).unwrap().tx_power_dbm, 20.0);
    }

    #[test]
    fn unregistered_nodes_are_skipped() {
        let log = Log::default();
        let (mut devices, mut services) = registries(&[], &[], &log);
        let mut tx = TxTracker::new();
        let mut cbr = FixedCbr::default();
        cbr.set(NodeId::new(9), 0.9);

        let mut dcc = ReactiveDcc::default();
        let mut ctx = DccContext {
            cbr: &cbr,
            devices: &mut devices,
            services: &mut services,
            tx_tracker: &mut tx,
        };
        dcc.on_tick(&mut ctx);
        assert_eq!(dcc.state(NodeId::new(9)), Some(ReactiveState::Restrictive));
        assert!(log.borrow().is_empty());
    }

    proptest! {
        #[test]
        fn moves_at_most_one_level(cbrs in prop::collection::vec(0.0f64..=1.0, 2..60)) {
            let table = ReactiveTable::default();
            let mut state = table.next_state(None, cbrs[0]);
            for cbr in &cbrs[1..] {
                let next = table.next_state(Some(state), *cbr);
                prop_assert!(next.index().abs_diff(state.index()) <= 1);
                state = next;
            }
        }
    }
}
