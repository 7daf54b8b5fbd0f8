//! Adaptive DCC: a linear controller steering each station's channel share
//! `delta` toward a target CBR.

use super::{CongestionPolicy, DccContext};
use crate::network::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdaptiveParams {
    pub alpha: f64,
    pub beta: f64,
    pub cbr_target: f64,
    pub delta_max: f64,
    pub delta_min: f64,
    pub g_max: f64,
    pub g_min: f64,
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        Self {
            alpha: 0.016,
            beta: 0.0012,
            cbr_target: 0.68,
            delta_max: 0.03,
            delta_min: 0.0006,
            g_max: 0.0005,
            g_min: -0.00025,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveState {
    pub cbr_its: f64,
    pub delta: f64,
}

impl AdaptiveParams {
    pub fn initial_state(&self) -> AdaptiveState {
        AdaptiveState {
            cbr_its: 0.0,
            delta: self.delta_min,
        }
    }

    /// One control step from the two most recent raw CBR samples.
    pub fn step(&self, state: &mut AdaptiveState, current: f64, previous: f64) {
        state.cbr_its = 0.5 * state.cbr_its + 0.25 * (current + previous);

        let error = self.beta * (self.cbr_target - state.cbr_its);
        let offset = if error > 0.0 {
            error.min(self.g_max)
        } else {
            error.max(self.g_min)
        };

        state.delta = ((1.0 - self.alpha) * state.delta + offset).clamp(self.delta_min, self.delta_max);
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdaptiveDcc {
    params: AdaptiveParams,
    states: HashMap<NodeId, AdaptiveState>,
}

impl AdaptiveDcc {
    pub fn new(params: AdaptiveParams) -> Self {
        Self {
            params,
            states: HashMap::new(),
        }
    }

    pub fn state(&self, node: NodeId) -> Option<AdaptiveState> {
        self.states.get(&node).copied()
    }
}

impl CongestionPolicy for AdaptiveDcc {
    fn on_tick(&mut self, ctx: &mut DccContext<'_>) {
        for node in ctx.cbr.sampled_nodes() {
            let raw = ctx.cbr.raw_cbr(node);
            let Some((&current, rest)) = raw.split_last() else {
                continue;
            };
            let previous = rest.last().copied().unwrap_or(0.0);

            let state = self
                .states
                .entry(node)
                .or_insert_with(|| self.params.initial_state());
            self.params.step(state, current, previous);

            for (_, service) in ctx.services.for_node(node) {
                service.set_adaptive_delta(state.delta);
            }
            debug!("Node {} cbr_its {:.4} delta {:.5}", node, state.cbr_its, state.delta);
        }
    }

    fn name(&self) -> &str {
        "adaptive"
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
    use crate::tx_tracker::TxTracker;
    use proptest::prelude::*;

    #[test]
    fn idle_channel_grows_delta() {
        let p = AdaptiveParams::default();
        let mut state = p.initial_state();
        p.step(&mut state, 0.0, 0.0);
        // offset is capped at g_max
        let expected = (1.0 - p.alpha) * p.delta_min + p.g_max;
        assert!((state.delta - expected).abs() < 1e-15);
        assert_eq!(state.cbr_its, 0.0);
    }

    #[test]
    fn saturated_channel_pins_delta_to_minimum() {
        let p = AdaptiveParams::default();
        let mut state = AdaptiveState {
            cbr_its: 0.9,
            delta: p.delta_max,
        };
        for _ in 0..2000 {
            p.step(&mut state, 1.0, 1.0);
        }
        assert_eq!(state.delta, p.delta_min);
        assert!((state.cbr_its - 1.0).abs() < 1e-9);
    }

    #[test]
    fn missing_previous_sample_counts_as_zero() {
        let p = AdaptiveParams::default();
        let mut state = p.initial_state();
        p.step(&mut state, 0.8, 0.0);
        assert!((state.cbr_its - 0.2).abs() < 1e-15);
    }

    #[test]
    fn pushes_delta_to_every_service() {
        let log = Log::default();
        let kinds = [ServiceKind::CooperativeAwareness, ServiceKind::CollectivePerception];
        let (mut devices, mut services) = registries(&[1], &kinds, &log);
        let mut tx = TxTracker::new();
        let node = NodeId::new(1);
        let mut cbr = FixedCbr::default();
        cbr.push_raw(node, 0.4);
        cbr.push_raw(node, 0.6);

        let mut dcc = AdaptiveDcc::default();
        let mut ctx = DccContext {
            cbr: &cbr,
            devices: &mut devices,
            services: &mut services,
            tx_tracker: &mut tx,
        };
        dcc.on_tick(&mut ctx);

        let state = dcc.state(node).unwrap();
        assert!((state.cbr_its - 0.25).abs() < 1e-15);
        assert_eq!(
            *log.borrow(),
            vec![
                Applied::Delta(node, ServiceKind::CooperativeAwareness, state.delta),
                Applied::Delta(node, ServiceKind::CollectivePerception, state.delta),
            ]
        );
    }

    proptest! {
        #[test]
        fn delta_stays_within_bounds(samples in prop::collection::vec(0.0f64..=1.0, 1..200)) {
            let p = AdaptiveParams::default();
            let mut state = p.initial_state();
            let mut previous = 0.0;
            for current in samples {
                p.step(&mut state, current, previous);
                prop_assert!(state.delta >= p.delta_min && state.delta <= p.delta_max);
                previous = current;
            }
        }
    }
}
