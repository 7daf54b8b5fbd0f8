pub mod cbr;
pub mod logger;
pub mod prr;
pub mod stats;

pub use cbr::{CbrTracker, ChannelTechnology};
pub use prr::PrrSupervisor;
pub use stats::{RunningMean, ScopedStats, StatsBlock};

use crate::error::Result;
use crate::mobility::{GeoPoint, PositionOracle};
use crate::network::{Fingerprint, MessageType, NodeId, StationClass};
use crate::scheduler::{EventQueue, SimTime};
use crate::simulation::SimConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// End-of-run numbers for one run, or the mean of several.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub label: String,
    pub policy: String,
    pub sim_time_s: f64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub avg_prr: f64,
    pub avg_latency_ms: f64,
    pub avg_baseline: f64,
    pub avg_cbr: f64,
    pub prr_samples: u64,
}

impl RunSummary {
    /// Field-wise mean of repeated runs; label and policy come from the first.
    pub fn average(runs: &[RunSummary]) -> Option<RunSummary> {
        let first = runs.first()?;
        let n = runs.len() as f64;
        let mean = |f: fn(&RunSummary) -> f64| runs.iter().map(f).sum::<f64>() / n;
        let mean_u64 = |f: fn(&RunSummary) -> u64| (runs.iter().map(f).sum::<u64>() as f64 / n).round() as u64;

        Some(RunSummary {
            label: first.label.clone(),
            policy: first.policy.clone(),
            sim_time_s: mean(|r| r.sim_time_s),
            packets_sent: mean_u64(|r| r.packets_sent),
            packets_received: mean_u64(|r| r.packets_received),
            avg_prr: mean(|r| r.avg_prr),
            avg_latency_ms: mean(|r| r.avg_latency_ms),
            avg_baseline: mean(|r| r.avg_baseline),
            avg_cbr: mean(|r| r.avg_cbr),
            prr_samples: mean_u64(|r| r.prr_samples),
        })
    }
}

/// PRR/latency supervision and CBR tracking for one run.
#[derive(Debug)]
pub struct MeasurementEngine {
    pub prr: PrrSupervisor,
    pub cbr: CbrTracker,
    verbose: bool,
    cbr_file: Option<PathBuf>,
}

impl MeasurementEngine {
    pub fn new(prr: PrrSupervisor, cbr: CbrTracker) -> Self {
        Self {
            prr,
            cbr,
            verbose: false,
            cbr_file: None,
        }
    }

    pub fn from_config(config: &SimConfig) -> Result<Self> {
        let mut prr = PrrSupervisor::new(config.baseline_radius_meters).with_timeout(config.prr_timeout()?);
        prr.set_verbose(config.verbose_stdout);

        let cbr = CbrTracker::new(Duration::from_millis(config.cbr_window_ms), config.cbr_alpha)?
            .with_technology(config.technology()?);

        let mut engine = Self::new(prr, cbr);
        engine.verbose = config.verbose_stdout;
        engine.cbr_file = config.write_cbr_to_file.then(|| PathBuf::from(&config.cbr_file));
        Ok(engine)
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
        self.prr.set_verbose(verbose);
    }

    pub fn set_cbr_file(&mut self, path: Option<PathBuf>) {
        self.cbr_file = path;
    }

    pub fn set_position_oracle(&mut self, oracle: Box<dyn PositionOracle>) {
        self.prr.set_position_oracle(oracle);
    }

    pub fn signal_sent(
        &mut self,
        queue: &mut EventQueue,
        fingerprint: Fingerprint,
        position: GeoPoint,
        sender: NodeId,
        class: StationClass,
        message_type: MessageType,
    ) -> Result<()> {
        self.prr
            .signal_sent(queue, fingerprint, position, sender, class, message_type)
    }

    pub fn signal_received(&mut self, now: SimTime, fingerprint: &Fingerprint, receiver: NodeId) -> Result<()> {
        self.prr.signal_received(now, fingerprint, receiver)
    }

    pub fn compute_prr(&mut self, fingerprint: &Fingerprint) -> Result<Option<f64>> {
        self.prr.compute_prr(fingerprint)
    }

    pub fn log_last_cbrs(&self) -> Result<()> {
        self.cbr.log_last_cbrs(self.verbose, self.cbr_file.as_deref())
    }

    pub fn summary(&self, label: impl Into<String>, policy: impl Into<String>, now: SimTime) -> RunSummary {
        let stats = self.prr.stats();
        RunSummary {
            label: label.into(),
            policy: policy.into(),
            sim_time_s: now.as_secs_f64(),
            packets_sent: stats.global().tx,
            packets_received: stats.global().rx,
            avg_prr: self.prr.average_prr(),
            avg_latency_ms: self.prr.average_latency_ms(),
            avg_baseline: stats.global().baseline.mean(),
            avg_cbr: self.cbr.average_latest().unwrap_or(0.0),
            prr_samples: stats.global().prr.count(),
        }
    }

    /// Release every pending PRR timer.
    pub fn shutdown(&mut self, queue: &mut EventQueue) {
        let cancelled = self.prr.shutdown(queue);
        info!("Measurement engine stopped, {} PRR timers cancelled", cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(prr: f64, sent: u64) -> RunSummary {
        RunSummary {
            label: "reactive_1".into(),
            policy: "reactive".into(),
            sim_time_s: 10.0,
            packets_sent: sent,
            avg_prr: prr,
            ..Default::default()
        }
    }

    #[test]
    fn average_of_repetitions() {
        let avg = RunSummary::average(&[summary(0.8, 10), summary(0.6, 13)]).unwrap();
        assert!((avg.avg_prr - 0.7).abs() < 1e-12);
        assert_eq!(avg.packets_sent, 12);
        assert_eq!(avg.label, "reactive_1");
        assert!(RunSummary::average(&[]).is_none());
    }

    #[test]
    fn engine_from_default_config() {
        let engine = MeasurementEngine::from_config(&SimConfig::default()).unwrap();
        assert_eq!(engine.prr.baseline_m(), 150.0);
        assert_eq!(engine.prr.timeout(), Duration::from_secs(3));
        assert_eq!(engine.cbr.window(), Duration::from_millis(100));
        assert_eq!(engine.cbr.technology(), Some(ChannelTechnology::Wifi80211p));
    }
}
