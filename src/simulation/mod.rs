pub mod config;
pub mod replay;
pub mod workload;

pub use config::{SimConfig, WorkloadConfig};
pub use replay::Trace;
pub use workload::Workload;

use crate::dcc::{DccController, DeviceRegistry, PolicyRegistry, ServiceRegistry};
use crate::error::Result;
use crate::metrics::{MeasurementEngine, RunSummary};
use crate::mobility::PositionOracle;
use crate::scheduler::{Event, EventQueue, SimTime};
use crate::tx_tracker::TxTracker;
use indicatif::ProgressBar;
use tracing::{debug, info};

/// One run: the event queue plus everything that reacts to its events.
#[derive(Debug)]
pub struct Simulation {
    config: SimConfig,
    queue: EventQueue,
    pub engine: MeasurementEngine,
    pub controller: Option<DccController>,
    pub tx_tracker: TxTracker,
    workload: Option<Workload>,
    end: SimTime,
    started: bool,
    events: u64,
}

impl Simulation {
    /// Bare run with no stations; feed events through [`Simulation::queue_mut`].
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let engine = MeasurementEngine::from_config(&config)?;
        Ok(Self {
            end: config.end_time(),
            config,
            queue: EventQueue::new(),
            engine,
            controller: None,
            tx_tracker: TxTracker::new(),
            workload: None,
            started: false,
            events: 0,
        })
    }

    /// Run driven by the synthetic workload described in the config.
    pub fn with_workload(config: SimConfig) -> Result<Self> {
        let mut sim = Self::new(config)?;
        let workload = Workload::new(sim.config.workload.clone(), sim.config.technology()?, sim.config.seed)?;

        let oracle = workload.oracle();
        sim.engine.cbr.watch_all(oracle.known_nodes().into_iter().map(|(id, _)| id));
        sim.engine.set_position_oracle(Box::new(oracle));
        for node in workload.interferers() {
            sim.engine.prr.add_excluded(node);
        }
        workload.register_tx(&mut sim.tx_tracker);

        let (devices, services) = workload.registries();
        sim.controller = sim.build_controller(devices, services)?;
        sim.workload = Some(workload);
        Ok(sim)
    }

    /// Run fed by a recorded trace; DCC decisions are computed but reach no device.
    pub fn from_trace(config: SimConfig, trace: &Trace) -> Result<Self> {
        let mut sim = Self::new(config)?;
        sim.engine.cbr.watch_all(trace.nodes());
        sim.engine.set_position_oracle(Box::new(trace.oracle.clone()));
        for node in &trace.excluded {
            sim.engine.prr.add_excluded(*node);
        }
        trace.schedule(&mut sim.queue);
        sim.controller = sim.build_controller(DeviceRegistry::new(), ServiceRegistry::new())?;
        Ok(sim)
    }

    fn build_controller(&self, devices: DeviceRegistry, services: ServiceRegistry) -> Result<Option<DccController>> {
        let Some(kind) = self.config.policy_kind()? else {
            return Ok(None);
        };
        let policy = PolicyRegistry::global().create(kind.name(), &self.config.dcc_settings())?;
        Ok(Some(
            DccController::new()
                .with_interval(self.config.dcc_interval())
                .with_policy(policy)
                .with_devices(devices)
                .with_services(services),
        ))
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn queue_mut(&mut self) -> &mut EventQueue {
        &mut self.queue
    }

    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    pub fn end_time(&self) -> SimTime {
        self.end
    }

    pub fn workload(&self) -> Option<&Workload> {
        self.workload.as_ref()
    }

    pub fn policy_name(&self) -> &str {
        self.controller.as_ref().map_or("none", |c| c.policy_name())
    }

    /// Arm the periodic timers and the first generation of every station.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.engine.cbr.start(&mut self.queue, Some(self.end))?;
        if let Some(controller) = self.controller.as_mut() {
            controller.start(&mut self.queue, &self.engine.cbr)?;
        }
        if let Some(workload) = self.workload.as_mut() {
            workload.schedule_initial(&mut self.queue);
        }
        self.started = true;
        info!(
            "Run {} started: {} s, DCC {}, {}",
            self.config.name,
            self.config.simulation_time_seconds,
            self.policy_name(),
            self.config.channel_technology
        );
        Ok(())
    }

    /// Process the next event if it is due before the end of the run.
    /// Returns false once nothing is left to do.
    pub fn step(&mut self) -> Result<bool> {
        match self.queue.peek_time() {
            Some(time) if time <= self.end => {}
            _ => return Ok(false),
        }
        let Some((_, event)) = self.queue.pop() else {
            return Ok(false);
        };
        self.events += 1;
        self.dispatch(event)?;
        Ok(true)
    }

    fn dispatch(&mut self, event: Event) -> Result<()> {
        let now = self.queue.now();
        match event {
            Event::ComputePrr(fingerprint) => {
                self.engine.compute_prr(&fingerprint)?;
            }
            Event::CbrCheck => self.engine.cbr.tick(&mut self.queue),
            Event::DccTick => {
                if let Some(controller) = self.controller.as_mut() {
                    controller.tick(&mut self.queue, &self.engine.cbr, &mut self.tx_tracker);
                }
            }
            Event::LogCbr => self.engine.log_last_cbrs()?,
            Event::PacketQueued {
                fingerprint,
                position,
                sender,
                class,
                message_type,
            } => {
                self.engine
                    .signal_sent(&mut self.queue, fingerprint, position, sender, class, message_type)?;
            }
            Event::PacketDelivered { fingerprint, receiver } => {
                self.engine.signal_received(now, &fingerprint, receiver)?;
            }
            Event::ChannelBusy { node, duration } => {
                self.engine.cbr.record_busy_interval(node, now - duration, duration);
            }
            Event::ChannelOccupied { transmitter, duration } => {
                self.engine.cbr.record_nr_occupancy(transmitter, now, duration);
            }
            Event::Generate { node, service } => {
                if let Some(workload) = self.workload.as_mut() {
                    workload.on_generate(&mut self.queue, node, service);
                }
            }
        }
        Ok(())
    }

    /// Step until the end of the run, advancing `progress` in whole simulated seconds.
    pub fn run_until_end(&mut self, progress: Option<&ProgressBar>) -> Result<()> {
        let mut shown = 0;
        while self.step()? {
            if let Some(pb) = progress {
                let secs = self.now().as_secs_f64() as u64;
                if secs > shown {
                    pb.inc(secs - shown);
                    shown = secs;
                }
            }
        }
        self.queue.advance_to(self.end);
        Ok(())
    }

    /// Cancel everything still pending.
    pub fn shutdown(&mut self) {
        self.engine.shutdown(&mut self.queue);
        let dropped = self.queue.clear();
        debug!("{} events dropped at shutdown", dropped);
    }

    pub fn summary(&self) -> RunSummary {
        self.engine.summary(&self.config.name, self.policy_name(), self.now())
    }

    pub fn events_processed(&self) -> u64 {
        self.events
    }

    /// Start, run to the end and tear down.
    pub fn run(&mut self, progress: Option<&ProgressBar>) -> Result<RunSummary> {
        self.start()?;
        self.run_until_end(progress)?;
        self.shutdown();
        let summary = self.summary();
        info!(
            "Run {} finished after {} events: PRR {:.3}, latency {:.3} ms, CBR {:.3}",
            summary.label, self.events, summary.avg_prr, summary.avg_latency_ms, summary.avg_cbr
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(policy: &str) -> SimConfig {
        let mut config = SimConfig::default()
            .with_policy(policy)
            .with_duration(5.0)
            .with_vehicles(12)
            .with_seed(4);
        config.workload.area_meters = 200.0;
        config
    }

    #[test]
    fn workload_run_produces_measurements() {
        let mut sim = Simulation::with_workload(small("none")).unwrap();
        let summary = sim.run(None).unwrap();

        assert!(summary.packets_sent > 0);
        assert!(summary.prr_samples > 0);
        assert!((0.0..=1.0).contains(&summary.avg_prr));
        assert!(summary.avg_latency_ms > 0.0);
        assert!(summary.avg_cbr > 0.0);
        assert_eq!(summary.policy, "none");
        assert_eq!(sim.engine.prr.pending_count(), 0);
    }

    #[test]
    fn reactive_run_throttles_a_saturated_channel() {
        let mut config = small("none");
        config.workload.vehicles = 60;
        config.workload.airtime_us = 2000;

        let baseline = Simulation::with_workload(config.clone()).unwrap().run(None).unwrap();
        let mut sim = Simulation::with_workload(config.with_policy("reactive")).unwrap();
        let throttled = sim.run(None).unwrap();

        assert!(sim.controller.as_ref().unwrap().ticks() > 0);
        assert_eq!(throttled.policy, "reactive");
        assert!(throttled.packets_sent < baseline.packets_sent);
        assert!(sim.tx_tracker.by_technology(crate::tx_tracker::RadioTechnology::Wifi80211p).count() > 0);
    }

    #[test]
    fn same_seed_same_summary() {
        let a = Simulation::with_workload(small("adaptive")).unwrap().run(None).unwrap();
        let b = Simulation::with_workload(small("adaptive")).unwrap().run(None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn cbr_report_includes_the_final_window() {
        let path = std::env::temp_dir().join(format!("v2xmeter_last_window_{}.txt", std::process::id()));
        let mut config = SimConfig::default().with_duration(1.0);
        config.write_cbr_to_file = true;
        config.cbr_file = path.to_string_lossy().into_owned();

        let node = crate::network::NodeId::new(1);
        let mut sim = Simulation::new(config).unwrap();
        sim.engine.cbr.watch(node);
        sim.queue_mut().schedule_at(
            SimTime::from_millis(950),
            Event::ChannelBusy {
                node,
                duration: std::time::Duration::from_millis(50),
            },
        );
        sim.run(None).unwrap();
        let report = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(sim.engine.cbr.latest(node), Some(0.25));
        assert_eq!(report, "CBR last values for each node:\nNode 1: 25.00%\n");
    }

    #[test]
    fn unknown_policy_is_fatal() {
        let config = SimConfig::default().with_policy("limeric");
        assert!(Simulation::with_workload(config).is_err());
    }
}
