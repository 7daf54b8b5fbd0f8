// Crude range model, good enough to load the channel. Plenty of magic numbers.

use super::config::WorkloadConfig;
use crate::dcc::{DeviceRegistry, GenerationService, RadioDevice, ServiceKind, ServiceRegistry};
use crate::error::{Error, Result};
use crate::metrics::ChannelTechnology;
use crate::mobility::{GeoPoint, StaticOracle};
use crate::network::{Fingerprint, NodeId, StationClass};
use crate::scheduler::{Event, EventQueue};
use crate::tx_tracker::{DeviceHandle, RadioTechnology, TxParameters, TxTracker};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

/// Center of the synthetic scenario.
pub const ORIGIN: GeoPoint = GeoPoint::new(45.0703, 7.6869);

const SPEED_OF_LIGHT: f64 = 299_792_458.0;
const MIN_INTERVAL_MS: u64 = 100;
const MAX_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct SimStation {
    pub id: NodeId,
    pub class: StationClass,
    pub position: GeoPoint,
    pub interferer: bool,
    pub tx_power_dbm: f64,
    pub sensitivity_dbm: f64,
    pub generation_interval_ms: u64,
    /// Set once adaptive DCC has spoken; overrides the fixed interval.
    pub delta: Option<f64>,
    sequence: u32,
}

impl SimStation {
    /// Interval until the next message, honouring the adaptive channel share if any.
    pub fn next_interval_ms(&self, airtime: Duration) -> u64 {
        match self.delta {
            Some(delta) if delta > 0.0 => {
                let ms = airtime.as_secs_f64() * 1000.0 / delta;
                (ms.round() as u64).clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS)
            }
            _ => self.generation_interval_ms,
        }
    }
}

/// Shared handle; one clone sits in each DCC registry, one in the workload.
#[derive(Debug, Clone)]
pub struct StationHandle(Rc<RefCell<SimStation>>);

impl StationHandle {
    pub fn id(&self) -> NodeId {
        self.0.borrow().id
    }

    pub fn snapshot(&self) -> SimStation {
        self.0.borrow().clone()
    }
}

impl RadioDevice for StationHandle {
    fn set_tx_power_dbm(&mut self, dbm: f64) {
        self.0.borrow_mut().tx_power_dbm = dbm;
    }

    fn set_rx_sensitivity_dbm(&mut self, dbm: f64) {
        self.0.borrow_mut().sensitivity_dbm = dbm;
    }
}

impl GenerationService for StationHandle {
    fn set_generation_interval_ms(&mut self, ms: u64) {
        self.0.borrow_mut().generation_interval_ms = ms;
    }

    fn set_adaptive_delta(&mut self, delta: f64) {
        self.0.borrow_mut().delta = Some(delta);
    }
}

pub struct Workload {
    config: WorkloadConfig,
    technology: ChannelTechnology,
    stations: Vec<StationHandle>,
    rng: StdRng,
    access_delay: Exp<f64>,
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workload")
            .field("stations", &self.stations.len())
            .field("technology", &self.technology)
            .finish()
    }
}

impl Workload {
    pub fn new(config: WorkloadConfig, technology: ChannelTechnology, seed: u64) -> Result<Self> {
        if config.mean_access_delay_ms <= 0.0 {
            return Err(Error::InvalidConfig("mean access delay must be greater than 0".into()));
        }
        if config.generation_interval_ms == 0 {
            return Err(Error::InvalidConfig("generation interval must be greater than 0".into()));
        }
        let access_delay = Exp::new(1.0 / config.mean_access_delay_ms)
            .map_err(|e| Error::InvalidConfig(format!("access delay distribution: {e}")))?;
        let mut rng = StdRng::seed_from_u64(seed);

        let classes = std::iter::repeat_n((StationClass::Vehicle, false), config.vehicles as usize)
            .chain(std::iter::repeat_n((StationClass::Pedestrian, false), config.pedestrians as usize))
            .chain(std::iter::repeat_n((StationClass::RoadSideUnit, false), config.road_side_units as usize))
            .chain(std::iter::repeat_n((StationClass::Vehicle, true), config.interferers as usize));

        let half = config.area_meters / 2.0;
        let stations = classes
            .enumerate()
            .map(|(i, (class, interferer))| {
                let north = rng.gen_range(-half..=half);
                let east = rng.gen_range(-half..=half);
                StationHandle(Rc::new(RefCell::new(SimStation {
                    id: NodeId::new(i as u64 + 1),
                    class,
                    position: ORIGIN.offset_meters(north, east),
                    interferer,
                    tx_power_dbm: config.tx_power_dbm,
                    sensitivity_dbm: config.sensitivity_dbm,
                    generation_interval_ms: config.generation_interval_ms,
                    delta: None,
                    sequence: 0,
                })))
            })
            .collect();

        Ok(Self {
            config,
            technology,
            stations,
            rng,
            access_delay,
        })
    }

    pub fn stations(&self) -> &[StationHandle] {
        &self.stations
    }

    pub fn station(&self, node: NodeId) -> Option<&StationHandle> {
        self.stations.iter().find(|s| s.id() == node)
    }

    pub fn interferers(&self) -> Vec<NodeId> {
        self.stations
            .iter()
            .filter(|s| s.0.borrow().interferer)
            .map(StationHandle::id)
            .collect()
    }

    pub fn oracle(&self) -> StaticOracle {
        let mut oracle = StaticOracle::new();
        for handle in &self.stations {
            let s = handle.0.borrow();
            oracle.insert(s.id, s.class, s.position);
        }
        oracle
    }

    fn services_of(class: StationClass) -> &'static [ServiceKind] {
        match class {
            StationClass::Vehicle => &[ServiceKind::CooperativeAwareness, ServiceKind::CollectivePerception],
            StationClass::Pedestrian => &[ServiceKind::VruAwareness],
            StationClass::RoadSideUnit => &[ServiceKind::CollectivePerception],
        }
    }

    /// Registries handing DCC a view of every non-interfering station.
    pub fn registries(&self) -> (DeviceRegistry, ServiceRegistry) {
        let mut devices = DeviceRegistry::new();
        let mut services = ServiceRegistry::new();
        for handle in &self.stations {
            let station = handle.snapshot();
            if station.interferer {
                continue;
            }
            devices.register(station.id, Box::new(handle.clone()));
            for &kind in Self::services_of(station.class) {
                services.register(station.id, kind, Box::new(handle.clone()));
            }
        }
        (devices, services)
    }

    pub fn register_tx(&self, tracker: &mut TxTracker) {
        for (i, handle) in self.stations.iter().enumerate() {
            let s = handle.snapshot();
            let device = DeviceHandle(i as u32);
            let params = match self.technology {
                ChannelTechnology::Wifi80211p => TxParameters::wifi(device, s.tx_power_dbm, self.config.bandwidth_hz),
                ChannelTechnology::Nr => TxParameters::cellular(
                    RadioTechnology::Nr,
                    device,
                    s.tx_power_dbm,
                    self.config.bandwidth_hz,
                    self.config.resource_blocks,
                ),
            };
            tracker.insert(s.id, params);
        }
    }

    /// First generation of every service, spread over one interval.
    pub fn schedule_initial(&mut self, queue: &mut EventQueue) {
        for handle in &self.stations {
            let s = handle.snapshot();
            for &service in Self::services_of(s.class) {
                let jitter = self.rng.gen_range(0..s.generation_interval_ms.max(1));
                queue.schedule_in(Duration::from_millis(jitter), Event::Generate { node: s.id, service });
            }
        }
    }

    fn airtime(&self) -> Duration {
        Duration::from_micros(self.config.airtime_us)
    }

    /// Radio range for a link, scaled from the nominal range by the link budget
    /// margin relative to the default tx power and sensitivity.
    fn range_m(&self, tx_power_dbm: f64, sensitivity_dbm: f64) -> f64 {
        let margin_db = (tx_power_dbm - self.config.tx_power_dbm) + (self.config.sensitivity_dbm - sensitivity_dbm);
        self.config.nominal_range_meters * 10f64.powf(margin_db / 20.0)
    }

    /// A generation service fired: broadcast one message and schedule the next.
    pub fn on_generate(&mut self, queue: &mut EventQueue, node: NodeId, service: ServiceKind) {
        let Some(handle) = self.station(node).cloned() else {
            return;
        };
        let airtime = self.airtime();
        let (sender, sequence) = {
            let mut s = handle.0.borrow_mut();
            s.sequence = s.sequence.wrapping_add(1);
            (s.clone(), s.sequence)
        };

        let message_type = service.message_type();
        let mut payload = Vec::with_capacity(14);
        payload.extend_from_slice(&message_type.code().to_be_bytes());
        payload.extend_from_slice(&sender.id.value().to_be_bytes());
        payload.extend_from_slice(&sequence.to_be_bytes());
        let fingerprint = Fingerprint::from_bytes(&payload);

        queue.schedule_in(
            Duration::ZERO,
            Event::PacketQueued {
                fingerprint: fingerprint.clone(),
                position: sender.position,
                sender: sender.id,
                class: sender.class,
                message_type,
            },
        );

        if self.technology == ChannelTechnology::Nr {
            queue.schedule_in(
                Duration::ZERO,
                Event::ChannelOccupied {
                    transmitter: sender.id,
                    duration: airtime,
                },
            );
        }

        let mut delivered = 0;
        for other in &self.stations {
            let receiver = other.snapshot();
            if receiver.id == sender.id {
                continue;
            }
            let distance = sender.position.distance_to(&receiver.position);
            let range = self.range_m(sender.tx_power_dbm, receiver.sensitivity_dbm);

            // Carrier sense reaches further than decoding.
            if self.technology == ChannelTechnology::Wifi80211p && distance <= range * 1.5 {
                queue.schedule_in(
                    airtime,
                    Event::ChannelBusy {
                        node: receiver.id,
                        duration: airtime,
                    },
                );
            }

            if distance > range {
                continue;
            }
            let p_success = (1.0 - self.config.loss_probability) * (1.0 - (distance / range).powi(4));
            if self.rng.r#gen::<f64>() >= p_success {
                continue;
            }

            let access_ms = self.access_delay.sample(&mut self.rng);
            let delay = airtime + Duration::from_secs_f64(distance / SPEED_OF_LIGHT + access_ms / 1000.0);
            queue.schedule_in(
                delay,
                Event::PacketDelivered {
                    fingerprint: fingerprint.clone(),
                    receiver: receiver.id,
                },
            );
            delivered += 1;
        }

        debug!("Node {} {} #{} reaches {} stations", sender.id, message_type, sequence, delivered);

        let next = Duration::from_millis(sender.next_interval_ms(airtime));
        queue.schedule_in(next, Event::Generate { node, service });
    }
}
