pub mod dcc;
pub mod error;
pub mod metrics;
pub mod mobility;
pub mod network;
pub mod scheduler;
pub mod simulation;
pub mod tx_tracker;

pub use error::{Error, Result};
pub use metrics::{MeasurementEngine, RunSummary};
pub use simulation::{SimConfig, Simulation};

pub mod prelude {
    pub use crate::dcc::{CongestionPolicy, DccController, PolicyKind, PolicyRegistry};
    pub use crate::error::{Error, Result};
    pub use crate::metrics::{CbrTracker, ChannelTechnology, MeasurementEngine, PrrSupervisor, RunSummary};
    pub use crate::mobility::{GeoPoint, PositionOracle, StaticOracle};
    pub use crate::network::{Fingerprint, MessageType, NodeId, StationClass};
    pub use crate::scheduler::{Event, EventQueue, SimTime};
    pub use crate::simulation::{SimConfig, Simulation, Trace};
    pub use crate::tx_tracker::TxTracker;
}
