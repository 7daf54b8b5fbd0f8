pub mod packet;

pub use packet::{Fingerprint, PendingPacket};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of road user a station belongs to. Every statistic is partitioned
/// three ways along this enum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationClass {
    #[default]
    Vehicle,
    Pedestrian,
    RoadSideUnit,
}

impl StationClass {
    pub const ALL: [StationClass; 3] = [Self::Vehicle, Self::Pedestrian, Self::RoadSideUnit];

    pub fn name(self) -> &'static str {
        match self {
            Self::Vehicle => "vehicle",
            Self::Pedestrian => "pedestrian",
            Self::RoadSideUnit => "rsu",
        }
    }
}

/// ETSI ITS message kinds, with their `messageID` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Denm,
    Cam,
    Spatem,
    Mapem,
    Ivim,
    Srem,
    Ssem,
    Cpm,
    Vam,
    GnBeacon,
    Unsupported,
}

impl MessageType {
    pub fn code(self) -> u16 {
        match self {
            Self::Unsupported => 0,
            Self::Denm => 1,
            Self::Cam => 2,
            Self::Spatem => 4,
            Self::Mapem => 5,
            Self::Ivim => 6,
            Self::Srem => 9,
            Self::Ssem => 10,
            Self::Cpm => 14,
            Self::Vam => 16,
            Self::GnBeacon => 1000,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::Denm,
            2 => Self::Cam,
            4 => Self::Spatem,
            5 => Self::Mapem,
            6 => Self::Ivim,
            9 => Self::Srem,
            10 => Self::Ssem,
            14 => Self::Cpm,
            16 => Self::Vam,
            1000 => Self::GnBeacon,
            _ => Self::Unsupported,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Denm => "DENM",
            Self::Cam => "CAM",
            Self::Spatem => "SPATEM",
            Self::Mapem => "MAPEM",
            Self::Ivim => "IVIM",
            Self::Srem => "SREM",
            Self::Ssem => "SSEM",
            Self::Cpm => "CPM",
            Self::Vam => "VAM",
            Self::GnBeacon => "GN-beacon",
            Self::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_codes_map_back() {
        for mt in [MessageType::Cam, MessageType::Denm, MessageType::Cpm, MessageType::Vam, MessageType::GnBeacon] {
            assert_eq!(MessageType::from_code(mt.code()), mt);
        }
        assert_eq!(MessageType::from_code(200), MessageType::Unsupported);
    }
}
