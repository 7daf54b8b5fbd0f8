//! Positions and the oracle the engine queries them from.

use crate::network::{NodeId, StationClass};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean Earth radius used by the great-circle distance.
pub const EARTH_MEAN_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Haversine distance in meters.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_MEAN_RADIUS_M * a.sqrt().min(1.0).asin()
    }

    /// Point displaced by `north_m` / `east_m` meters on the local tangent plane.
    pub fn offset_meters(&self, north_m: f64, east_m: f64) -> GeoPoint {
        let lat = self.lat + (north_m / EARTH_MEAN_RADIUS_M).to_degrees();
        let lon = self.lon + (east_m / (EARTH_MEAN_RADIUS_M * self.lat.to_radians().cos())).to_degrees();
        GeoPoint { lat, lon }
    }
}

/// Read-only view of where every station currently is.
pub trait PositionOracle {
    fn position(&self, node: NodeId) -> Option<GeoPoint>;
    fn known_nodes(&self) -> Vec<(NodeId, StationClass)>;
}

/// Oracle backed by a fixed table, updated by whoever drives the run.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    nodes: BTreeMap<NodeId, (StationClass, GeoPoint)>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeId, class: StationClass, position: GeoPoint) {
        self.nodes.insert(node, (class, position));
    }

    pub fn with_node(mut self, node: NodeId, class: StationClass, position: GeoPoint) -> Self {
        self.insert(node, class, position);
        self
    }

    pub fn remove(&mut self, node: NodeId) -> bool {
        self.nodes.remove(&node).is_some()
    }

    pub fn class_of(&self, node: NodeId) -> Option<StationClass> {
        self.nodes.get(&node).map(|(class, _)| *class)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl PositionOracle for StaticOracle {
    fn position(&self, node: NodeId) -> Option<GeoPoint> {
        self.nodes.get(&node).map(|(_, pos)| *pos)
    }

    fn known_nodes(&self) -> Vec<(NodeId, StationClass)> {
        self.nodes.iter().map(|(id, (class, _))| (*id, *class)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_round_trip_through_haversine() {
        let origin = GeoPoint::new(45.07, 7.68);
        let north = origin.offset_meters(100.0, 0.0);
        let east = origin.offset_meters(0.0, 200.0);

        assert!((origin.distance_to(&north) - 100.0).abs() < 1e-6);
        assert!((origin.distance_to(&east) - 200.0).abs() < 0.01);
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = GeoPoint::new(0.0, 0.0).distance_to(&GeoPoint::new(1.0, 0.0));
        assert!((d - 111_194.93).abs() < 1.0, "got {d}");
    }

    #[test]
    fn oracle_lists_nodes_with_class() {
        let oracle = StaticOracle::new()
            .with_node(NodeId::new(2), StationClass::Pedestrian, GeoPoint::new(0.0, 0.0))
            .with_node(NodeId::new(1), StationClass::Vehicle, GeoPoint::new(0.0, 0.001));

        assert_eq!(
            oracle.known_nodes(),
            vec![
                (NodeId::new(1), StationClass::Vehicle),
                (NodeId::new(2), StationClass::Pedestrian),
            ]
        );
        assert_eq!(oracle.class_of(NodeId::new(2)), Some(StationClass::Pedestrian));
    }
}
