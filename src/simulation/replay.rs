//! Replay of radio-layer events recorded by an external simulator.
//!
//! A trace is a CSV file, one event per row:
//!
//! ```text
//! time_ms,kind,node,class,message_type,fingerprint,lat,lon,duration_us
//! 0,node,1,vehicle,,,45.0703,7.6869,
//! 10,sent,1,vehicle,cam,0002000000000000000100000001,45.0703,7.6869,
//! 20,received,2,,,0002000000000000000100000001,,,
//! 30,busy,2,,,,,,400
//! ```
//!
//! `node` rows declare a station for the position oracle, `exclude` rows add
//! it to the exclusion set, `occupied` rows are NR sidelink allocations.

use crate::mobility::{GeoPoint, StaticOracle};
use crate::network::{Fingerprint, MessageType, NodeId, StationClass};
use crate::scheduler::{Event, EventQueue, SimTime};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Node,
    Exclude,
    Sent,
    Received,
    Busy,
    Occupied,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraceRecord {
    pub time_ms: f64,
    pub kind: RecordKind,
    pub node: u64,
    pub class: Option<StationClass>,
    pub message_type: Option<MessageType>,
    pub fingerprint: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub duration_us: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub oracle: StaticOracle,
    pub excluded: Vec<NodeId>,
    events: Vec<(SimTime, Event)>,
}

impl Trace {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).with_context(|| format!("opening trace {}", path.display()))?;
        Self::from_reader(file)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut trace = Trace::default();
        for (row, record) in csv.deserialize::<TraceRecord>().enumerate() {
            let record = record.with_context(|| format!("trace row {}", row + 1))?;
            trace.push(record).with_context(|| format!("trace row {}", row + 1))?;
        }
        Ok(trace)
    }

    fn push(&mut self, record: TraceRecord) -> Result<()> {
        if record.time_ms < 0.0 {
            bail!("negative timestamp {}", record.time_ms);
        }
        let time = SimTime::from_nanos((record.time_ms * 1e6).round() as u64);
        let node = NodeId::new(record.node);
        let position = match (record.lat, record.lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        };
        let duration = record.duration_us.map(Duration::from_micros);

        match record.kind {
            RecordKind::Node => {
                let Some(position) = position else {
                    bail!("node {} declared without a position", node);
                };
                self.oracle.insert(node, record.class.unwrap_or_default(), position);
            }
            RecordKind::Exclude => self.excluded.push(node),
            RecordKind::Sent => {
                let (Some(fingerprint), Some(position)) = (record.fingerprint, position) else {
                    bail!("sent row needs a fingerprint and a position");
                };
                let class = record
                    .class
                    .or_else(|| self.oracle.class_of(node))
                    .unwrap_or_default();
                self.events.push((
                    time,
                    Event::PacketQueued {
                        fingerprint: Fingerprint::from(fingerprint),
                        position,
                        sender: node,
                        class,
                        message_type: record.message_type.unwrap_or(MessageType::Unsupported),
                    },
                ));
            }
            RecordKind::Received => {
                let Some(fingerprint) = record.fingerprint else {
                    bail!("received row needs a fingerprint");
                };
                self.events.push((
                    time,
                    Event::PacketDelivered {
                        fingerprint: Fingerprint::from(fingerprint),
                        receiver: node,
                    },
                ));
            }
            RecordKind::Busy => {
                let Some(duration) = duration else {
                    bail!("busy row needs duration_us");
                };
                self.events.push((time, Event::ChannelBusy { node, duration }));
            }
            RecordKind::Occupied => {
                let Some(duration) = duration else {
                    bail!("occupied row needs duration_us");
                };
                self.events.push((
                    time,
                    Event::ChannelOccupied {
                        transmitter: node,
                        duration,
                    },
                ));
            }
        }
        Ok(())
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        use crate::mobility::PositionOracle;
        self.oracle.known_nodes().into_iter().map(|(id, _)| id).collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Time of the last recorded event.
    pub fn span(&self) -> SimTime {
        self.events.iter().map(|(t, _)| *t).max().unwrap_or(SimTime::ZERO)
    }

    /// Put every recorded event on the queue, keeping file order for ties.
    pub fn schedule(&self, queue: &mut EventQueue) {
        for (time, event) in &self.events {
            queue.schedule_at(*time, event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = "\
time_ms,kind,node,class,message_type,fingerprint,lat,lon,duration_us
0,node,1,vehicle,,,0.0,0.0,
0,node,2,pedestrian,,,0.0009,0.0,
0,exclude,3,,,,,,
10,sent,1,,cam,aa01,0.0,0.0,
20,received,2,,,aa01,,,
30,busy,2,,,,,,400
";

    #[test]
    fn parses_rows() {
        let trace = Trace::from_reader(TRACE.as_bytes()).unwrap();
        assert_eq!(trace.nodes(), vec![NodeId::new(1), NodeId::new(2)]);
        assert_eq!(trace.oracle.class_of(NodeId::new(2)), Some(StationClass::Pedestrian));
        assert_eq!(trace.excluded, vec![NodeId::new(3)]);
        assert_eq!(trace.event_count(), 3);
        assert_eq!(trace.span(), SimTime::from_millis(30));

        let mut queue = EventQueue::new();
        trace.schedule(&mut queue);
        let (time, event) = queue.pop().unwrap();
        assert_eq!(time, SimTime::from_millis(10));
        assert!(matches!(
            event,
            Event::PacketQueued { class: StationClass::Vehicle, message_type: MessageType::Cam, .. }
        ));
    }

    #[test]
    fn incomplete_rows_are_rejected() {
        let bad = "time_ms,kind,node,class,message_type,fingerprint,lat,lon,duration_us\n5,busy,1,,,,,,\n";
        let err = Trace::from_reader(bad.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("duration_us"));
    }
}
