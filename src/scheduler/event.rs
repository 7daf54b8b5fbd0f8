use crate::dcc::ServiceKind;
use crate::mobility::GeoPoint;
use crate::network::{Fingerprint, MessageType, NodeId, StationClass};
use std::time::Duration;

/// Everything that can sit on the event queue.
#[derive(Debug, Clone)]
pub enum Event {
    /// PRR timeout for one packet.
    ComputePrr(Fingerprint),
    /// Close the current CBR sampling window.
    CbrCheck,
    /// Run one congestion control step.
    DccTick,
    /// End of run: report the last CBR value of every node.
    LogCbr,

    /// A packet left the sender's queue for the air.
    PacketQueued {
        fingerprint: Fingerprint,
        position: GeoPoint,
        sender: NodeId,
        class: StationClass,
        message_type: MessageType,
    },
    /// A packet was decoded by a receiver.
    PacketDelivered {
        fingerprint: Fingerprint,
        receiver: NodeId,
    },
    /// A node sensed the channel busy for `duration` (802.11p, past interval).
    ChannelBusy { node: NodeId, duration: Duration },
    /// A sidelink allocation occupies the channel for `duration` from now (NR).
    ChannelOccupied {
        transmitter: NodeId,
        duration: Duration,
    },

    /// Synthetic workload: a station's generation service fires.
    Generate { node: NodeId, service: ServiceKind },
}
