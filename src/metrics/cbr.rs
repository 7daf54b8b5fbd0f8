//! Channel Busy Ratio tracking.
//!
//! Busy time reported by the radio layer is accumulated per node over a fixed
//! window. At every window boundary the ratio `busy / window` is folded into
//! an exponential moving average and appended to the node's series:
//! `cbr = alpha * previous + (1 - alpha) * current`, the first sample taken raw.

use crate::dcc::CbrSource;
use crate::error::{Error, Result};
use crate::network::NodeId;
use crate::scheduler::{Event, EventQueue, SimTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// How the radio layer reports channel occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelTechnology {
    /// PHY state callbacks describing a busy interval that already elapsed.
    #[serde(rename = "80211p")]
    Wifi80211p,
    /// Sidelink allocations announcing how long the channel will stay busy.
    #[serde(rename = "nr")]
    Nr,
}

impl FromStr for ChannelTechnology {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "80211p" | "11p" | "wifi" => Ok(Self::Wifi80211p),
            "nr" | "nr-v2x" => Ok(Self::Nr),
            "" => Err(Error::TechnologyUnset),
            other => Err(Error::UnknownTechnology(other.to_string())),
        }
    }
}

impl fmt::Display for ChannelTechnology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wifi80211p => f.write_str("80211p"),
            Self::Nr => f.write_str("nr"),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct NodeChannel {
    /// Busy time inside the open window.
    busy: Duration,
    /// NR only: the channel stays busy for this node until then.
    busy_until: SimTime,
    smoothed: Vec<f64>,
    raw: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct CbrTracker {
    window: Duration,
    alpha: f64,
    technology: Option<ChannelTechnology>,
    nodes: BTreeMap<NodeId, NodeChannel>,
    last_check: SimTime,
    end_of_run: Option<SimTime>,
    started: bool,
    windows_closed: u64,
}

impl CbrTracker {
    pub fn new(window: Duration, alpha: f64) -> Result<Self> {
        if window.is_zero() {
            return Err(Error::InvalidConfig("CBR window must be greater than 0".into()));
        }
        if !(0.0..=1.0).contains(&alpha) {
            return Err(Error::InvalidConfig(format!("CBR alpha must be between 0 and 1, got {alpha}")));
        }
        Ok(Self {
            window,
            alpha,
            technology: None,
            nodes: BTreeMap::new(),
            last_check: SimTime::ZERO,
            end_of_run: None,
            started: false,
            windows_closed: 0,
        })
    }

    pub fn with_technology(mut self, technology: ChannelTechnology) -> Self {
        self.technology = Some(technology);
        self
    }

    pub fn set_technology(&mut self, technology: ChannelTechnology) {
        self.technology = Some(technology);
    }

    pub fn technology(&self) -> Option<ChannelTechnology> {
        self.technology
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Sample `node` at every window, even when it never reports busy time.
    pub fn watch(&mut self, node: NodeId) {
        self.nodes.entry(node).or_default();
    }

    pub fn watch_all(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        for node in nodes {
            self.watch(node);
        }
    }

    /// Schedule the first window boundary. With `end_of_run`, the report fires
    /// there once the window closing at or before it has been sampled.
    pub fn start(&mut self, queue: &mut EventQueue, end_of_run: Option<SimTime>) -> Result<()> {
        let technology = self.technology.ok_or(Error::MissingPrerequisite {
            component: "CBR tracker",
            missing: "channel technology",
        })?;
        if self.nodes.is_empty() {
            return Err(Error::MissingPrerequisite {
                component: "CBR tracker",
                missing: "watched node set",
            });
        }
        if let Some(end) = end_of_run {
            if end <= queue.now() {
                return Err(Error::InvalidConfig("simulation time must be greater than 0".into()));
            }
        }

        self.end_of_run = end_of_run;
        self.last_check = queue.now();
        self.started = true;
        self.schedule_next(queue);
        info!(
            "CBR tracking started: {} nodes, window {:?}, alpha {}, {}",
            self.nodes.len(),
            self.window,
            self.alpha,
            technology
        );
        Ok(())
    }

    /// Add busy time to the open window.
    pub fn record_busy(&mut self, node: NodeId, duration: Duration) {
        self.nodes.entry(node).or_default().busy += duration;
    }

    /// 802.11p: a busy interval that started before the last window boundary
    /// only counts from that boundary on; the rest was already sampled.
    pub fn record_busy_interval(&mut self, node: NodeId, start: SimTime, duration: Duration) {
        let counted = if start < self.last_check {
            duration.saturating_sub(self.last_check - start)
        } else {
            duration
        };
        self.record_busy(node, counted);
    }

    /// NR sidelink: a transmission keeps the channel busy for every other
    /// watched node for `duration` starting at `now`.
    pub fn record_nr_occupancy(&mut self, transmitter: NodeId, now: SimTime, duration: Duration) {
        let until = now + duration;
        for (id, channel) in self.nodes.iter_mut() {
            if *id == transmitter {
                continue;
            }
            channel.busy += duration;
            channel.busy_until = channel.busy_until.max(until);
        }
    }

    /// Close the open window and reschedule the next boundary.
    pub fn tick(&mut self, queue: &mut EventQueue) {
        let now = queue.now();
        let window_ns = self.window.as_nanos() as f64;
        let nr = self.technology == Some(ChannelTechnology::Nr);

        for (id, channel) in self.nodes.iter_mut() {
            let mut busy = channel.busy;
            // NR occupancy announced past this boundary belongs to the next window.
            let mut carry = Duration::ZERO;
            if nr && channel.busy_until > now {
                carry = channel.busy_until - now;
                busy = busy.saturating_sub(carry);
            }

            let raw = busy.as_nanos() as f64 / window_ns;
            if raw > 1.0 {
                debug!("Node {} reported {:?} busy in a {:?} window, clamping CBR", id, busy, self.window);
            }
            let current = raw.clamp(0.0, 1.0);
            let smoothed = match channel.smoothed.last() {
                Some(previous) => self.alpha * previous + (1.0 - self.alpha) * current,
                None => current,
            };
            channel.raw.push(current);
            channel.smoothed.push(smoothed);
            channel.busy = carry;
        }

        self.windows_closed += 1;
        self.last_check = now;
        debug!("CBR window {} closed at {}", self.windows_closed, now);
        self.schedule_next(queue);
    }

    // The report is armed only once the boundary it must follow is queued,
    // so a window closing exactly at the end of the run is counted.
    fn schedule_next(&self, queue: &mut EventQueue) {
        let now = queue.now();
        queue.schedule_in(self.window, Event::CbrCheck);
        if let Some(end) = self.end_of_run
            && now < end
            && end <= now + self.window
        {
            queue.schedule_at(end, Event::LogCbr);
        }
    }

    /// Latest smoothed value, `None` before the node's first window.
    pub fn latest(&self, node: NodeId) -> Option<f64> {
        self.nodes.get(&node).and_then(|c| c.smoothed.last().copied())
    }

    pub fn series(&self, node: NodeId) -> Option<&[f64]> {
        self.nodes.get(&node).map(|c| c.smoothed.as_slice())
    }

    pub fn raw_series(&self, node: NodeId) -> Option<&[f64]> {
        self.nodes.get(&node).map(|c| c.raw.as_slice())
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn windows_closed(&self) -> u64 {
        self.windows_closed
    }

    /// Mean of every node's latest value.
    pub fn average_latest(&self) -> Option<f64> {
        let latest: Vec<f64> = self.nodes.values().filter_map(|c| c.smoothed.last().copied()).collect();
        if latest.is_empty() {
            None
        } else {
            Some(latest.iter().sum::<f64>() / latest.len() as f64)
        }
    }

    fn report_lines(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter_map(|(id, c)| c.smoothed.last().map(|cbr| format!("Node {}: {:.2}%", id, cbr * 100.0)))
            .collect()
    }

    /// End-of-run report of every node's last CBR value, on stdout when
    /// `verbose` and into `file` when given.
    pub fn log_last_cbrs(&self, verbose: bool, file: Option<&Path>) -> Result<()> {
        let lines = self.report_lines();

        if verbose {
            println!("CBR last values for each node:");
            for line in &lines {
                println!("{line}");
            }
        }

        if let Some(path) = file {
            let mut out = BufWriter::new(File::create(path)?);
            writeln!(out, "CBR last values for each node:")?;
            for line in &lines {
                writeln!(out, "{line}")?;
            }
            out.flush()?;
            info!("CBR values written to {}", path.display());
        }
        Ok(())
    }
}

impl CbrSource for CbrTracker {
    fn sampled_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, c)| !c.smoothed.is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    fn latest_cbr(&self, node: NodeId) -> Option<f64> {
        self.latest(node)
    }

    fn raw_cbr(&self, node: NodeId) -> &[f64] {
        self.raw_series(node).unwrap_or(&[])
    }
}
