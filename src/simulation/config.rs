use crate::dcc::{AdaptiveParams, DccSettings, PolicyKind, ReactiveTable};
use crate::error::{Error, Result};
use crate::metrics::ChannelTechnology;
use crate::scheduler::SimTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Shape of the synthetic traffic used when no trace is replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkloadConfig {
    pub vehicles: u32,
    pub pedestrians: u32,
    pub road_side_units: u32,
    /// Stations that only load the channel; their traffic is excluded from PRR.
    pub interferers: u32,
    /// Side of the square the stations are dropped in.
    pub area_meters: f64,
    pub generation_interval_ms: u64,
    pub tx_power_dbm: f64,
    pub sensitivity_dbm: f64,
    /// Radio range at the default tx power and sensitivity.
    pub nominal_range_meters: f64,
    pub loss_probability: f64,
    pub mean_access_delay_ms: f64,
    pub airtime_us: u64,
    pub bandwidth_hz: f64,
    pub resource_blocks: u32,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            vehicles: 40,
            pedestrians: 6,
            road_side_units: 2,
            interferers: 0,
            area_meters: 400.0,
            generation_interval_ms: 100,
            tx_power_dbm: 23.0,
            sensitivity_dbm: -95.0,
            nominal_range_meters: 250.0,
            loss_probability: 0.02,
            mean_access_delay_ms: 1.5,
            airtime_us: 400,
            bandwidth_hz: 10e6,
            resource_blocks: 52,
        }
    }
}

impl WorkloadConfig {
    pub fn station_count(&self) -> u32 {
        self.vehicles + self.pedestrians + self.road_side_units + self.interferers
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimConfig {
    pub name: String,
    pub seed: u64,
    pub simulation_time_seconds: f64,
    pub baseline_radius_meters: f64,
    pub prr_computation_timeout_seconds: f64,
    pub cbr_window_ms: u64,
    pub cbr_alpha: f64,
    pub dcc_interval_ms: u64,
    /// `None` runs without congestion control.
    pub dcc_policy: Option<String>,
    pub channel_technology: String,
    pub verbose_stdout: bool,
    pub write_cbr_to_file: bool,
    pub cbr_file: String,
    pub reactive: ReactiveTable,
    pub adaptive: AdaptiveParams,
    pub workload: WorkloadConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "default_run".to_string(),
            seed: 1,
            simulation_time_seconds: 20.0,
            baseline_radius_meters: 150.0,
            prr_computation_timeout_seconds: 3.0,
            cbr_window_ms: 100,
            cbr_alpha: 0.5,
            dcc_interval_ms: 200,
            dcc_policy: None,
            channel_technology: "80211p".to_string(),
            verbose_stdout: false,
            write_cbr_to_file: false,
            cbr_file: "cbr_values.txt".to_string(),
            reactive: ReactiveTable::default(),
            adaptive: AdaptiveParams::default(),
            workload: WorkloadConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        positive_duration("simulation time", self.simulation_time_seconds)?;
        self.prr_timeout()?;
        if !(self.baseline_radius_meters > 0.0 && self.baseline_radius_meters.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "baseline radius must be a finite value greater than 0, got {}",
                self.baseline_radius_meters
            )));
        }
        if self.cbr_window_ms == 0 {
            return Err(Error::InvalidConfig("CBR window must be greater than 0".into()));
        }
        if !(0.0..=1.0).contains(&self.cbr_alpha) {
            return Err(Error::InvalidConfig(format!(
                "CBR alpha must be between 0 and 1, got {}",
                self.cbr_alpha
            )));
        }
        let policy = self.policy_kind()?;
        if policy.is_some() && self.dcc_interval_ms == 0 {
            return Err(Error::InvalidConfig("DCC interval must be greater than 0".into()));
        }
        self.technology()?;

        let adaptive = &self.adaptive;
        if adaptive.delta_min > adaptive.delta_max {
            return Err(Error::InvalidConfig("adaptive deltaMin is above deltaMax".into()));
        }
        if !(0.0..=1.0).contains(&self.workload.loss_probability) {
            return Err(Error::InvalidConfig("loss probability must be between 0 and 1".into()));
        }
        Ok(())
    }

    pub fn technology(&self) -> Result<ChannelTechnology> {
        self.channel_technology.parse()
    }

    pub fn policy_kind(&self) -> Result<Option<PolicyKind>> {
        self.dcc_policy.as_deref().map(str::parse::<PolicyKind>).transpose()
    }

    pub fn dcc_settings(&self) -> DccSettings {
        DccSettings {
            reactive: self.reactive.clone(),
            adaptive: self.adaptive,
        }
    }

    pub fn end_time(&self) -> SimTime {
        SimTime::from_secs_f64(self.simulation_time_seconds)
    }

    pub fn prr_timeout(&self) -> Result<Duration> {
        positive_duration("PRR timeout", self.prr_computation_timeout_seconds)
    }

    pub fn dcc_interval(&self) -> Duration {
        Duration::from_millis(self.dcc_interval_ms)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// `"none"` disables congestion control.
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        let policy = policy.into();
        self.dcc_policy = (!policy.eq_ignore_ascii_case("none")).then_some(policy);
        self
    }

    pub fn with_technology(mut self, technology: impl Into<String>) -> Self {
        self.channel_technology = technology.into();
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.simulation_time_seconds = seconds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_vehicles(mut self, vehicles: u32) -> Self {
        self.workload.vehicles = vehicles;
        self
    }
}

// NaN, infinities and values too large for a `Duration` are rejected here
// rather than panicking later when the run is armed.
fn positive_duration(what: &str, seconds: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(Error::InvalidConfig(format!(
            "{what} must be a finite number of seconds greater than 0, got {seconds}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_keys_with_defaults() {
        let config: SimConfig = serde_json::from_str(
            r#"{
                "baselineRadiusMeters": 200,
                "dccPolicy": "adaptive",
                "channelTechnology": "nr",
                "writeCbrToFile": true,
                "reactive": { "relaxed": { "cbrThreshold": 0.2, "txPowerDbm": 30, "generationIntervalMs": 100, "sensitivityDbm": -95 } },
                "workload": { "vehicles": 10 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.baseline_radius_meters, 200.0);
        assert_eq!(config.prr_computation_timeout_seconds, 3.0);
        assert_eq!(config.policy_kind().unwrap(), Some(PolicyKind::Adaptive));
        assert_eq!(config.technology().unwrap(), ChannelTechnology::Nr);
        assert_eq!(config.cbr_file, "cbr_values.txt");
        assert_eq!(config.reactive.relaxed.cbr_threshold, 0.2);
        assert_eq!(config.reactive.active1, ReactiveTable::default().active1);
        assert_eq!(config.workload.vehicles, 10);
        assert_eq!(config.workload.pedestrians, 6);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_values() {
        assert!(SimConfig::default().with_duration(0.0).validate().is_err());
        assert!(matches!(
            SimConfig::default().with_policy("limeric").validate(),
            Err(Error::UnknownPolicy(_))
        ));
        assert!(matches!(
            SimConfig::default().with_technology("").validate(),
            Err(Error::TechnologyUnset)
        ));
        let mut config = SimConfig::default();
        config.cbr_alpha = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_times_and_radius() {
        for seconds in [f64::INFINITY, f64::NAN, -1.0, 1e300] {
            assert!(matches!(
                SimConfig::default().with_duration(seconds).validate(),
                Err(Error::InvalidConfig(_))
            ));
            let mut config = SimConfig::default();
            config.prr_computation_timeout_seconds = seconds;
            assert!(config.validate().is_err());
        }
        let mut config = SimConfig::default();
        config.baseline_radius_meters = f64::NAN;
        assert!(config.validate().is_err());
        config.baseline_radius_meters = f64::INFINITY;
        assert!(config.validate().is_err());
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn none_disables_dcc() {
        let config = SimConfig::default().with_policy("reactive").with_policy("None");
        assert_eq!(config.policy_kind().unwrap(), None);
    }
}
