//! Simulation parameters.

use crate::error::{Result, SimError};
use crate::network::VertexId;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// The parameters of the intelligent driver model, shared by all agents.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdmParameters {
    /// The maximum acceleration in m/s<sup>2</sup>.
    pub max_acceleration: f64,
    /// The comfortable deceleration, a positive number in m/s<sup>2</sup>.
    pub comfortable_deceleration: f64,
    /// The emergency deceleration, a positive number in m/s<sup>2</sup>.
    pub max_deceleration: f64,
    /// The acceleration exponent.
    pub delta: f64,
    /// The minimum bumper-to-bumper distance when stopped, in m.
    pub jam_distance: f64,
    /// The desired time gap to the vehicle ahead, in s.
    pub time_headway: f64,
    /// Multiplied with an edge's speed limit to obtain the desired speed.
    pub desired_speed_factor: f64,
    /// The length of every vehicle in m.
    pub vehicle_length: f64,
}

impl Default for IdmParameters {
    fn default() -> Self {
        Self {
            max_acceleration: 1.0,
            comfortable_deceleration: 1.5,
            max_deceleration: 9.0,
            delta: 4.0,
            jam_distance: 2.0,
            time_headway: 1.5,
            desired_speed_factor: 1.0,
            vehicle_length: 5.0,
        }
    }
}

/// Decides which incoming lanes of an intersection may discharge.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalPolicy {
    /// Incoming edges get the right of way in turn, each for `phase_duration` seconds.
    FixedTime { phase_duration: f64 },
    /// Every incoming lane is eligible; the earliest arrival goes first.
    FirstComeFirstServed,
}

impl Default for SignalPolicy {
    fn default() -> Self {
        SignalPolicy::FixedTime {
            phase_duration: 30.0,
        }
    }
}

/// All parameters of a simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// The fixed time step in s.
    pub dt: f64,
    /// Distance between the stop line and the physical end of an edge, in m.
    pub intersection_clearance: f64,
    /// The length of a lane cell in m.
    pub cell_length: f64,
    /// Take a snapshot every this many steps.
    pub sample_interval: u64,
    /// The capacity of each incoming lane queue.
    pub queue_capacity: usize,
    /// The maximum number of incoming lane queues of one intersection.
    pub max_queues_per_intersection: usize,
    /// How far ahead into the next edge an agent looks for a leader, in cells.
    pub lookahead_cells: usize,
    /// Lane changes are not allowed this close to the end of an edge, in m.
    pub lane_change_cutoff: f64,
    /// The extra free gap in m an adjacent lane must offer before changing into it.
    pub lane_change_threshold: f64,
    /// Routes longer than this many vertices are reported.
    pub route_warning_hops: usize,
    /// The intersection whose queues are recorded in snapshots.
    pub monitored_intersection: Option<VertexId>,
    pub signal: SignalPolicy,
    pub idm: IdmParameters,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dt: 0.5,
            intersection_clearance: 7.8,
            cell_length: 1.0,
            sample_interval: 10,
            queue_capacity: 8,
            max_queues_per_intersection: 20,
            lookahead_cells: 30,
            lane_change_cutoff: 25.0,
            lane_change_threshold: 5.0,
            route_warning_hops: 100,
            monitored_intersection: None,
            signal: SignalPolicy::default(),
            idm: IdmParameters::default(),
        }
    }
}

impl SimulationConfig {
    /// Reads a configuration from JSON. Missing fields take their default value.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        Self::from_json_reader(std::fs::File::open(path)?)
    }

    /// Checks that every parameter is in range.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("dt", self.dt),
            ("cell_length", self.cell_length),
            ("idm.max_acceleration", self.idm.max_acceleration),
            ("idm.comfortable_deceleration", self.idm.comfortable_deceleration),
            ("idm.max_deceleration", self.idm.max_deceleration),
            ("idm.delta", self.idm.delta),
            ("idm.desired_speed_factor", self.idm.desired_speed_factor),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(SimError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        let non_negative = [
            ("intersection_clearance", self.intersection_clearance),
            ("lane_change_cutoff", self.lane_change_cutoff),
            ("lane_change_threshold", self.lane_change_threshold),
            ("idm.jam_distance", self.idm.jam_distance),
            ("idm.time_headway", self.idm.time_headway),
            ("idm.vehicle_length", self.idm.vehicle_length),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0) {
                return Err(SimError::Config(format!("{name} must not be negative, got {value}")));
            }
        }
        if self.sample_interval == 0 {
            return Err(SimError::Config("sample_interval must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(SimError::Config("queue_capacity must be at least 1".into()));
        }
        if let SignalPolicy::FixedTime { phase_duration } = self.signal {
            if !(phase_duration > 0.0) {
                return Err(SimError::Config(format!(
                    "phase_duration must be positive, got {phase_duration}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_observed_values() {
        let config = SimulationConfig::default();
        assert_eq!(config.dt, 0.5);
        assert_eq!(config.intersection_clearance, 7.8);
        assert_eq!(config.sample_interval, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{ "dt": 0.25, "idm": { "delta": 2.0 }, "signal": "first_come_first_served" }"#;
        let config = SimulationConfig::from_json_reader(json.as_bytes()).unwrap();
        assert_eq!(config.dt, 0.25);
        assert_eq!(config.idm.delta, 2.0);
        assert_eq!(config.idm.jam_distance, 2.0);
        assert_eq!(config.signal, SignalPolicy::FirstComeFirstServed);
        assert_eq!(config.intersection_clearance, 7.8);
    }

    #[test]
    fn json_round_trip() {
        let config = SimulationConfig {
            monitored_intersection: Some(2),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed = SimulationConfig::from_json_reader(json.as_bytes()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn rejects_bad_values() {
        let json = r#"{ "dt": 0.0 }"#;
        assert!(matches!(
            SimulationConfig::from_json_reader(json.as_bytes()),
            Err(SimError::Config(_))
        ));
        let config = SimulationConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
