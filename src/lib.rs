//! A lane-level, time-stepped traffic microsimulation for large agent populations.

pub use agent::{
    desired_gap, idm, AccelerationModel, Agent, AgentMetrics, AgentStatus, Arbitration, Route,
    RouteIssue, MAX_ROUTE_EDGES, SLOWDOWN_SPEED,
};
pub use config::{IdmParameters, SignalPolicy, SimulationConfig};
pub use demand::Demand;
pub use error::{Result, SimError};
pub use lanemap::{EdgeData, IntersectionControl, LaneMapIndex, LaneQueue, Lanemap, EMPTY_CELL};
pub use network::{EdgeAttributes, EdgeId, RoadNetwork, VertexId};
pub use routing::{BatchRouter, DijkstraRouter, RouteAssigner, RouteReport};
pub use simulation::{load_agents, RunSummary, Simulation, Snapshot, STOP_LINE_TOLERANCE};

mod agent;
mod config;
pub mod demand;
mod error;
mod lanemap;
mod network;
pub mod output;
mod routing;
mod simulation;
mod util;
