//! Errors raised while building, routing or simulating.

use crate::network::{EdgeId, VertexId};
use thiserror::Error;

/// A convenient alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, SimError>;

/// Everything that can go wrong while preparing or running a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// The road network references something that does not exist.
    #[error("invalid network: edge {edge} references unknown vertex {vertex}")]
    InvalidNetwork { edge: EdgeId, vertex: VertexId },
    /// A fixed-size structure of the lane map would be exceeded.
    #[error("capacity exceeded at intersection {vertex}: {needed} queues needed, at most {max} allowed")]
    CapacityExceeded {
        vertex: VertexId,
        needed: usize,
        max: usize,
    },
    /// An agent's route does not fit into its fixed-capacity route array.
    #[error("route of agent {agent} exceeds the capacity of {capacity} edges")]
    RouteOverflow { agent: usize, capacity: usize },
    /// No path exists between an origin and a destination.
    #[error("no route found for agent {agent} from {origin} to {destination}")]
    NoRouteFound {
        agent: usize,
        origin: VertexId,
        destination: VertexId,
    },
    /// The routing service returned two consecutive vertices with no edge between them.
    #[error("route of agent {agent} uses the missing edge {from} -> {to}")]
    InvalidRoute {
        agent: usize,
        from: VertexId,
        to: VertexId,
    },
    /// An intersection queue was pushed beyond its fixed bound.
    #[error("queue overflow at intersection {vertex}, queue {queue} (step {step})")]
    QueueOverflow {
        vertex: VertexId,
        queue: usize,
        step: u64,
    },
    /// Two agents claimed the same lane cell in one step.
    #[error("lane cell {cell} claimed by agents {first} and {second} (step {step})")]
    CellConflict {
        cell: usize,
        first: usize,
        second: usize,
        step: u64,
    },
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SimError {
    /// Whether this error is a runtime invariant violation of the step loop.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            SimError::QueueOverflow { .. } | SimError::CellConflict { .. }
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_step_loop_failures_are_invariant_violations() {
        let conflict = SimError::CellConflict {
            cell: 3,
            first: 0,
            second: 1,
            step: 9,
        };
        assert!(conflict.is_invariant_violation());
        assert_eq!(conflict.to_string(), "lane cell 3 claimed by agents 0 and 1 (step 9)");
        assert!(SimError::QueueOverflow {
            vertex: 1,
            queue: 0,
            step: 2
        }
        .is_invariant_violation());
        assert!(!SimError::Config("dt".into()).is_invariant_violation());
        assert!(!SimError::RouteOverflow {
            agent: 0,
            capacity: 4
        }
        .is_invariant_violation());
    }
}
