use crate::agent::Agent;
use crate::lanemap::Lanemap;
use crate::network::VertexId;
use serde::Serialize;

/// Aggregate state of the network at one instant, indexed by edge id.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    /// The step the snapshot was taken after.
    pub step: u64,
    /// The simulated time in s.
    pub time: f64,
    /// The cumulative number of vehicles that entered each edge.
    pub upstream: Vec<u32>,
    /// The cumulative number of vehicles that left each edge.
    pub downstream: Vec<u32>,
    /// The number of vehicles currently on each edge.
    pub vehicles: Vec<u32>,
    /// The mean speed of the vehicles on each edge in m/s, zero when empty.
    pub mean_speed: Vec<f64>,
    /// The queue lengths of the monitored intersection, one per incoming lane.
    pub queue_lengths: Vec<u32>,
}

impl Snapshot {
    pub(crate) fn take(
        step: u64,
        time: f64,
        lanemap: &Lanemap,
        agents: &[Agent],
        monitored: Option<VertexId>,
    ) -> Self {
        let num_edges = lanemap.edges().len();
        let mut upstream = vec![0; num_edges];
        let mut downstream = vec![0; num_edges];
        for edge in lanemap.edges() {
            upstream[edge.edge_id as usize] = edge.entered;
            downstream[edge.edge_id as usize] = edge.exited;
        }

        let mut vehicles = vec![0; num_edges];
        let mut mean_speed = vec![0.0; num_edges];
        for agent in agents.iter().filter(|a| a.is_active()) {
            let Some(eid) = agent.current_edge().and_then(|mid| lanemap.edge_id(mid)) else {
                continue;
            };
            vehicles[eid as usize] += 1;
            mean_speed[eid as usize] += agent.speed();
        }
        for (sum, count) in mean_speed.iter_mut().zip(&vehicles) {
            if *count > 0 {
                *sum /= *count as f64;
            }
        }

        let queue_lengths = monitored
            .and_then(|vertex| lanemap.intersection(vertex))
            .map(|control| control.queues().iter().map(|q| q.len() as u32).collect())
            .unwrap_or_default();

        Self {
            step,
            time,
            upstream,
            downstream,
            vehicles,
            mean_speed,
            queue_lengths,
        }
    }
}
