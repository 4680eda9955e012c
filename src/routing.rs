//! Turning trip demand into routes of lane map indices.

use crate::agent::{Agent, AgentStatus, RouteIssue};
use crate::config::SimulationConfig;
use crate::error::{Result, SimError};
use crate::lanemap::{LaneMapIndex, Lanemap};
use crate::network::{RoadNetwork, VertexId};
use itertools::Itertools;
use log::{debug, info, warn};
use rayon::prelude::*;

/// A shortest path service answering many origin/destination queries at once.
pub trait BatchRouter {
    /// Returns one vertex sequence per pair, in the same order.
    /// A pair with no path yields an empty sequence.
    fn route_batch(&self, pairs: &[(VertexId, VertexId)]) -> Vec<Vec<VertexId>>;
}

/// A [BatchRouter] running Dijkstra's algorithm on free-flow travel times.
pub struct DijkstraRouter {
    /// The outgoing edges of each vertex, as (target, cost) pairs.
    successors: Vec<Vec<(VertexId, usize)>>,
}

impl DijkstraRouter {
    /// Builds the search graph of a network.
    ///
    /// Edges touching an unknown vertex, or with no positive speed limit,
    /// are left out. Of parallel edges only the one routes are written
    /// with, the lowest id, is searched.
    pub fn new(network: &RoadNetwork) -> Self {
        let num_vertices = network.num_vertices();
        let mut successors = vec![vec![]; num_vertices];
        for (id, edge) in network.edges() {
            if edge.speed_limit <= 0.0
                || edge.source as usize >= num_vertices
                || edge.target as usize >= num_vertices
                || network.edge_between(edge.source, edge.target) != Some(id)
            {
                continue;
            }
            // Travel time in tenths of a second
            let cost = (10.0 * edge.length / edge.speed_limit).ceil() as usize;
            successors[edge.source as usize].push((edge.target, cost.max(1)));
        }
        Self { successors }
    }

    fn route(&self, origin: VertexId, destination: VertexId) -> Vec<VertexId> {
        if origin as usize >= self.successors.len() {
            return vec![];
        }
        pathfinding::directed::dijkstra::dijkstra(
            &origin,
            |v| self.successors[*v as usize].iter().copied(),
            |v| *v == destination,
        )
        .map(|(path, _)| path)
        .unwrap_or_default()
    }
}

impl BatchRouter for DijkstraRouter {
    fn route_batch(&self, pairs: &[(VertexId, VertexId)]) -> Vec<Vec<VertexId>> {
        pairs
            .par_iter()
            .map(|(origin, destination)| self.route(*origin, *destination))
            .collect()
    }
}

/// The outcome of a route assignment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Agents that received a route.
    pub assigned: usize,
    /// Agents whose path was longer than the warning threshold.
    pub long_routes: Vec<usize>,
    /// Agents for which no route was found.
    pub unroutable: Vec<usize>,
    /// Agents whose route did not fit into the route array.
    pub overflowed: Vec<usize>,
}

/// Writes every agent's route, once, before the simulation starts.
pub struct RouteAssigner<'a> {
    network: &'a RoadNetwork,
    lanemap: &'a Lanemap,
    warning_hops: usize,
}

impl<'a> RouteAssigner<'a> {
    pub fn new(network: &'a RoadNetwork, lanemap: &'a Lanemap, config: &SimulationConfig) -> Self {
        Self {
            network,
            lanemap,
            warning_hops: config.route_warning_hops,
        }
    }

    /// Routes every pending agent without a route.
    ///
    /// Agents with no path, or a path too long for their route array, are
    /// marked unroutable and reported; they never depart. A path using a
    /// vertex pair with no edge between them is an error.
    pub fn assign<R: BatchRouter + ?Sized>(&self, agents: &mut [Agent], router: &R) -> Result<RouteReport> {
        let mut todo = agents
            .iter_mut()
            .filter(|a| a.status() == AgentStatus::Pending && a.route().is_empty())
            .collect::<Vec<_>>();
        let pairs = todo
            .iter()
            .map(|a| (a.origin(), a.destination()))
            .collect::<Vec<_>>();
        let paths = router.route_batch(&pairs);
        if paths.len() != pairs.len() {
            return Err(SimError::Config(format!(
                "router answered {} of {} queries",
                paths.len(),
                pairs.len()
            )));
        }

        // Translate every path before writing any route, so that an invalid
        // path leaves all agents untouched
        let mut routes = Vec::with_capacity(paths.len());
        for (agent, path) in todo.iter().zip(&paths) {
            routes.push(self.translate(agent, path)?);
        }

        let mut report = RouteReport::default();
        for ((agent, path), route) in todo.iter_mut().zip(&paths).zip(routes) {
            if path.len() > self.warning_hops {
                warn!("Agent {} has a route of {} vertices", agent.id(), path.len());
                report.long_routes.push(agent.id());
            }
            if route.is_empty() {
                let err = SimError::NoRouteFound {
                    agent: agent.id(),
                    origin: agent.origin(),
                    destination: agent.destination(),
                };
                debug!("{}", err);
                agent.mark_unroutable(RouteIssue::NoRoute);
                report.unroutable.push(agent.id());
                continue;
            }
            match route.into_iter().try_for_each(|mid| agent.extend_route(mid)) {
                Ok(()) => report.assigned += 1,
                Err(err) => {
                    warn!("{}", err);
                    agent.mark_unroutable(RouteIssue::Overflow);
                    report.overflowed.push(agent.id());
                }
            }
        }

        info!(
            "Assigned {} routes ({} unroutable, {} overflowed, {} long)",
            report.assigned,
            report.unroutable.len(),
            report.overflowed.len(),
            report.long_routes.len()
        );
        Ok(report)
    }

    /// The lane map indices along a vertex path. A path with fewer than two
    /// vertices has none.
    fn translate(&self, agent: &Agent, path: &[VertexId]) -> Result<Vec<LaneMapIndex>> {
        path.iter()
            .copied()
            .tuple_windows()
            .map(|(from, to)| {
                self.network
                    .edge_between(from, to)
                    .and_then(|eid| self.lanemap.lane_map_index(eid))
                    .ok_or(SimError::InvalidRoute {
                        agent: agent.id(),
                        from,
                        to,
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::demand::Demand;
    use crate::network::EdgeAttributes;

    fn network() -> RoadNetwork {
        // 0 -> 1 -> 3 is fast, 0 -> 2 -> 3 is slow, 4 is isolated
        let mut network = RoadNetwork::new(5);
        for (source, target, speed_limit) in [(0, 2, 5.0), (2, 3, 5.0), (0, 1, 20.0), (1, 3, 20.0)] {
            network.add_edge(EdgeAttributes {
                source,
                target,
                length: 100.0,
                lanes: 1,
                speed_limit,
            });
        }
        network
    }

    fn agents(pairs: &[(VertexId, VertexId)]) -> Vec<Agent> {
        pairs
            .iter()
            .enumerate()
            .map(|(i, (origin, destination))| {
                Agent::new(
                    i,
                    &Demand {
                        origin: *origin,
                        destination: *destination,
                        departure: 0.0,
                    },
                )
            })
            .collect()
    }

    struct FixedRouter(Vec<Vec<VertexId>>);

    impl BatchRouter for FixedRouter {
        fn route_batch(&self, _: &[(VertexId, VertexId)]) -> Vec<Vec<VertexId>> {
            self.0.clone()
        }
    }

    #[test]
    fn dijkstra_prefers_faster_path() {
        let router = DijkstraRouter::new(&network());
        let paths = router.route_batch(&[(0, 3), (3, 0), (4, 4)]);
        assert_eq!(paths[0], vec![0, 1, 3]);
        assert!(paths[1].is_empty());
        assert_eq!(paths[2], vec![4]);
    }

    #[test]
    fn routes_use_lane_map_indices() {
        let network = network();
        let config = SimulationConfig::default();
        let lanemap = Lanemap::build(&network, &config).unwrap();
        let mut agents = agents(&[(0, 3), (3, 0)]);
        let report = RouteAssigner::new(&network, &lanemap, &config)
            .assign(&mut agents, &DijkstraRouter::new(&network))
            .unwrap();

        assert_eq!(report.assigned, 1);
        assert_eq!(report.unroutable, vec![1]);
        // Sorted by (source, target): (0,1) (0,2) (1,3) (2,3)
        assert_eq!(agents[0].route().edges(), &[0, 2]);
        assert_eq!(lanemap.edge_id(0), Some(2));
        assert_eq!(agents[1].status(), AgentStatus::Unroutable);
        assert_eq!(agents[1].route_issue(), Some(RouteIssue::NoRoute));
    }

    #[test]
    fn long_routes_are_flagged_not_rejected() {
        let network = network();
        let config = SimulationConfig {
            route_warning_hops: 2,
            ..Default::default()
        };
        let lanemap = Lanemap::build(&network, &config).unwrap();
        let mut agents = agents(&[(0, 3)]);
        let report = RouteAssigner::new(&network, &lanemap, &config)
            .assign(&mut agents, &DijkstraRouter::new(&network))
            .unwrap();
        assert_eq!(report.long_routes, vec![0]);
        assert_eq!(report.assigned, 1);
    }

    #[test]
    fn missing_edge_is_an_error() {
        let network = network();
        let config = SimulationConfig::default();
        let lanemap = Lanemap::build(&network, &config).unwrap();
        let mut agents = agents(&[(0, 3), (0, 3)]);
        let result = RouteAssigner::new(&network, &lanemap, &config)
            .assign(&mut agents, &FixedRouter(vec![vec![0, 1, 3], vec![0, 3]]));
        assert!(matches!(result, Err(SimError::InvalidRoute { agent: 1, from: 0, to: 3 })));
        // Nobody got a route, not even the agent with a valid path
        for agent in &agents {
            assert!(agent.route().is_empty());
            assert_eq!(agent.status(), AgentStatus::Pending);
        }
    }

    #[test]
    fn dangling_edges_are_not_searched() {
        let mut network = RoadNetwork::new(2);
        for target in [5, 1] {
            network.add_edge(EdgeAttributes {
                source: 0,
                target,
                length: 10.0,
                lanes: 1,
                speed_limit: 10.0,
            });
        }
        let router = DijkstraRouter::new(&network);
        assert_eq!(router.route_batch(&[(0, 1), (0, 5)]), vec![vec![0, 1], vec![]]);
    }

    #[test]
    fn parallel_edges_are_costed_as_routed() {
        // Edge 0 is the slow one of two parallel edges 0 -> 1; routes always
        // use the lowest id, so the detour through 2 must win
        let mut network = RoadNetwork::new(3);
        for (source, target, speed_limit) in [(0, 1, 1.0), (0, 1, 100.0), (0, 2, 10.0), (2, 1, 10.0)] {
            network.add_edge(EdgeAttributes {
                source,
                target,
                length: 100.0,
                lanes: 1,
                speed_limit,
            });
        }
        let router = DijkstraRouter::new(&network);
        assert_eq!(router.route_batch(&[(0, 1)]), vec![vec![0, 2, 1]]);
    }

    #[test]
    fn overflowing_route_marks_agent() {
        let mut network = RoadNetwork::new(2);
        for (source, target) in [(0, 1), (1, 0)] {
            network.add_edge(EdgeAttributes {
                source,
                target,
                length: 10.0,
                lanes: 1,
                speed_limit: 10.0,
            });
        }
        let config = SimulationConfig::default();
        let lanemap = Lanemap::build(&network, &config).unwrap();
        let path = (0..=crate::agent::MAX_ROUTE_EDGES + 1)
            .map(|i| (i % 2) as VertexId)
            .collect::<Vec<_>>();
        let mut agents = agents(&[(0, 1), (0, 1)]);
        let report = RouteAssigner::new(&network, &lanemap, &config)
            .assign(&mut agents, &FixedRouter(vec![path, vec![0, 1]]))
            .unwrap();
        assert_eq!(report.overflowed, vec![0]);
        assert_eq!(report.assigned, 1);
        assert_eq!(agents[0].route_issue(), Some(RouteIssue::Overflow));
        assert!(agents[0].route().is_empty());
    }
}
