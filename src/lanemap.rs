//! The lane map: a flat, fixed-stride encoding of the road network.
//!
//! Every edge gets a `lane_map_index` and a contiguous block of lane cells,
//! `lanes * cells_per_lane` long. Every vertex gets an [IntersectionControl]
//! with one bounded queue per incoming lane. The layout is fixed once built;
//! only the contents change while simulating.

pub use self::intersection::{IntersectionControl, LaneQueue};
use crate::config::SimulationConfig;
use crate::error::{Result, SimError};
use crate::network::{EdgeId, RoadNetwork, VertexId};
use log::{info, warn};
use smallvec::SmallVec;

mod intersection;

/// Position of an edge in the lane map arrays.
pub type LaneMapIndex = u32;

/// The content of an unoccupied lane cell or queue slot.
pub const EMPTY_CELL: u32 = u32::MAX;

/// Per-edge metadata of the lane map.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeData {
    /// The id of the edge in the road network.
    pub edge_id: EdgeId,
    pub source: VertexId,
    pub target: VertexId,
    /// The length in m.
    pub length: f64,
    pub lanes: u8,
    /// The speed limit in m/s.
    pub speed_limit: f64,
    /// The number of cells in each lane.
    pub cells_per_lane: u32,
    /// The index of the edge's first cell in the cell array.
    pub cell_offset: usize,
    /// The number of vehicles that have entered the edge.
    pub entered: u32,
    /// The number of vehicles that have left the edge.
    pub exited: u32,
}

impl EdgeData {
    /// The index in the cell array of the given cell of the given lane.
    pub fn cell_index(&self, lane: u8, cell: u32) -> usize {
        self.cell_offset + lane as usize * self.cells_per_lane as usize + cell as usize
    }

    /// The cell of a lane holding the longitudinal position `pos`.
    pub fn cell_at(&self, pos: f64, cell_length: f64) -> u32 {
        let cell = (pos.max(0.0) / cell_length) as u32;
        cell.min(self.cells_per_lane - 1)
    }

    /// The range of the cell array covered by one lane.
    pub fn lane_cells(&self, lane: u8) -> std::ops::Range<usize> {
        let start = self.cell_index(lane, 0);
        start..start + self.cells_per_lane as usize
    }
}

/// The flat lane map of a road network.
#[derive(Clone, Debug, PartialEq)]
pub struct Lanemap {
    cell_length: f64,
    pub(crate) edges: Vec<EdgeData>,
    pub(crate) cells: Vec<u32>,
    pub(crate) intersections: Vec<IntersectionControl>,
    pub(crate) queue_slots: Vec<u32>,
    /// Maps lane map indices to edge ids.
    mid2eid: Vec<EdgeId>,
    /// Maps edge ids to lane map indices.
    eid2mid: Vec<Option<LaneMapIndex>>,
}

impl Lanemap {
    /// Builds the lane map of a network.
    ///
    /// Edges are enumerated by `(source, target, edge_id)`, which fixes their
    /// lane map index. Fails if an edge references an unknown vertex or if an
    /// intersection would need more incoming lane queues than allowed.
    pub fn build(network: &RoadNetwork, config: &SimulationConfig) -> Result<Self> {
        config.validate()?;
        for (id, edge) in network.edges() {
            for vertex in [edge.source, edge.target] {
                if vertex as usize >= network.num_vertices() {
                    return Err(SimError::InvalidNetwork { edge: id, vertex });
                }
            }
        }

        let mut order = network.edges().collect::<Vec<_>>();
        order.sort_by_key(|(id, edge)| (edge.source, edge.target, *id));

        let mut edges = Vec::with_capacity(order.len());
        let mut mid2eid = Vec::with_capacity(order.len());
        let mut eid2mid = vec![None; network.num_edges()];
        let mut num_cells = 0;
        for (mid, (id, edge)) in order.into_iter().enumerate() {
            if edge.lanes == 0 {
                warn!("Edge {} has no lanes, giving it one", id);
            }
            let lanes = edge.lanes.max(1);
            let cells_per_lane = ((edge.length / config.cell_length).ceil() as u32).max(1);
            edges.push(EdgeData {
                edge_id: id,
                source: edge.source,
                target: edge.target,
                length: edge.length,
                lanes,
                speed_limit: edge.speed_limit,
                cells_per_lane,
                cell_offset: num_cells,
                entered: 0,
                exited: 0,
            });
            num_cells += lanes as usize * cells_per_lane as usize;
            mid2eid.push(id);
            eid2mid[id as usize] = Some(mid as LaneMapIndex);
        }

        let mut in_edges = vec![SmallVec::<[LaneMapIndex; 4]>::new(); network.num_vertices()];
        for (mid, edge) in edges.iter().enumerate() {
            in_edges[edge.target as usize].push(mid as LaneMapIndex);
        }

        let mut intersections = Vec::with_capacity(network.num_vertices());
        let mut num_slots = 0;
        for (vertex, phases) in in_edges.into_iter().enumerate() {
            let needed = phases
                .iter()
                .map(|mid| edges[*mid as usize].lanes as usize)
                .sum::<usize>();
            if needed > config.max_queues_per_intersection {
                return Err(SimError::CapacityExceeded {
                    vertex: vertex as VertexId,
                    needed,
                    max: config.max_queues_per_intersection,
                });
            }
            let mut queues = Vec::with_capacity(needed);
            for mid in &phases {
                for lane in 0..edges[*mid as usize].lanes {
                    queues.push(LaneQueue::new(*mid, lane, num_slots, config.queue_capacity));
                    num_slots += config.queue_capacity;
                }
            }
            intersections.push(IntersectionControl::new(vertex as VertexId, queues, phases));
        }

        info!(
            "Built lane map: {} edges, {} lane cells, {} intersections, {} queue slots",
            edges.len(),
            num_cells,
            intersections.len(),
            num_slots
        );

        Ok(Self {
            cell_length: config.cell_length,
            edges,
            cells: vec![EMPTY_CELL; num_cells],
            intersections,
            queue_slots: vec![EMPTY_CELL; num_slots],
            mid2eid,
            eid2mid,
        })
    }

    /// The length of a lane cell in m.
    pub fn cell_length(&self) -> f64 {
        self.cell_length
    }

    /// The per-edge metadata, by lane map index.
    pub fn edges(&self) -> &[EdgeData] {
        &self.edges
    }

    pub fn edge(&self, mid: LaneMapIndex) -> &EdgeData {
        &self.edges[mid as usize]
    }

    /// The lane cells. Each holds an agent index or [EMPTY_CELL].
    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    /// The intersections, by vertex id.
    pub fn intersections(&self) -> &[IntersectionControl] {
        &self.intersections
    }

    pub fn intersection(&self, vertex: VertexId) -> Option<&IntersectionControl> {
        self.intersections.get(vertex as usize)
    }

    /// The flat storage backing every intersection queue.
    pub fn queue_slots(&self) -> &[u32] {
        &self.queue_slots
    }

    /// The lane map index of a network edge.
    pub fn lane_map_index(&self, edge_id: EdgeId) -> Option<LaneMapIndex> {
        self.eid2mid.get(edge_id as usize).copied().flatten()
    }

    /// The network edge stored at a lane map index.
    pub fn edge_id(&self, mid: LaneMapIndex) -> Option<EdgeId> {
        self.mid2eid.get(mid as usize).copied()
    }

    /// The agent occupying a cell, if any.
    pub fn occupant(&self, cell: usize) -> Option<u32> {
        Some(self.cells[cell]).filter(|c| *c != EMPTY_CELL)
    }

    /// Clears every cell, queue, counter and signal.
    pub fn reset(&mut self) {
        self.cells.fill(EMPTY_CELL);
        for edge in &mut self.edges {
            edge.entered = 0;
            edge.exited = 0;
        }
        for intersection in &mut self.intersections {
            intersection.reset(&mut self.queue_slots);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::network::EdgeAttributes;

    fn edge(source: VertexId, target: VertexId, length: f64, lanes: u8) -> EdgeAttributes {
        EdgeAttributes {
            source,
            target,
            length,
            lanes,
            speed_limit: 10.0,
        }
    }

    #[test]
    fn cells_are_reserved_per_lane() {
        let mut network = RoadNetwork::new(3);
        network.add_edge(edge(1, 2, 10.5, 2));
        network.add_edge(edge(0, 1, 4.0, 1));
        let lanemap = Lanemap::build(&network, &SimulationConfig::default()).unwrap();

        // (0, 1) sorts first
        assert_eq!(lanemap.lane_map_index(1), Some(0));
        assert_eq!(lanemap.lane_map_index(0), Some(1));
        assert_eq!(lanemap.edge(0).cells_per_lane, 4);
        assert_eq!(lanemap.edge(1).cells_per_lane, 11);
        assert_eq!(lanemap.edge(1).cell_offset, 4);
        assert_eq!(lanemap.cells().len(), 4 + 22);
        assert!(lanemap.cells().iter().all(|c| *c == EMPTY_CELL));
        assert_eq!(lanemap.edge(1).cell_index(1, 3), 4 + 11 + 3);
        assert_eq!(lanemap.edge(1).cell_at(10.49, 1.0), 10);
        assert_eq!(lanemap.edge(1).cell_at(99.0, 1.0), 10);
    }

    #[test]
    fn queues_follow_incoming_lanes() {
        let mut network = RoadNetwork::new(3);
        network.add_edge(edge(0, 2, 10.0, 2));
        network.add_edge(edge(1, 2, 10.0, 1));
        let config = SimulationConfig::default();
        let lanemap = Lanemap::build(&network, &config).unwrap();
        let control = lanemap.intersection(2).unwrap();
        assert_eq!(control.queues().len(), 3);
        assert_eq!(control.queue_index(1, 0), Some(2));
        assert_eq!(lanemap.queue_slots().len(), 3 * config.queue_capacity);
        assert!(lanemap.intersection(0).unwrap().queues().is_empty());
    }

    #[test]
    fn dangling_vertex_is_rejected() {
        let mut network = RoadNetwork::new(2);
        network.add_edge(edge(0, 5, 10.0, 1));
        assert!(matches!(
            Lanemap::build(&network, &SimulationConfig::default()),
            Err(SimError::InvalidNetwork { edge: 0, vertex: 5 })
        ));
    }

    #[test]
    fn too_many_incoming_lanes_is_rejected() {
        let mut network = RoadNetwork::new(2);
        network.add_edge(edge(0, 1, 10.0, 3));
        network.add_edge(edge(0, 1, 10.0, 3));
        let config = SimulationConfig {
            max_queues_per_intersection: 5,
            ..Default::default()
        };
        assert!(matches!(
            Lanemap::build(&network, &config),
            Err(SimError::CapacityExceeded { vertex: 1, needed: 6, max: 5 })
        ));
    }
}
