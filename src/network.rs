//! The road network consumed by the lane map and the router.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;

/// Identifies an intersection of the road network.
pub type VertexId = u32;

/// Identifies a road segment of the road network.
pub type EdgeId = u32;

/// The attributes of a directed road segment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeAttributes {
    /// The vertex the segment leaves.
    pub source: VertexId,
    /// The vertex the segment enters.
    pub target: VertexId,
    /// The length in m.
    pub length: f64,
    /// The number of lanes.
    pub lanes: u8,
    /// The free-flow speed in m/s.
    pub speed_limit: f64,
}

/// A directed multigraph of intersections and road segments.
///
/// Edges are immutable once added. Nothing is validated on insertion;
/// dangling vertex references are reported when the lane map is built.
#[derive(Clone, Debug, Default)]
pub struct RoadNetwork {
    num_vertices: usize,
    edges: Vec<EdgeAttributes>,
    lookup: HashMap<(VertexId, VertexId), EdgeId>,
}

impl RoadNetwork {
    /// Creates a network with `num_vertices` intersections and no edges.
    pub fn new(num_vertices: usize) -> Self {
        Self {
            num_vertices,
            ..Default::default()
        }
    }

    /// Adds a road segment, returning its edge id.
    pub fn add_edge(&mut self, attributes: EdgeAttributes) -> EdgeId {
        let id = self.edges.len() as EdgeId;
        self.edges.push(attributes);
        self.lookup
            .entry((attributes.source, attributes.target))
            .or_insert(id);
        id
    }

    /// The number of intersections.
    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    /// The number of road segments.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Gets the attributes of an edge.
    pub fn edge(&self, id: EdgeId) -> Option<&EdgeAttributes> {
        self.edges.get(id as usize)
    }

    /// Iterates over every edge together with its id.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &EdgeAttributes)> + '_ {
        self.edges
            .iter()
            .enumerate()
            .map(|(id, edge)| (id as EdgeId, edge))
    }

    /// The edge from `from` to `to`. For parallel edges, the lowest id wins.
    pub fn edge_between(&self, from: VertexId, to: VertexId) -> Option<EdgeId> {
        self.lookup.get(&(from, to)).copied()
    }

    /// Loads a network from comma separated rows of
    /// `source,target,length,lanes,speed_limit` with a header line.
    ///
    /// The vertex count is one more than the largest vertex id seen.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut edges = vec![];
        for record in csv::Reader::from_reader(reader).deserialize() {
            let edge: EdgeAttributes = record?;
            edges.push(edge);
        }
        let num_vertices = edges
            .iter()
            .map(|e| e.source.max(e.target) as usize + 1)
            .max()
            .unwrap_or(0);
        let mut network = Self::new(num_vertices);
        for edge in edges {
            network.add_edge(edge);
        }
        Ok(network)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn edge(source: VertexId, target: VertexId) -> EdgeAttributes {
        EdgeAttributes {
            source,
            target,
            length: 100.0,
            lanes: 1,
            speed_limit: 10.0,
        }
    }

    #[test]
    fn parallel_edges_resolve_to_lowest_id() {
        let mut network = RoadNetwork::new(2);
        let a = network.add_edge(edge(0, 1));
        let b = network.add_edge(edge(0, 1));
        assert_ne!(a, b);
        assert_eq!(network.edge_between(0, 1), Some(a));
        assert_eq!(network.edge_between(1, 0), None);
    }

    #[test]
    fn loads_csv() {
        let data = "source,target,length,lanes,speed_limit\n0,1,50.5,2,13.9\n1,3,20,1,8.3\n";
        let network = RoadNetwork::from_csv_reader(data.as_bytes()).unwrap();
        assert_eq!(network.num_vertices(), 4);
        assert_eq!(network.num_edges(), 2);
        assert_eq!(network.edge(0).unwrap().lanes, 2);
        assert_eq!(network.edge_between(1, 3), Some(1));
    }
}
