use crate::lanemap::LaneMapIndex;
use arrayvec::{ArrayVec, CapacityError};

/// The maximum number of edges in a route.
pub const MAX_ROUTE_EDGES: usize = 256;

/// A fixed-capacity sequence of lane map indices with a cursor
/// pointing at the edge the agent is on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Route {
    edges: ArrayVec<LaneMapIndex, MAX_ROUTE_EDGES>,
    position: usize,
}

impl Route {
    /// Appends an edge to the route.
    pub fn push(&mut self, edge: LaneMapIndex) -> Result<(), CapacityError<LaneMapIndex>> {
        self.edges.try_push(edge)
    }

    /// The number of edges in the route.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// The edges of the route.
    pub fn edges(&self) -> &[LaneMapIndex] {
        &self.edges
    }

    /// The index of the current edge within the route.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The edge the agent is on.
    pub fn current(&self) -> Option<LaneMapIndex> {
        self.edges.get(self.position).copied()
    }

    /// The edge after the current one.
    pub fn next(&self) -> Option<LaneMapIndex> {
        self.edges.get(self.position + 1).copied()
    }

    /// Whether the current edge is the last one.
    pub fn is_last(&self) -> bool {
        self.position + 1 >= self.edges.len()
    }

    /// Moves the cursor onto the next edge.
    pub(crate) fn advance(&mut self) {
        debug_assert!(!self.is_last());
        self.position += 1;
    }

    /// Moves the cursor back to the first edge.
    pub(crate) fn rewind(&mut self) {
        self.position = 0;
    }

    pub(crate) fn clear(&mut self) {
        self.edges.clear();
        self.position = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cursor_walks_the_route() {
        let mut route = Route::default();
        for edge in [4, 2, 9] {
            route.push(edge).unwrap();
        }
        assert_eq!(route.current(), Some(4));
        assert_eq!(route.next(), Some(2));
        route.advance();
        route.advance();
        assert!(route.is_last());
        assert_eq!(route.current(), Some(9));
        assert_eq!(route.next(), None);
        route.rewind();
        assert_eq!(route.current(), Some(4));
    }

    #[test]
    fn push_beyond_capacity_fails() {
        let mut route = Route::default();
        for i in 0..MAX_ROUTE_EDGES {
            route.push(i as LaneMapIndex).unwrap();
        }
        assert!(route.push(0).is_err());
        assert_eq!(route.len(), MAX_ROUTE_EDGES);
    }
}
