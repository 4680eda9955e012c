//! Origin/destination trip demand.

use crate::error::Result;
use crate::network::VertexId;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// One trip to be made by one agent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    /// The vertex the trip starts at.
    pub origin: VertexId,
    /// The vertex the trip ends at.
    pub destination: VertexId,
    /// The scheduled departure time in s.
    pub departure: f64,
}

/// Reads demand rows of `origin,destination,departure` (with a header line).
/// Rows keep their file order, which becomes the agent index.
pub fn load_csv<R: Read>(reader: R) -> Result<Vec<Demand>> {
    csv::Reader::from_reader(reader)
        .deserialize()
        .map(|record| record.map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keeps_file_order() {
        let data = "origin,destination,departure\n3,1,20\n0,2,10.5\n";
        let demand = load_csv(data.as_bytes()).unwrap();
        assert_eq!(demand.len(), 2);
        assert_eq!(demand[0].origin, 3);
        assert_eq!(demand[1].departure, 10.5);
    }

    #[test]
    fn rejects_malformed_rows() {
        let data = "origin,destination,departure\n3,x,20\n";
        assert!(load_csv(data.as_bytes()).is_err());
    }
}
