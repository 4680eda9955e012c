//! Simulated vehicles.

pub use self::acceleration::{desired_gap, idm, AccelerationModel};
pub use self::route::{Route, MAX_ROUTE_EDGES};
use crate::demand::Demand;
use crate::error::{Result, SimError};
use crate::lanemap::LaneMapIndex;
use crate::network::VertexId;

mod acceleration;
mod route;

/// Speeds below this many m/s count as stopped, in m/s.
pub const SLOWDOWN_SPEED: f64 = 0.1;

/// Where an agent is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentStatus {
    /// Waiting for its departure time.
    Pending,
    /// Driving.
    Active,
    /// Reached the end of its route. Never reactivated.
    Arrived,
    /// Has no usable route and never departs.
    Unroutable,
}

/// Why an agent has no usable route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteIssue {
    /// The router found no path.
    NoRoute,
    /// The path had more edges than a route can hold.
    Overflow,
}

/// The state of an agent with respect to the intersection at the end of its edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arbitration {
    /// Driving towards the stop line.
    Approaching,
    /// Waiting in the queue of its lane. The ticket orders arrivals.
    Queued { ticket: u64 },
    /// Granted the right of way, moving onto the next edge.
    Discharging,
    /// At the head of its queue, but the next edge has no room.
    Blocked { ticket: u64 },
}

impl Arbitration {
    /// `approaching -> queued`
    pub(crate) fn enqueue(&mut self, ticket: u64) {
        debug_assert_eq!(*self, Arbitration::Approaching);
        *self = Arbitration::Queued { ticket };
    }

    /// `queued -> discharging`
    pub(crate) fn grant(&mut self) {
        debug_assert!(self.ticket().is_some());
        *self = Arbitration::Discharging;
    }

    /// `queued -> blocked`
    pub(crate) fn block(&mut self) {
        if let Some(ticket) = self.ticket() {
            *self = Arbitration::Blocked { ticket };
        }
    }

    /// `discharging -> approaching`, on the next edge.
    pub(crate) fn complete(&mut self) {
        debug_assert_eq!(*self, Arbitration::Discharging);
        *self = Arbitration::Approaching;
    }

    /// The queue ticket, if the agent is waiting in a queue.
    pub fn ticket(&self) -> Option<u64> {
        match *self {
            Arbitration::Queued { ticket } | Arbitration::Blocked { ticket } => Some(ticket),
            _ => None,
        }
    }

    /// Whether the agent is held by an intersection queue.
    pub fn is_queued(&self) -> bool {
        !matches!(self, Arbitration::Approaching)
    }
}

/// Statistics accumulated over an agent's trip.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AgentMetrics {
    /// The number of steps spent active.
    pub steps: u64,
    /// The number of steps spent in an intersection queue.
    pub queued_steps: u64,
    /// The number of steps spent (nearly) stopped.
    pub slowdown_steps: u64,
    pub lane_changes: u32,
    /// The highest speed reached in m/s.
    pub max_speed: f64,
    /// The distance travelled in m.
    pub distance: f64,
    /// The sum of the speed over all active steps, in m/s.
    pub cumulative_speed: f64,
    /// The time the agent entered the network, in s.
    pub departed_at: Option<f64>,
    /// The time the agent reached its destination, in s.
    pub arrived_at: Option<f64>,
}

impl AgentMetrics {
    /// The time from departure to arrival in s.
    pub fn travel_time(&self) -> Option<f64> {
        Some(self.arrived_at? - self.departed_at?)
    }

    /// The mean speed over all active steps in m/s.
    pub fn average_speed(&self) -> f64 {
        if self.steps == 0 {
            0.0
        } else {
            self.cumulative_speed / self.steps as f64
        }
    }
}

/// A simulated vehicle.
#[derive(Clone, Debug, PartialEq)]
pub struct Agent {
    /// The agent's index.
    pub(crate) id: usize,
    origin: VertexId,
    destination: VertexId,
    /// The scheduled departure time in s.
    departure: f64,
    route: Route,
    route_issue: Option<RouteIssue>,
    pub(crate) status: AgentStatus,
    pub(crate) arbitration: Arbitration,
    /// The lane of the current edge.
    pub(crate) lane: u8,
    /// The longitudinal position along the current edge, in m.
    pub(crate) pos: f64,
    /// The velocity in m/s.
    pub(crate) vel: f64,
    /// The acceleration of the last step in m/s<sup>2</sup>.
    pub(crate) acc: f64,
    /// How far past the end of the edge the last step would have carried the agent, in m.
    pub(crate) overflow: f64,
    /// Multiplied with the speed limit to give the desired speed.
    velocity_factor: f64,
    pub(crate) metrics: AgentMetrics,
}

impl Agent {
    /// Creates a pending agent with an empty route.
    pub fn new(id: usize, demand: &Demand) -> Self {
        Self {
            id,
            origin: demand.origin,
            destination: demand.destination,
            departure: demand.departure,
            route: Route::default(),
            route_issue: None,
            status: AgentStatus::Pending,
            arbitration: Arbitration::Approaching,
            lane: 0,
            pos: 0.0,
            vel: 0.0,
            acc: 0.0,
            overflow: 0.0,
            velocity_factor: 1.0,
            metrics: AgentMetrics::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn origin(&self) -> VertexId {
        self.origin
    }

    pub fn destination(&self) -> VertexId {
        self.destination
    }

    /// The scheduled departure time in s.
    pub fn departure(&self) -> f64 {
        self.departure
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn route_issue(&self) -> Option<RouteIssue> {
        self.route_issue
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }

    pub fn arbitration(&self) -> Arbitration {
        self.arbitration
    }

    /// The edge the agent is on.
    pub fn current_edge(&self) -> Option<LaneMapIndex> {
        self.route.current()
    }

    pub fn lane(&self) -> u8 {
        self.lane
    }

    /// The distance travelled along the current edge in m.
    pub fn distance_traveled(&self) -> f64 {
        self.pos
    }

    /// The velocity in m/s.
    pub fn speed(&self) -> f64 {
        self.vel
    }

    pub fn acceleration(&self) -> f64 {
        self.acc
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    pub fn velocity_factor(&self) -> f64 {
        self.velocity_factor
    }

    /// Sets the desired velocity adjustment factor, a scalar which is
    /// multiplied with the speed limit to obtain the desired speed.
    pub fn set_velocity_factor(&mut self, factor: f64) {
        self.velocity_factor = factor;
    }

    /// Appends an edge to the agent's route.
    pub fn extend_route(&mut self, edge: LaneMapIndex) -> Result<()> {
        self.route.push(edge).map_err(|_| SimError::RouteOverflow {
            agent: self.id,
            capacity: MAX_ROUTE_EDGES,
        })
    }

    /// Marks the agent as permanently unable to depart.
    pub(crate) fn mark_unroutable(&mut self, issue: RouteIssue) {
        self.route.clear();
        self.route_issue = Some(issue);
        self.status = AgentStatus::Unroutable;
    }

    /// Puts the agent at the start of its first edge.
    pub(crate) fn activate(&mut self, lane: u8, now: f64) {
        debug_assert_eq!(self.status, AgentStatus::Pending);
        self.status = AgentStatus::Active;
        self.arbitration = Arbitration::Approaching;
        self.lane = lane;
        self.pos = 0.0;
        self.vel = 0.0;
        self.acc = 0.0;
        self.overflow = 0.0;
        self.metrics.departed_at = Some(now);
    }

    /// Takes the agent out of the network at its destination.
    pub(crate) fn arrive(&mut self, now: f64) {
        self.status = AgentStatus::Arrived;
        self.metrics.arrived_at = Some(now);
    }

    /// Moves the agent onto the next edge of its route.
    pub(crate) fn enter_next_edge(&mut self, lane: u8, pos: f64) {
        self.route.advance();
        self.arbitration.complete();
        self.lane = lane;
        self.pos = pos;
        self.overflow = 0.0;
    }

    /// Returns the agent to its pre-departure state, keeping its route.
    pub(crate) fn reset(&mut self) {
        if self.status != AgentStatus::Unroutable {
            self.status = AgentStatus::Pending;
        }
        self.route.rewind();
        self.arbitration = Arbitration::Approaching;
        self.lane = 0;
        self.pos = 0.0;
        self.vel = 0.0;
        self.acc = 0.0;
        self.overflow = 0.0;
        self.metrics = AgentMetrics::default();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pending_agent() -> Agent {
        Agent::new(
            3,
            &Demand {
                origin: 0,
                destination: 4,
                departure: 300.0,
            },
        )
    }

    #[test]
    fn arbitration_transitions() {
        let mut state = Arbitration::Approaching;
        assert!(!state.is_queued());
        state.enqueue(5);
        assert_eq!(state.ticket(), Some(5));
        state.block();
        assert_eq!(state, Arbitration::Blocked { ticket: 5 });
        state.grant();
        assert_eq!(state, Arbitration::Discharging);
        assert!(state.is_queued());
        state.complete();
        assert_eq!(state, Arbitration::Approaching);
    }

    #[test]
    fn route_overflow_names_the_agent() {
        let mut agent = pending_agent();
        for i in 0..MAX_ROUTE_EDGES {
            agent.extend_route(i as LaneMapIndex).unwrap();
        }
        assert!(matches!(
            agent.extend_route(0),
            Err(SimError::RouteOverflow { agent: 3, .. })
        ));
    }

    #[test]
    fn reset_keeps_route_and_unroutable_status() {
        let mut agent = pending_agent();
        agent.extend_route(1).unwrap();
        agent.extend_route(2).unwrap();
        agent.activate(0, 300.0);
        agent.arbitration = Arbitration::Queued { ticket: 1 };
        agent.arbitration.grant();
        agent.enter_next_edge(0, 0.5);
        agent.reset();
        assert_eq!(agent.status(), AgentStatus::Pending);
        assert_eq!(agent.current_edge(), Some(1));
        assert_eq!(agent.metrics().departed_at, None);

        let mut lost = pending_agent();
        lost.mark_unroutable(RouteIssue::NoRoute);
        lost.reset();
        assert_eq!(lost.status(), AgentStatus::Unroutable);
    }

    #[test]
    fn metrics_derive_travel_time() {
        let metrics = AgentMetrics {
            steps: 4,
            cumulative_speed: 20.0,
            departed_at: Some(10.0),
            arrived_at: Some(12.0),
            ..Default::default()
        };
        assert_eq!(metrics.travel_time(), Some(2.0));
        assert_eq!(metrics.average_speed(), 5.0);
        assert_eq!(AgentMetrics::default().travel_time(), None);
    }
}
