//! The parallel kernels of a step.
//!
//! Both kernels only read the state left by the previous phase and return
//! the writes they want to make; the engine applies those writes afterwards,
//! in a fixed order.

use crate::agent::{AccelerationModel, Agent, Arbitration};
use crate::config::SimulationConfig;
use crate::lanemap::{EdgeData, IntersectionControl, LaneMapIndex, LaneQueue, Lanemap};
use smallvec::SmallVec;

/// Agents this close to the stop line count as having reached it, in m.
pub const STOP_LINE_TOLERANCE: f64 = 0.5;

/// Keeps clamped positions strictly inside a cell, as a fraction of the cell length.
pub(crate) const CELL_EPSILON: f64 = 1e-6;

/// What happens to an agent at the end of its update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Drive,
    /// Reached the stop line and wants to join the lane's queue.
    ReachStopLine,
    /// Reached the end of its final edge.
    Arrive,
}

/// The new state an agent computed for itself.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AgentUpdate {
    pub agent: usize,
    pub edge: LaneMapIndex,
    /// The lane the agent is on.
    pub lane: u8,
    /// The adjacent lane the agent wants to move into.
    pub target_lane: Option<u8>,
    pub pos: f64,
    pub vel: f64,
    pub acc: f64,
    pub overflow: f64,
    pub outcome: Outcome,
}

/// An intersection's verdict on the head of one of its queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Move the agent into the given cell of the next edge.
    Discharge {
        agent: u32,
        queue: usize,
        edge: LaneMapIndex,
        lane: u8,
        cell: usize,
    },
    /// The destination cell is occupied.
    Block { agent: u32 },
}

/// A read-only view of the state at the start of a phase.
pub(crate) struct StepView<'a> {
    lanemap: &'a Lanemap,
    agents: &'a [Agent],
    config: &'a SimulationConfig,
}

impl<'a> StepView<'a> {
    pub fn new(lanemap: &'a Lanemap, agents: &'a [Agent], config: &'a SimulationConfig) -> Self {
        Self {
            lanemap,
            agents,
            config,
        }
    }

    fn occupant(&self, cell: usize) -> Option<&'a Agent> {
        self.lanemap
            .occupant(cell)
            .map(|id| &self.agents[id as usize])
    }

    /// The nearest vehicle ahead of `pos` on a lane.
    fn leader(&self, edge: &EdgeData, lane: u8, pos: f64) -> Option<&'a Agent> {
        let from = edge.cell_at(pos, self.lanemap.cell_length()) + 1;
        (from..edge.cells_per_lane).find_map(|cell| self.occupant(edge.cell_index(lane, cell)))
    }

    /// The nearest vehicle behind `pos` on a lane.
    fn follower(&self, edge: &EdgeData, lane: u8, pos: f64) -> Option<&'a Agent> {
        let to = edge.cell_at(pos, self.lanemap.cell_length());
        (0..to)
            .rev()
            .find_map(|cell| self.occupant(edge.cell_index(lane, cell)))
    }

    /// The rearmost vehicle near the start of a lane.
    fn rearmost(&self, edge: &EdgeData, lane: u8) -> Option<&'a Agent> {
        let cells = u32::min(self.config.lookahead_cells as u32, edge.cells_per_lane);
        (0..cells).find_map(|cell| self.occupant(edge.cell_index(lane, cell)))
    }

    /// The free distance ahead of `pos` on a lane, up to the end of the edge.
    fn free_gap(&self, edge: &EdgeData, lane: u8, pos: f64) -> f64 {
        match self.leader(edge, lane, pos) {
            Some(leader) => leader.pos - pos - self.config.idm.vehicle_length,
            None => edge.length - pos,
        }
    }

    /// Whether the agent could move sideways into `lane` right now.
    fn can_merge(&self, agent: &Agent, edge: &EdgeData, lane: u8) -> bool {
        let idm = &self.config.idm;
        let here = edge.cell_index(lane, edge.cell_at(agent.pos, self.lanemap.cell_length()));
        if self.occupant(here).is_some() {
            return false;
        }
        let spacing = idm.jam_distance + idm.vehicle_length;
        let rear_ok = self
            .follower(edge, lane, agent.pos)
            .map_or(true, |f| agent.pos - f.pos >= spacing + f.vel * self.config.dt);
        let front_ok = self
            .leader(edge, lane, agent.pos)
            .map_or(true, |l| l.pos - agent.pos >= spacing);
        rear_ok && front_ok
    }

    /// Greedily picks the lane with the most free space ahead.
    /// Ties go to the lower lane index.
    fn choose_lane(&self, agent: &Agent, edge: &EdgeData) -> u8 {
        let config = self.config;
        if edge.lanes < 2
            || agent.arbitration.is_queued()
            || agent.pos >= edge.length - config.lane_change_cutoff
        {
            return agent.lane;
        }

        let current = self.free_gap(edge, agent.lane, agent.pos);
        let mut best = (agent.lane, current + config.lane_change_threshold);
        let adjacent = [
            agent.lane.checked_sub(1),
            Some(agent.lane + 1).filter(|lane| *lane < edge.lanes),
        ];
        for lane in adjacent.into_iter().flatten() {
            if !self.can_merge(agent, edge, lane) {
                continue;
            }
            let gap = self.free_gap(edge, lane, agent.pos);
            if gap > best.1 {
                best = (lane, gap);
            }
        }
        best.0
    }

    /// Applies the intersection at the end of the edge as an obstacle,
    /// for an agent with no vehicle ahead of it on the edge.
    ///
    /// An approaching agent stops at the stop line unless its light is green
    /// and nobody is queued ahead of it. A queued agent pulls up to the end of
    /// the edge, and drives on if it heads its queue under a green light.
    fn approach_intersection(
        &self,
        agent: &Agent,
        mid: LaneMapIndex,
        edge: &EdgeData,
        lane: u8,
        model: &mut AccelerationModel,
    ) {
        let control = &self.lanemap.intersections()[edge.target as usize];
        let queue = control
            .queue_index(mid, lane)
            .map(|q| &control.queues()[q]);
        let green = control.is_green(mid, &self.config.signal);
        let stop_line = if agent.arbitration == Arbitration::Approaching {
            let queue_empty = queue.map_or(true, LaneQueue::is_empty);
            (!green || !queue_empty).then_some(edge.length - self.config.intersection_clearance)
        } else {
            let head = queue.and_then(|q| q.head(self.lanemap.queue_slots()));
            (!green || head != Some(agent.id as u32)).then_some(edge.length)
        };
        if let Some(line) = stop_line {
            model.stop_at_line(f64::max(line - agent.pos, 0.0), agent.vel);
            return;
        }

        // Free to go: follow whoever is at the start of the next edge
        if let Some(next) = agent.route().next() {
            let next_edge = self.lanemap.edge(next);
            let next_lane = u8::min(lane, next_edge.lanes - 1);
            if let Some(leader) = self.rearmost(next_edge, next_lane) {
                if next_edge.cell_at(leader.pos, self.lanemap.cell_length()) == 0 {
                    // The entry is taken: wait at the end of the edge
                    model.stop_at_line(f64::max(edge.length - agent.pos, 0.0), agent.vel);
                } else {
                    let net_dist =
                        edge.length - agent.pos + leader.pos - self.config.idm.vehicle_length;
                    model.follow_vehicle(net_dist, agent.vel, leader.vel);
                }
            }
        }
    }

    /// Computes an active agent's state for the next step.
    pub fn update(&self, agent: &Agent) -> Option<AgentUpdate> {
        if !agent.is_active() {
            return None;
        }
        let mid = agent.current_edge()?;
        let edge = self.lanemap.edge(mid);
        let config = self.config;
        let idm = &config.idm;
        let cell_length = self.lanemap.cell_length();

        let lane = self.choose_lane(agent, edge);
        let desired_speed = idm.desired_speed_factor * agent.velocity_factor() * edge.speed_limit;
        let mut model = AccelerationModel::new(idm, desired_speed, agent.vel);

        // Follow the vehicle ahead; never end up in or past its cell
        let mut behind_leader = f64::INFINITY;
        let mut has_leader = false;
        let lanes: SmallVec<[u8; 2]> = if lane == agent.lane {
            smallvec::smallvec![lane]
        } else {
            smallvec::smallvec![agent.lane, lane]
        };
        for l in lanes {
            if let Some(leader) = self.leader(edge, l, agent.pos) {
                let net_dist = leader.pos - agent.pos - idm.vehicle_length;
                model.follow_vehicle(net_dist, agent.vel, leader.vel);
                let leader_cell = edge.cell_at(leader.pos, cell_length) as f64;
                behind_leader = f64::min(behind_leader, (leader_cell - CELL_EPSILON) * cell_length);
                has_leader |= l == lane;
            }
        }

        let is_last = agent.route().is_last();
        let mut max_pos = behind_leader;
        if !is_last {
            // Only arbitration moves an agent onto the next edge; the distance
            // past its end is carried over as overflow
            max_pos = f64::min(max_pos, edge.length - CELL_EPSILON * cell_length);
            if !has_leader {
                self.approach_intersection(agent, mid, edge, lane, &mut model);
            }
        }

        let dt = config.dt;
        let acc = model.acc();
        let mut vel = (agent.vel + acc * dt).clamp(0.0, edge.speed_limit.max(0.0));
        let raw_pos = agent.pos + 0.5 * (agent.vel + vel) * dt;
        let pos = raw_pos.min(max_pos).max(agent.pos);
        if raw_pos > behind_leader {
            vel = f64::min(vel, (pos - agent.pos) / dt);
        }

        let stop_line = edge.length - config.intersection_clearance;
        let outcome = if is_last {
            if pos >= edge.length {
                Outcome::Arrive
            } else {
                Outcome::Drive
            }
        } else if agent.arbitration == Arbitration::Approaching
            && pos >= stop_line - STOP_LINE_TOLERANCE
        {
            Outcome::ReachStopLine
        } else {
            Outcome::Drive
        };

        Some(AgentUpdate {
            agent: agent.id,
            edge: mid,
            lane: agent.lane,
            target_lane: (lane != agent.lane).then_some(lane),
            pos,
            vel,
            acc,
            overflow: f64::max(raw_pos - edge.length, 0.0),
            outcome,
        })
    }

    /// Decides which queue heads of an intersection may move on.
    ///
    /// Heads of eligible queues are served in ticket order, at most one per
    /// queue. A head is eligible once it has reached the last cell of its
    /// edge; it discharges if the first cell of its destination lane is free
    /// and not already promised to an earlier head.
    pub fn arbitrate(&self, control: &IntersectionControl) -> SmallVec<[Decision; 4]> {
        let slots = self.lanemap.queue_slots();
        let cell_length = self.lanemap.cell_length();
        let mut heads = control
            .queues()
            .iter()
            .enumerate()
            .filter(|(_, queue)| control.is_green(queue.edge(), &self.config.signal))
            .filter_map(|(idx, queue)| queue.head(slots).map(|agent| (idx, agent)))
            .filter(|(idx, agent)| {
                let edge = self.lanemap.edge(control.queues()[*idx].edge());
                self.agents[*agent as usize].pos >= edge.length - cell_length
            })
            .map(|(idx, agent)| {
                let ticket = self.agents[agent as usize]
                    .arbitration
                    .ticket()
                    .unwrap_or(u64::MAX);
                (ticket, idx, agent)
            })
            .collect::<SmallVec<[_; 8]>>();
        heads.sort_unstable();

        let mut promised = SmallVec::<[usize; 4]>::new();
        heads
            .into_iter()
            .map(|(_, queue, agent)| {
                let head = &self.agents[agent as usize];
                let Some(next) = head.route().next() else {
                    return Decision::Block { agent };
                };
                let next_edge = self.lanemap.edge(next);
                let lane = u8::min(head.lane, next_edge.lanes - 1);
                let cell = next_edge.cell_index(lane, 0);
                if self.lanemap.occupant(cell).is_none() && !promised.contains(&cell) {
                    promised.push(cell);
                    Decision::Discharge {
                        agent,
                        queue,
                        edge: next,
                        lane,
                        cell,
                    }
                } else {
                    Decision::Block { agent }
                }
            })
            .collect()
    }
}
