//! The time-stepped simulation engine.

pub use self::sample::Snapshot;
pub use self::step::STOP_LINE_TOLERANCE;
use self::step::{AgentUpdate, Decision, Outcome, StepView, CELL_EPSILON};
use crate::agent::{Agent, AgentStatus, SLOWDOWN_SPEED};
use crate::config::SimulationConfig;
use crate::demand::Demand;
use crate::error::{Result, SimError};
use crate::lanemap::{LaneMapIndex, Lanemap, EMPTY_CELL};
use crate::network::VertexId;
use crate::util::rotated_range;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod sample;
mod step;

/// Creates one pending agent per trip, in demand order.
pub fn load_agents(demand: &[Demand]) -> Vec<Agent> {
    if demand.is_empty() {
        error!("No agent to simulate");
        return vec![];
    }
    let agents = demand
        .iter()
        .enumerate()
        .map(|(id, trip)| Agent::new(id, trip))
        .collect::<Vec<_>>();
    info!("Loaded {} agents", agents.len());
    agents
}

/// The outcome of [Simulation::run].
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    /// The number of steps taken by this run.
    pub steps: u64,
    /// The simulated time the run started at in s.
    pub start_time: f64,
    /// The simulated time the run ended at in s.
    pub end_time: f64,
    pub pending: usize,
    pub active: usize,
    pub arrived: usize,
    pub unroutable: usize,
    /// Whether the run ended because the stop flag was raised.
    pub stopped: bool,
}

/// An agent reaching the stop line this step.
#[derive(Clone, Copy, Debug)]
struct EnqueueRequest {
    vertex: VertexId,
    edge: LaneMapIndex,
    lane: u8,
    pos: f64,
    agent: usize,
}

/// A lane-level traffic simulation.
pub struct Simulation {
    config: SimulationConfig,
    lanemap: Lanemap,
    agents: Vec<Agent>,
    /// The simulated time in s.
    time: f64,
    /// The number of steps taken since the last reset.
    steps: u64,
    /// The next queue ticket to hand out.
    next_ticket: u64,
    snapshots: Vec<Snapshot>,
    stop: Arc<AtomicBool>,
    /// The cell buffer the next step is written into.
    next_cells: Vec<u32>,
}

impl Simulation {
    /// Creates a simulation over a lane map and a set of routed agents.
    ///
    /// Fails if the configuration is out of range or was not the one the
    /// lane map was built with.
    pub fn new(lanemap: Lanemap, agents: Vec<Agent>, config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        if config.cell_length != lanemap.cell_length() {
            return Err(SimError::Config(format!(
                "cell_length is {} but the lane map was built with {}",
                config.cell_length,
                lanemap.cell_length()
            )));
        }
        let next_cells = vec![EMPTY_CELL; lanemap.cells().len()];
        Ok(Self {
            config,
            lanemap,
            agents,
            time: 0.0,
            steps: 0,
            next_ticket: 0,
            snapshots: vec![],
            stop: Arc::new(AtomicBool::new(false)),
            next_cells,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn lanemap(&self) -> &Lanemap {
        &self.lanemap
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// The simulated time in s.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// The number of steps taken since the last reset.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// The snapshots taken so far, oldest first.
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// A flag which, once raised, ends [Simulation::run] at the next step boundary.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Draws every agent's velocity factor from `N(1, stddev)`, clamped to `[0.75, 1.25]`.
    pub fn randomise_velocity_factors(&mut self, stddev: f64, seed: u64) -> Result<()> {
        let normal = Normal::new(1.0, stddev).map_err(|err| SimError::Config(err.to_string()))?;
        let mut rng = StdRng::seed_from_u64(seed);
        for agent in &mut self.agents {
            agent.set_velocity_factor(normal.sample(&mut rng).clamp(0.75, 1.25));
        }
        Ok(())
    }

    /// Returns every agent to its pre-departure state and empties the network.
    /// Routes and unroutable markers are kept.
    pub fn reset_agents(&mut self) {
        for agent in &mut self.agents {
            agent.reset();
        }
        self.lanemap.reset();
        self.snapshots.clear();
        self.time = 0.0;
        self.steps = 0;
        self.next_ticket = 0;
    }

    /// Simulates from `start` until `end` seconds, or until the stop flag is raised.
    ///
    /// Steps before the first departure are skipped. Any invariant violation
    /// aborts the run.
    pub fn run(&mut self, start: f64, end: f64) -> Result<RunSummary> {
        let dt = self.config.dt;
        self.time = first_step_time(start, dt, &self.agents);
        let start_time = self.time;
        info!(
            "Simulating {} agents from {:.1} s to {:.1} s",
            self.agents.len(),
            start_time,
            end
        );

        let mut steps = 0;
        let mut stopped = false;
        while self.time < end {
            if self.stop.load(Ordering::Relaxed) {
                warn!("Stopped at {:.1} s", self.time);
                stopped = true;
                break;
            }
            if let Err(err) = self.step() {
                if err.is_invariant_violation() {
                    error!("Invariant violated at step {}, aborting: {}", self.steps, err);
                } else {
                    error!("Simulation aborted: {}", err);
                }
                return Err(err);
            }
            steps += 1;
        }

        let count = |status: AgentStatus| self.agents.iter().filter(|a| a.status() == status).count();
        let summary = RunSummary {
            steps,
            start_time,
            end_time: self.time,
            pending: count(AgentStatus::Pending),
            active: count(AgentStatus::Active),
            arrived: count(AgentStatus::Arrived),
            unroutable: count(AgentStatus::Unroutable),
            stopped,
        };
        info!(
            "Simulated {} steps: {} arrived, {} active, {} pending, {} unroutable",
            summary.steps, summary.arrived, summary.active, summary.pending, summary.unroutable
        );
        Ok(summary)
    }

    /// Advances the simulation by one time step.
    pub fn step(&mut self) -> Result<()> {
        let now = self.time;
        let dt = self.config.dt;
        self.steps += 1;

        self.activate_departures(now);
        self.update_agents(now)?;
        self.arbitrate()?;
        for control in &mut self.lanemap.intersections {
            control.advance_signal(dt, &self.config.signal);
        }

        self.time += dt;
        if self.steps % self.config.sample_interval == 0 {
            let snapshot = Snapshot::take(
                self.steps,
                self.time,
                &self.lanemap,
                &self.agents,
                self.config.monitored_intersection,
            );
            debug!(
                "Snapshot at {:.1} s: {} vehicles on the network",
                self.time,
                snapshot.vehicles.iter().sum::<u32>()
            );
            self.snapshots.push(snapshot);
        }
        Ok(())
    }

    /// Puts every agent whose departure time has come at the start of its first edge.
    /// An agent finding no free lane tries again next step.
    fn activate_departures(&mut self, now: f64) {
        for agent in &mut self.agents {
            if agent.status() != AgentStatus::Pending || agent.departure() > now {
                continue;
            }
            let Some(mid) = agent.current_edge() else {
                continue;
            };
            let edge = &mut self.lanemap.edges[mid as usize];
            let lanes = edge.lanes as usize;
            let cells = &mut self.lanemap.cells;
            let free = rotated_range(lanes, agent.id % lanes)
                .map(|lane| lane as u8)
                .find(|lane| cells[edge.cell_index(*lane, 0)] == EMPTY_CELL);
            if let Some(lane) = free {
                cells[edge.cell_index(lane, 0)] = agent.id as u32;
                edge.entered += 1;
                agent.activate(lane, now);
            }
        }
    }

    /// Moves every active agent, then queues those that reached a stop line.
    fn update_agents(&mut self, now: f64) -> Result<()> {
        let view = StepView::new(&self.lanemap, &self.agents, &self.config);
        let updates = self
            .agents
            .par_iter()
            .filter_map(|agent| view.update(agent))
            .collect::<Vec<_>>();

        let changed = self.claim_cells(&updates)?;
        std::mem::swap(&mut self.lanemap.cells, &mut self.next_cells);

        let dt = self.config.dt;
        let mut requests = vec![];
        for (update, changed) in updates.iter().zip(changed) {
            let agent = &mut self.agents[update.agent];
            let edge = &mut self.lanemap.edges[update.edge as usize];
            let travelled = match update.outcome {
                Outcome::Arrive => f64::min(update.pos, edge.length) - agent.pos,
                _ => update.pos - agent.pos,
            };

            let metrics = &mut agent.metrics;
            metrics.steps += 1;
            metrics.distance += travelled.max(0.0);
            metrics.cumulative_speed += update.vel;
            metrics.max_speed = metrics.max_speed.max(update.vel);
            if update.vel < SLOWDOWN_SPEED {
                metrics.slowdown_steps += 1;
            }
            if agent.arbitration.is_queued() {
                metrics.queued_steps += 1;
            }

            agent.pos = update.pos;
            agent.vel = update.vel;
            agent.acc = update.acc;
            agent.overflow = update.overflow;
            if let Some(lane) = update.target_lane.filter(|_| changed) {
                agent.lane = lane;
                agent.metrics.lane_changes += 1;
            }

            match update.outcome {
                Outcome::Arrive => {
                    agent.arrive(now + dt);
                    edge.exited += 1;
                    debug!("Agent {} arrived at {:.1} s", agent.id, now + dt);
                }
                Outcome::ReachStopLine => requests.push(EnqueueRequest {
                    vertex: edge.target,
                    edge: update.edge,
                    lane: agent.lane,
                    pos: update.pos,
                    agent: update.agent,
                }),
                Outcome::Drive => {}
            }
        }

        self.enqueue(requests)
    }

    /// Writes the agents' new cells into the spare buffer.
    ///
    /// Everyone first claims a cell in its own lane, in agent order; lane
    /// changers then move across if the target cell is still free. Returns
    /// which updates changed lanes.
    fn claim_cells(&mut self, updates: &[AgentUpdate]) -> Result<Vec<bool>> {
        let cell_length = self.lanemap.cell_length();
        let edges = &self.lanemap.edges;
        let next = &mut self.next_cells;
        next.clear();
        next.resize(self.lanemap.cells.len(), EMPTY_CELL);

        for update in updates.iter().filter(|u| u.outcome != Outcome::Arrive) {
            let edge = &edges[update.edge as usize];
            let cell = edge.cell_index(update.lane, edge.cell_at(update.pos, cell_length));
            if next[cell] != EMPTY_CELL {
                return Err(SimError::CellConflict {
                    cell,
                    first: next[cell] as usize,
                    second: update.agent,
                    step: self.steps,
                });
            }
            next[cell] = update.agent as u32;
        }

        let mut changed = vec![false; updates.len()];
        for (update, changed) in updates.iter().zip(&mut changed) {
            let Some(target) = update.target_lane else {
                continue;
            };
            if update.outcome == Outcome::Arrive {
                continue;
            }
            let edge = &edges[update.edge as usize];
            let cell = edge.cell_at(update.pos, cell_length);
            let to = edge.cell_index(target, cell);
            if next[to] == EMPTY_CELL {
                next[edge.cell_index(update.lane, cell)] = EMPTY_CELL;
                next[to] = update.agent as u32;
                *changed = true;
            }
        }
        Ok(changed)
    }

    /// Appends agents to their lane queues, furthest along first.
    /// An agent facing a full queue stays approaching and retries next step.
    fn enqueue(&mut self, mut requests: Vec<EnqueueRequest>) -> Result<()> {
        requests.sort_by(|a, b| {
            (a.vertex, a.edge, a.lane)
                .cmp(&(b.vertex, b.edge, b.lane))
                .then(b.pos.total_cmp(&a.pos))
                .then(a.agent.cmp(&b.agent))
        });
        for request in requests {
            let control = &mut self.lanemap.intersections[request.vertex as usize];
            let Some(idx) = control.queue_index(request.edge, request.lane) else {
                continue;
            };
            let queue = control.queue_mut(idx);
            if queue.is_full() {
                debug!(
                    "Queue {} of intersection {} is full, agent {} waits",
                    idx, request.vertex, request.agent
                );
                continue;
            }
            if !queue.push(&mut self.lanemap.queue_slots, request.agent as u32) {
                return Err(SimError::QueueOverflow {
                    vertex: request.vertex,
                    queue: idx,
                    step: self.steps,
                });
            }
            self.agents[request.agent].arbitration.enqueue(self.next_ticket);
            self.next_ticket += 1;
        }
        Ok(())
    }

    /// Lets every intersection discharge the queue heads it grants.
    fn arbitrate(&mut self) -> Result<()> {
        let view = StepView::new(&self.lanemap, &self.agents, &self.config);
        let decisions = self
            .lanemap
            .intersections
            .par_iter()
            .map(|control| view.arbitrate(control))
            .collect::<Vec<_>>();

        for (vertex, decisions) in decisions.into_iter().enumerate() {
            for decision in decisions {
                match decision {
                    Decision::Block { agent } => {
                        // Held at the end of its edge
                        let agent = &mut self.agents[agent as usize];
                        agent.arbitration.block();
                        agent.vel = 0.0;
                    }
                    Decision::Discharge {
                        agent,
                        queue,
                        edge,
                        lane,
                        cell,
                    } => self.discharge(vertex, queue, agent as usize, edge, lane, cell)?,
                }
            }
        }
        Ok(())
    }

    /// Moves a queue head onto the first cell of its next edge.
    fn discharge(
        &mut self,
        vertex: usize,
        queue: usize,
        id: usize,
        next: LaneMapIndex,
        lane: u8,
        cell: usize,
    ) -> Result<()> {
        let popped = self.lanemap.intersections[vertex]
            .queue_mut(queue)
            .pop(&mut self.lanemap.queue_slots);
        debug_assert_eq!(popped, Some(id as u32));
        if let Some(first) = self.lanemap.occupant(cell) {
            return Err(SimError::CellConflict {
                cell,
                first: first as usize,
                second: id,
                step: self.steps,
            });
        }

        let cell_length = self.lanemap.cell_length();
        let agent = &mut self.agents[id];
        let Some(current) = agent.current_edge() else {
            return Ok(());
        };
        let from = &mut self.lanemap.edges[current as usize];
        let old_cell = from.cell_index(agent.lane, from.cell_at(agent.pos, cell_length));
        let remaining = f64::max(from.length - agent.pos, 0.0);
        from.exited += 1;
        if self.lanemap.cells[old_cell] == id as u32 {
            self.lanemap.cells[old_cell] = EMPTY_CELL;
        }

        let pos = f64::min(agent.overflow, (1.0 - CELL_EPSILON) * cell_length);
        self.lanemap.cells[cell] = id as u32;
        self.lanemap.edges[next as usize].entered += 1;
        agent.metrics.distance += remaining + pos;
        agent.arbitration.grant();
        agent.enter_next_edge(lane, pos);
        Ok(())
    }
}

/// The first simulated time: the step boundary at or before the earliest
/// pending departure, but never before `start`.
fn first_step_time(start: f64, dt: f64, agents: &[Agent]) -> f64 {
    agents
        .iter()
        .filter(|a| a.status() == AgentStatus::Pending)
        .map(Agent::departure)
        .min_by(f64::total_cmp)
        .map_or(start, |departure| f64::max(start, (departure / dt).floor() * dt))
}
