use super::LaneMapIndex;
use crate::config::SignalPolicy;
use crate::network::VertexId;
use smallvec::SmallVec;

/// A bounded FIFO of agents waiting at the stop line of one incoming lane.
///
/// The slots live in the lane map's flat `queue_slots` array; the queue only
/// owns its window into it, as a ring buffer described by `start` and `len`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaneQueue {
    /// The incoming edge.
    edge: LaneMapIndex,
    /// The lane of the incoming edge.
    lane: u8,
    /// Where this queue's window starts in the slot array.
    slot_offset: usize,
    capacity: usize,
    /// The ring position of the head of the queue.
    start: usize,
    len: usize,
}

impl LaneQueue {
    pub(crate) fn new(edge: LaneMapIndex, lane: u8, slot_offset: usize, capacity: usize) -> Self {
        Self {
            edge,
            lane,
            slot_offset,
            capacity,
            start: 0,
            len: 0,
        }
    }

    /// The incoming edge this queue belongs to.
    pub fn edge(&self) -> LaneMapIndex {
        self.edge
    }

    /// The lane of the incoming edge this queue belongs to.
    pub fn lane(&self) -> u8 {
        self.lane
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The slot index of the head of the queue.
    pub fn start(&self) -> usize {
        self.slot_offset + self.start
    }

    /// The slot index one past the tail of the queue.
    pub fn end(&self) -> usize {
        self.slot_offset + (self.start + self.len) % self.capacity
    }

    /// The agent at the head of the queue.
    pub fn head(&self, slots: &[u32]) -> Option<u32> {
        (self.len > 0).then(|| slots[self.start()])
    }

    /// The queued agents, head first.
    pub fn iter<'a>(&'a self, slots: &'a [u32]) -> impl Iterator<Item = u32> + 'a {
        (0..self.len).map(move |i| slots[self.slot_offset + (self.start + i) % self.capacity])
    }

    /// Appends an agent. Returns `false` if the queue is full.
    pub(crate) fn push(&mut self, slots: &mut [u32], agent: u32) -> bool {
        if self.is_full() {
            return false;
        }
        slots[self.end()] = agent;
        self.len += 1;
        true
    }

    /// Removes and returns the head of the queue.
    pub(crate) fn pop(&mut self, slots: &mut [u32]) -> Option<u32> {
        let agent = self.head(slots)?;
        slots[self.start()] = super::EMPTY_CELL;
        self.start = (self.start + 1) % self.capacity;
        self.len -= 1;
        Some(agent)
    }

    pub(crate) fn clear(&mut self, slots: &mut [u32]) {
        slots[self.slot_offset..self.slot_offset + self.capacity].fill(super::EMPTY_CELL);
        self.start = 0;
        self.len = 0;
    }
}

/// The control structure of one intersection: a queue per incoming lane
/// and the signal state deciding which of them may discharge.
#[derive(Clone, Debug, PartialEq)]
pub struct IntersectionControl {
    vertex: VertexId,
    queues: Vec<LaneQueue>,
    /// The incoming edges, one signal phase each.
    phases: SmallVec<[LaneMapIndex; 4]>,
    /// The current phase.
    phase: usize,
    /// The time spent in the current phase in s.
    phase_elapsed: f64,
}

impl IntersectionControl {
    pub(crate) fn new(vertex: VertexId, queues: Vec<LaneQueue>, phases: SmallVec<[LaneMapIndex; 4]>) -> Self {
        Self {
            vertex,
            queues,
            phases,
            phase: 0,
            phase_elapsed: 0.0,
        }
    }

    pub fn vertex(&self) -> VertexId {
        self.vertex
    }

    /// The incoming lane queues, grouped by edge in lane map order.
    pub fn queues(&self) -> &[LaneQueue] {
        &self.queues
    }

    pub(crate) fn queue_mut(&mut self, idx: usize) -> &mut LaneQueue {
        &mut self.queues[idx]
    }

    /// Finds the queue of the given incoming lane.
    pub fn queue_index(&self, edge: LaneMapIndex, lane: u8) -> Option<usize> {
        self.queues
            .iter()
            .position(|q| q.edge == edge && q.lane == lane)
    }

    /// The number of queued agents over all incoming lanes.
    pub fn total_queued(&self) -> usize {
        self.queues.iter().map(LaneQueue::len).sum()
    }

    /// The current signal phase.
    pub fn phase(&self) -> usize {
        self.phase
    }

    /// The incoming edge holding the right of way, if the signal restricts it.
    pub fn green_edge(&self, policy: &SignalPolicy) -> Option<LaneMapIndex> {
        match policy {
            SignalPolicy::FixedTime { .. } if self.phases.len() > 1 => Some(self.phases[self.phase]),
            _ => None,
        }
    }

    /// Whether agents on the given incoming edge may currently discharge.
    pub fn is_green(&self, edge: LaneMapIndex, policy: &SignalPolicy) -> bool {
        self.green_edge(policy).map_or(true, |green| green == edge)
    }

    /// Advances the signal timing by `dt` seconds.
    pub(crate) fn advance_signal(&mut self, dt: f64, policy: &SignalPolicy) {
        if let SignalPolicy::FixedTime { phase_duration } = *policy {
            if self.phases.len() < 2 {
                return;
            }
            self.phase_elapsed += dt;
            if self.phase_elapsed >= phase_duration {
                self.phase_elapsed -= phase_duration;
                self.phase = (self.phase + 1) % self.phases.len();
            }
        }
    }

    pub(crate) fn reset(&mut self, slots: &mut [u32]) {
        for queue in &mut self.queues {
            queue.clear(slots);
        }
        self.phase = 0;
        self.phase_elapsed = 0.0;
    }
}
