//! Writing simulation results to disk.

use crate::agent::{Agent, AgentStatus};
use crate::error::Result;
use crate::lanemap::Lanemap;
use crate::network::{EdgeId, VertexId};
use crate::simulation::{Simulation, Snapshot};
use log::info;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One line of the people file.
#[derive(Debug, Serialize)]
struct PersonRecord {
    p: usize,
    init_intersection: VertexId,
    end_intersection: VertexId,
    time_departure: f64,
    travel_time: Option<f64>,
    queued_steps: u64,
    slowdown_steps: u64,
    route_position: usize,
    speed: f64,
    max_speed: f64,
    cum_distance: f64,
    avg_speed: f64,
    status: &'static str,
    lane: u8,
    lane_changes: u32,
    edge_id: Option<EdgeId>,
}

impl PersonRecord {
    fn new(agent: &Agent, lanemap: &Lanemap) -> Self {
        let metrics = agent.metrics();
        Self {
            p: agent.id(),
            init_intersection: agent.origin(),
            end_intersection: agent.destination(),
            time_departure: agent.departure(),
            travel_time: metrics.travel_time(),
            queued_steps: metrics.queued_steps,
            slowdown_steps: metrics.slowdown_steps,
            route_position: agent.route().position(),
            speed: agent.speed(),
            max_speed: metrics.max_speed,
            cum_distance: metrics.distance,
            avg_speed: metrics.average_speed(),
            status: match agent.status() {
                AgentStatus::Pending => "pending",
                AgentStatus::Active => "active",
                AgentStatus::Arrived => "arrived",
                AgentStatus::Unroutable => "unroutable",
            },
            lane: agent.lane(),
            lane_changes: metrics.lane_changes,
            edge_id: agent.current_edge().and_then(|mid| lanemap.edge_id(mid)),
        }
    }
}

/// Writes one line per agent with its trip statistics and final state.
pub fn write_people<W: Write>(writer: W, agents: &[Agent], lanemap: &Lanemap) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for agent in agents {
        writer.serialize(PersonRecord::new(agent, lanemap))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes each agent's route as `index:[edge,edge,]`, using network edge ids.
pub fn write_routes<W: Write>(mut writer: W, agents: &[Agent], lanemap: &Lanemap) -> Result<()> {
    writeln!(writer, "p:route")?;
    for agent in agents {
        write!(writer, "{}:[", agent.id())?;
        for eid in agent.route().edges().iter().filter_map(|mid| lanemap.edge_id(*mid)) {
            write!(writer, "{},", eid)?;
        }
        writeln!(writer, "]")?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes one comma separated line per snapshot, holding the selected counts.
pub fn write_counts<W, F>(writer: W, snapshots: &[Snapshot], counts: F) -> Result<()>
where
    W: Write,
    F: Fn(&Snapshot) -> &[u32],
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(writer);
    for snapshot in snapshots {
        writer.serialize(counts(snapshot))?;
    }
    writer.flush()?;
    Ok(())
}

fn create(dir: &Path, name: &str) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(dir.join(name))?))
}

/// Writes every result file of a simulation into `dir`.
pub fn save_all(dir: &Path, sim: &Simulation) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let (agents, lanemap, snapshots) = (sim.agents(), sim.lanemap(), sim.snapshots());
    write_people(create(dir, "people.csv")?, agents, lanemap)?;
    write_routes(create(dir, "route.csv")?, agents, lanemap)?;
    write_counts(create(dir, "upstream_count.csv")?, snapshots, |s| &s.upstream)?;
    write_counts(create(dir, "downstream_count.csv")?, snapshots, |s| &s.downstream)?;
    write_counts(create(dir, "intersection_count.csv")?, snapshots, |s| &s.queue_lengths)?;
    info!("Saved results of {} agents to {}", agents.len(), dir.display());
    Ok(())
}
