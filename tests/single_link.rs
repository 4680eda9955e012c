//! Tests that involve the simulation of a single link.

use lanesim::{
    load_agents, AgentStatus, Demand, DijkstraRouter, EdgeAttributes, Lanemap, RoadNetwork,
    RouteAssigner, Simulation, SimulationConfig, EMPTY_CELL,
};
use std::collections::HashSet;

fn single_link(length: f64, lanes: u8, departures: &[f64]) -> Simulation {
    let mut network = RoadNetwork::new(2);
    network.add_edge(EdgeAttributes {
        source: 0,
        target: 1,
        length,
        lanes,
        speed_limit: 16.66,
    });
    let config = SimulationConfig::default();
    let demand = departures
        .iter()
        .map(|departure| Demand {
            origin: 0,
            destination: 1,
            departure: *departure,
        })
        .collect::<Vec<_>>();
    let lanemap = Lanemap::build(&network, &config).unwrap();
    let mut agents = load_agents(&demand);
    RouteAssigner::new(&network, &lanemap, &config)
        .assign(&mut agents, &DijkstraRouter::new(&network))
        .unwrap();
    Simulation::new(lanemap, agents, config).unwrap()
}

/// Test that a vehicle's position increases monotonically.
#[test]
fn vehicle_drives_forward() {
    let mut sim = single_link(500.0, 1, &[0.0]);
    sim.step().unwrap();
    let mut pos = sim.agents()[0].distance_traveled();
    assert!(pos > 0.0);
    while sim.agents()[0].is_active() {
        sim.step().unwrap();
        let agent = &sim.agents()[0];
        if agent.is_active() {
            assert!(agent.distance_traveled() > pos);
            pos = agent.distance_traveled();
        }
        assert!(sim.steps() < 2000);
    }
    assert_eq!(sim.agents()[0].status(), AgentStatus::Arrived);
}

/// Test that no vehicle ever exceeds the speed limit.
#[test]
fn speed_limit_is_respected() {
    let mut sim = single_link(400.0, 1, &[0.0]);
    for _ in 0..200 {
        sim.step().unwrap();
        assert!(sim.agents()[0].speed() <= 16.66);
    }
    assert!(sim.agents()[0].metrics().max_speed > 10.0);
}

/// Test that a platoon shares the link without two vehicles in one cell.
#[test]
fn platoon_keeps_one_vehicle_per_cell() {
    let departures = (0..30).map(|i| i as f64 * 0.5).collect::<Vec<_>>();
    let mut sim = single_link(300.0, 2, &departures);
    for _ in 0..600 {
        sim.step().unwrap();
        let occupied = sim
            .lanemap()
            .cells()
            .iter()
            .filter(|c| **c != EMPTY_CELL)
            .copied()
            .collect::<Vec<_>>();
        let unique = occupied.iter().copied().collect::<HashSet<_>>();
        assert_eq!(occupied.len(), unique.len());
        let active = sim.agents().iter().filter(|a| a.is_active()).count();
        assert_eq!(occupied.len(), active);
    }
    assert!(sim.agents().iter().all(|a| a.status() == AgentStatus::Arrived));
}

/// Test that departures alternate between lanes.
#[test]
fn departures_spread_over_lanes() {
    let mut sim = single_link(300.0, 2, &[0.0, 0.0]);
    sim.step().unwrap();
    let lanes = sim.agents().iter().map(|a| a.lane()).collect::<Vec<_>>();
    assert_eq!(lanes, vec![0, 1]);
    assert!(sim.agents().iter().all(|a| a.is_active()));
}

/// Test that vehicles behind a slower leader never overtake it in its lane.
#[test]
fn followers_stay_behind_in_lane() {
    let departures = (0..10).map(|i| i as f64 * 2.0).collect::<Vec<_>>();
    let mut sim = single_link(600.0, 1, &departures);
    for _ in 0..300 {
        sim.step().unwrap();
        let mut active = sim
            .agents()
            .iter()
            .filter(|a| a.is_active())
            .collect::<Vec<_>>();
        // Earlier departures are further along
        active.sort_by_key(|a| a.id());
        for pair in active.windows(2) {
            assert!(pair[0].distance_traveled() > pair[1].distance_traveled());
        }
    }
}
