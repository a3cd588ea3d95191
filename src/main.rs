use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fleetsim::config::SimConfig;
use fleetsim::model::{Location, NodeKind, Region, RegionBuilder, Vehicle, VehicleId};
use fleetsim::rating::{AmountDeliveredRater, InTimeRater, Rater, TravelDistanceRater};
use fleetsim::sim::Simulation;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Last-mile delivery fleet simulation")]
struct Cli {
    /// Number of ticks to run.
    #[arg(long, default_value_t = 500)]
    ticks: i64,

    /// Number of delivery vehicles, split evenly across restaurants.
    #[arg(long, default_value_t = 6)]
    vehicles: u32,

    /// Capacity of each vehicle.
    #[arg(long, default_value_t = 10)]
    capacity: u32,

    /// Optional path to a JSON file overriding `SimConfig` defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// A small built-in region standing in for a real map: three restaurants on
/// a spine of intersections, each with a couple of neighborhoods hanging
/// off it. Good enough to exercise every module end to end without
/// requiring an external map file.
fn demo_region() -> anyhow::Result<Region> {
    let r1 = Location::new(0, 0);
    let r2 = Location::new(10, 0);
    let r3 = Location::new(20, 0);
    let n1 = Location::new(2, 3);
    let n2 = Location::new(8, -3);
    let n3 = Location::new(12, 3);
    let n4 = Location::new(18, -3);
    let n5 = Location::new(22, 3);

    let region = RegionBuilder::new()
        .add_node(r1, "Riverside Pizza", NodeKind::Restaurant { menu: vec!["Margherita".into(), "Pepperoni".into()] })
        .add_node(r2, "Noodle House", NodeKind::Restaurant { menu: vec!["Pad Thai".into(), "Ramen".into()] })
        .add_node(r3, "Taco Stand", NodeKind::Restaurant { menu: vec!["Carnitas".into(), "Al Pastor".into()] })
        .add_node(n1, "Oakwood", NodeKind::Neighborhood)
        .add_node(n2, "Elm Heights", NodeKind::Neighborhood)
        .add_node(n3, "Maple Court", NodeKind::Neighborhood)
        .add_node(n4, "Birchgate", NodeKind::Neighborhood)
        .add_node(n5, "Cedar Park", NodeKind::Neighborhood)
        .connect(r1, r2, None)?
        .connect(r2, r3, None)?
        .connect(r1, n1, None)?
        .connect(r1, n2, None)?
        .connect(r2, n3, None)?
        .connect(r2, n4, None)?
        .connect(r3, n4, None)?
        .connect(r3, n5, None)?
        .build()?;
    Ok(region)
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SimConfig> {
    match path {
        None => Ok(SimConfig::default()),
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let region = Arc::new(demo_region()?);

    let restaurants: Vec<Location> = region.restaurants().map(|n| n.location).collect();
    let vehicles: Vec<Vehicle> = (0..cli.vehicles)
        .map(|i| {
            let home = restaurants[i as usize % restaurants.len()];
            Vehicle::new(VehicleId(i + 1), cli.capacity, home)
        })
        .collect();

    let mut sim = Simulation::new(region, config, vehicles, cli.ticks);

    let mut amount_delivered = AmountDeliveredRater::new(0.1)?;
    let mut in_time = InTimeRater::new(30, 0)?;
    let mut travel_distance = TravelDistanceRater::new(0.5)?;

    for t in 0..cli.ticks {
        let events = sim.step()?;
        let total_orders = sim.orders().len();
        amount_delivered.observe(&events, sim.region(), sim.path_calculator(), total_orders);
        in_time.observe(&events, sim.region(), sim.path_calculator(), total_orders);
        travel_distance.observe(&events, sim.region(), sim.path_calculator(), total_orders);
        if t % 50 == 0 {
            info!(tick = t, events = events.len(), "tick processed");
        }
    }

    info!(
        amount_delivered = amount_delivered.score(),
        in_time = in_time.score(),
        travel_distance = travel_distance.score(),
        total_orders = sim.orders().len(),
        "simulation complete"
    );

    Ok(())
}
