use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::SimConfig;
use crate::dispatcher::RestaurantDispatcher;
use crate::error::SimResult;
use crate::events::SimEvent;
use crate::model::{ConfirmedOrder, Location, OrderId, Region, Vehicle, VehicleId};
use crate::ordergen::{FridayEveningGenerator, OrderGenerator};
use crate::rebalancer::FleetRebalancer;
use crate::routing::{DijkstraPathCalculator, PathCalculator};
use crate::vehicle_manager::VehicleManager;

/// Wires a [`Region`], a [`VehicleManager`], one [`RestaurantDispatcher`] per
/// restaurant node, a [`FleetRebalancer`], and an [`OrderGenerator`] into one
/// tick-at-a-time driver (§5/§6). Everything that crosses the dispatcher
/// boundary — orders, vehicle moves, send-out decisions — happens here or
/// below; `Simulation` itself holds no dispatch logic of its own beyond
/// sequencing.
pub struct Simulation {
    region: Arc<Region>,
    path_calc: Arc<dyn PathCalculator>,
    config: SimConfig,
    vehicle_manager: VehicleManager,
    dispatchers: BTreeMap<Location, RestaurantDispatcher>,
    rebalancer: FleetRebalancer,
    order_gen: Box<dyn OrderGenerator>,
    orders: BTreeMap<OrderId, ConfirmedOrder>,
    vehicle_homes: BTreeMap<VehicleId, Location>,
    tick: i64,
}

impl Simulation {
    /// `last_tick` bounds the run and seeds the order generator's sampling
    /// window; it is not itself simulated state (ticks past it simply never
    /// produce new orders).
    pub fn new(region: Arc<Region>, config: SimConfig, vehicles: Vec<Vehicle>, last_tick: i64) -> Self {
        let path_calc: Arc<dyn PathCalculator> = Arc::new(DijkstraPathCalculator::new(region.clone()));
        let order_gen: Box<dyn OrderGenerator> =
            Box::new(FridayEveningGenerator::new(&region, &config.order_generator, last_tick));

        let mut dispatchers = BTreeMap::new();
        for node in region.restaurants() {
            dispatchers.insert(node.location, RestaurantDispatcher::new(node.location));
        }

        let vehicle_homes: BTreeMap<VehicleId, Location> =
            vehicles.iter().map(|v| (v.id, v.home_restaurant)).collect();
        let vehicle_manager = VehicleManager::new(region.clone(), path_calc.clone(), vehicles);

        let mut sim = Self {
            region,
            path_calc,
            config,
            vehicle_manager,
            dispatchers,
            rebalancer: FleetRebalancer,
            order_gen,
            orders: BTreeMap::new(),
            vehicle_homes,
            tick: 0,
        };
        for (&id, &home) in &sim.vehicle_homes {
            if let Some(d) = sim.dispatchers.get_mut(&home) {
                d.add_vehicle(id);
            }
        }
        sim
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn path_calculator(&self) -> &dyn PathCalculator {
        self.path_calc.as_ref()
    }

    pub fn orders(&self) -> &BTreeMap<OrderId, ConfirmedOrder> {
        &self.orders
    }

    pub fn current_tick(&self) -> i64 {
        self.tick
    }

    /// The recipient a just-emptied vehicle is routed to: the restaurant
    /// with the least `total_available()`, excluding the one it just left.
    /// Computed from an availability snapshot taken before any dispatcher
    /// runs this tick, since dispatchers only ever move vehicles away from
    /// themselves and never touch a sibling's bookkeeping directly.
    fn least_available_recipient(availability: &BTreeMap<Location, usize>, from: Location) -> Location {
        availability
            .iter()
            .filter(|&(&loc, _)| loc != from)
            .min_by_key(|&(_, &avail)| avail)
            .map(|(&loc, _)| loc)
            .unwrap_or(from)
    }

    /// Advances the simulation by exactly one tick: generate this tick's
    /// orders, let every dispatcher plan and send out vehicles, move every
    /// vehicle one component, then rebalance idle fleet if enabled (§5).
    pub fn step(&mut self) -> SimResult<Vec<SimEvent>> {
        let mut events = Vec::new();

        let new_orders = self.order_gen.generate_orders(self.tick)?;
        let mut by_restaurant: BTreeMap<Location, Vec<OrderId>> = BTreeMap::new();
        for order in new_orders {
            by_restaurant.entry(order.restaurant).or_default().push(order.id);
            self.orders.insert(order.id, order);
        }

        let availability: BTreeMap<Location, usize> =
            self.dispatchers.iter().map(|(&loc, d)| (loc, d.total_available())).collect();
        let locations: Vec<Location> = self.dispatchers.keys().copied().collect();

        let mut sent_out = Vec::new();
        for loc in locations {
            let new_here = by_restaurant.remove(&loc).unwrap_or_default();
            let mut dispatcher = self.dispatchers.remove(&loc).expect("dispatcher vanished mid-tick");
            let (dispatch_events, dispatcher_sent_out) = dispatcher.tick(
                self.tick,
                new_here,
                &self.orders,
                self.path_calc.as_ref(),
                &self.region,
                &mut self.vehicle_manager,
                &self.config,
                |from| Self::least_available_recipient(&availability, from),
            );
            events.extend(dispatch_events);
            sent_out.extend(dispatcher_sent_out);
            self.dispatchers.insert(loc, dispatcher);
        }
        // Register every vehicle sent out this tick as queued at its
        // recipient, so that dispatcher's `total_available()` already counts
        // it as inbound before it physically arrives (§4.6 `moveVehicle`).
        for (vehicle, recipient) in sent_out {
            if let Some(d) = self.dispatchers.get_mut(&recipient) {
                d.add_queued_vehicle(vehicle);
            }
        }

        let move_events = self.vehicle_manager.tick(self.tick, &mut self.orders);
        for event in &move_events {
            if let SimEvent::ArrivedAtRestaurant { vehicle, node, .. } = event {
                if let Some(d) = self.dispatchers.get_mut(node) {
                    d.add_vehicle(*vehicle);
                }
            }
        }
        events.extend(move_events);

        if self.config.rebalance_enabled {
            self.rebalancer.rebalance(&mut self.dispatchers, &mut self.vehicle_manager);
        }

        self.tick += 1;
        Ok(events)
    }

    /// Runs `n` ticks back to back, returning every tick's events
    /// concatenated in order.
    pub fn run_for(&mut self, n: i64) -> SimResult<Vec<SimEvent>> {
        let mut all = Vec::new();
        for _ in 0..n {
            all.extend(self.step()?);
        }
        Ok(all)
    }

    /// Clears all per-run state — orders, planned routes, vehicle
    /// positions — and installs a fresh order generator, since the
    /// previous one's pre-sampled stream is already spent (§4.4/§4.6 Reset).
    pub fn reset(&mut self, order_gen: Box<dyn OrderGenerator>) {
        self.vehicle_manager.reset();
        self.orders.clear();
        self.order_gen = order_gen;
        self.tick = 0;

        let mut by_home: BTreeMap<Location, Vec<VehicleId>> = BTreeMap::new();
        for (&id, &home) in &self.vehicle_homes {
            by_home.entry(home).or_default().push(id);
        }
        for (loc, dispatcher) in self.dispatchers.iter_mut() {
            let ids = by_home.get(loc).cloned().unwrap_or_default();
            dispatcher.reset(&ids);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeKind;
    use crate::model::RegionBuilder;
    use crate::ordergen::EmptyOrderGenerator;

    fn triangle() -> Arc<Region> {
        let r = Location::new(0, 0);
        let a = Location::new(1, 0);
        let b = Location::new(0, 1);
        Arc::new(
            RegionBuilder::new()
                .add_node(r, "R", NodeKind::Restaurant { menu: vec!["Pizza".into()] })
                .add_node(a, "A", NodeKind::Neighborhood)
                .add_node(b, "B", NodeKind::Neighborhood)
                .connect(r, a, Some(1))
                .unwrap()
                .connect(r, b, Some(1))
                .unwrap()
                .connect(a, b, Some(1))
                .unwrap()
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn first_tick_spawns_every_vehicle() {
        let region = triangle();
        let r = Location::new(0, 0);
        let vehicles = vec![Vehicle::new(VehicleId(1), 10, r), Vehicle::new(VehicleId(2), 10, r)];
        let mut sim = Simulation::new(region, SimConfig::default(), vehicles, 100);
        sim.order_gen = Box::new(EmptyOrderGenerator);

        let events = sim.step().unwrap();
        let spawns = events.iter().filter(|e| matches!(e, SimEvent::Spawn { .. })).count();
        assert_eq!(spawns, 2);
        assert_eq!(sim.current_tick(), 1);
    }

    #[test]
    fn run_for_advances_tick_count() {
        let region = triangle();
        let r = Location::new(0, 0);
        let vehicles = vec![Vehicle::new(VehicleId(1), 10, r)];
        let mut sim = Simulation::new(region, SimConfig::default(), vehicles, 100);
        sim.order_gen = Box::new(EmptyOrderGenerator);

        sim.run_for(5).unwrap();
        assert_eq!(sim.current_tick(), 5);
    }

    #[test]
    fn reset_rewinds_tick_and_clears_orders() {
        let region = triangle();
        let r = Location::new(0, 0);
        let vehicles = vec![Vehicle::new(VehicleId(1), 10, r)];
        let mut sim = Simulation::new(region, SimConfig::default(), vehicles, 100);
        sim.order_gen = Box::new(EmptyOrderGenerator);

        sim.run_for(3).unwrap();
        sim.reset(Box::new(EmptyOrderGenerator));
        assert_eq!(sim.current_tick(), 0);
        assert!(sim.orders().is_empty());
    }
}
