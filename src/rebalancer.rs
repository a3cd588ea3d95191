use std::collections::BTreeMap;

use tracing::trace;

use crate::dispatcher::RestaurantDispatcher;
use crate::model::{Location, Map as _};
use crate::vehicle_manager::VehicleManager;

/// Redistributes idle vehicles across restaurants so each dispatcher ends
/// up with roughly `floor(totalIdleVehicles / numRestaurants)` available
/// (§4.7).
///
/// The donor condition below (`total_available(donor) < target`) reads
/// backwards — a donor giving away a vehicle should intuitively have *more*
/// than `target`, not less. This matches the literal source behavior
/// described in the design notes (§9 open question 1) and is preserved
/// as-is; it means a dispatcher already below target can still be picked
/// as a donor, which can shuffle vehicles without ever converging evenly.
#[derive(Debug, Default, Clone, Copy)]
pub struct FleetRebalancer;

impl FleetRebalancer {
    pub fn rebalance(&self, dispatchers: &mut BTreeMap<Location, RestaurantDispatcher>, vm: &mut VehicleManager) {
        let locations: Vec<Location> = dispatchers.keys().copied().collect();
        if locations.is_empty() {
            return;
        }
        let total_idle: usize = dispatchers.values().map(|d| d.idle_count()).sum();
        let target = total_idle / locations.len();

        for &loc in &locations {
            loop {
                let available = dispatchers.gets(&loc).total_available();
                if available >= target {
                    break;
                }
                let deficit = target - available;
                if deficit == 0 {
                    break;
                }
                let donor = locations
                    .iter()
                    .copied()
                    .filter(|&l| l != loc)
                    .find(|&l| {
                        let d = dispatchers.gets(&l);
                        d.total_available() < target && d.idle_count() > 0
                    });
                let Some(donor) = donor else { break };
                let Some(vehicle) = dispatchers.gets_mut(&donor).take_idle_vehicle() else { break };
                if let Err(err) = vm.move_queued(vehicle, loc, None) {
                    tracing::warn!(%vehicle, %err, "rebalance move_queued failed");
                    dispatchers.gets_mut(&donor).add_vehicle(vehicle);
                    break;
                }
                dispatchers.gets_mut(&loc).add_queued_vehicle(vehicle);
                trace!(%vehicle, from = ?donor, to = ?loc, "rebalanced");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeKind, Region, RegionBuilder, Vehicle, VehicleId};
    use crate::routing::DijkstraPathCalculator;
    use std::sync::Arc;

    fn two_restaurants() -> (Arc<Region>, Location, Location) {
        let r1 = Location::new(0, 0);
        let r2 = Location::new(5, 0);
        let region = Arc::new(
            RegionBuilder::new()
                .add_node(r1, "R1", NodeKind::Restaurant { menu: vec![] })
                .add_node(r2, "R2", NodeKind::Restaurant { menu: vec![] })
                .connect(r1, r2, Some(5))
                .unwrap()
                .build()
                .unwrap(),
        );
        (region, r1, r2)
    }

    /// With 3 idle vehicles at r1 and 0 at r2, `target = floor(3/2) = 1`.
    /// r2 is short of target and looks for a donor whose `total_available()
    /// < target` — i.e. `< 1` — but r1 sits at 3, so no donor qualifies and
    /// no vehicle migrates. This is the literal, preserved-as-suspect donor
    /// condition (§9 open question 1, DESIGN.md): it reads backwards from
    /// the intuitive "a donor should have *more* than target", so the
    /// natural-seeming rebalance this scenario invites never actually
    /// happens.
    #[test]
    fn suspect_donor_condition_blocks_migration_to_empty_restaurant() {
        let (region, r1, r2) = two_restaurants();
        let vehicles: Vec<Vehicle> = (1..=3).map(|i| Vehicle::new(VehicleId(i), 10, r1)).collect();
        let mut vm = VehicleManager::new(region.clone(), Arc::new(DijkstraPathCalculator::new(region.clone())), vehicles);

        let mut dispatchers = BTreeMap::new();
        let mut d1 = RestaurantDispatcher::new(r1);
        for i in 1..=3 {
            d1.add_vehicle(VehicleId(i));
        }
        dispatchers.insert(r1, d1);
        dispatchers.insert(r2, RestaurantDispatcher::new(r2));

        FleetRebalancer.rebalance(&mut dispatchers, &mut vm);

        assert_eq!(dispatchers.get(&r1).unwrap().total_available(), 3);
        assert_eq!(dispatchers.get(&r2).unwrap().total_available(), 0);
    }

    /// A three-restaurant split where the donor condition actually fires:
    /// r1 holds a large idle pool (never a donor — its count is always
    /// above target), r3 holds a single idle vehicle (below target), and r2
    /// is empty. r3 — itself short of target — still qualifies as a donor
    /// for r2 and gives up its only vehicle, leaving r3 at zero while r1's
    /// surplus goes untouched. This is the backwards donor condition (§9
    /// open question 1) robbing one understocked restaurant to (partially)
    /// fill another, rather than draining the overstocked one.
    #[test]
    fn donor_below_target_still_donates_to_emptier_restaurant() {
        let r1 = Location::new(0, 0);
        let r2 = Location::new(5, 0);
        let r3 = Location::new(10, 0);
        let region = Arc::new(
            RegionBuilder::new()
                .add_node(r1, "R1", NodeKind::Restaurant { menu: vec![] })
                .add_node(r2, "R2", NodeKind::Restaurant { menu: vec![] })
                .add_node(r3, "R3", NodeKind::Restaurant { menu: vec![] })
                .connect(r1, r2, Some(5))
                .unwrap()
                .connect(r2, r3, Some(5))
                .unwrap()
                .build()
                .unwrap(),
        );

        let mut vehicles: Vec<Vehicle> = (1..=10).map(|i| Vehicle::new(VehicleId(i), 10, r1)).collect();
        vehicles.push(Vehicle::new(VehicleId(11), 10, r3));
        let mut vm = VehicleManager::new(region.clone(), Arc::new(DijkstraPathCalculator::new(region.clone())), vehicles);

        let mut dispatchers = BTreeMap::new();
        let mut d1 = RestaurantDispatcher::new(r1);
        for i in 1..=10 {
            d1.add_vehicle(VehicleId(i));
        }
        dispatchers.insert(r1, d1);
        dispatchers.insert(r2, RestaurantDispatcher::new(r2));
        let mut d3 = RestaurantDispatcher::new(r3);
        d3.add_vehicle(VehicleId(11));
        dispatchers.insert(r3, d3);

        // total_idle = 11, target = floor(11/3) = 3. r1 (10 >= 3) and r3
        // (1 < 3, the only donor whose count is below target) both fail the
        // "overloaded donor" intuition, but r3 still passes the literal
        // `total_available() < target` check and has an idle vehicle to
        // give, so it donates to r2.
        FleetRebalancer.rebalance(&mut dispatchers, &mut vm);

        assert_eq!(dispatchers.get(&r1).unwrap().total_available(), 10);
        assert_eq!(dispatchers.get(&r2).unwrap().total_available(), 1);
        assert_eq!(dispatchers.get(&r3).unwrap().total_available(), 0);
    }
}
