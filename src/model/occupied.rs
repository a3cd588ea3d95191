use std::collections::BTreeMap;

use super::vehicle::{Component, VehicleId};

/// Per-vehicle bookkeeping recorded the moment it enters a component: when
/// it got there, and what it was on immediately before.
#[derive(Debug, Clone)]
pub struct Presence {
    pub arrival_tick: i64,
    pub previous: Option<Component>,
}

/// The set of vehicles currently on one node or edge, plus their
/// [`Presence`]. Every vehicle is in exactly one `Occupied` at any instant;
/// the [`crate::vehicle_manager::VehicleManager`] enforces this by always
/// moving a vehicle out of its old `Occupied` and into its new one in one
/// step (see `VehicleManager::place_vehicle`).
#[derive(Debug, Clone, Default)]
pub struct Occupied {
    vehicles: BTreeMap<VehicleId, Presence>,
}

impl Occupied {
    pub fn add_vehicle(&mut self, vehicle: VehicleId, tick: i64, previous: Option<Component>) {
        self.vehicles.insert(
            vehicle,
            Presence {
                arrival_tick: tick,
                previous,
            },
        );
    }

    pub fn remove_vehicle(&mut self, vehicle: VehicleId) -> Option<Presence> {
        self.vehicles.remove(&vehicle)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.vehicles.keys().copied()
    }

    pub fn presence(&self, vehicle: VehicleId) -> Option<&Presence> {
        self.vehicles.get(&vehicle)
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }
}
