use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{SimResult, SimulationError};
use crate::events::SimEvent;
use crate::model::{Component, ConfirmedOrder, Location, Map as _, Occupied, OrderId, Path, Region, Vehicle, VehicleId};
use crate::routing::PathCalculator;

/// Owns the region, the path calculator, every [`Vehicle`], and the
/// occupancy map keyed by [`Component`]. Drives movement one component per
/// tick and is the sole place a vehicle crosses a node/edge boundary (§4.3's
/// invariant: remove from the old `Occupied`, insert into the new one,
/// before any callback fires).
pub struct VehicleManager {
    region: Arc<Region>,
    path_calc: Arc<dyn PathCalculator>,
    vehicles: BTreeMap<VehicleId, Vehicle>,
    occupied: BTreeMap<Component, Occupied>,
    spawned: BTreeSet<VehicleId>,
    received_orders: BTreeSet<OrderId>,
}

impl VehicleManager {
    pub fn new(region: Arc<Region>, path_calc: Arc<dyn PathCalculator>, vehicles: Vec<Vehicle>) -> Self {
        let mut occupied: BTreeMap<Component, Occupied> = BTreeMap::new();
        for v in &vehicles {
            occupied
                .entry(v.current)
                .or_default()
                .add_vehicle(v.id, 0, None);
        }
        Self {
            region,
            path_calc,
            vehicles: vehicles.into_iter().map(|v| (v.id, v)).collect(),
            occupied,
            spawned: BTreeSet::new(),
            received_orders: BTreeSet::new(),
        }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn path_calculator(&self) -> &dyn PathCalculator {
        self.path_calc.as_ref()
    }

    pub fn vehicle_capacity(&self, id: VehicleId) -> u32 {
        self.vehicles.get(&id).map(|v| v.capacity).unwrap_or(0)
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(&id)
    }

    pub fn vehicle_ids(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.vehicles.keys().copied()
    }

    /// Appends a single Path from the queue's current tail node (or current
    /// node, if the queue is empty) to `target`. Rejects `target` equal to
    /// the current node with an empty queue (§4.4).
    pub fn move_queued(
        &mut self,
        id: VehicleId,
        target: Location,
        delivery: Option<Vec<OrderId>>,
    ) -> SimResult<()> {
        let vehicle = self.vehicles.get(&id).expect("unknown vehicle");
        let tail = vehicle.queue_tail();
        if vehicle.move_queue.is_empty() && tail == Some(target) {
            return Err(SimulationError::RedundantMove);
        }
        let from = tail.expect("moveQueued requires a vehicle resting on a node");
        let nodes = self.path_calc.path(from, target);
        let path = match delivery {
            Some(orders) => Path::with_delivery(nodes, orders),
            None => Path::new(nodes),
        };
        self.vehicles.get_mut(&id).unwrap().move_queue.push_back(path);
        Ok(())
    }

    /// Discards the move queue and replans immediately. If the vehicle is
    /// mid-edge, a one-step path to the edge's far endpoint is inserted
    /// first so it can't reverse mid-edge (§4.4, boundary scenario 6).
    pub fn move_direct(
        &mut self,
        id: VehicleId,
        target: Location,
        delivery: Option<Vec<OrderId>>,
    ) -> SimResult<()> {
        let vehicle = self.vehicles.get_mut(&id).expect("unknown vehicle");
        vehicle.move_queue.clear();
        let current = vehicle.current;
        let from = match current {
            Component::Node(loc) => loc,
            Component::Edge(a, b) => {
                let previous = self
                    .occupied
                    .get(&current)
                    .and_then(|o| o.presence(id))
                    .and_then(|p| p.previous);
                let prev_node = match previous {
                    Some(Component::Node(loc)) => loc,
                    _ => a,
                };
                let far = if prev_node == a { b } else { a };
                self.vehicles
                    .get_mut(&id)
                    .unwrap()
                    .move_queue
                    .push_back(Path::new(VecDeque::from([far])));
                far
            }
        };
        let nodes = self.path_calc.path(from, target);
        let path = match delivery {
            Some(orders) => Path::with_delivery(nodes, orders),
            None => Path::new(nodes),
        };
        self.vehicles.get_mut(&id).unwrap().move_queue.push_back(path);
        Ok(())
    }

    /// Attaches `order_id` to `vehicle_id`, which must currently be resting
    /// at a Restaurant node. Fails over capacity. Preserves the source
    /// quirk of checking `loaded.len() >= capacity` (a count, not a weight)
    /// before the real weight check (§9 open question 3) — guarded here so
    /// it can only reject when the weight check would also reject, since
    /// every order carries weight >= 1.
    pub fn load_order(
        &mut self,
        vehicle_id: VehicleId,
        order_id: OrderId,
        orders: &BTreeMap<OrderId, ConfirmedOrder>,
        tick: i64,
    ) -> SimResult<SimEvent> {
        let order = orders.gets(&order_id);
        let vehicle = self.vehicles.get_mut(&vehicle_id).expect("unknown vehicle");
        debug_assert!(
            matches!(vehicle.current, Component::Node(loc) if self.region.node_at(loc).map(|n| n.is_restaurant()).unwrap_or(false)),
            "load_order called off a restaurant node"
        );
        if vehicle.loaded_orders.len() as u32 >= vehicle.capacity {
            return Err(SimulationError::CapacityExceeded {
                vehicle: vehicle_id,
                order: order_id,
                attempted: vehicle.loaded_orders.len() as u32 + 1,
                capacity: vehicle.capacity,
            });
        }
        let current_weight = vehicle.loaded_weight(orders);
        let attempted = current_weight + order.weight;
        if attempted > vehicle.capacity {
            return Err(SimulationError::CapacityExceeded {
                vehicle: vehicle_id,
                order: order_id,
                attempted,
                capacity: vehicle.capacity,
            });
        }
        vehicle.loaded_orders.push(order_id);
        self.received_orders.insert(order_id);
        trace!(vehicle = %vehicle_id, order = order_id, tick, "order loaded");
        Ok(SimEvent::OrderReceived { order: order_id, tick })
    }

    fn deliver_order(
        &mut self,
        vehicle_id: VehicleId,
        order_id: OrderId,
        orders: &mut BTreeMap<OrderId, ConfirmedOrder>,
        tick: i64,
    ) -> SimEvent {
        assert!(
            self.received_orders.contains(&order_id),
            "DeliverOrderEvent for order {order_id} with no preceding OrderReceivedEvent"
        );
        if let Some(vehicle) = self.vehicles.get_mut(&vehicle_id) {
            vehicle.loaded_orders.retain(|&id| id != order_id);
        }
        let order = orders.get_mut(&order_id).expect("delivered order must be known");
        debug_assert!(order.actual_delivery_tick.is_none(), "order delivered twice");
        order.actual_delivery_tick = Some(tick);
        trace!(vehicle = %vehicle_id, order = order_id, tick, "order delivered");
        SimEvent::DeliverOrder {
            order: order.clone(),
            tick,
        }
    }

    fn place_vehicle(&mut self, id: VehicleId, new: Component, tick: i64) {
        let old = self.vehicles.get(&id).expect("unknown vehicle").current;
        self.occupied.entry(old).or_default().remove_vehicle(id);
        self.occupied
            .entry(new)
            .or_default()
            .add_vehicle(id, tick, Some(old));
        self.vehicles.get_mut(&id).unwrap().current = new;
    }

    /// Advances every vehicle one component per tick (§4.4/§4.5) and
    /// returns the events produced, in ascending vehicle-id order.
    pub fn tick(&mut self, tick: i64, orders: &mut BTreeMap<OrderId, ConfirmedOrder>) -> Vec<SimEvent> {
        let mut events = Vec::new();
        let ids: Vec<VehicleId> = self.vehicles.keys().copied().collect();
        for id in ids {
            if self.spawned.insert(id) {
                let node = match self.vehicles.gets(&id).current {
                    Component::Node(loc) => loc,
                    Component::Edge(a, _) => a,
                };
                events.push(SimEvent::Spawn { vehicle: id, node, tick });
            }
            self.advance_vehicle(id, tick, orders, &mut events);
        }
        events
    }

    fn advance_vehicle(
        &mut self,
        id: VehicleId,
        tick: i64,
        orders: &mut BTreeMap<OrderId, ConfirmedOrder>,
        events: &mut Vec<SimEvent>,
    ) {
        loop {
            let front_empty = match self.vehicles.gets(&id).move_queue.front() {
                None => return,
                Some(path) => path.nodes.is_empty(),
            };

            if front_empty {
                let path = self.vehicles.get_mut(&id).unwrap().move_queue.pop_front().unwrap();
                match path.delivery {
                    Some(order_ids) => {
                        for order_id in order_ids {
                            events.push(self.deliver_order(id, order_id, orders, tick));
                        }
                        return;
                    }
                    None => continue,
                }
            }

            let current = self.vehicles.gets(&id).current;
            match current {
                Component::Node(cur) => {
                    let next = *self.vehicles.gets(&id).move_queue.front().unwrap().nodes.front().unwrap();
                    let edge_component = Component::edge(cur, next);
                    self.place_vehicle(id, edge_component, tick);
                }
                Component::Edge(a, b) => {
                    let next = self
                        .vehicles
                        .get_mut(&id)
                        .unwrap()
                        .move_queue
                        .front_mut()
                        .unwrap()
                        .nodes
                        .pop_front()
                        .unwrap();
                    let duration = self.region.edge_between(a, b).map(|e| e.duration);
                    self.place_vehicle(id, Component::Node(next), tick);
                    events.push(SimEvent::ArrivedAtNode {
                        vehicle: id,
                        node: next,
                        last_edge_duration: duration,
                        tick,
                    });
                    if self.region.node_at(next).map(|n| n.is_restaurant()).unwrap_or(false) {
                        events.push(SimEvent::ArrivedAtRestaurant { vehicle: id, node: next, tick });
                    }
                }
            }
            return;
        }
    }

    /// Resets every vehicle to its home restaurant, clears loaded orders
    /// and move queues, and re-arms spawn bookkeeping so a subsequent
    /// `tick(0)` re-emits `SpawnEvent`s (§4.4 Reset).
    pub fn reset(&mut self) {
        self.occupied.clear();
        self.spawned.clear();
        self.received_orders.clear();
        for vehicle in self.vehicles.values_mut() {
            vehicle.reset();
        }
        let placements: Vec<(VehicleId, Component)> =
            self.vehicles.values().map(|v| (v.id, v.current)).collect();
        for (id, component) in placements {
            self.occupied.entry(component).or_default().add_vehicle(id, 0, None);
        }
        debug!("vehicle manager reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeKind, RegionBuilder};
    use crate::routing::DijkstraPathCalculator;

    fn triangle() -> (Arc<Region>, Location, Location, Location) {
        let r = Location::new(0, 0);
        let a = Location::new(1, 0);
        let b = Location::new(0, 1);
        let region = Arc::new(
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
        );
        (region, r, a, b)
    }

    #[test]
    fn spawn_then_move_then_deliver() {
        let (region, r, a, _b) = triangle();
        let path_calc: Arc<dyn PathCalculator> = Arc::new(DijkstraPathCalculator::new(region.clone()));
        let vehicle = Vehicle::new(VehicleId(1), 10, r);
        let mut vm = VehicleManager::new(region, path_calc, vec![vehicle]);

        let mut orders = BTreeMap::new();
        let order = ConfirmedOrder::new(
            1,
            a,
            r,
            crate::model::TickInterval::new(2, 5),
            vec!["Pizza".into()],
            1,
        );
        orders.insert(order.id, order);

        let received = vm.load_order(VehicleId(1), 1, &orders, 0).unwrap();
        assert!(matches!(received, SimEvent::OrderReceived { order: 1, tick: 0 }));
        vm.move_queued(VehicleId(1), a, Some(vec![1])).unwrap();

        let tick0 = vm.tick(0, &mut orders);
        assert!(matches!(tick0[0], SimEvent::Spawn { .. }));
        // node -> edge this tick, no ArrivedAtNode yet.
        assert!(tick0.iter().all(|e| !matches!(e, SimEvent::ArrivedAtNode { .. })));

        let tick1 = vm.tick(1, &mut orders);
        assert!(tick1.iter().any(|e| matches!(e, SimEvent::ArrivedAtNode { node, .. } if *node == a)));
        assert!(tick1.iter().any(|e| matches!(e, SimEvent::DeliverOrder { order, .. } if order.id == 1)));
        assert_eq!(orders.gets(&1).actual_delivery_tick, Some(1));
    }

    #[test]
    fn capacity_exceeded_rejects_load() {
        let (region, r, a, _b) = triangle();
        let path_calc: Arc<dyn PathCalculator> = Arc::new(DijkstraPathCalculator::new(region.clone()));
        let vehicle = Vehicle::new(VehicleId(1), 1, r);
        let mut vm = VehicleManager::new(region, path_calc, vec![vehicle]);
        let mut orders = BTreeMap::new();
        orders.insert(
            1,
            ConfirmedOrder::new(1, a, r, crate::model::TickInterval::new(0, 10), vec![], 2),
        );
        let err = vm.load_order(VehicleId(1), 1, &orders, 0).unwrap_err();
        assert!(matches!(err, SimulationError::CapacityExceeded { .. }));
    }

    #[test]
    fn redundant_move_rejected() {
        let (region, r, _a, _b) = triangle();
        let path_calc: Arc<dyn PathCalculator> = Arc::new(DijkstraPathCalculator::new(region.clone()));
        let vehicle = Vehicle::new(VehicleId(1), 10, r);
        let mut vm = VehicleManager::new(region, path_calc, vec![vehicle]);
        let err = vm.move_queued(VehicleId(1), r, None).unwrap_err();
        assert!(matches!(err, SimulationError::RedundantMove));
    }
}
