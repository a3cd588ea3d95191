use std::collections::VecDeque;

use super::location::Location;
use super::order::OrderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VehicleId(pub u32);

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "V{}", self.0)
    }
}

/// The component a vehicle currently occupies: a node, or an edge (stored
/// with its endpoints ascending, same convention as [`super::location::edge_key`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    Node(Location),
    Edge(Location, Location),
}

impl Component {
    pub fn edge(a: Location, b: Location) -> Self {
        if a <= b {
            Component::Edge(a, b)
        } else {
            Component::Edge(b, a)
        }
    }
}

/// One leg of a vehicle's move queue: the remaining nodes to traverse (the
/// next one to enter first) and, if this leg ends a delivery run, the
/// order ids to hand off at its final node.
///
/// This is the concrete realization of the "arrival callback" described for
/// `Path` in the design notes: every callback ever constructed by the
/// dispatcher closes over nothing but a RouteNode's order list, so a plain
/// data payload interpreted by the vehicle manager is equivalent to a boxed
/// closure here and avoids an unnecessary trait object.
#[derive(Debug, Clone, Default)]
pub struct Path {
    pub nodes: VecDeque<Location>,
    pub delivery: Option<Vec<OrderId>>,
}

impl Path {
    pub fn new(nodes: VecDeque<Location>) -> Self {
        Self {
            nodes,
            delivery: None,
        }
    }

    pub fn with_delivery(nodes: VecDeque<Location>, orders: Vec<OrderId>) -> Self {
        Self {
            nodes,
            delivery: Some(orders),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: VehicleId,
    pub capacity: u32,
    pub home_restaurant: Location,
    pub current: Component,
    pub loaded_orders: Vec<OrderId>,
    pub move_queue: VecDeque<Path>,
}

impl Vehicle {
    pub fn new(id: VehicleId, capacity: u32, home_restaurant: Location) -> Self {
        Self {
            id,
            capacity,
            home_restaurant,
            current: Component::Node(home_restaurant),
            loaded_orders: Vec::new(),
            move_queue: VecDeque::new(),
        }
    }

    /// The node the vehicle's planned moves end at, i.e. the tail of the
    /// last queued path, or its current node if the queue is empty and it
    /// is currently on a node.
    pub fn queue_tail(&self) -> Option<Location> {
        for path in self.move_queue.iter().rev() {
            if let Some(&last) = path.nodes.back() {
                return Some(last);
            }
        }
        match self.current {
            Component::Node(loc) => Some(loc),
            Component::Edge(..) => None,
        }
    }

    /// Sum of weights of everything currently loaded.
    pub fn loaded_weight(&self, orders: &std::collections::BTreeMap<OrderId, crate::model::ConfirmedOrder>) -> u32 {
        self.loaded_orders.iter().map(|id| orders.get(id).map(|o| o.weight).unwrap_or(0)).sum()
    }

    pub fn reset(&mut self) {
        self.current = Component::Node(self.home_restaurant);
        self.loaded_orders.clear();
        self.move_queue.clear();
    }
}
