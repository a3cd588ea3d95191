use std::collections::{BTreeMap, BTreeSet};

use crate::error::{SimResult, SimulationError};
use crate::events::SimEvent;
use crate::model::{OrderId, Region};
use crate::routing::PathCalculator;

/// An external scoring collaborator: observes each tick's event list and
/// reduces it to a `[0, 1]` score. Raters never mutate simulation state and
/// are not part of the dispatch core — a thin consumer of its event stream
/// (§6).
///
/// `total_orders` is the count of every order confirmed so far in the run
/// (generated, whether or not it was ever loaded onto a vehicle). The event
/// stream alone can't supply this: an order stuck in a dispatcher's pending
/// queue, or never dispatched at all, never raises `OrderReceivedEvent`, so
/// deriving "total" from received events would make undelivered-but-never-
/// loaded orders invisible to scoring. Callers (e.g. `Simulation`) pass the
/// running total from the order book they already own.
pub trait Rater {
    fn observe(&mut self, events: &[SimEvent], region: &Region, path_calc: &dyn PathCalculator, total_orders: usize);
    fn score(&self) -> f64;
}

fn validate_unit_range(name: &'static str, value: f64) -> SimResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(SimulationError::ParameterOutOfRange { name, lo: 0.0, hi: 1.0, value });
    }
    Ok(())
}

/// `score = 1 - undelivered / (total * (1 - factor))`, saturated to `[0,1]`.
/// `total` is the generated-order count passed into `observe`, not merely
/// what has been received onto a vehicle so far — an order sitting in
/// `pending_orders` for the whole run is still "undelivered", not absent.
pub struct AmountDeliveredRater {
    factor: f64,
    total_orders: usize,
    delivered: BTreeSet<OrderId>,
}

impl AmountDeliveredRater {
    pub fn new(factor: f64) -> SimResult<Self> {
        validate_unit_range("factor", factor)?;
        Ok(Self {
            factor,
            total_orders: 0,
            delivered: BTreeSet::new(),
        })
    }
}

impl Rater for AmountDeliveredRater {
    fn observe(&mut self, events: &[SimEvent], _region: &Region, _path_calc: &dyn PathCalculator, total_orders: usize) {
        self.total_orders = self.total_orders.max(total_orders);
        for event in events {
            if let SimEvent::DeliverOrder { order, .. } = event {
                self.delivered.insert(order.id);
            }
        }
    }

    fn score(&self) -> f64 {
        let total = self.total_orders as f64;
        if total == 0.0 {
            return 1.0;
        }
        let undelivered = (self.total_orders - self.delivered.len()) as f64;
        let denom = total * (1.0 - self.factor);
        if denom <= 0.0 {
            return if undelivered > 0.0 { 0.0 } else { 1.0 };
        }
        (1.0 - undelivered / denom).clamp(0.0, 1.0)
    }
}

/// Per delivered order, `ticksOff = min(maxTicksOff, max(0, order.ticksOff(actual) - ignored))`.
/// Undelivered orders — including ones that never even reached a vehicle —
/// contribute `maxTicksOff`. `score = 1 - totalTicksOff / (maxTicksOff * totalOrders)`.
pub struct InTimeRater {
    max_ticks_off: i64,
    ignored: i64,
    total_orders: usize,
    contributions: BTreeMap<OrderId, i64>,
}

impl InTimeRater {
    pub fn new(max_ticks_off: i64, ignored: i64) -> SimResult<Self> {
        if max_ticks_off <= 0 {
            return Err(SimulationError::ParameterOutOfRange {
                name: "max_ticks_off",
                lo: 1.0,
                hi: f64::INFINITY,
                value: max_ticks_off as f64,
            });
        }
        Ok(Self {
            max_ticks_off,
            ignored,
            total_orders: 0,
            contributions: BTreeMap::new(),
        })
    }
}

impl Rater for InTimeRater {
    fn observe(&mut self, events: &[SimEvent], _region: &Region, _path_calc: &dyn PathCalculator, total_orders: usize) {
        self.total_orders = self.total_orders.max(total_orders);
        for event in events {
            if let SimEvent::DeliverOrder { order, tick } = event {
                let off = (order.ticks_off(*tick) - self.ignored).max(0).min(self.max_ticks_off);
                self.contributions.insert(order.id, off);
            }
        }
    }

    fn score(&self) -> f64 {
        let total = self.total_orders;
        if total == 0 {
            return 1.0;
        }
        let delivered_sum: i64 = self.contributions.values().sum();
        let undelivered = total - self.contributions.len();
        let sum = delivered_sum + undelivered as i64 * self.max_ticks_off;
        (1.0 - sum as f64 / (self.max_ticks_off as f64 * total as f64)).clamp(0.0, 1.0)
    }
}

fn path_duration(region: &Region, path_calc: &dyn PathCalculator, from: crate::model::Location, to: crate::model::Location) -> u64 {
    let nodes = path_calc.path(from, to);
    let mut total = 0u64;
    let mut prev = from;
    for node in nodes {
        total += region.edge_between(prev, node).map(|e| e.duration as u64).unwrap_or(0);
        prev = node;
    }
    total
}

/// `worst += 2 * shortestPathDuration(restaurant, target)` per delivered
/// order; `actual += lastEdge.duration` per `ArrivedAtNodeEvent`.
/// `score = 1 - actual / (worst * factor)`.
pub struct TravelDistanceRater {
    factor: f64,
    worst: u64,
    actual: u64,
}

impl TravelDistanceRater {
    pub fn new(factor: f64) -> SimResult<Self> {
        if factor <= 0.0 {
            return Err(SimulationError::ParameterOutOfRange { name: "factor", lo: 0.0, hi: 1.0, value: factor });
        }
        validate_unit_range("factor", factor)?;
        Ok(Self { factor, worst: 0, actual: 0 })
    }
}

impl Rater for TravelDistanceRater {
    fn observe(&mut self, events: &[SimEvent], region: &Region, path_calc: &dyn PathCalculator, _total_orders: usize) {
        for event in events {
            match event {
                SimEvent::DeliverOrder { order, .. } => {
                    self.worst += 2 * path_duration(region, path_calc, order.restaurant, order.target);
                }
                SimEvent::ArrivedAtNode { last_edge_duration: Some(d), .. } => {
                    self.actual += *d as u64;
                }
                _ => {}
            }
        }
    }

    fn score(&self) -> f64 {
        if self.worst == 0 {
            return 1.0;
        }
        (1.0 - self.actual as f64 / (self.worst as f64 * self.factor)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConfirmedOrder, NodeKind, RegionBuilder, TickInterval};
    use crate::routing::DijkstraPathCalculator;
    use std::sync::Arc;

    fn delivered(id: OrderId, tick: i64) -> SimEvent {
        SimEvent::DeliverOrder {
            order: ConfirmedOrder {
                id,
                target: crate::model::Location::new(1, 0),
                restaurant: crate::model::Location::new(0, 0),
                interval: TickInterval::new(0, 5),
                items: vec![],
                weight: 1,
                actual_delivery_tick: Some(tick),
            },
            tick,
        }
    }

    fn fixture() -> (Region, DijkstraPathCalculator) {
        let r = crate::model::Location::new(0, 0);
        let a = crate::model::Location::new(1, 0);
        let region = RegionBuilder::new()
            .add_node(r, "R", NodeKind::Restaurant { menu: vec![] })
            .add_node(a, "A", NodeKind::Neighborhood)
            .connect(r, a, Some(1))
            .unwrap()
            .build()
            .unwrap();
        let calc = DijkstraPathCalculator::new(Arc::new(region.clone()));
        (region, calc)
    }

    #[test]
    fn amount_delivered_perfect_run() {
        let (region, calc) = fixture();
        let mut rater = AmountDeliveredRater::new(0.5).unwrap();
        rater.observe(&[delivered(1, 1)], &region, &calc, 1);
        assert_eq!(rater.score(), 1.0);
    }

    #[test]
    fn amount_delivered_rejects_out_of_range_factor() {
        assert!(AmountDeliveredRater::new(1.5).is_err());
    }

    /// An order that is generated but never even loaded onto a vehicle (no
    /// `OrderReceivedEvent` at all, stuck in `pending_orders` for the whole
    /// run) still counts as undelivered — `total_orders` comes from the
    /// order book, not the event stream.
    #[test]
    fn amount_delivered_counts_never_loaded_orders_as_undelivered() {
        let (region, calc) = fixture();
        let mut rater = AmountDeliveredRater::new(0.0).unwrap();
        rater.observe(&[], &region, &calc, 1);
        assert_eq!(rater.score(), 0.0);
    }

    #[test]
    fn in_time_on_time_delivery_scores_perfect() {
        let (region, calc) = fixture();
        let mut rater = InTimeRater::new(10, 0).unwrap();
        rater.observe(&[delivered(1, 2)], &region, &calc, 1);
        assert_eq!(rater.score(), 1.0);
    }

    #[test]
    fn in_time_undelivered_order_penalized() {
        let (region, calc) = fixture();
        let mut rater = InTimeRater::new(10, 0).unwrap();
        rater.observe(&[], &region, &calc, 1);
        assert_eq!(rater.score(), 0.0);
    }

    /// Same as above but the order was never received at all (e.g. still
    /// pending at run end) — the rater has no `OrderReceivedEvent` to key
    /// off of, only the generated-order total.
    #[test]
    fn in_time_never_received_order_penalized_same_as_undelivered() {
        let (region, calc) = fixture();
        let mut rater = InTimeRater::new(10, 0).unwrap();
        rater.observe(&[], &region, &calc, 1);
        assert_eq!(rater.score(), 0.0);
    }

    #[test]
    fn travel_distance_perfect_efficiency() {
        let (region, calc) = fixture();
        let mut rater = TravelDistanceRater::new(1.0).unwrap();
        rater.observe(
            &[
                SimEvent::ArrivedAtNode {
                    vehicle: crate::model::VehicleId(1),
                    node: crate::model::Location::new(1, 0),
                    last_edge_duration: Some(1),
                    tick: 1,
                },
                delivered(1, 1),
            ],
            &region,
            &calc,
            1,
        );
        assert_eq!(rater.score(), 1.0);
    }
}
