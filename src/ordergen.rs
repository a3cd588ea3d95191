use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::config::OrderGenConfig;
use crate::error::{SimResult, SimulationError};
use crate::model::{ConfirmedOrder, Location, OrderId, Region, TickInterval};

/// Pure per-tick order source (§6): `generate_orders(tick)` hands back
/// whatever orders are due to appear at that tick. Negative ticks are
/// rejected at the boundary.
pub trait OrderGenerator {
    fn generate_orders(&mut self, tick: i64) -> SimResult<Vec<ConfirmedOrder>>;
}

/// Friday-evening order generator: draws each order's delivery-window
/// center from a truncated Normal (mean `0.5 * last_tick`, configurable
/// stddev, resampled by rejection until it lands in `[0, last_tick]`),
/// picks a uniformly random restaurant and neighborhood, a random subset of
/// the restaurant's menu, and a random weight up to `max_weight`. Every
/// order's arrival (creation) tick is itself sampled uniformly over
/// `[0, last_tick]` so the whole run's worth of orders is known up front
/// and handed out tick by tick — seeded, so two runs with the same seed and
/// region produce identical order streams (§8 P6).
pub struct FridayEveningGenerator {
    by_tick: BTreeMap<i64, Vec<ConfirmedOrder>>,
}

impl FridayEveningGenerator {
    pub fn new(region: &Region, config: &OrderGenConfig, last_tick: i64) -> Self {
        let mut rng = SmallRng::seed_from_u64(config.seed);
        let restaurants: Vec<(Location, Vec<String>)> = region
            .restaurants()
            .map(|n| (n.location, n.kind.menu().map(|m| m.to_vec()).unwrap_or_default()))
            .collect();
        let neighborhoods: Vec<Location> = region
            .nodes()
            .filter(|n| matches!(n.kind, crate::model::NodeKind::Neighborhood))
            .map(|n| n.location)
            .collect();

        let mut by_tick: BTreeMap<i64, Vec<ConfirmedOrder>> = BTreeMap::new();
        if restaurants.is_empty() || neighborhoods.is_empty() || last_tick < 0 {
            return Self { by_tick };
        }

        let mean = config.mean_fraction_of_last_tick * last_tick as f64;
        let normal = Normal::new(mean, config.stddev_ticks.max(1e-6)).expect("valid normal parameters");

        let mut next_id: OrderId = 1;
        for _ in 0..config.orders_per_run {
            let creation_tick = rng.random_range(0..=last_tick);

            let mut center;
            loop {
                center = normal.sample(&mut rng);
                if (0.0..=last_tick as f64).contains(&center) {
                    break;
                }
            }
            let center = center.round() as i64;
            let start = (center - config.window_half_width).max(creation_tick);
            let end = (start + 2 * config.window_half_width).max(start);

            let (restaurant, menu) = restaurants.choose(&mut rng).expect("non-empty restaurants");
            let target = *neighborhoods.choose(&mut rng).expect("non-empty neighborhoods");

            let item_count = if menu.is_empty() { 0 } else { rng.random_range(1..=menu.len().min(3)) };
            let items: Vec<String> = {
                let mut pool = menu.clone();
                let mut picked = Vec::with_capacity(item_count);
                for _ in 0..item_count {
                    if pool.is_empty() {
                        break;
                    }
                    let idx = rng.random_range(0..pool.len());
                    picked.push(pool.remove(idx));
                }
                picked
            };

            let weight = rng.random_range(1..=config.max_weight.max(1));

            let order = ConfirmedOrder::new(
                next_id,
                target,
                *restaurant,
                TickInterval::new(start, end),
                items,
                weight,
            );
            next_id += 1;
            by_tick.entry(creation_tick).or_default().push(order);
        }

        Self { by_tick }
    }
}

impl OrderGenerator for FridayEveningGenerator {
    fn generate_orders(&mut self, tick: i64) -> SimResult<Vec<ConfirmedOrder>> {
        if tick < 0 {
            return Err(SimulationError::NegativeTick(tick));
        }
        Ok(self.by_tick.remove(&tick).unwrap_or_default())
    }
}

/// An order source that never produces anything, for tests and scenarios
/// that drive the dispatcher by hand.
#[derive(Debug, Default)]
pub struct EmptyOrderGenerator;

impl OrderGenerator for EmptyOrderGenerator {
    fn generate_orders(&mut self, tick: i64) -> SimResult<Vec<ConfirmedOrder>> {
        if tick < 0 {
            return Err(SimulationError::NegativeTick(tick));
        }
        Ok(Vec::new())
    }
}

/// Convenience constructor building a [`FridayEveningGenerator`] behind the
/// `OrderGenerator` trait object, mirroring how `Simulation` wires one in.
pub fn friday_evening(region: &Arc<Region>, config: &OrderGenConfig, last_tick: i64) -> Box<dyn OrderGenerator> {
    Box::new(FridayEveningGenerator::new(region.as_ref(), config, last_tick))
}
