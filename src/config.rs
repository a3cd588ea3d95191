use serde::{Deserialize, Serialize};

/// Recognized options for the dispatch core (§6 of the design doc). Every
/// field defaults to the value documented there, so a config file only
/// needs to specify overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub vehicle_capacity: u32,
    pub send_out_slack_ticks: i64,
    pub send_out_weight_frac: f64,
    pub rebalance_enabled: bool,
    pub order_generator: OrderGenConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            vehicle_capacity: 10,
            send_out_slack_ticks: 5,
            send_out_weight_frac: 0.95,
            rebalance_enabled: true,
            order_generator: OrderGenConfig::default(),
        }
    }
}

/// Parameters for the Friday-evening order generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderGenConfig {
    /// Mean delivery tick as a fraction of `last_tick`.
    pub mean_fraction_of_last_tick: f64,
    pub stddev_ticks: f64,
    pub max_weight: u32,
    pub seed: u64,
    /// Total number of orders generated over the whole run.
    pub orders_per_run: u32,
    /// Half-width of each order's delivery window around its sampled center tick.
    pub window_half_width: i64,
}

impl Default for OrderGenConfig {
    fn default() -> Self {
        Self {
            mean_fraction_of_last_tick: 0.5,
            stddev_ticks: 20.0,
            max_weight: 5,
            seed: 0,
            orders_per_run: 200,
            window_half_width: 15,
        }
    }
}
