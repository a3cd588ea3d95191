use crate::model::{Location, OrderId, VehicleId};

/// Errors raised at the documented boundaries of the dispatch core.
///
/// Invariant violations (e.g. a vehicle observed on an unknown component) are
/// bugs, not reportable errors, and are caught with `assert!`/`debug_assert!`
/// at the call site instead of going through this type.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("edge endpoints must be supplied in ascending order, got {0:?} > {1:?}")]
    InvalidEdgeOrder(Location, Location),

    #[error("node {0:?} declares a connection to {1:?} with no matching edge")]
    MissingEdge(Location, Location),

    #[error(
        "loading order {order} onto vehicle {vehicle} would total {attempted}, over capacity {capacity}"
    )]
    CapacityExceeded {
        vehicle: VehicleId,
        order: OrderId,
        attempted: u32,
        capacity: u32,
    },

    #[error("moveQueued target equals the vehicle's current node with an empty move queue")]
    RedundantMove,

    #[error("negative tick {0} passed to order generator")]
    NegativeTick(i64),

    #[error("parameter {name} must fall within {lo}..={hi}, got {value}")]
    ParameterOutOfRange {
        name: &'static str,
        lo: f64,
        hi: f64,
        value: f64,
    },
}

pub type SimResult<T> = Result<T, SimulationError>;
