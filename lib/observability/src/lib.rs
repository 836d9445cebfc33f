//! Metrics and component-state logging for the causal-replay core.

mod metrics;
mod state;

pub use metrics::{CoreMetrics, CORE_METRICS};
pub use state::{ComponentState, ComponentStateHandle, ComponentStateReporter};
