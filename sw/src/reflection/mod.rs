//! Self-reflection rules and intervention signals

mod monitor;
mod rules;

pub use monitor::{ChannelInterventionHandler, InterventionHandler, ReflectionMonitor};
pub use rules::evaluate;
