#[macro_use]
pub mod log_macros;

pub mod alert_flow;
pub mod model;
pub mod ports;
pub mod query_pipeline;
pub mod rule_runtime;
pub mod silence_cache;
pub mod time_ops;

pub mod testkit;

pub use ports::{StoreError, StoreResult};
pub use rule_runtime::{RuleRuntime, TickContext, TickOutcome};
