//! Async lifecycle: per-rule scheduler, component wiring, process shutdown,
//! and tracing initialization.

pub mod components;
pub mod error;
pub mod lifecycle;
pub mod scheduler;
pub mod tracing_init;

pub use components::{ComponentFactory, DebugAlerter, DefaultComponentFactory};
pub use error::{RuntimeError, RuntimeReason, RuntimeResult};
pub use lifecycle::wait_for_signal;
pub use scheduler::Scheduler;
pub use tracing_init::init_tracing;
