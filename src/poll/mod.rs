//! Polling engine: interval policy, per-tracker cycle and the scheduler

pub mod cycle;
pub mod interval;
pub mod scheduler;

pub use cycle::{CycleOptions, CycleOutcome, CycleReport, CycleState, PollCycle};
pub use interval::{IntervalPolicy, HARD_FLOOR, MAX_INTERVAL, STARTUP_SPREAD};
pub use scheduler::Scheduler;
