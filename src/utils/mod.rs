//! Instrumentation and convergence helpers.

pub mod convergence;
pub mod counters;

pub use convergence::{Convergence, SolveStats};
pub use counters::{Counters, PhaseCounter};
