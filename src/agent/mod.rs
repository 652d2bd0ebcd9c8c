//! Per-step agent loop.

pub mod executor;

pub use executor::StepExecutor;
