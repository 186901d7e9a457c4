//! Executing one scan: the engine run, its monitor loop, the budget
//! governor and the progress aggregator.

pub mod activity;
pub mod executor;
pub mod governor;
pub mod progress;
pub mod reprocess;

pub use executor::{ExecutorSettings, ScanExecutor};
pub use governor::{BudgetGovernor, WRAP_UP_DIRECTIVE};
pub use progress::{MonotonicCounters, ProgressAggregator};
pub use reprocess::{ReprocessOptions, Reprocessed, Reprocessor};
