pub mod aggregation;
pub mod day_close;
pub mod reconciler;
pub mod run_lock;
