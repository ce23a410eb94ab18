pub mod config;
pub mod datasets;
pub mod evaluate;
pub mod metrics;
pub mod nn;
pub mod report;
pub mod scheduler;
pub mod train;
pub mod utils;
