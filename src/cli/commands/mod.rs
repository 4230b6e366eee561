pub mod batch;
pub mod config;
pub mod metrics;
pub mod optimize;
pub mod providers;
