pub mod metrics;

pub use metrics::{
    MetricsRecord, MetricsStore, ProviderSummary, SharedMetricsStore, loc_reduction_percentage,
};
