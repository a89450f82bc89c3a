pub mod controller;
pub mod dispatcher;
pub mod fetcher;
pub mod generator;
pub mod metrics;
pub mod reconciler;

pub use controller::{RunAbort, RunController, RunReport};
pub use dispatcher::ConcurrencyMode;
pub use metrics::RunMetrics;
