pub mod anomaly;
pub mod welford;
pub mod worker;

pub use worker::{AnalyticsTask, AnalyticsWorker};
