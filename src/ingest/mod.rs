pub mod output;
pub mod processor;
pub mod rate_limit;

pub use processor::{PingError, PingOutcome, PingProcessor, PingRequest, PingState};
pub use rate_limit::{RateLimitResult, RateLimiter};
