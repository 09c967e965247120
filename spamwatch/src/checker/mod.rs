//! Spam checks: orchestration, keyword matching and background submission.

mod keywords;
mod outcome;
mod queue;
mod service;

pub use keywords::KeywordMatcher;
pub use outcome::{
    BatchSummary, CheckOutcome, GatewayStatusView, ProbeOutcome, ProbeSource, ProbeStatus,
    RealtimeCheckResult,
};
pub use queue::{CheckQueue, CheckRequest};
pub use service::{CheckCapabilities, CheckRepositories, CheckService, CheckServiceConfig};
