mod engine;
mod runner;
mod state;
mod stuck;

pub use engine::{AgentPage, ApplicationEngine, EngineConfig};
pub use runner::{find_resume, BatchRunner, JobOutcome, RunStats, RunnerConfig, RunnerError};
pub use state::{classify, PageState};
pub use stuck::{StuckAssessment, StuckTracker};

/// How one application attempt ended. The runner maps each variant onto a
/// queue status; `RateLimited` is the one variant that ends the whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Applied { evidence: String },
    AlreadyApplied,
    ManualReview { reason: String },
    External { destination: String },
    Failed { reason: String },
    RateLimited,
}
