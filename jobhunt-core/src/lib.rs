pub mod apply;
pub mod browser;
pub mod captcha;
pub mod config;
pub mod error;
pub mod hunt;
pub mod jobs;
pub mod llm;
pub mod profile;
pub mod sqlite;

pub use apply::{
    find_resume, ApplicationEngine, AttemptOutcome, BatchRunner, RunStats, RunnerConfig,
    RunnerError,
};
pub use config::{
    load_browser_config, load_jobhunt_config, load_models_config, load_solver_config,
    BrowserConfig, ConfigBundle, JobhuntConfig, ModelsConfig, SolverConfig,
};
pub use error::{ConfigError, Result};
pub use hunt::{HuntError, HuntLoop, HuntResult, HuntStats, JobSource, JsonFeedSource};
pub use jobs::{
    new_job_id, JobAttempt, JobFilter, JobPosting, JobRecord, JobStatus, JobStoreError,
    JobStoreResult, Recommendation, ScoreResult, SqliteJobStore, SqliteJobStoreBuilder,
};
pub use llm::{ModelClient, ModelLadder, OpenRouterClient, RateLimitBackoff};
pub use profile::{AnswerSheet, ApplicantProfile};
