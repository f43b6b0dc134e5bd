use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::browser::{
    perform, BrowserError, BrowserLauncher, BrowserResult, BrowserSession, HumanMotion,
    LaunchOverrides, PageSession,
};
use crate::captcha::{inject_token, ChallengeKind, ChallengeSolver};
use crate::config::{ConfigBundle, JobhuntConfig};
use crate::jobs::{JobRecord, JobStatus, JobStoreError, SqliteJobStore};
use crate::llm::{AgentAction, ModelClient, ModelLadder, RateLimitBackoff};
use crate::profile::ApplicantProfile;

use super::engine::{AgentPage, ApplicationEngine, EngineConfig};
use super::AttemptOutcome;

pub type RunnerResult<T> = Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Knobs for one batch. Built from the main config; the CLI overrides
/// `max_jobs` and `dry_run` per invocation.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub max_jobs: usize,
    pub dry_run: bool,
    pub documents_dir: PathBuf,
    pub resume_suffix: String,
    pub job_delay_ms: [u32; 2],
    pub error_text_limit: usize,
    pub board_hosts: Vec<String>,
}

impl RunnerConfig {
    pub fn from_config(config: &JobhuntConfig) -> Self {
        Self {
            max_jobs: config.apply.max_jobs,
            dry_run: false,
            documents_dir: PathBuf::from(&config.paths.documents_dir),
            resume_suffix: config.apply.resume_suffix.clone(),
            job_delay_ms: config.apply.job_delay_ms,
            error_text_limit: config.apply.error_text_limit,
            board_hosts: config.hunt.board_hosts.clone(),
        }
    }
}

/// Most recently modified file under `documents_dir` whose name ends with
/// `suffix`. Subdirectories are searched so dated folders keep working.
pub fn find_resume(documents_dir: &Path, suffix: &str) -> Option<PathBuf> {
    WalkDir::new(documents_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| name.ends_with(suffix))
                .unwrap_or(false)
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.into_path(), modified))
        })
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub title: String,
    pub company: String,
    pub status: JobStatus,
    pub note: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct RunStats {
    pub claimed: usize,
    pub applied: usize,
    pub manual: usize,
    pub failed: usize,
    pub external: usize,
    pub skipped: usize,
    pub released: usize,
    pub aborted: Option<String>,
    pub duration_seconds: u64,
    pub outcomes: Vec<JobOutcome>,
}

impl RunStats {
    fn record(&mut self, job: &JobRecord, status: JobStatus, note: Option<String>) {
        match status {
            JobStatus::Applied => self.applied += 1,
            JobStatus::Manual => self.manual += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::External => self.external += 1,
            JobStatus::Skipped => self.skipped += 1,
            JobStatus::Pending => self.released += 1,
            JobStatus::InProgress => {}
        }
        self.outcomes.push(JobOutcome {
            job_id: job.job_id.clone(),
            title: job.title.clone(),
            company: job.company.clone(),
            status,
            note,
        });
    }
}

/// A live CDP tab plus its human-motion state, as seen by the engine.
struct LivePage {
    session: PageSession,
    human: HumanMotion,
}

#[async_trait]
impl AgentPage for LivePage {
    async fn current_url(&mut self) -> BrowserResult<String> {
        self.session.current_url().await
    }

    async fn content(&mut self) -> BrowserResult<String> {
        self.session.content().await
    }

    async fn screenshot_png(&mut self) -> BrowserResult<Vec<u8>> {
        self.session.screenshot_png().await
    }

    async fn reload(&mut self) -> BrowserResult<()> {
        self.session.reload().await
    }

    async fn perform(&mut self, action: &AgentAction, resume: &Path) -> BrowserResult<()> {
        perform(&self.session, &mut self.human, action, resume).await
    }

    async fn inject_challenge_token(
        &mut self,
        kind: ChallengeKind,
        token: &str,
    ) -> BrowserResult<bool> {
        inject_token(&self.session, kind, token).await
    }

    async fn pause(&mut self, bounds: [u32; 2]) {
        let _ = self.human.pause_between(bounds).await;
    }
}

/// Works the queue one claim at a time. The ladder and the rate-limit
/// schedule live across jobs so model behavior carries over a batch; the
/// browser comes up once on the first real attempt and is shut down when
/// the batch ends.
pub struct BatchRunner {
    store: SqliteJobStore,
    launcher: BrowserLauncher,
    overrides: LaunchOverrides,
    client: Arc<dyn ModelClient>,
    solver: Option<Arc<dyn ChallengeSolver>>,
    profile: ApplicantProfile,
    ladder: ModelLadder,
    backoff: RateLimitBackoff,
    engine_config: EngineConfig,
    config: RunnerConfig,
}

impl BatchRunner {
    pub fn new(
        store: SqliteJobStore,
        client: Arc<dyn ModelClient>,
        profile: ApplicantProfile,
        bundle: &ConfigBundle,
    ) -> Self {
        Self {
            store,
            launcher: BrowserLauncher::new(bundle.browser.clone()),
            overrides: LaunchOverrides::default(),
            client,
            solver: None,
            profile,
            ladder: ModelLadder::from_config(&bundle.models.ladder),
            backoff: RateLimitBackoff::new(&bundle.models.backoff.rate_limit_waits_seconds),
            engine_config: EngineConfig::from_sections(&bundle.models.ladder, &bundle.jobhunt.apply),
            config: RunnerConfig::from_config(&bundle.jobhunt),
        }
    }

    pub fn with_solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.config.max_jobs = max_jobs;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.config.dry_run = dry_run;
        self
    }

    /// Forces a visible browser window for this batch; the browser config's
    /// `chromium.headless` stays in charge otherwise.
    pub fn with_headed(mut self, headed: bool) -> Self {
        self.overrides.headless = headed.then_some(false);
        self
    }

    pub async fn run(&mut self) -> RunnerResult<RunStats> {
        let started = Instant::now();
        let mut stats = RunStats::default();
        let mut session: Option<BrowserSession> = None;
        // Dry-run claims are held until the loop ends; releasing one by one
        // would hand the same job straight back to the next claim.
        let mut dry_claims: Vec<String> = Vec::new();

        while stats.claimed < self.config.max_jobs {
            let Some(job) = self.store.claim_pending()? else {
                info!("no pending jobs left in the queue");
                break;
            };
            stats.claimed += 1;
            info!(
                job_id = %job.job_id,
                title = %job.title,
                company = %job.company,
                attempt = job.attempts,
                "claimed job"
            );

            // The resume is resolved before any browser work so a missing
            // file fails fast instead of burning a page load.
            let Some(resume_path) =
                find_resume(&self.config.documents_dir, &self.config.resume_suffix)
            else {
                warn!(
                    job_id = %job.job_id,
                    dir = %self.config.documents_dir.display(),
                    suffix = %self.config.resume_suffix,
                    "no resume on disk"
                );
                self.store
                    .route(&job.job_id, JobStatus::Failed, Some("resume not found"))?;
                stats.record(&job, JobStatus::Failed, Some("resume not found".into()));
                continue;
            };

            if self.config.dry_run {
                info!(
                    job_id = %job.job_id,
                    resume = %resume_path.display(),
                    "dry run, job will be returned to pending"
                );
                dry_claims.push(job.job_id.clone());
                stats.record(&job, JobStatus::Pending, Some("dry run".into()));
                continue;
            }

            let active = match session {
                Some(ref existing) => existing,
                None => {
                    info!("launching stealth browser for the batch");
                    &*session.insert(self.launcher.launch(self.overrides.clone()).await?)
                }
            };

            let outcome = self.attempt(active, &job, &resume_path).await;
            if self.route_outcome(&job, outcome, &mut stats)? {
                break;
            }

            if stats.claimed < self.config.max_jobs {
                let delay = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(self.config.job_delay_ms[0]..=self.config.job_delay_ms[1])
                };
                debug!(delay_ms = delay, "pacing before the next claim");
                sleep(Duration::from_millis(u64::from(delay))).await;
            }
        }

        for job_id in &dry_claims {
            self.store.release(job_id)?;
        }

        if let Some(active) = session {
            if let Err(err) = active.shutdown().await {
                warn!(error = %err, "browser shutdown reported an error");
            }
        }

        stats.duration_seconds = started.elapsed().as_secs();
        info!(
            claimed = stats.claimed,
            applied = stats.applied,
            manual = stats.manual,
            failed = stats.failed,
            external = stats.external,
            skipped = stats.skipped,
            released = stats.released,
            duration_seconds = stats.duration_seconds,
            "batch finished"
        );
        Ok(stats)
    }

    /// Settles one attempt against the store and the batch stats. A
    /// successful application also drops the ladder back to the cheapest
    /// tier. Returns `true` when the batch must stop because the rate-limit
    /// schedule ran dry.
    fn route_outcome(
        &mut self,
        job: &JobRecord,
        outcome: AttemptOutcome,
        stats: &mut RunStats,
    ) -> RunnerResult<bool> {
        match outcome {
            AttemptOutcome::Applied { evidence } => {
                self.ladder.reset_to_cheapest();
                self.store.route(&job.job_id, JobStatus::Applied, None)?;
                stats.record(job, JobStatus::Applied, Some(evidence));
            }
            AttemptOutcome::AlreadyApplied => {
                self.store
                    .route(&job.job_id, JobStatus::Skipped, Some("already applied"))?;
                stats.record(job, JobStatus::Skipped, Some("already applied".into()));
            }
            AttemptOutcome::ManualReview { reason } => {
                self.store
                    .route(&job.job_id, JobStatus::Manual, Some(&reason))?;
                stats.record(job, JobStatus::Manual, Some(reason));
            }
            AttemptOutcome::External { destination } => {
                let note = format!("redirects to {destination}");
                self.store
                    .route(&job.job_id, JobStatus::External, Some(&note))?;
                stats.record(job, JobStatus::External, Some(note));
            }
            AttemptOutcome::Failed { reason } => {
                let note = clip_note(&reason, self.config.error_text_limit);
                self.store
                    .route(&job.job_id, JobStatus::Failed, Some(&note))?;
                stats.record(job, JobStatus::Failed, Some(note));
            }
            AttemptOutcome::RateLimited => {
                warn!(job_id = %job.job_id, "rate limit backoff exhausted, aborting the batch");
                self.store.release(&job.job_id)?;
                stats.record(job, JobStatus::Pending, Some("rate limited".into()));
                stats.aborted = Some("rate_limit_exceeded".to_string());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn attempt(
        &mut self,
        session: &BrowserSession,
        job: &JobRecord,
        resume_path: &Path,
    ) -> AttemptOutcome {
        let page = match session.new_page().await {
            Ok(page) => page,
            Err(err) => {
                warn!(job_id = %job.job_id, error = %err, "could not open a page");
                return AttemptOutcome::Failed {
                    reason: format!("browser page: {err}"),
                };
            }
        };
        if let Err(err) = page.goto(&job.url).await {
            warn!(job_id = %job.job_id, url = %job.url, error = %err, "navigation to posting failed");
            return AttemptOutcome::Failed {
                reason: format!("navigation failed: {err}"),
            };
        }
        let mut human = HumanMotion::new(session.config().human_simulation.clone());
        // Skim the posting once before touching the form.
        if let Err(err) = human.scroll_burst(page.page()).await {
            debug!(job_id = %job.job_id, error = %err, "initial scroll failed");
        }
        let mut live = LivePage {
            session: page,
            human,
        };
        let engine_config = self.engine_config.clone();
        let mut engine = ApplicationEngine::new(
            self.client.as_ref(),
            self.solver.as_deref(),
            &mut self.ladder,
            &mut self.backoff,
            &self.profile,
            &self.config.board_hosts,
            engine_config,
        );
        engine.run(&mut live, job, resume_path).await
    }
}

fn clip_note(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobPosting, SqliteJobStore};
    use crate::llm::{ChatRequest, LlmResult};
    use crate::profile::AnswerSheet;
    use std::fs;

    struct NeverCalledModel;

    #[async_trait]
    impl ModelClient for NeverCalledModel {
        async fn complete(&self, _request: ChatRequest) -> LlmResult<String> {
            panic!("model must not be consulted on this path");
        }
    }

    fn bundle() -> ConfigBundle {
        ConfigBundle::from_directory(concat!(env!("CARGO_MANIFEST_DIR"), "/../configs"))
            .expect("fixture configs load")
    }

    fn posting(url: &str) -> JobPosting {
        JobPosting {
            title: "Backend Engineer".into(),
            company: "Acme".into(),
            url: url.into(),
            location: Some("Remote".into()),
            description: None,
            remote: true,
            salary: None,
        }
    }

    fn temp_store(dir: &Path) -> SqliteJobStore {
        let store = SqliteJobStore::builder(dir.join("jobs.db")).build();
        store.initialize().expect("schema applies");
        store
    }

    fn runner_over(store: &SqliteJobStore) -> BatchRunner {
        let bundle = bundle();
        let profile = ApplicantProfile::new(bundle.jobhunt.applicant.clone(), AnswerSheet::default());
        BatchRunner::new(store.clone(), Arc::new(NeverCalledModel), profile, &bundle)
    }

    #[test]
    fn find_resume_prefers_the_newest_match() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("2026");
        fs::create_dir(&nested).expect("mkdir");
        fs::write(dir.path().join("Old_Resume.pdf"), b"old").expect("write");
        std::thread::sleep(Duration::from_millis(50));
        fs::write(nested.join("New_Resume.pdf"), b"new").expect("write");
        fs::write(dir.path().join("cover_letter.pdf"), b"no").expect("write");

        let found = find_resume(dir.path(), "_Resume.pdf").expect("a resume is found");
        assert!(found.ends_with("2026/New_Resume.pdf"));
    }

    #[test]
    fn find_resume_on_an_empty_directory_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(find_resume(dir.path(), "_Resume.pdf").is_none());
    }

    #[test]
    fn clip_note_respects_char_boundaries() {
        assert_eq!(clip_note("short", 500), "short");
        let clipped = clip_note("déjà vu", 3);
        assert_eq!(clipped, "dé");
    }

    #[tokio::test]
    async fn missing_resume_fails_the_job_without_a_browser() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = temp_store(dir.path());
        store
            .enqueue("job-1", &posting("https://www.indeed.com/viewjob?jk=1"), None)
            .expect("enqueue");

        let mut bundle = bundle();
        bundle.jobhunt.paths.documents_dir = dir.path().join("empty").display().to_string();
        let profile = ApplicantProfile::new(bundle.jobhunt.applicant.clone(), AnswerSheet::default());

        let mut runner = BatchRunner::new(store.clone(), Arc::new(NeverCalledModel), profile, &bundle);
        let stats = runner.run().await.expect("run succeeds");

        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.failed, 1);
        let job = store.fetch("job-1").expect("fetch").expect("exists");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("resume not found"));
    }

    #[test]
    fn applied_outcome_marks_the_job_and_resets_the_ladder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = temp_store(dir.path());
        store
            .enqueue("job-1", &posting("https://www.indeed.com/viewjob?jk=1"), None)
            .expect("enqueue");
        let job = store.claim_pending().expect("claim").expect("a pending job");

        let mut runner = runner_over(&store);
        let cheapest = runner.ladder.current_model().to_string();
        runner.ladder.record_stuck();
        runner.ladder.record_stuck();
        assert_ne!(runner.ladder.current_model(), cheapest);

        let mut stats = RunStats::default();
        let stop = runner
            .route_outcome(
                &job,
                AttemptOutcome::Applied {
                    evidence: "application submitted banner".into(),
                },
                &mut stats,
            )
            .expect("routing succeeds");

        assert!(!stop);
        assert_eq!(runner.ladder.current_model(), cheapest);
        assert_eq!(stats.applied, 1);
        let stored = store.fetch("job-1").expect("fetch").expect("exists");
        assert_eq!(stored.status, JobStatus::Applied);
        assert!(stored.last_error.is_none());
    }

    #[test]
    fn rate_limited_outcome_releases_the_claim_and_stops_the_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = temp_store(dir.path());
        store
            .enqueue("job-1", &posting("https://www.indeed.com/viewjob?jk=1"), None)
            .expect("enqueue");
        let job = store.claim_pending().expect("claim").expect("a pending job");

        let mut runner = runner_over(&store);
        let mut stats = RunStats::default();
        let stop = runner
            .route_outcome(&job, AttemptOutcome::RateLimited, &mut stats)
            .expect("routing succeeds");

        assert!(stop);
        assert_eq!(stats.aborted.as_deref(), Some("rate_limit_exceeded"));
        assert_eq!(stats.released, 1);
        let stored = store.fetch("job-1").expect("fetch").expect("exists");
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempts, 0);
    }

    #[test]
    fn skip_review_and_redirect_outcomes_keep_their_notes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = temp_store(dir.path());
        for (job_id, jk) in [("job-1", "1"), ("job-2", "2"), ("job-3", "3")] {
            let url = format!("https://www.indeed.com/viewjob?jk={jk}");
            store.enqueue(job_id, &posting(&url), None).expect("enqueue");
        }

        let mut runner = runner_over(&store);
        let mut stats = RunStats::default();
        let outcomes = [
            AttemptOutcome::AlreadyApplied,
            AttemptOutcome::ManualReview {
                reason: "login required".into(),
            },
            AttemptOutcome::External {
                destination: "boards.greenhouse.io".into(),
            },
        ];
        for outcome in outcomes {
            let job = store.claim_pending().expect("claim").expect("a pending job");
            let stop = runner
                .route_outcome(&job, outcome, &mut stats)
                .expect("routing succeeds");
            assert!(!stop);
        }

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.manual, 1);
        assert_eq!(stats.external, 1);
        let skipped = store.fetch("job-1").expect("fetch").expect("exists");
        assert_eq!(skipped.status, JobStatus::Skipped);
        assert_eq!(skipped.last_error.as_deref(), Some("already applied"));
        let manual = store.fetch("job-2").expect("fetch").expect("exists");
        assert_eq!(manual.status, JobStatus::Manual);
        assert_eq!(manual.last_error.as_deref(), Some("login required"));
        let external = store.fetch("job-3").expect("fetch").expect("exists");
        assert_eq!(external.status, JobStatus::External);
        assert_eq!(
            external.last_error.as_deref(),
            Some("redirects to boards.greenhouse.io")
        );
    }

    #[test]
    fn failed_outcome_truncates_the_reason_for_the_queue() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = temp_store(dir.path());
        store
            .enqueue("job-1", &posting("https://www.indeed.com/viewjob?jk=1"), None)
            .expect("enqueue");
        let job = store.claim_pending().expect("claim").expect("a pending job");

        let mut runner = runner_over(&store);
        let mut stats = RunStats::default();
        let reason = "x".repeat(600);
        let stop = runner
            .route_outcome(&job, AttemptOutcome::Failed { reason }, &mut stats)
            .expect("routing succeeds");

        assert!(!stop);
        assert_eq!(stats.failed, 1);
        let stored = store.fetch("job-1").expect("fetch").expect("exists");
        assert_eq!(stored.status, JobStatus::Failed);
        let note = stored.last_error.expect("note recorded");
        assert_eq!(note.len(), 500);
    }

    #[test]
    fn with_headed_requests_a_visible_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = temp_store(dir.path());
        let runner = runner_over(&store);
        assert!(runner.overrides.headless.is_none());
        let runner = runner.with_headed(true);
        assert_eq!(runner.overrides.headless, Some(false));
    }

    #[tokio::test]
    async fn dry_run_claims_and_returns_jobs_to_pending() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = temp_store(dir.path());
        store
            .enqueue("job-1", &posting("https://www.indeed.com/viewjob?jk=1"), None)
            .expect("enqueue");
        store
            .enqueue("job-2", &posting("https://www.indeed.com/viewjob?jk=2"), None)
            .expect("enqueue");
        fs::write(dir.path().join("Alex_Resume.pdf"), b"pdf").expect("write");

        let mut bundle = bundle();
        bundle.jobhunt.paths.documents_dir = dir.path().display().to_string();
        bundle.jobhunt.apply.job_delay_ms = [0, 0];
        let profile = ApplicantProfile::new(bundle.jobhunt.applicant.clone(), AnswerSheet::default());

        let mut runner = BatchRunner::new(store.clone(), Arc::new(NeverCalledModel), profile, &bundle)
            .with_dry_run(true);
        let stats = runner.run().await.expect("run succeeds");

        assert_eq!(stats.claimed, 2);
        assert_eq!(stats.released, 2);
        assert!(stats.aborted.is_none());
        for job_id in ["job-1", "job-2"] {
            let job = store.fetch(job_id).expect("fetch").expect("exists");
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.attempts, 0);
        }
    }
}
