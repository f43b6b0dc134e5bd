use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::warn;

use jobhunt_core::captcha::{SolverClient, SolverError};
use jobhunt_core::llm::LlmError;
use jobhunt_core::profile::ProfileError;
use jobhunt_core::{
    find_resume, load_browser_config, load_jobhunt_config, load_models_config, load_solver_config,
    AnswerSheet, ApplicantProfile, BatchRunner, ConfigBundle, HuntError, HuntLoop, HuntStats,
    JobSource, JobStatus, JobStoreError, JsonFeedSource, ModelClient, OpenRouterClient, RunStats,
    RunnerError, SqliteJobStore,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] jobhunt_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),
    #[error("hunt error: {0}")]
    Hunt(#[from] HuntError),
    #[error("apply error: {0}")]
    Runner(#[from] RunnerError),
    #[error("model error: {0}")]
    Model(#[from] LlmError),
    #[error("solver error: {0}")]
    Solver(#[from] SolverError),
    #[error("profile error: {0}")]
    Profile(#[from] ProfileError),
    #[error("authentication failed")]
    Authentication,
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Job hunt command-line control interface", long_about = None)]
pub struct Cli {
    /// Path to the main jobhunt.toml
    #[arg(long, default_value = "configs/jobhunt.toml")]
    pub config: PathBuf,
    /// Alternate path for browser.toml
    #[arg(long)]
    pub browser_config: Option<PathBuf>,
    /// Alternate path for models.toml
    #[arg(long)]
    pub models_config: Option<PathBuf>,
    /// Alternate path for solver.toml
    #[arg(long)]
    pub solver_config: Option<PathBuf>,
    /// Override for the data directory (replaces paths.data_dir)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Alternate path for jobs.db
    #[arg(long)]
    pub jobs_db: Option<PathBuf>,
    /// Token for local authentication (when JOBHUNTCTL_TOKEN is set)
    #[arg(long)]
    pub token: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show node identity and queue state at a glance
    Status,
    /// Fetch postings from feeds, score them and enqueue the keepers
    Hunt(HuntArgs),
    /// Claim pending jobs and run the application loop on each
    Apply(ApplyArgs),
    /// Job queue inspection and maintenance
    #[command(subcommand)]
    Queue(QueueCommands),
    /// Run integrity checks
    #[command(name = "health")]
    #[command(subcommand)]
    Health(HealthCommands),
}

#[derive(Args, Debug)]
pub struct HuntArgs {
    /// JSON feed file with postings; repeat the flag for several feeds
    #[arg(long = "feed", value_name = "PATH", required = true)]
    pub feeds: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Cap on jobs claimed this batch (defaults to apply.max_jobs)
    #[arg(long)]
    pub max_jobs: Option<usize>,
    /// Claim and report without opening a browser
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
    /// Run the browser with a visible window
    #[arg(long, default_value_t = false)]
    pub headed: bool,
}

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List jobs in the queue
    Show(QueueShowArgs),
    /// Per-status job counts
    Stats,
    /// Write one status bucket as a JSON list
    Export(QueueExportArgs),
    /// Write every status bucket into a gzip archive
    Archive(QueueArchiveArgs),
    /// Return claims abandoned by a dead runner to pending
    ReleaseStale(ReleaseStaleArgs),
}

#[derive(Args, Debug)]
pub struct QueueShowArgs {
    /// Filter by status
    #[arg(long)]
    pub status: Option<String>,
    /// Filter by company substring
    #[arg(long)]
    pub company: Option<String>,
    /// Row limit
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct QueueExportArgs {
    /// Status bucket to export
    #[arg(long)]
    pub status: String,
    /// Output path (defaults under paths.exports_dir)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct QueueArchiveArgs {
    /// Output path (defaults under paths.exports_dir)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ReleaseStaleArgs {
    /// Age in minutes before a claim counts as abandoned
    #[arg(long, default_value_t = 60)]
    pub older_than_minutes: u64,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Run the basic checks
    Check,
}

pub fn run(cli: Cli) -> Result<()> {
    enforce_token(&cli)?;
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Hunt(args) => {
            let stats = context.hunt(args)?;
            render(&stats, cli.format)?;
        }
        Commands::Apply(args) => {
            let stats = context.apply(args)?;
            render(&stats, cli.format)?;
        }
        Commands::Queue(QueueCommands::Show(args)) => {
            let list = context.queue_show(args)?;
            render(&list, cli.format)?;
        }
        Commands::Queue(QueueCommands::Stats) => {
            let stats = context.queue_stats()?;
            render(&stats, cli.format)?;
        }
        Commands::Queue(QueueCommands::Export(args)) => {
            let receipt = context.queue_export(args)?;
            render(&receipt, cli.format)?;
        }
        Commands::Queue(QueueCommands::Archive(args)) => {
            let receipt = context.queue_archive(args)?;
            render(&receipt, cli.format)?;
        }
        Commands::Queue(QueueCommands::ReleaseStale(args)) => {
            let receipt = context.queue_release_stale(args)?;
            render(&receipt, cli.format)?;
        }
        Commands::Health(HealthCommands::Check) => {
            let report = context.health_check()?;
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    match std::env::var("JOBHUNTCTL_TOKEN") {
        Ok(expected) => match cli.token.as_deref() {
            Some(provided) if provided == expected => Ok(()),
            _ => Err(AppError::Authentication),
        },
        Err(_) => Ok(()),
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => println!("{}", value.display()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

trait DisplayFallback {
    fn display(&self) -> String;
}

fn feed_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug)]
struct AppContext {
    bundle: ConfigBundle,
    config_path: PathBuf,
    browser_path: PathBuf,
    models_path: PathBuf,
    solver_path: PathBuf,
    jobs_db: PathBuf,
    documents_dir: PathBuf,
    answers_file: PathBuf,
    exports_dir: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let jobhunt = load_jobhunt_config(&config_path)?;

        let config_dir = config_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let sibling = |name: &str| config_dir.join(name);

        let browser_path = cli
            .browser_config
            .clone()
            .unwrap_or_else(|| sibling("browser.toml"));
        let models_path = cli
            .models_config
            .clone()
            .unwrap_or_else(|| sibling("models.toml"));
        let solver_path = cli
            .solver_config
            .clone()
            .unwrap_or_else(|| sibling("solver.toml"));

        let browser = load_browser_config(&browser_path)?;
        let models = load_models_config(&models_path)?;
        let solver = load_solver_config(&solver_path)?;
        let bundle = ConfigBundle {
            jobhunt,
            browser,
            models,
            solver,
        };

        let data_dir = cli
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&bundle.jobhunt.paths.data_dir));
        let jobs_db = cli
            .jobs_db
            .clone()
            .unwrap_or_else(|| data_dir.join("jobs.db"));
        // Same construction the batch runner uses, so health checks look at
        // the directory the runner will actually search.
        let documents_dir = PathBuf::from(&bundle.jobhunt.paths.documents_dir);
        let answers_file = bundle
            .jobhunt
            .resolve_path(&bundle.jobhunt.paths.answers_file);
        let exports_dir = bundle
            .jobhunt
            .resolve_path(&bundle.jobhunt.paths.exports_dir);

        Ok(Self {
            bundle,
            config_path,
            browser_path,
            models_path,
            solver_path,
            jobs_db,
            documents_dir,
            answers_file,
            exports_dir,
        })
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let node = NodeStatus {
            node_name: self.bundle.jobhunt.system.node_name.clone(),
            environment: self.bundle.jobhunt.system.environment.clone(),
        };

        let job_counts = self.job_counts().unwrap_or_default();
        let latest = self.latest_activity()?;

        Ok(StatusReport {
            node,
            job_counts,
            latest,
        })
    }

    fn hunt(&self, args: &HuntArgs) -> Result<HuntStats> {
        let store = self.open_store()?;
        let client: Arc<dyn ModelClient> =
            Arc::new(OpenRouterClient::from_config(&self.bundle.models.api)?);
        let profile = self.load_profile()?;
        let hunt = HuntLoop::new(store, client, profile, &self.bundle)?;

        let sources: Vec<Box<dyn JobSource>> = args
            .feeds
            .iter()
            .map(|path| Box::new(JsonFeedSource::new(feed_name(path), path)) as Box<dyn JobSource>)
            .collect();

        let runtime = Runtime::new()?;
        Ok(runtime.block_on(hunt.run(&sources))?)
    }

    fn apply(&self, args: &ApplyArgs) -> Result<RunStats> {
        let store = self.open_store()?;
        let client: Arc<dyn ModelClient> =
            Arc::new(OpenRouterClient::from_config(&self.bundle.models.api)?);
        let profile = self.load_profile()?;

        let mut runner = BatchRunner::new(store, client, profile, &self.bundle);
        match SolverClient::from_config(&self.bundle.solver) {
            Ok(solver) => {
                runner = runner.with_solver(Arc::new(solver));
            }
            Err(SolverError::MissingKey(env)) => {
                warn!(env = %env, "solver key not set; challenges will not be solved");
            }
            Err(err) => return Err(AppError::Solver(err)),
        }
        if let Some(max_jobs) = args.max_jobs {
            runner = runner.with_max_jobs(max_jobs);
        }
        if args.dry_run {
            runner = runner.with_dry_run(true);
        }
        if args.headed {
            runner = runner.with_headed(true);
        }

        let runtime = Runtime::new()?;
        Ok(runtime.block_on(runner.run())?)
    }

    fn queue_show(&self, args: &QueueShowArgs) -> Result<JobList> {
        let conn = self.open_database(&self.jobs_db)?;
        let mut stmt = conn.prepare(
            "SELECT job_id, title, company, status, score, recommendation, attempts, \
                    last_error, updated_at \
             FROM jobs \
             WHERE (?1 IS NULL OR status = ?1) \
               AND (?2 IS NULL OR company LIKE '%' || ?2 || '%') \
             ORDER BY updated_at DESC, id DESC \
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                (
                    args.status.as_ref(),
                    args.company.as_ref(),
                    args.limit as i64,
                ),
                |row| {
                    Ok(JobEntry {
                        job_id: row.get(0)?,
                        title: row.get(1)?,
                        company: row.get(2)?,
                        status: row.get(3)?,
                        score: row.get::<_, Option<i64>>(4)?,
                        recommendation: row.get::<_, Option<String>>(5)?,
                        attempts: row.get(6)?,
                        last_error: row.get::<_, Option<String>>(7)?,
                        updated_at: row.get::<_, Option<String>>(8)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(JobList { rows })
    }

    fn queue_stats(&self) -> Result<QueueStatsReport> {
        let conn = self.open_database(&self.jobs_db)?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let mut counts = HashMap::new();
        let mut total = 0_i64;
        for row in
            stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        {
            let (status, count) = row?;
            total += count;
            counts.insert(status, count);
        }
        Ok(QueueStatsReport { counts, total })
    }

    fn queue_export(&self, args: &QueueExportArgs) -> Result<ExportReceipt> {
        let status: JobStatus = args.status.parse()?;
        let out = args
            .out
            .clone()
            .unwrap_or_else(|| self.exports_dir.join(format!("{status}.json")));
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let store = self.open_store_read_only()?;
        let jobs = store.export_status_json(status, &out)?;
        Ok(ExportReceipt { path: out, jobs })
    }

    fn queue_archive(&self, args: &QueueArchiveArgs) -> Result<ExportReceipt> {
        let out = args.out.clone().unwrap_or_else(|| {
            let stamp = Utc::now().format("%Y%m%d-%H%M%S");
            self.exports_dir.join(format!("jobs-{stamp}.json.gz"))
        });
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let store = self.open_store_read_only()?;
        let jobs = store.export_archive(&out)?;
        Ok(ExportReceipt { path: out, jobs })
    }

    fn queue_release_stale(&self, args: &ReleaseStaleArgs) -> Result<ReleaseReceipt> {
        let store = self.open_store()?;
        let released = store.release_stale(Duration::from_secs(args.older_than_minutes * 60))?;
        Ok(ReleaseReceipt { released })
    }

    fn health_check(&self) -> Result<Vec<HealthEntry>> {
        let mut results = Vec::new();
        results.push(self.check_path("jobhunt.toml", &self.config_path));
        results.push(self.check_path("browser.toml", &self.browser_path));
        results.push(self.check_path("models.toml", &self.models_path));
        results.push(self.check_path("solver.toml", &self.solver_path));
        results.push(self.check_database("jobs.db", &self.jobs_db));
        results.push(self.check_directory("documents", &self.documents_dir));
        results.push(self.check_resume());
        results.push(self.check_path("answers file", &self.answers_file));
        results.push(self.check_env("model api key", &self.bundle.models.api.key_env, true));
        results.push(self.check_env("solver key", &self.bundle.solver.service.key_env, false));
        Ok(results)
    }

    fn check_path(&self, name: &str, path: &Path) -> HealthEntry {
        if path.exists() {
            HealthEntry::ok(name, format!("{}", path.display()))
        } else {
            HealthEntry::error(name, format!("{path} missing", path = path.display()))
        }
    }

    fn check_directory(&self, name: &str, path: &Path) -> HealthEntry {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
            Ok(_) => HealthEntry::warn(
                name,
                format!("{path} is not a directory", path = path.display()),
            ),
            Err(_) => HealthEntry::warn(name, format!("{path} not found", path = path.display())),
        }
    }

    fn check_resume(&self) -> HealthEntry {
        let suffix = &self.bundle.jobhunt.apply.resume_suffix;
        match find_resume(&self.documents_dir, suffix) {
            Some(path) => HealthEntry::ok("resume", format!("{}", path.display())),
            None => HealthEntry::error(
                "resume",
                format!(
                    "no file ending with {suffix} under {dir}",
                    dir = self.documents_dir.display()
                ),
            ),
        }
    }

    fn check_env(&self, name: &str, env_name: &str, required: bool) -> HealthEntry {
        if std::env::var(env_name).is_ok() {
            HealthEntry::ok(name, format!("{env_name} set"))
        } else if required {
            HealthEntry::error(name, format!("{env_name} not set"))
        } else {
            HealthEntry::warn(name, format!("{env_name} not set"))
        }
    }

    fn check_database(&self, name: &str, path: &Path) -> HealthEntry {
        if !path.exists() {
            return HealthEntry::warn(name, format!("{path} not found", path = path.display()));
        }
        match self.open_database(path) {
            Ok(conn) => {
                let pragma: rusqlite::Result<String> =
                    conn.query_row("PRAGMA integrity_check;", [], |row| row.get(0));
                match pragma {
                    Ok(result) if result.to_lowercase() == "ok" => {
                        HealthEntry::ok(name, "integrity ok".to_string())
                    }
                    Ok(result) => HealthEntry::warn(name, format!("integrity_check: {result}")),
                    Err(err) => HealthEntry::warn(name, format!("error: {err}")),
                }
            }
            Err(err) => HealthEntry::error(name, format!("open failed: {err}")),
        }
    }

    fn open_database(&self, path: &Path) -> Result<Connection> {
        if !path.exists() {
            return Err(AppError::MissingResource(format!(
                "database missing: {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(conn)
    }

    fn open_store(&self) -> Result<SqliteJobStore> {
        if let Some(parent) = self.jobs_db.parent() {
            fs::create_dir_all(parent)?;
        }
        let store = SqliteJobStore::builder(&self.jobs_db).build();
        store.initialize()?;
        Ok(store)
    }

    fn open_store_read_only(&self) -> Result<SqliteJobStore> {
        if !self.jobs_db.exists() {
            return Err(AppError::MissingResource(format!(
                "database missing: {}",
                self.jobs_db.display()
            )));
        }
        Ok(SqliteJobStore::builder(&self.jobs_db)
            .read_only(true)
            .build())
    }

    fn load_profile(&self) -> Result<ApplicantProfile> {
        let answers = AnswerSheet::load_from_file(&self.answers_file)?;
        Ok(ApplicantProfile::new(
            self.bundle.jobhunt.applicant.clone(),
            answers,
        ))
    }

    fn job_counts(&self) -> Option<HashMap<String, i64>> {
        let conn = self.open_database(&self.jobs_db).ok()?;
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")
            .ok()?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .ok()?;
        let mut map = HashMap::new();
        for (status, count) in rows.flatten() {
            map.insert(status, count);
        }
        Some(map)
    }

    fn latest_activity(&self) -> Result<Option<ActivitySnapshot>> {
        if !self.jobs_db.exists() {
            return Ok(None);
        }
        let conn = self.open_database(&self.jobs_db)?;
        let mut stmt = conn.prepare(
            "SELECT job_id, title, company, status, updated_at \
             FROM jobs ORDER BY updated_at DESC, id DESC LIMIT 1",
        )?;
        let snapshot = stmt
            .query_row([], |row| {
                Ok(ActivitySnapshot {
                    job_id: row.get(0)?,
                    title: row.get(1)?,
                    company: row.get(2)?,
                    status: row.get(3)?,
                    updated_at: row.get::<_, Option<String>>(4)?,
                })
            })
            .optional()?;
        Ok(snapshot)
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub node: NodeStatus,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub job_counts: HashMap<String, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<ActivitySnapshot>,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Node: {} (env: {})",
            self.node.node_name, self.node.environment
        )];
        if !self.job_counts.is_empty() {
            lines.push("Jobs:".to_string());
            for (status, count) in self.job_counts.iter() {
                lines.push(format!("  - {status}: {count}"));
            }
        }
        match &self.latest {
            Some(latest) => lines.push(format!(
                "Latest: {} @ {} | status={} | {}",
                latest.title,
                latest.company,
                latest.status,
                latest.updated_at.as_deref().unwrap_or("-")
            )),
            None => lines.push("Latest: no activity".to_string()),
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct NodeStatus {
    pub node_name: String,
    pub environment: String,
}

#[derive(Debug, Serialize)]
pub struct ActivitySnapshot {
    pub job_id: String,
    pub title: String,
    pub company: String,
    pub status: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub rows: Vec<JobEntry>,
}

#[derive(Debug, Serialize)]
pub struct JobEntry {
    pub job_id: String,
    pub title: String,
    pub company: String,
    pub status: String,
    pub score: Option<i64>,
    pub recommendation: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub updated_at: Option<String>,
}

impl DisplayFallback for JobList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No jobs found".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            let score = entry
                .score
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string());
            let mut line = format!(
                "{} | {} @ {} | status={} | score={} | attempts={}",
                entry.job_id, entry.title, entry.company, entry.status, score, entry.attempts
            );
            if let Some(error) = &entry.last_error {
                line.push_str(&format!(" | {error}"));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct QueueStatsReport {
    pub counts: HashMap<String, i64>,
    pub total: i64,
}

impl DisplayFallback for QueueStatsReport {
    fn display(&self) -> String {
        if self.counts.is_empty() {
            return "Queue empty".to_string();
        }
        let mut lines: Vec<String> = self
            .counts
            .iter()
            .map(|(status, count)| format!("{status}: {count}"))
            .collect();
        lines.sort();
        lines.push(format!("total: {}", self.total));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ExportReceipt {
    pub path: PathBuf,
    pub jobs: usize,
}

impl DisplayFallback for ExportReceipt {
    fn display(&self) -> String {
        format!("{} jobs written to {}", self.jobs, self.path.display())
    }
}

#[derive(Debug, Serialize)]
pub struct ReleaseReceipt {
    pub released: usize,
}

impl DisplayFallback for ReleaseReceipt {
    fn display(&self) -> String {
        match self.released {
            0 => "No stale claims".to_string(),
            1 => "Released 1 stale claim".to_string(),
            n => format!("Released {n} stale claims"),
        }
    }
}

impl DisplayFallback for HuntStats {
    fn display(&self) -> String {
        format!(
            "Fetched {fetched} postings in {secs}s: {enqueued} enqueued, {skipped} skipped, \
             {rejected} rejected, {duplicates} duplicate, {errors} source errors",
            fetched = self.fetched,
            secs = self.duration_seconds,
            enqueued = self.enqueued,
            skipped = self.skipped,
            rejected = self.rejected,
            duplicates = self.duplicates,
            errors = self.source_errors,
        )
    }
}

impl DisplayFallback for RunStats {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Claimed {claimed} jobs in {secs}s: {applied} applied, {manual} manual, \
             {failed} failed, {external} external, {skipped} skipped",
            claimed = self.claimed,
            secs = self.duration_seconds,
            applied = self.applied,
            manual = self.manual,
            failed = self.failed,
            external = self.external,
            skipped = self.skipped,
        )];
        if self.released > 0 {
            lines.push(format!("Released back to pending: {}", self.released));
        }
        if let Some(reason) = &self.aborted {
            lines.push(format!("Aborted: {reason}"));
        }
        for outcome in &self.outcomes {
            lines.push(format!(
                "{} | {} @ {} | {} | {}",
                outcome.job_id,
                outcome.title,
                outcome.company,
                outcome.status,
                outcome.note.as_deref().unwrap_or("-")
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(HealthEntry::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Ok => write!(f, "OK"),
            CheckStatus::Warn => write!(f, "WARN"),
            CheckStatus::Error => write!(f, "ERROR"),
        }
    }
}

impl HealthEntry {
    fn with_status(
        status: CheckStatus,
        name: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }

    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Ok, name, detail)
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Warn, name, detail)
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Error, name, detail)
    }
}

impl DisplayFallback for HealthEntry {
    fn display(&self) -> String {
        format!(
            "[{status}] {name}: {detail}",
            status = self.status,
            name = self.name,
            detail = self.detail
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use tempfile::TempDir;

    fn prepare_test_context() -> Result<(TempDir, AppContext)> {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let configs_dir = root.join("configs");
        fs::create_dir_all(&configs_dir).unwrap();
        fs::copy("../configs/jobhunt.toml", configs_dir.join("jobhunt.toml")).unwrap();
        fs::copy("../configs/browser.toml", configs_dir.join("browser.toml")).unwrap();
        fs::copy("../configs/models.toml", configs_dir.join("models.toml")).unwrap();
        fs::copy("../configs/solver.toml", configs_dir.join("solver.toml")).unwrap();

        let data_dir = root.join("data");
        fs::create_dir_all(&data_dir).unwrap();
        let jobs_db = data_dir.join("jobs.db");

        let conn = Connection::open(&jobs_db).unwrap();
        conn.execute_batch(&fs::read_to_string("../sql/jobs.sql").unwrap())
            .unwrap();
        conn.execute(
            "INSERT INTO jobs(job_id, url, title, company, remote, status, score, recommendation) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                "job-1",
                "https://www.indeed.com/viewjob?jk=1",
                "Backend Engineer",
                "Acme",
                1,
                "pending",
                8,
                "YES"
            ],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO jobs(job_id, url, title, company, remote, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                "job-2",
                "https://www.indeed.com/viewjob?jk=2",
                "Data Engineer",
                "Globex",
                0,
                "applied"
            ],
        )
        .unwrap();

        let cli = Cli {
            config: configs_dir.join("jobhunt.toml"),
            browser_config: None,
            models_config: None,
            solver_config: None,
            data_dir: Some(data_dir.clone()),
            jobs_db: Some(jobs_db.clone()),
            token: None,
            format: OutputFormat::Json,
            command: Commands::Status,
        };

        let context = AppContext::new(&cli)?;
        Ok((temp, context))
    }

    #[test]
    fn status_report_collects_counts() {
        let (_temp, context) = prepare_test_context().unwrap();
        let status = context.gather_status().unwrap();
        assert_eq!(status.node.node_name, "jobhunt-primary");
        assert_eq!(status.job_counts.get("pending"), Some(&1));
        assert_eq!(status.job_counts.get("applied"), Some(&1));
        assert!(status.latest.is_some());
    }

    #[test]
    fn queue_show_filters_by_status() {
        let (_temp, context) = prepare_test_context().unwrap();
        let list = context
            .queue_show(&QueueShowArgs {
                status: Some("pending".to_string()),
                company: None,
                limit: 5,
            })
            .unwrap();
        assert_eq!(list.rows.len(), 1);
        assert_eq!(list.rows[0].job_id, "job-1");
        assert_eq!(list.rows[0].score, Some(8));
    }

    #[test]
    fn export_writes_the_status_bucket() {
        let (temp, context) = prepare_test_context().unwrap();
        let out = temp.path().join("exports/applied.json");
        let receipt = context
            .queue_export(&QueueExportArgs {
                status: "applied".to_string(),
                out: Some(out.clone()),
            })
            .unwrap();
        assert_eq!(receipt.jobs, 1);
        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(parsed[0]["job_id"], "job-2");
    }

    #[test]
    fn export_rejects_an_unknown_status() {
        let (_temp, context) = prepare_test_context().unwrap();
        let result = context.queue_export(&QueueExportArgs {
            status: "bogus".to_string(),
            out: None,
        });
        assert!(matches!(
            result,
            Err(AppError::Store(JobStoreError::InvalidStatus(_)))
        ));
    }

    #[test]
    fn health_check_reports_the_seeded_database_as_ok() {
        let (_temp, context) = prepare_test_context().unwrap();
        let report = context.health_check().unwrap();
        let db = report.iter().find(|entry| entry.name == "jobs.db").unwrap();
        assert!(matches!(db.status, CheckStatus::Ok));
    }

    #[test]
    fn apply_flags_parse() {
        let cli = Cli::try_parse_from([
            "jobhuntctl",
            "apply",
            "--max-jobs",
            "3",
            "--dry-run",
            "--headed",
        ])
        .unwrap();
        match cli.command {
            Commands::Apply(args) => {
                assert_eq!(args.max_jobs, Some(3));
                assert!(args.dry_run);
                assert!(args.headed);
            }
            other => panic!("parsed into the wrong command: {other:?}"),
        }
    }
}
