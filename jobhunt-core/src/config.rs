use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobhuntConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
    pub applicant: ApplicantSection,
    pub hunt: HuntSection,
    pub apply: ApplySection,
}

impl JobhuntConfig {
    /// Anchors a relative path at `paths.base_dir`; absolute paths pass
    /// through untouched.
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let candidate = candidate.as_ref();
        if candidate.is_absolute() {
            return candidate.to_path_buf();
        }
        Path::new(&self.paths.base_dir).join(candidate)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub node_name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub data_dir: String,
    pub documents_dir: String,
    pub exports_dir: String,
    pub logs_dir: String,
    pub answers_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicantSection {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub location: String,
    pub linkedin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HuntSection {
    pub min_score: u8,
    pub remote_ratio: f64,
    pub max_jobs: usize,
    pub score_workers: usize,
    pub board_hosts: Vec<String>,
    pub reject_title_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplySection {
    pub max_jobs: usize,
    pub resume_suffix: String,
    pub challenge_budget: u32,
    pub action_pause_ms: [u32; 2],
    pub job_delay_ms: [u32; 2],
    pub error_text_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    pub chromium: ChromiumSection,
    pub flags: FlagsSection,
    pub user_agents: UserAgentSection,
    pub viewport: ViewportSection,
    pub human_simulation: HumanSimulationSection,
    pub navigation: NavigationSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: String,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagsSection {
    pub no_first_run: bool,
    pub disable_automation_controlled: bool,
    pub disable_blink_features: Vec<String>,
    pub mute_audio: bool,
    pub lang: Option<String>,
    pub accept_language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentSection {
    pub pool: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewportSection {
    pub resolutions: Vec<[u32; 2]>,
    pub jitter_pixels: u32,
    pub device_scale_factor: [f32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct HumanSimulationSection {
    pub click_hesitation_ms: [u32; 2],
    pub click_duration_ms: [u32; 2],
    pub typing_cadence_cpm: [u32; 2],
    pub typing_jitter_ms: [u32; 2],
    pub scroll_burst_px: [u32; 2],
    pub scroll_pause_ms: [u32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct NavigationSection {
    pub page_load_timeout_ms: u64,
    pub settle_delay_ms: [u32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub api: ApiSection,
    pub ladder: LadderSection,
    pub scorer: ScorerSection,
    pub backoff: BackoffSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    pub base_url: String,
    pub key_env: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LadderSection {
    pub max_steps: usize,
    pub stuck_threshold: u32,
    pub tiers: Vec<TierEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TierEntry {
    pub name: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScorerSection {
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackoffSection {
    pub rate_limit_waits_seconds: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolverConfig {
    pub service: ServiceSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSection {
    pub base_url: String,
    pub key_env: String,
    pub poll_attempts: u32,
    pub poll_interval_seconds: u64,
    pub create_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub jobhunt: JobhuntConfig,
    pub browser: BrowserConfig,
    pub models: ModelsConfig,
    pub solver: SolverConfig,
}

impl ConfigBundle {
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let jobhunt = load_jobhunt_config(dir.join("jobhunt.toml"))?;
        let browser = load_browser_config(dir.join("browser.toml"))?;
        let models = load_models_config(dir.join("models.toml"))?;
        let solver = load_solver_config(dir.join("solver.toml"))?;
        Ok(Self {
            jobhunt,
            browser,
            models,
            solver,
        })
    }
}

pub fn load_jobhunt_config<P: AsRef<Path>>(path: P) -> Result<JobhuntConfig> {
    let path = path.as_ref();
    let config: JobhuntConfig = load_toml(path)?;
    if !(0.0..=1.0).contains(&config.hunt.remote_ratio) {
        return Err(ConfigError::Invalid {
            message: "hunt.remote_ratio must be within [0, 1]".to_string(),
            path: path.to_path_buf(),
        });
    }
    if config.apply.max_jobs == 0 {
        return Err(ConfigError::Invalid {
            message: "apply.max_jobs must be at least 1".to_string(),
            path: path.to_path_buf(),
        });
    }
    require_ordered(path, "apply.action_pause_ms", config.apply.action_pause_ms)?;
    require_ordered(path, "apply.job_delay_ms", config.apply.job_delay_ms)?;
    Ok(config)
}

pub fn load_browser_config<P: AsRef<Path>>(path: P) -> Result<BrowserConfig> {
    let path = path.as_ref();
    let config: BrowserConfig = load_toml(path)?;
    require_ordered(
        path,
        "viewport.device_scale_factor",
        config.viewport.device_scale_factor,
    )?;
    let motion = &config.human_simulation;
    require_ordered(path, "human_simulation.click_hesitation_ms", motion.click_hesitation_ms)?;
    require_ordered(path, "human_simulation.click_duration_ms", motion.click_duration_ms)?;
    require_ordered(path, "human_simulation.typing_cadence_cpm", motion.typing_cadence_cpm)?;
    require_ordered(path, "human_simulation.typing_jitter_ms", motion.typing_jitter_ms)?;
    require_ordered(path, "human_simulation.scroll_burst_px", motion.scroll_burst_px)?;
    require_ordered(path, "human_simulation.scroll_pause_ms", motion.scroll_pause_ms)?;
    require_ordered(
        path,
        "navigation.settle_delay_ms",
        config.navigation.settle_delay_ms,
    )?;
    Ok(config)
}

pub fn load_models_config<P: AsRef<Path>>(path: P) -> Result<ModelsConfig> {
    let path = path.as_ref();
    let config: ModelsConfig = load_toml(path)?;
    if config.ladder.tiers.is_empty() {
        return Err(ConfigError::Invalid {
            message: "ladder.tiers must contain at least one tier".to_string(),
            path: path.to_path_buf(),
        });
    }
    if config.ladder.stuck_threshold == 0 {
        return Err(ConfigError::Invalid {
            message: "ladder.stuck_threshold must be at least 1".to_string(),
            path: path.to_path_buf(),
        });
    }
    Ok(config)
}

pub fn load_solver_config<P: AsRef<Path>>(path: P) -> Result<SolverConfig> {
    load_toml(path)
}

/// Rejects an inverted `[low, high]` pair. Every such pair ends up in a
/// `gen_range` call somewhere, and an inverted range panics there instead
/// of failing cleanly at load time.
fn require_ordered<T>(path: &Path, key: &str, pair: [T; 2]) -> Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if pair[0] > pair[1] {
        return Err(ConfigError::Invalid {
            message: format!("{key} range [{}, {}] is inverted", pair[0], pair[1]),
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_configs() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        let bundle = ConfigBundle::from_directory(dir).expect("fixture configs must parse");
        assert_eq!(bundle.jobhunt.system.node_name, "jobhunt-primary");
        assert_eq!(bundle.jobhunt.hunt.min_score, 6);
        assert!(bundle.browser.user_agents.pool.len() >= 2);
        assert_eq!(bundle.models.ladder.stuck_threshold, 2);
        assert_eq!(bundle.models.ladder.tiers.len(), 3);
        assert_eq!(bundle.solver.service.poll_attempts, 20);
    }

    #[test]
    fn ladder_requires_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.toml");
        std::fs::write(
            &path,
            "[api]\nbase_url = \"https://example.test\"\nkey_env = \"KEY\"\ntimeout_seconds = 10\n\
             [ladder]\nmax_steps = 5\nstuck_threshold = 2\ntiers = []\n\
             [scorer]\nmodel = \"m\"\nmax_tokens = 100\n\
             [backoff]\nrate_limit_waits_seconds = [1]\n",
        )
        .unwrap();
        let err = load_models_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn inverted_pause_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobhunt.toml");
        std::fs::write(
            &path,
            r#"
[system]
node_name = "test-node"
environment = "test"

[paths]
base_dir = "/tmp/jobhunt"
data_dir = "data"
documents_dir = "documents"
exports_dir = "exports"
logs_dir = "logs"
answers_file = "configs/answers.yaml"

[applicant]
name = "Test Applicant"
email = "applicant@example.test"
phone = "+1 555 0100"
location = "Remote"

[hunt]
min_score = 6
remote_ratio = 0.75
max_jobs = 10
score_workers = 2
board_hosts = ["www.indeed.com"]
reject_title_patterns = []

[apply]
max_jobs = 5
resume_suffix = "_Resume.pdf"
challenge_budget = 3
action_pause_ms = [4000, 2000]
job_delay_ms = [10000, 20000]
error_text_limit = 500
"#,
        )
        .unwrap();
        let err = load_jobhunt_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("action_pause_ms"));
    }

    #[test]
    fn inverted_cadence_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("browser.toml");
        std::fs::write(
            &path,
            r#"
[chromium]
executable_path = "/usr/bin/chromium"
headless = true
sandbox = false
disable_gpu = true

[flags]
no_first_run = true
disable_automation_controlled = true
disable_blink_features = ["AutomationControlled"]
mute_audio = true

[user_agents]
pool = ["Mozilla/5.0 test agent"]

[viewport]
resolutions = [[1440, 900]]
jitter_pixels = 10
device_scale_factor = [1.0, 2.0]

[human_simulation]
click_hesitation_ms = [120, 480]
click_duration_ms = [40, 120]
typing_cadence_cpm = [900, 300]
typing_jitter_ms = [10, 60]
scroll_burst_px = [200, 700]
scroll_pause_ms = [300, 900]

[navigation]
page_load_timeout_ms = 30000
settle_delay_ms = [1000, 3000]
"#,
        )
        .unwrap();
        let err = load_browser_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("typing_cadence_cpm"));
    }
}
