use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{BrowserResult, PageSession};
use crate::config::SolverConfig;

pub type SolverResult<T> = Result<T, SolverError>;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("solver key env var {0} is not set")]
    MissingKey(String),
    #[error("solver api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("no sitekey found on page")]
    NoSitekey,
    #[error("solver task {task_id} failed: {reason}")]
    TaskFailed { task_id: String, reason: String },
    #[error("solver gave no token after {attempts} polls")]
    Exhausted { attempts: u32 },
}

/// Challenge families the pipeline can hand to the solving service. Each
/// maps to a solver task type and a hidden response input on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Turnstile,
    Hcaptcha,
    RecaptchaV2,
}

impl ChallengeKind {
    /// Identifies the challenge family embedded in `html`, if any.
    pub fn detect(html: &str) -> Option<ChallengeKind> {
        let lower = html.to_ascii_lowercase();
        if lower.contains("challenges.cloudflare.com") || lower.contains("cf-turnstile") {
            return Some(ChallengeKind::Turnstile);
        }
        if lower.contains("hcaptcha.com") || lower.contains("h-captcha") {
            return Some(ChallengeKind::Hcaptcha);
        }
        if lower.contains("google.com/recaptcha") || lower.contains("g-recaptcha") {
            return Some(ChallengeKind::RecaptchaV2);
        }
        None
    }

    fn task_type(&self) -> &'static str {
        match self {
            ChallengeKind::Turnstile => "AntiTurnstileTaskProxyLess",
            ChallengeKind::Hcaptcha => "HCaptchaTaskProxyLess",
            ChallengeKind::RecaptchaV2 => "ReCaptchaV2TaskProxyLess",
        }
    }

    fn solution_field(&self) -> &'static str {
        match self {
            ChallengeKind::Turnstile => "token",
            ChallengeKind::Hcaptcha | ChallengeKind::RecaptchaV2 => "gRecaptchaResponse",
        }
    }

    fn response_input(&self) -> &'static str {
        match self {
            ChallengeKind::Turnstile => "cf-turnstile-response",
            ChallengeKind::Hcaptcha => "h-captcha-response",
            ChallengeKind::RecaptchaV2 => "g-recaptcha-response",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChallengeKind::Turnstile => "turnstile",
            ChallengeKind::Hcaptcha => "hcaptcha",
            ChallengeKind::RecaptchaV2 => "recaptcha_v2",
        }
    }
}

/// Pulls the widget sitekey out of the page markup. Widgets expose it either
/// as a `data-sitekey` attribute or as the `k=` query param of the challenge
/// iframe.
pub fn extract_sitekey(html: &str, kind: ChallengeKind) -> Option<String> {
    let attr = Regex::new(r#"data-sitekey=["']([^"']+)["']"#).ok()?;
    if let Some(captures) = attr.captures(html) {
        return Some(captures[1].to_string());
    }
    let iframe_host = match kind {
        ChallengeKind::Turnstile => "challenges.cloudflare.com",
        ChallengeKind::Hcaptcha => "hcaptcha.com",
        ChallengeKind::RecaptchaV2 => "google.com/recaptcha",
    };
    let src = Regex::new(r#"src=["']([^"']+)["']"#).ok()?;
    for captures in src.captures_iter(html) {
        let url = &captures[1];
        if !url.contains(iframe_host) {
            continue;
        }
        let key = Regex::new(r"[?&](?:k|sitekey)=([0-9A-Za-z_-]+)").ok()?;
        if let Some(key_captures) = key.captures(url) {
            return Some(key_captures[1].to_string());
        }
    }
    None
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResultResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    solution: Option<serde_json::Value>,
}

/// Seam between the agent loop and the solving service, so tests can script
/// solver behavior.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    async fn solve(
        &self,
        kind: ChallengeKind,
        page_url: &str,
        sitekey: &str,
    ) -> SolverResult<String>;
}

/// Client for a CapSolver-compatible solving service. Solving is two calls:
/// `createTask` registers the challenge, `getTaskResult` is polled until the
/// worker pool produces a token or the poll budget runs out.
pub struct SolverClient {
    client: reqwest::Client,
    base_url: String,
    client_key: String,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl SolverClient {
    pub fn from_config(config: &SolverConfig) -> SolverResult<Self> {
        let client_key = std::env::var(&config.service.key_env)
            .map_err(|_| SolverError::MissingKey(config.service.key_env.clone()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.service.create_timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: config.service.base_url.trim_end_matches('/').to_string(),
            client_key,
            poll_attempts: config.service.poll_attempts,
            poll_interval: Duration::from_secs(config.service.poll_interval_seconds),
        })
    }

    async fn create_task(
        &self,
        kind: ChallengeKind,
        page_url: &str,
        sitekey: &str,
    ) -> SolverResult<String> {
        let payload = serde_json::json!({
            "clientKey": self.client_key,
            "task": {
                "type": kind.task_type(),
                "websiteURL": page_url,
                "websiteKey": sitekey,
            }
        });
        let response: CreateTaskResponse = self
            .client
            .post(format!("{}/createTask", self.base_url))
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;
        if response.error_id != 0 {
            return Err(SolverError::Api {
                code: response.error_id,
                description: response.error_description.unwrap_or_default(),
            });
        }
        response.task_id.ok_or(SolverError::Api {
            code: 0,
            description: "createTask returned no taskId".into(),
        })
    }

    async fn poll_solution(&self, kind: ChallengeKind, task_id: &str) -> SolverResult<String> {
        let payload = serde_json::json!({
            "clientKey": self.client_key,
            "taskId": task_id,
        });
        for attempt in 1..=self.poll_attempts {
            sleep(self.poll_interval).await;
            let response: TaskResultResponse = self
                .client
                .post(format!("{}/getTaskResult", self.base_url))
                .json(&payload)
                .send()
                .await?
                .json()
                .await?;
            if response.error_id != 0 {
                return Err(SolverError::Api {
                    code: response.error_id,
                    description: response.error_description.unwrap_or_default(),
                });
            }
            match response.status.as_deref() {
                Some("ready") => {
                    let token = response
                        .solution
                        .as_ref()
                        .and_then(|solution| solution.get(kind.solution_field()))
                        .and_then(|token| token.as_str())
                        .map(|token| token.to_string());
                    if let Some(token) = token {
                        info!(task_id = %task_id, attempt, "challenge token ready");
                        return Ok(token);
                    }
                    return Err(SolverError::TaskFailed {
                        task_id: task_id.to_string(),
                        reason: "ready result carried no token".into(),
                    });
                }
                Some("failed") => {
                    return Err(SolverError::TaskFailed {
                        task_id: task_id.to_string(),
                        reason: response.error_description.unwrap_or_default(),
                    });
                }
                other => {
                    debug!(task_id = %task_id, attempt, status = ?other, "challenge still processing");
                }
            }
        }
        warn!(task_id = %task_id, attempts = self.poll_attempts, "challenge poll budget spent");
        Err(SolverError::Exhausted {
            attempts: self.poll_attempts,
        })
    }
}

#[async_trait]
impl ChallengeSolver for SolverClient {
    /// Solves one challenge end to end and returns the response token.
    async fn solve(
        &self,
        kind: ChallengeKind,
        page_url: &str,
        sitekey: &str,
    ) -> SolverResult<String> {
        let task_id = self.create_task(kind, page_url, sitekey).await?;
        info!(kind = kind.label(), task_id = %task_id, "challenge task created");
        self.poll_solution(kind, &task_id).await
    }
}

/// Plants the solved token into the page and fires the widget callback, the
/// same motions the widget performs after a human passes the challenge.
pub async fn inject_token(
    session: &PageSession,
    kind: ChallengeKind,
    token: &str,
) -> BrowserResult<bool> {
    let script = build_injection_script(kind, token);
    session.evaluate::<bool>(&script).await
}

fn build_injection_script(kind: ChallengeKind, token: &str) -> String {
    let token_js = serde_json::Value::String(token.to_string()).to_string();
    let input_name = kind.response_input();
    format!(
        r#"(() => {{
    const token = {token_js};
    let inputs = document.querySelectorAll('[name="{input_name}"]');
    if (inputs.length === 0) {{
        const input = document.createElement('input');
        input.type = 'hidden';
        input.name = '{input_name}';
        (document.forms[0] || document.body).appendChild(input);
        inputs = document.querySelectorAll('[name="{input_name}"]');
    }}
    inputs.forEach((input) => {{
        input.value = token;
        input.dispatchEvent(new Event('change', {{ bubbles: true }}));
    }});
    const widget = document.querySelector('[data-callback]');
    if (widget) {{
        const callback = window[widget.getAttribute('data-callback')];
        if (typeof callback === 'function') {{
            try {{ callback(token); }} catch (_) {{}}
        }}
    }}
    return true;
}})()"#
    )
}
