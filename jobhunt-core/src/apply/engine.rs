use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::BrowserResult;
use crate::captcha::{extract_sitekey, ChallengeKind, ChallengeSolver, SolverError};
use crate::config::{ApplySection, LadderSection};
use crate::jobs::JobRecord;
use crate::llm::{
    parse_action, AgentAction, ChatRequest, LadderVerdict, ModelClient, ModelLadder,
    RateLimitBackoff,
};
use crate::profile::ApplicantProfile;

use super::state::{classify, PageState};
use super::stuck::{StuckAssessment, StuckTracker};
use super::AttemptOutcome;

const AGENT_SYSTEM_PROMPT: &str = "You are operating a web browser to submit a job application. \
Look at the screenshot, decide the single next action, and reply with ONE JSON object and nothing else. \
Allowed shapes: \
{\"action\":\"click\",\"selector\":\"<css>\"} \
{\"action\":\"type\",\"selector\":\"<css>\",\"text\":\"<value>\"} \
{\"action\":\"upload\",\"selector\":\"<css selector of the file input>\"} \
{\"action\":\"done\",\"reason\":\"<why the application is finished>\"} \
{\"action\":\"stuck\",\"reason\":\"<what is blocking you>\"} \
Use selectors that exist on the page. Fill every field from the applicant \
profile below and never invent details that are not in it.";

/// Page surface the engine drives. The live implementation wraps a CDP tab;
/// tests script it.
#[async_trait]
pub trait AgentPage: Send {
    async fn current_url(&mut self) -> BrowserResult<String>;
    async fn content(&mut self) -> BrowserResult<String>;
    async fn screenshot_png(&mut self) -> BrowserResult<Vec<u8>>;
    async fn reload(&mut self) -> BrowserResult<()>;
    async fn perform(&mut self, action: &AgentAction, resume: &Path) -> BrowserResult<()>;
    async fn inject_challenge_token(
        &mut self,
        kind: ChallengeKind,
        token: &str,
    ) -> BrowserResult<bool>;
    /// Randomized beat between steps. Scripted pages can make this a no-op.
    async fn pause(&mut self, bounds: [u32; 2]);
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_steps: usize,
    pub action_pause_ms: [u32; 2],
    pub challenge_budget: u32,
    pub history_window: usize,
}

impl EngineConfig {
    pub fn from_sections(ladder: &LadderSection, apply: &ApplySection) -> Self {
        Self {
            max_steps: ladder.max_steps,
            action_pause_ms: apply.action_pause_ms,
            challenge_budget: apply.challenge_budget,
            history_window: 3,
        }
    }
}

enum ChallengeFlow {
    Continue,
    StuckSignal(String),
    Blocked,
}

/// The tiered-escalation application loop.
///
/// One engine drives one attempt. Per step it classifies the page first, and
/// only consults the current tier's model when no terminal state decided the
/// job already. Stuck signals from the model, from parse failures, from
/// failed actions and from the behavioral stuck score all feed one
/// consecutive counter; the ladder escalates on that counter and the attempt
/// fails when the top tier exhausts it.
pub struct ApplicationEngine<'a> {
    client: &'a dyn ModelClient,
    solver: Option<&'a dyn ChallengeSolver>,
    ladder: &'a mut ModelLadder,
    backoff: &'a mut RateLimitBackoff,
    profile: &'a ApplicantProfile,
    board_hosts: &'a [String],
    config: EngineConfig,
}

impl<'a> ApplicationEngine<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: &'a dyn ModelClient,
        solver: Option<&'a dyn ChallengeSolver>,
        ladder: &'a mut ModelLadder,
        backoff: &'a mut RateLimitBackoff,
        profile: &'a ApplicantProfile,
        board_hosts: &'a [String],
        config: EngineConfig,
    ) -> Self {
        Self {
            client,
            solver,
            ladder,
            backoff,
            profile,
            board_hosts,
            config,
        }
    }

    /// Runs the attempt to a terminal outcome. Never panics, never exceeds
    /// `max_steps`; exhausting the bound reports exactly `max steps reached`.
    pub async fn run(
        &mut self,
        page: &mut dyn AgentPage,
        job: &JobRecord,
        resume_path: &Path,
    ) -> AttemptOutcome {
        let mut history: VecDeque<String> = VecDeque::new();
        let mut tracker = StuckTracker::new();
        let mut last_hash: Option<[u8; 32]> = None;
        let mut challenges_attempted: u32 = 0;

        for step in 1..=self.config.max_steps {
            let url = match page.current_url().await {
                Ok(url) => url,
                Err(err) => {
                    if let Some(outcome) =
                        self.stuck_signal(&format!("page url unavailable: {err}"), &mut history)
                    {
                        return outcome;
                    }
                    page.pause(self.config.action_pause_ms).await;
                    continue;
                }
            };
            let html = match page.content().await {
                Ok(html) => html,
                Err(err) => {
                    if let Some(outcome) =
                        self.stuck_signal(&format!("page capture failed: {err}"), &mut history)
                    {
                        return outcome;
                    }
                    page.pause(self.config.action_pause_ms).await;
                    continue;
                }
            };

            match classify(&url, &html, self.board_hosts) {
                PageState::Success {
                    confidence,
                    evidence,
                } => {
                    info!(job_id = %job.job_id, step, confidence, evidence = %evidence, "application confirmed");
                    return AttemptOutcome::Applied { evidence };
                }
                PageState::AlreadyApplied => {
                    info!(job_id = %job.job_id, step, "already applied, nothing to do");
                    return AttemptOutcome::AlreadyApplied;
                }
                PageState::LoginRequired => {
                    info!(job_id = %job.job_id, step, "login wall, handing off for manual review");
                    return AttemptOutcome::ManualReview {
                        reason: "login required".into(),
                    };
                }
                PageState::Unavailable { evidence } => {
                    info!(job_id = %job.job_id, step, evidence = %evidence, "posting unavailable");
                    return AttemptOutcome::Failed {
                        reason: "job unavailable".into(),
                    };
                }
                PageState::ExternalRedirect { host } => {
                    info!(job_id = %job.job_id, step, host = %host, "redirected off the board");
                    return AttemptOutcome::External { destination: host };
                }
                PageState::Challenge(kind) => {
                    match self
                        .handle_challenge(page, kind, &url, &html, &mut challenges_attempted)
                        .await
                    {
                        ChallengeFlow::Continue => {
                            page.pause(self.config.action_pause_ms).await;
                            continue;
                        }
                        ChallengeFlow::StuckSignal(reason) => {
                            if let Some(outcome) = self.stuck_signal(&reason, &mut history) {
                                return outcome;
                            }
                            page.pause(self.config.action_pause_ms).await;
                            continue;
                        }
                        ChallengeFlow::Blocked => {
                            return AttemptOutcome::Failed {
                                reason: "blocked".into(),
                            };
                        }
                    }
                }
                PageState::InProgress => {}
            }

            let screenshot = match page.screenshot_png().await {
                Ok(png) => {
                    let hash: [u8; 32] = Sha256::digest(&png).into();
                    if last_hash == Some(hash) {
                        debug!(
                            step,
                            hash = %hex::encode(&hash[..8]),
                            "screenshot unchanged since previous step"
                        );
                    }
                    last_hash = Some(hash);
                    png
                }
                Err(err) => {
                    if let Some(outcome) =
                        self.stuck_signal(&format!("screenshot failed: {err}"), &mut history)
                    {
                        return outcome;
                    }
                    page.pause(self.config.action_pause_ms).await;
                    continue;
                }
            };

            let request = ChatRequest {
                model: self.ladder.current_model().to_string(),
                system: Some(AGENT_SYSTEM_PROMPT.to_string()),
                text: self.build_user_prompt(job, &url, step, &history),
                image_png: Some(screenshot),
                max_tokens: None,
            };
            let reply = loop {
                match self.client.complete(request.clone()).await {
                    Ok(reply) => {
                        self.backoff.reset();
                        break Ok(reply);
                    }
                    Err(err) if err.is_rate_limit() => match self.backoff.next_wait() {
                        Some(wait) => {
                            warn!(
                                wait_seconds = wait.as_secs(),
                                "model rate limited, backing off"
                            );
                            sleep(wait).await;
                        }
                        None => {
                            warn!("rate limit backoff exhausted, aborting batch");
                            return AttemptOutcome::RateLimited;
                        }
                    },
                    Err(err) => break Err(err),
                }
            };
            let reply = match reply {
                Ok(reply) => reply,
                Err(err) => {
                    if let Some(outcome) =
                        self.stuck_signal(&format!("model error: {err}"), &mut history)
                    {
                        return outcome;
                    }
                    page.pause(self.config.action_pause_ms).await;
                    continue;
                }
            };

            let action = match parse_action(&reply) {
                Ok(action) => action,
                Err(err) => {
                    debug!(error = %err, "discarded unparseable model reply");
                    if let Some(outcome) =
                        self.stuck_signal("model output unparseable", &mut history)
                    {
                        return outcome;
                    }
                    page.pause(self.config.action_pause_ms).await;
                    continue;
                }
            };
            debug!(step, action = %action.summary(), tier = self.ladder.current_tier(), "model decided");

            match &action {
                AgentAction::Stuck { reason } => {
                    let reason = if reason.is_empty() {
                        "model reported stuck"
                    } else {
                        reason.as_str()
                    };
                    if let Some(outcome) = self.stuck_signal(reason, &mut history) {
                        return outcome;
                    }
                }
                AgentAction::Done { .. } => {
                    page.pause(self.config.action_pause_ms).await;
                    let url_after = page.current_url().await.unwrap_or_else(|_| url.clone());
                    let html_after = page.content().await.unwrap_or_default();
                    match classify(&url_after, &html_after, self.board_hosts) {
                        PageState::Success { evidence, .. } => {
                            return AttemptOutcome::Applied { evidence };
                        }
                        PageState::AlreadyApplied => return AttemptOutcome::AlreadyApplied,
                        _ => {
                            if let Some(outcome) = self
                                .stuck_signal("done reported without confirmation", &mut history)
                            {
                                return outcome;
                            }
                        }
                    }
                }
                _ => match page.perform(&action, resume_path).await {
                    Ok(()) => {
                        let url_after = page.current_url().await.unwrap_or_else(|_| url.clone());
                        tracker.record(&action, &url_after);
                        push_history(&mut history, action.summary(), self.config.history_window);
                        match tracker.assess() {
                            StuckAssessment::Fine => self.ladder.record_progress(),
                            StuckAssessment::Escalate => {
                                if let Some(outcome) = self
                                    .stuck_signal("looping without page progress", &mut history)
                                {
                                    return outcome;
                                }
                            }
                            StuckAssessment::Abort => {
                                warn!(score = tracker.score(), "stuck score recommends aborting");
                                if let Some(outcome) =
                                    self.stuck_signal("hard action loop detected", &mut history)
                                {
                                    return outcome;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        push_history(
                            &mut history,
                            format!("{} failed", action.summary()),
                            self.config.history_window,
                        );
                        if let Some(outcome) =
                            self.stuck_signal(&format!("action failed: {err}"), &mut history)
                        {
                            return outcome;
                        }
                    }
                },
            }

            page.pause(self.config.action_pause_ms).await;
        }

        info!(job_id = %job.job_id, max_steps = self.config.max_steps, "step budget exhausted");
        AttemptOutcome::Failed {
            reason: "max steps reached".into(),
        }
    }

    /// Records one stuck signal. Returns the terminal outcome when the top
    /// tier has exhausted its chances, `None` when the loop should continue.
    fn stuck_signal(
        &mut self,
        reason: &str,
        history: &mut VecDeque<String>,
    ) -> Option<AttemptOutcome> {
        push_history(
            history,
            format!("stuck: {reason}"),
            self.config.history_window,
        );
        match self.ladder.record_stuck() {
            LadderVerdict::Hold => {
                debug!(
                    reason = %reason,
                    consecutive = self.ladder.consecutive_stuck(),
                    "stuck signal recorded"
                );
                None
            }
            LadderVerdict::Escalated { tier, model } => {
                info!(reason = %reason, tier = %tier, model = %model, "stuck threshold hit, escalated");
                None
            }
            LadderVerdict::Exhausted => {
                warn!(reason = %reason, "top tier exhausted, failing attempt");
                Some(AttemptOutcome::Failed {
                    reason: reason.to_string(),
                })
            }
        }
    }

    async fn handle_challenge(
        &mut self,
        page: &mut dyn AgentPage,
        kind: ChallengeKind,
        url: &str,
        html: &str,
        attempted: &mut u32,
    ) -> ChallengeFlow {
        if *attempted >= self.config.challenge_budget {
            warn!(
                kind = kind.label(),
                attempts = *attempted,
                "challenge budget spent, attempt is blocked"
            );
            return ChallengeFlow::Blocked;
        }
        let Some(solver) = self.solver else {
            warn!(kind = kind.label(), "challenge present but no solver configured");
            return ChallengeFlow::Blocked;
        };
        let Some(sitekey) = extract_sitekey(html, kind) else {
            warn!(kind = kind.label(), "challenge without a discoverable sitekey");
            return ChallengeFlow::Blocked;
        };
        *attempted += 1;
        info!(kind = kind.label(), attempt = *attempted, "solving page challenge");
        match solver.solve(kind, url, &sitekey).await {
            Ok(token) => match page.inject_challenge_token(kind, &token).await {
                Ok(_) => {
                    if let Err(err) = page.reload().await {
                        return ChallengeFlow::StuckSignal(format!(
                            "reload after challenge failed: {err}"
                        ));
                    }
                    ChallengeFlow::Continue
                }
                Err(err) => ChallengeFlow::StuckSignal(format!("token injection failed: {err}")),
            },
            Err(SolverError::Exhausted { attempts }) => {
                warn!(attempts, "solver gave no token, attempt is blocked");
                ChallengeFlow::Blocked
            }
            Err(err) => ChallengeFlow::StuckSignal(format!("solver error: {err}")),
        }
    }

    fn build_user_prompt(
        &self,
        job: &JobRecord,
        url: &str,
        step: usize,
        history: &VecDeque<String>,
    ) -> String {
        let mut prompt = format!(
            "You are applying to: {} at {}\nCurrent URL: {}\nStep {} of {}\n\n{}",
            job.title,
            job.company,
            url,
            step,
            self.config.max_steps,
            self.profile.prompt_block(),
        );
        if !history.is_empty() {
            prompt.push_str("\nRecent actions:\n");
            for entry in history {
                prompt.push_str("- ");
                prompt.push_str(entry);
                prompt.push('\n');
            }
        }
        prompt.push_str("\nReply with the single next action as one JSON object.");
        prompt
    }
}

fn push_history(history: &mut VecDeque<String>, entry: String, window: usize) {
    if history.len() == window {
        history.pop_front();
    }
    history.push_back(entry);
}
