use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ScorerSection;
use crate::jobs::{JobPosting, Recommendation, ScoreResult};
use crate::llm::decision::{locate_object, strip_fences};
use crate::llm::{ChatRequest, ModelClient};
use crate::profile::ApplicantProfile;

const SCORER_SYSTEM_PROMPT: &str = "You screen job postings for one specific candidate. \
Judge how well the posting fits the candidate profile and reply with ONE JSON object and \
nothing else: {\"score\": <0-10>, \"recommendation\": \"YES\" or \"NO\", \"reason\": \"<one sentence>\"}. \
Score 0 means no fit at all, 10 means ideal. Recommend YES only when the candidate \
should actually spend an application on it.";

/// Longest description slice forwarded to the scorer. Anything beyond this
/// adds tokens without changing the verdict.
const DESCRIPTION_LIMIT: usize = 4000;

/// One fixed-shape model call per posting. Failures never propagate; a
/// posting the scorer cannot judge gets the neutral default and the gate
/// drops it.
pub struct JobScorer {
    client: Arc<dyn ModelClient>,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct RawScore {
    score: f64,
    recommendation: String,
    #[serde(default)]
    reason: String,
}

impl JobScorer {
    pub fn new(client: Arc<dyn ModelClient>, config: &ScorerSection) -> Self {
        Self {
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    pub async fn score(&self, posting: &JobPosting, profile: &ApplicantProfile) -> ScoreResult {
        let request = ChatRequest {
            model: self.model.clone(),
            system: Some(SCORER_SYSTEM_PROMPT.to_string()),
            text: build_scoring_prompt(posting, profile),
            image_png: None,
            max_tokens: Some(self.max_tokens),
        };
        let result = match self.client.complete(request).await {
            Ok(reply) => match parse_score(&reply) {
                Some(result) => result,
                None => {
                    warn!(title = %posting.title, "scorer reply unparseable, using the neutral default");
                    neutral_score()
                }
            },
            Err(err) => {
                warn!(title = %posting.title, error = %err, "scorer call failed, using the neutral default");
                neutral_score()
            }
        };
        debug!(
            title = %posting.title,
            company = %posting.company,
            score = result.score,
            recommendation = %result.recommendation,
            "posting scored"
        );
        result
    }
}

fn neutral_score() -> ScoreResult {
    ScoreResult {
        score: 5,
        recommendation: Recommendation::No,
        reason: "scoring error".into(),
    }
}

fn parse_score(raw: &str) -> Option<ScoreResult> {
    let json = locate_object(strip_fences(raw))?;
    let parsed: RawScore = serde_json::from_str(json).ok()?;
    let score = parsed.score.clamp(0.0, 10.0).round() as u8;
    Some(ScoreResult {
        score,
        recommendation: Recommendation::from_model_answer(&parsed.recommendation),
        reason: parsed.reason,
    })
}

fn build_scoring_prompt(posting: &JobPosting, profile: &ApplicantProfile) -> String {
    let mut prompt = format!(
        "POSTING:\nTitle: {}\nCompany: {}\nRemote: {}\n",
        posting.title,
        posting.company,
        if posting.remote { "yes" } else { "no" },
    );
    if let Some(location) = &posting.location {
        prompt.push_str(&format!("Location: {location}\n"));
    }
    if let Some(salary) = &posting.salary {
        prompt.push_str(&format!("Salary: {salary}\n"));
    }
    if let Some(description) = &posting.description {
        prompt.push_str("Description:\n");
        prompt.extend(description.chars().take(DESCRIPTION_LIMIT));
        prompt.push('\n');
    }
    prompt.push('\n');
    prompt.push_str(&profile.prompt_block());
    prompt.push_str("\nReply with the JSON verdict.");
    prompt
}
