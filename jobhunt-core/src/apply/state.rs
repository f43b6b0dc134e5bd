use url::Url;

use crate::captcha::ChallengeKind;

/// Terminal-state classification of a live application page. Detection runs
/// on page text and URL before every model consult, so the loop never spends
/// a model call on a page that already decided the job's fate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageState {
    InProgress,
    Success { confidence: u32, evidence: String },
    AlreadyApplied,
    LoginRequired,
    Challenge(ChallengeKind),
    Unavailable { evidence: String },
    ExternalRedirect { host: String },
}

/// URL path fragments that mean the board confirmed the submission.
const SUCCESS_URL_PATTERNS: [&str; 7] = [
    "/post-apply",
    "/confirmation",
    "/thank-you",
    "/thankyou",
    "/success",
    "/applied",
    "/complete",
];

/// Confirmation phrases with their confidence weights. The strongest match
/// wins; anything at or above [`SUCCESS_THRESHOLD`] counts as success, so a
/// bare "thank you" in a footer never does.
const SUCCESS_PHRASES: [(&str, u32); 13] = [
    ("application has been submitted", 95),
    ("application submitted", 95),
    ("successfully applied", 90),
    ("application received", 90),
    ("we have received your application", 85),
    ("thank you for applying", 85),
    ("thank you for your application", 85),
    ("your application was sent", 80),
    ("application sent", 75),
    ("submitted successfully", 70),
    ("application complete", 65),
    ("submitted", 55),
    ("thank you", 45),
];

const SUCCESS_THRESHOLD: u32 = 50;

const ALREADY_APPLIED_PHRASES: [&str; 4] = [
    "already applied",
    "you have already applied",
    "you've already applied",
    "application already received",
];

const UNAVAILABLE_PHRASES: [&str; 6] = [
    "no longer accepting applications",
    "this job has expired",
    "position has been filled",
    "job is no longer available",
    "posting has expired",
    "this job is closed",
];

const CHALLENGE_INTERSTITIAL_PHRASES: [&str; 4] = [
    "just a moment",
    "checking your browser",
    "verify you are human",
    "needs to review the security of your connection",
];

/// ATS hosts an application can legitimately continue on, just not inside
/// this pipeline. Landing here routes the job to the external queue for a
/// human to finish.
const EXTERNAL_ATS_DOMAINS: [&str; 13] = [
    "greenhouse.io",
    "lever.co",
    "myworkdayjobs.com",
    "workday.com",
    "icims.com",
    "taleo.net",
    "brassring.com",
    "ultipro.com",
    "successfactors.com",
    "oraclecloud.com",
    "smartrecruiters.com",
    "jobvite.com",
    "ashbyhq.com",
];

/// Classifies the page. `board_hosts` are the hosts the apply flow is
/// allowed to operate on; leaving them for a known ATS is an external
/// redirect, not a failure.
pub fn classify(url: &str, html: &str, board_hosts: &[String]) -> PageState {
    if let Some(host) = external_host(url, board_hosts) {
        return PageState::ExternalRedirect { host };
    }

    let lower = html.to_ascii_lowercase();

    if ALREADY_APPLIED_PHRASES
        .iter()
        .any(|phrase| lower.contains(phrase))
    {
        return PageState::AlreadyApplied;
    }

    if let Some((confidence, evidence)) = success_confidence(url, &lower) {
        if confidence >= SUCCESS_THRESHOLD {
            return PageState::Success {
                confidence,
                evidence,
            };
        }
    }

    // Challenge detection sits below the confirmation checks so a footer
    // captcha badge on a confirmation page cannot mask a completed apply.
    if CHALLENGE_INTERSTITIAL_PHRASES
        .iter()
        .any(|phrase| lower.contains(phrase))
    {
        return PageState::Challenge(
            ChallengeKind::detect(&lower).unwrap_or(ChallengeKind::Turnstile),
        );
    }
    if let Some(kind) = ChallengeKind::detect(&lower) {
        return PageState::Challenge(kind);
    }

    if let Some(phrase) = UNAVAILABLE_PHRASES
        .iter()
        .find(|phrase| lower.contains(*phrase))
    {
        return PageState::Unavailable {
            evidence: (*phrase).to_string(),
        };
    }

    if looks_like_login_wall(&lower) {
        return PageState::LoginRequired;
    }

    PageState::InProgress
}

/// Highest-confidence success signal, if any.
fn success_confidence(url: &str, lower: &str) -> Option<(u32, String)> {
    let url_lower = url.to_ascii_lowercase();
    if let Some(pattern) = SUCCESS_URL_PATTERNS
        .iter()
        .find(|pattern| url_lower.contains(*pattern))
    {
        return Some((100, format!("url contains {pattern}")));
    }
    SUCCESS_PHRASES
        .iter()
        .find(|(phrase, _)| lower.contains(phrase))
        .map(|(phrase, confidence)| (*confidence, (*phrase).to_string()))
}

fn looks_like_login_wall(lower: &str) -> bool {
    if lower.contains("session has expired") || lower.contains("sign in to continue") {
        return true;
    }
    let has_credentials = lower.contains("type=\"password\"") || lower.contains("type='password'");
    let has_prompt =
        lower.contains("sign in") || lower.contains("log in") || lower.contains("login");
    has_credentials && has_prompt
}

fn external_host(url: &str, board_hosts: &[String]) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    if board_hosts
        .iter()
        .any(|board| host == *board || host.ends_with(&format!(".{board}")))
    {
        return None;
    }
    EXTERNAL_ATS_DOMAINS
        .iter()
        .any(|ats| host.contains(ats))
        .then_some(host)
}
