use regex::Regex;
use url::Url;

use crate::config::HuntSection;
use crate::jobs::JobPosting;

use super::HuntResult;

/// ATS hosts that demand an account before the first form field. Postings
/// that link straight into one of these burn a browser session for nothing,
/// so the hunt refuses them up front.
const ACCOUNT_WALLED_ATS: [&str; 7] = [
    "myworkdayjobs.com",
    "icims.com",
    "taleo.net",
    "brassring.com",
    "ultipro.com",
    "successfactors.com",
    "oraclecloud.com",
];

/// Feed values that stand in for a missing field.
const PLACEHOLDER_VALUES: [&str; 2] = ["nan", "none"];

/// Cheap checks that run before any posting costs a model call.
pub struct Prefilter {
    reject_titles: Vec<Regex>,
    board_hosts: Vec<String>,
}

impl Prefilter {
    pub fn from_config(hunt: &HuntSection) -> HuntResult<Self> {
        let reject_titles = hunt
            .reject_title_patterns
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            reject_titles,
            board_hosts: hunt.board_hosts.clone(),
        })
    }

    /// `None` keeps the posting; `Some(reason)` rejects it.
    pub fn rejection(&self, posting: &JobPosting) -> Option<String> {
        if is_placeholder(&posting.title) {
            return Some("placeholder title".into());
        }
        if is_placeholder(&posting.company) {
            return Some("placeholder company".into());
        }
        for pattern in &self.reject_titles {
            if pattern.is_match(&posting.title) {
                return Some(format!("title matches {}", pattern.as_str()));
            }
        }
        let Ok(parsed) = Url::parse(&posting.url) else {
            return Some("unparseable url".into());
        };
        let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
            return Some("url without a host".into());
        };
        if !self
            .board_hosts
            .iter()
            .any(|board| host == *board || host.ends_with(&format!(".{board}")))
        {
            return Some(format!("off-board host {host}"));
        }
        if let Some(ats) = ACCOUNT_WALLED_ATS.iter().find(|ats| host.contains(*ats)) {
            return Some(format!("account-walled ats {ats}"));
        }
        None
    }
}

fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || PLACEHOLDER_VALUES
            .iter()
            .any(|placeholder| trimmed.eq_ignore_ascii_case(placeholder))
}
