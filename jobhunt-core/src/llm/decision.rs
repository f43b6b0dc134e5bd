use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("model output contained no JSON object: {0}")]
    NoJson(String),
    #[error("model output was not a valid action: {0}")]
    Invalid(String),
}

/// The closed set of moves the agent may make on a page. Anything the model
/// emits outside this set is rejected at parse time and counted as stuck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    Upload {
        selector: String,
    },
    Done {
        #[serde(default)]
        reason: Option<String>,
    },
    Stuck {
        #[serde(default)]
        reason: String,
    },
}

impl AgentAction {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentAction::Click { .. } => "click",
            AgentAction::Type { .. } => "type",
            AgentAction::Upload { .. } => "upload",
            AgentAction::Done { .. } => "done",
            AgentAction::Stuck { .. } => "stuck",
        }
    }

    /// Compact form for the action history fed back into the prompt.
    pub fn summary(&self) -> String {
        match self {
            AgentAction::Click { selector } => format!("click {selector}"),
            AgentAction::Type { selector, text } => {
                format!("type '{}' into {selector}", clip_text(text, 40))
            }
            AgentAction::Upload { selector } => format!("upload resume via {selector}"),
            AgentAction::Done { reason } => match reason {
                Some(reason) => format!("done ({reason})"),
                None => "done".to_string(),
            },
            AgentAction::Stuck { reason } => format!("stuck ({reason})"),
        }
    }
}

/// Extracts the agent action from a raw model completion.
///
/// Models wrap the JSON in markdown fences or chatter around it; both are
/// tolerated. A missing object or an action outside the closed set is an
/// error the caller records as a stuck signal.
pub fn parse_action(raw: &str) -> Result<AgentAction, DecisionError> {
    let stripped = strip_fences(raw);
    let json = locate_object(stripped)
        .ok_or_else(|| DecisionError::NoJson(clip_text(raw, 120)))?;
    serde_json::from_str(json).map_err(|err| DecisionError::Invalid(err.to_string()))
}

/// Drops a leading ```/```json fence line and a trailing ``` line.
pub(crate) fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub(crate) fn locate_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn clip_text(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
