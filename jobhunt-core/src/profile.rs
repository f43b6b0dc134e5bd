use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ApplicantSection;

/// Result alias for profile operations.
pub type Result<T> = std::result::Result<T, ProfileError>;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid answers file: {0}")]
    Invalid(String),
}

/// Screening answers the agent can surface when a form asks questions that
/// are not plain contact fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerSheet {
    pub answers: Vec<AnswerEntry>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub question: String,
    pub answer: String,
}

impl AnswerSheet {
    /// Load and validate the answers file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let sheet: Self = serde_yaml::from_str(&content)?;
        sheet.validate()?;
        Ok(sheet)
    }

    pub fn validate(&self) -> Result<()> {
        for entry in &self.answers {
            if entry.question.trim().is_empty() {
                return Err(ProfileError::Invalid("empty question".into()));
            }
            if entry.answer.trim().is_empty() {
                return Err(ProfileError::Invalid(format!(
                    "no answer for {:?}",
                    entry.question
                )));
            }
        }
        Ok(())
    }
}

/// Everything the agent prompt needs to know about the candidate.
#[derive(Debug, Clone)]
pub struct ApplicantProfile {
    pub contact: ApplicantSection,
    pub answers: AnswerSheet,
}

impl ApplicantProfile {
    pub fn new(contact: ApplicantSection, answers: AnswerSheet) -> Self {
        Self { contact, answers }
    }

    /// Renders the contact-and-answers block injected into every agent
    /// prompt. Kept as plain labelled lines; vision models follow these
    /// more reliably than nested structures.
    pub fn prompt_block(&self) -> String {
        let mut block = String::new();
        let _ = writeln!(block, "APPLICANT:");
        let _ = writeln!(block, "- Name: {}", self.contact.name);
        let _ = writeln!(block, "- Email: {}", self.contact.email);
        let _ = writeln!(block, "- Phone: {}", self.contact.phone);
        let _ = writeln!(block, "- Location: {}", self.contact.location);
        if let Some(linkedin) = &self.contact.linkedin {
            let _ = writeln!(block, "- LinkedIn: {linkedin}");
        }
        if !self.answers.answers.is_empty() {
            let _ = writeln!(block, "SCREENING ANSWERS:");
            for entry in &self.answers.answers {
                let _ = writeln!(block, "- Q: {} A: {}", entry.question, entry.answer);
            }
        }
        if let Some(notes) = &self.answers.notes {
            let _ = writeln!(block, "NOTES: {notes}");
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> ApplicantSection {
        ApplicantSection {
            name: "Test Person".into(),
            email: "test@example.com".into(),
            phone: "555-0000".into(),
            location: "Nowhere, TX".into(),
            linkedin: None,
        }
    }

    #[test]
    fn rejects_blank_answers() {
        let sheet = AnswerSheet {
            answers: vec![AnswerEntry {
                question: "Sponsorship?".into(),
                answer: "   ".into(),
            }],
            notes: None,
        };
        assert!(sheet.validate().is_err());
    }

    #[test]
    fn prompt_block_lists_contact_and_answers() {
        let sheet = AnswerSheet {
            answers: vec![AnswerEntry {
                question: "Authorized to work?".into(),
                answer: "Yes".into(),
            }],
            notes: Some("prefers remote".into()),
        };
        let profile = ApplicantProfile::new(contact(), sheet);
        let block = profile.prompt_block();
        assert!(block.contains("test@example.com"));
        assert!(block.contains("Authorized to work?"));
        assert!(block.contains("prefers remote"));
    }
}
