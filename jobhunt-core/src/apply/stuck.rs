use std::collections::VecDeque;

use crate::llm::AgentAction;

const WINDOW: usize = 10;
const REPEAT_RUN: usize = 3;
const REPEAT_WEIGHT: f64 = 7.0;
const STAGNATION_RUN: usize = 5;
const STAGNATION_WEIGHT: f64 = 4.0;
const SCORE_CAP: f64 = 10.0;
const ABORT_AT: f64 = 8.0;
const ESCALATE_AT: f64 = 4.0;

/// What the stuck score recommends for the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckAssessment {
    Fine,
    Escalate,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StepTrace {
    kind: &'static str,
    selector: Option<String>,
    url: String,
}

/// Rolling window over executed actions that scores behavioral loops the
/// model itself does not report: hammering the same selector, or stepping
/// without the URL ever moving. The score only ever feeds the escalation
/// counter; it never routes a job on its own.
#[derive(Debug, Default)]
pub struct StuckTracker {
    window: VecDeque<StepTrace>,
}

impl StuckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, action: &AgentAction, url: &str) {
        let selector = match action {
            AgentAction::Click { selector }
            | AgentAction::Type { selector, .. }
            | AgentAction::Upload { selector } => Some(selector.clone()),
            AgentAction::Done { .. } | AgentAction::Stuck { .. } => None,
        };
        if self.window.len() == WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(StepTrace {
            kind: action.kind(),
            selector,
            url: url.to_string(),
        });
    }

    pub fn score(&self) -> f64 {
        let mut score = 0.0;
        if self.tail_repeats(REPEAT_RUN) {
            score += REPEAT_WEIGHT;
        }
        if self.url_stagnant(STAGNATION_RUN) {
            score += STAGNATION_WEIGHT;
        }
        score.min(SCORE_CAP)
    }

    pub fn assess(&self) -> StuckAssessment {
        let score = self.score();
        if score >= ABORT_AT {
            StuckAssessment::Abort
        } else if score >= ESCALATE_AT {
            StuckAssessment::Escalate
        } else {
            StuckAssessment::Fine
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Last `run` actions are the same action+selector pair.
    fn tail_repeats(&self, run: usize) -> bool {
        if self.window.len() < run {
            return false;
        }
        let mut tail = self.window.iter().rev().take(run);
        let Some(first) = tail.next() else {
            return false;
        };
        tail.all(|trace| trace.kind == first.kind && trace.selector == first.selector)
    }

    /// Last `run` actions all happened on the same URL.
    fn url_stagnant(&self, run: usize) -> bool {
        if self.window.len() < run {
            return false;
        }
        let mut tail = self.window.iter().rev().take(run);
        let Some(first) = tail.next() else {
            return false;
        };
        tail.all(|trace| trace.url == first.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click(selector: &str) -> AgentAction {
        AgentAction::Click {
            selector: selector.to_string(),
        }
    }

    #[test]
    fn fresh_tracker_scores_zero() {
        let tracker = StuckTracker::new();
        assert_eq!(tracker.score(), 0.0);
        assert_eq!(tracker.assess(), StuckAssessment::Fine);
    }

    #[test]
    fn three_identical_clicks_recommend_escalation() {
        let mut tracker = StuckTracker::new();
        tracker.record(&click("#next"), "https://a.example/step1");
        tracker.record(&click("#next"), "https://a.example/step2");
        tracker.record(&click("#next"), "https://a.example/step3");
        assert_eq!(tracker.score(), 7.0);
        assert_eq!(tracker.assess(), StuckAssessment::Escalate);
    }

    #[test]
    fn repetition_plus_stagnation_recommends_abort() {
        let mut tracker = StuckTracker::new();
        for _ in 0..5 {
            tracker.record(&click("#next"), "https://a.example/form");
        }
        assert_eq!(tracker.score(), 10.0);
        assert_eq!(tracker.assess(), StuckAssessment::Abort);
    }

    #[test]
    fn varied_actions_on_moving_urls_stay_fine() {
        let mut tracker = StuckTracker::new();
        tracker.record(&click("#next"), "https://a.example/1");
        tracker.record(
            &AgentAction::Type {
                selector: "#email".into(),
                text: "a@b.c".into(),
            },
            "https://a.example/2",
        );
        tracker.record(&click("#submit"), "https://a.example/3");
        assert_eq!(tracker.assess(), StuckAssessment::Fine);
    }

    #[test]
    fn url_stagnation_alone_recommends_escalation() {
        let mut tracker = StuckTracker::new();
        let selectors = ["#a", "#b", "#c", "#d", "#e"];
        for selector in selectors {
            tracker.record(&click(selector), "https://a.example/form");
        }
        assert_eq!(tracker.score(), 4.0);
        assert_eq!(tracker.assess(), StuckAssessment::Escalate);
    }

    #[test]
    fn window_forgets_old_behavior() {
        let mut tracker = StuckTracker::new();
        for _ in 0..3 {
            tracker.record(&click("#next"), "https://a.example/form");
        }
        assert_eq!(tracker.assess(), StuckAssessment::Escalate);
        tracker.reset();
        tracker.record(&click("#other"), "https://a.example/done");
        assert_eq!(tracker.assess(), StuckAssessment::Fine);
    }
}
