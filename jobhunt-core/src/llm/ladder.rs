use tracing::info;

use crate::config::{LadderSection, TierEntry};

/// What the ladder wants the loop to do after a stuck signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LadderVerdict {
    /// Below threshold, keep going on the current tier.
    Hold,
    /// Threshold hit below the top tier: the next step uses a stronger model.
    Escalated { tier: String, model: String },
    /// Threshold hit on the top tier. The job is unrecoverable for this run.
    Exhausted,
}

/// Escalation ladder over the configured model tiers.
///
/// Every job starts on the cheapest tier. Stuck signals accumulate; hitting
/// the threshold escalates one tier and clears the count, so each tier gets
/// the same number of chances. Progress on the page clears the count without
/// touching the tier.
#[derive(Debug, Clone)]
pub struct ModelLadder {
    tiers: Vec<TierEntry>,
    current: usize,
    consecutive_stuck: u32,
    stuck_threshold: u32,
}

impl ModelLadder {
    pub fn from_config(ladder: &LadderSection) -> Self {
        Self {
            tiers: ladder.tiers.clone(),
            current: 0,
            consecutive_stuck: 0,
            stuck_threshold: ladder.stuck_threshold.max(1),
        }
    }

    pub fn current_model(&self) -> &str {
        &self.tiers[self.current].model
    }

    pub fn current_tier(&self) -> &str {
        &self.tiers[self.current].name
    }

    pub fn is_top_tier(&self) -> bool {
        self.current + 1 == self.tiers.len()
    }

    pub fn consecutive_stuck(&self) -> u32 {
        self.consecutive_stuck
    }

    /// The page moved forward. Stuck counts do not survive progress.
    pub fn record_progress(&mut self) {
        self.consecutive_stuck = 0;
    }

    /// Records one stuck signal and decides whether to escalate.
    pub fn record_stuck(&mut self) -> LadderVerdict {
        self.consecutive_stuck += 1;
        if self.consecutive_stuck < self.stuck_threshold {
            return LadderVerdict::Hold;
        }
        if self.is_top_tier() {
            return LadderVerdict::Exhausted;
        }
        self.current += 1;
        self.consecutive_stuck = 0;
        let tier = self.tiers[self.current].name.clone();
        let model = self.tiers[self.current].model.clone();
        info!(tier = %tier, model = %model, "escalating to stronger model");
        LadderVerdict::Escalated { tier, model }
    }

    /// Drops back to the cheapest tier, typically after a successful job.
    pub fn reset_to_cheapest(&mut self) {
        self.current = 0;
        self.consecutive_stuck = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_tier_ladder() -> ModelLadder {
        ModelLadder::from_config(&LadderSection {
            max_steps: 30,
            stuck_threshold: 2,
            tiers: vec![
                TierEntry {
                    name: "flash".into(),
                    model: "vendor/flash".into(),
                },
                TierEntry {
                    name: "pro".into(),
                    model: "vendor/pro".into(),
                },
                TierEntry {
                    name: "heavy".into(),
                    model: "vendor/heavy".into(),
                },
            ],
        })
    }

    #[test]
    fn escalates_after_threshold_and_resets_count() {
        let mut ladder = three_tier_ladder();
        assert_eq!(ladder.record_stuck(), LadderVerdict::Hold);
        assert_eq!(
            ladder.record_stuck(),
            LadderVerdict::Escalated {
                tier: "pro".into(),
                model: "vendor/pro".into()
            }
        );
        assert_eq!(ladder.consecutive_stuck(), 0);
        assert_eq!(ladder.current_model(), "vendor/pro");
    }

    #[test]
    fn top_tier_exhausts_instead_of_escalating() {
        let mut ladder = three_tier_ladder();
        for _ in 0..2 {
            ladder.record_stuck();
        }
        for _ in 0..2 {
            ladder.record_stuck();
        }
        assert!(ladder.is_top_tier());
        assert_eq!(ladder.record_stuck(), LadderVerdict::Hold);
        assert_eq!(ladder.record_stuck(), LadderVerdict::Exhausted);
    }

    #[test]
    fn progress_clears_the_stuck_count() {
        let mut ladder = three_tier_ladder();
        ladder.record_stuck();
        ladder.record_progress();
        assert_eq!(ladder.record_stuck(), LadderVerdict::Hold);
        assert_eq!(ladder.current_tier(), "flash");
    }

    #[test]
    fn reset_returns_to_cheapest_tier() {
        let mut ladder = three_tier_ladder();
        ladder.record_stuck();
        ladder.record_stuck();
        assert_eq!(ladder.current_tier(), "pro");
        ladder.reset_to_cheapest();
        assert_eq!(ladder.current_tier(), "flash");
        assert_eq!(ladder.consecutive_stuck(), 0);
    }

    #[test]
    fn single_tier_ladder_exhausts_directly() {
        let mut ladder = ModelLadder::from_config(&LadderSection {
            max_steps: 30,
            stuck_threshold: 2,
            tiers: vec![TierEntry {
                name: "only".into(),
                model: "vendor/only".into(),
            }],
        });
        assert_eq!(ladder.record_stuck(), LadderVerdict::Hold);
        assert_eq!(ladder.record_stuck(), LadderVerdict::Exhausted);
    }
}
