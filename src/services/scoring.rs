//! Score calculation. Pure functions of the final run state.

use crate::domain::models::{RunState, RunStatus, ScoreBreakdown, ScoringConfig};
use crate::services::log_signals::test_counts;

/// Inputs the score depends on, separated from `RunState` so the policy can
/// be exercised directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub status: RunStatus,
    /// Percentage of tests passed in the final sandbox run, when parseable.
    pub passed_percentage: Option<i64>,
    pub elapsed_secs: f64,
    pub commit_count: usize,
}

impl ScoreInputs {
    pub fn from_state(state: &RunState) -> Self {
        Self {
            status: state.final_status,
            passed_percentage: test_counts(&state.clean_logs).passed_percentage(),
            elapsed_secs: state.elapsed_secs(),
            commit_count: state.fixes().len(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoreCalculator {
    policy: ScoringConfig,
}

impl ScoreCalculator {
    pub const fn new(policy: ScoringConfig) -> Self {
        Self { policy }
    }

    pub fn score(&self, state: &RunState) -> ScoreBreakdown {
        self.score_inputs(&ScoreInputs::from_state(state))
    }

    pub fn score_inputs(&self, inputs: &ScoreInputs) -> ScoreBreakdown {
        let base_score = inputs.passed_percentage.map_or_else(
            || if inputs.status == RunStatus::Passed { 100 } else { 0 },
            |pct| pct.clamp(0, 100),
        );

        #[allow(clippy::cast_precision_loss)]
        let within_window = inputs.elapsed_secs < self.policy.speed_bonus_window_secs as f64;
        let speed_bonus = if within_window && base_score == 100 {
            self.policy.speed_bonus_points
        } else {
            0
        };

        let excess = inputs
            .commit_count
            .saturating_sub(self.policy.penalty_commit_threshold);
        let efficiency_penalty = self
            .policy
            .penalty_per_commit
            .saturating_mul(i64::try_from(excess).unwrap_or(i64::MAX));

        ScoreBreakdown {
            final_score: (base_score + speed_bonus).saturating_sub(efficiency_penalty).max(0),
            base_score,
            speed_bonus,
            efficiency_penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(status: RunStatus, pct: Option<i64>, secs: f64, commits: usize) -> ScoreInputs {
        ScoreInputs {
            status,
            passed_percentage: pct,
            elapsed_secs: secs,
            commit_count: commits,
        }
    }

    #[test]
    fn test_fast_full_pass_gets_bonus() {
        let score = ScoreCalculator::default().score_inputs(&inputs(RunStatus::Passed, Some(100), 42.0, 1));
        assert_eq!(
            score,
            ScoreBreakdown {
                final_score: 110,
                base_score: 100,
                speed_bonus: 10,
                efficiency_penalty: 0
            }
        );
    }

    #[test]
    fn test_unparseable_counts_follow_status() {
        let calc = ScoreCalculator::default();
        assert_eq!(calc.score_inputs(&inputs(RunStatus::Passed, None, 400.0, 0)).final_score, 100);
        assert_eq!(calc.score_inputs(&inputs(RunStatus::Failed, None, 10.0, 0)).final_score, 0);
    }

    #[test]
    fn test_partial_pass_gets_no_bonus() {
        let score = ScoreCalculator::default().score_inputs(&inputs(RunStatus::Failed, Some(50), 10.0, 0));
        assert_eq!(score.base_score, 50);
        assert_eq!(score.speed_bonus, 0);
    }

    #[test]
    fn test_penalty_beyond_threshold() {
        let calc = ScoreCalculator::default();
        let at_20 = calc.score_inputs(&inputs(RunStatus::Passed, Some(100), 500.0, 20));
        let at_25 = calc.score_inputs(&inputs(RunStatus::Passed, Some(100), 500.0, 25));
        assert_eq!(at_20.final_score - at_25.final_score, 10);
        assert_eq!(at_25.efficiency_penalty, 10);
    }

    #[test]
    fn test_final_score_never_negative() {
        let score = ScoreCalculator::default().score_inputs(&inputs(RunStatus::Failed, Some(0), 10.0, 500));
        assert_eq!(score.final_score, 0);
    }

    #[test]
    fn test_policy_constants_are_configurable() {
        let calc = ScoreCalculator::new(ScoringConfig {
            speed_bonus_window_secs: 60,
            speed_bonus_points: 5,
            penalty_commit_threshold: 1,
            penalty_per_commit: 3,
        });
        let score = calc.score_inputs(&inputs(RunStatus::Passed, Some(100), 30.0, 3));
        assert_eq!(score.speed_bonus, 5);
        assert_eq!(score.efficiency_penalty, 6);
        assert_eq!(score.final_score, 99);
    }
}
