//! Step budget, consecutive-failure limit and decision re-prompts.

use super::state::{StepRecord, Termination};
use crate::config::LoopConfig;

/// What to do after a reply that could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseVerdict {
    /// Ask again, telling the engine what was wrong.
    Reprompt,
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct FailurePolicy {
    max_steps: u32,
    failure_limit: u32,
    decision_retries: u32,
    consecutive_failures: u32,
    reprompts_used: u32,
    parse_exhausted: bool,
}

impl FailurePolicy {
    pub fn new(max_steps: u32, failure_limit: u32, decision_retries: u32) -> Self {
        Self {
            max_steps,
            failure_limit,
            decision_retries,
            consecutive_failures: 0,
            reprompts_used: 0,
            parse_exhausted: false,
        }
    }

    /// `max_steps` overrides the configured budget when given.
    pub fn from_config(config: &LoopConfig, max_steps: Option<u32>) -> Self {
        Self::new(
            max_steps.unwrap_or(config.max_steps).max(1),
            config.consecutive_failure_limit.max(1),
            config.decision_retries,
        )
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn failure_limit(&self) -> u32 {
        self.failure_limit
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Count a dispatched action's outcome.
    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }

    /// A reply parsed; the re-prompt allowance starts over.
    pub fn record_parsed(&mut self) {
        self.reprompts_used = 0;
    }

    /// A reply failed to parse. Counts as a failed step.
    pub fn record_parse_failure(&mut self) -> ParseVerdict {
        self.record_outcome(false);
        if self.reprompts_used < self.decision_retries {
            self.reprompts_used += 1;
            ParseVerdict::Reprompt
        } else {
            self.parse_exhausted = true;
            ParseVerdict::GiveUp
        }
    }

    /// Terminal verdict after `steps_taken` steps, if any. Failure limits are
    /// checked before the budget.
    pub fn verdict(&self, steps_taken: u32) -> Option<Termination> {
        if self.parse_exhausted || self.consecutive_failures >= self.failure_limit {
            Some(Termination::Fatal)
        } else if steps_taken >= self.max_steps {
            Some(Termination::Exhausted)
        } else {
            None
        }
    }

    /// The trailing run of failed steps, oldest first, at most `failure_limit` long.
    pub fn recent_failures<'a>(&self, steps: &'a [StepRecord]) -> Vec<&'a StepRecord> {
        let mut failed: Vec<&StepRecord> = steps
            .iter()
            .rev()
            .take_while(|s| !s.succeeded())
            .take(self.failure_limit as usize)
            .collect();
        failed.reverse();
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_resets_failure_streak() {
        let mut policy = FailurePolicy::new(10, 3, 1);
        policy.record_outcome(false);
        policy.record_outcome(false);
        assert_eq!(policy.verdict(2), None);
        policy.record_outcome(true);
        assert_eq!(policy.consecutive_failures(), 0);
        policy.record_outcome(false);
        policy.record_outcome(false);
        assert_eq!(policy.verdict(5), None);
        policy.record_outcome(false);
        assert_eq!(policy.verdict(6), Some(Termination::Fatal));
    }

    #[test]
    fn test_failure_limit_wins_over_budget() {
        let mut policy = FailurePolicy::new(3, 3, 1);
        assert_eq!(policy.verdict(2), None);
        assert_eq!(policy.verdict(3), Some(Termination::Exhausted));
        for _ in 0..3 {
            policy.record_outcome(false);
        }
        assert_eq!(policy.verdict(3), Some(Termination::Fatal));
    }

    #[test]
    fn test_one_reprompt_then_give_up() {
        let mut policy = FailurePolicy::new(10, 5, 1);
        assert_eq!(policy.record_parse_failure(), ParseVerdict::Reprompt);
        assert_eq!(policy.verdict(1), None);
        assert_eq!(policy.record_parse_failure(), ParseVerdict::GiveUp);
        assert_eq!(policy.verdict(2), Some(Termination::Fatal));
    }

    #[test]
    fn test_parsed_reply_restores_reprompt() {
        let mut policy = FailurePolicy::new(10, 5, 1);
        assert_eq!(policy.record_parse_failure(), ParseVerdict::Reprompt);
        policy.record_parsed();
        policy.record_outcome(true);
        assert_eq!(policy.record_parse_failure(), ParseVerdict::Reprompt);
    }
}
