use crate::config::loader::ScoringMode;
use crate::model::verdict::CaseResult;

/// Points awarded for a graded submission.
pub trait ScoringPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, points: u32, per_case: &[CaseResult]) -> u32;
}

/// Full points only when every case passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllOrNothing;

impl ScoringPolicy for AllOrNothing {
    fn name(&self) -> &'static str {
        "all_or_nothing"
    }

    fn score(&self, points: u32, per_case: &[CaseResult]) -> u32 {
        if !per_case.is_empty() && per_case.iter().all(|c| c.status.is_pass()) {
            points
        } else {
            0
        }
    }
}

/// floor(points * passed / total)
#[derive(Debug, Clone, Copy, Default)]
pub struct Proportional;

impl ScoringPolicy for Proportional {
    fn name(&self) -> &'static str {
        "proportional"
    }

    fn score(&self, points: u32, per_case: &[CaseResult]) -> u32 {
        if per_case.is_empty() {
            return 0;
        }
        let passed = per_case.iter().filter(|c| c.status.is_pass()).count() as u64;
        (u64::from(points) * passed / per_case.len() as u64) as u32
    }
}

pub fn policy_for(mode: ScoringMode) -> Box<dyn ScoringPolicy> {
    match mode {
        ScoringMode::AllOrNothing => Box::new(AllOrNothing),
        ScoringMode::Proportional => Box::new(Proportional),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::verdict::CaseStatus;

    fn cases(statuses: &[CaseStatus]) -> Vec<CaseResult> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, s)| CaseResult::not_run(i, false, *s))
            .collect()
    }

    #[test]
    fn test_all_or_nothing() {
        let policy = AllOrNothing;
        assert_eq!(policy.score(10, &cases(&[CaseStatus::Pass, CaseStatus::Pass])), 10);
        assert_eq!(policy.score(10, &cases(&[CaseStatus::Pass, CaseStatus::Fail])), 0);
        assert_eq!(policy.score(10, &[]), 0);
    }

    #[test]
    fn test_proportional_floors() {
        let policy = Proportional;
        let results = cases(&[CaseStatus::Pass, CaseStatus::Fail, CaseStatus::Pass]);
        assert_eq!(policy.score(10, &results), 6);
        assert_eq!(policy.score(10, &cases(&[CaseStatus::TimeLimitExceeded])), 0);
    }

    #[test]
    fn test_policy_for_mode() {
        assert_eq!(policy_for(ScoringMode::default()).name(), "all_or_nothing");
        assert_eq!(policy_for(ScoringMode::Proportional).name(), "proportional");
    }
}
