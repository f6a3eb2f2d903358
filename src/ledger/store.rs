/// Persistence collaborator contract and the in-memory store
use crate::achievement::evaluator::AchievementUnlock;
use crate::config::types::{poisoned, Result};
use crate::model::verdict::{Submission, Verdict};
use crate::progress::aggregator::ProgressRecord;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// One appended attempt: the submission, its verdict, and the content
/// facts progress is derived from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub submission: Submission,
    pub verdict: Verdict,
    /// Lesson owning the exercise, if any
    pub lesson_id: Option<String>,
    /// Exercise reward at grading time
    pub exercise_points: u32,
}

/// Storage operations the ledger depends on.
///
/// Every write is idempotent: replaying the same logical event leaves the
/// store unchanged.
pub trait PersistenceStore: Send + Sync {
    /// Returns false when the submission id is already present
    fn append(&self, entry: &LedgerEntry) -> Result<bool>;

    /// Entries for (user, exercise) in append order
    fn read_history(&self, user_id: &str, exercise_id: &str) -> Result<Vec<LedgerEntry>>;

    /// Every entry for a user in append order
    fn read_user_entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>>;

    /// Raise-only: points never drop and a completed lesson stays
    /// completed. Returns false when the stored record already covers
    /// `record`.
    fn upsert_progress(&self, record: &ProgressRecord) -> Result<bool>;

    fn progress_for(&self, user_id: &str, lesson_id: &str) -> Result<Option<ProgressRecord>>;

    /// All progress records for a user, ordered by lesson id
    fn progress_records(&self, user_id: &str) -> Result<Vec<ProgressRecord>>;

    /// Returns true only when the unlock did not exist yet
    fn upsert_achievement_unlock(&self, unlock: &AchievementUnlock) -> Result<bool>;

    /// Unlocks for a user, oldest first
    fn unlocks(&self, user_id: &str) -> Result<Vec<AchievementUnlock>>;
}

/// Indexed state shared by the memory and journal stores
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    entries: Vec<LedgerEntry>,
    submission_ids: HashSet<String>,
    progress: HashMap<(String, String), ProgressRecord>,
    unlocks: HashMap<(String, String), AchievementUnlock>,
}

impl StoreState {
    pub(crate) fn contains_submission(&self, submission_id: &str) -> bool {
        self.submission_ids.contains(submission_id)
    }

    pub(crate) fn insert_entry(&mut self, entry: LedgerEntry) -> bool {
        if !self.submission_ids.insert(entry.submission.id.clone()) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// `record` folded into the stored one, or None if nothing would rise
    pub(crate) fn merge_progress(&self, record: &ProgressRecord) -> Option<ProgressRecord> {
        let Some(existing) = self
            .progress
            .get(&(record.user_id.clone(), record.lesson_id.clone()))
        else {
            return Some(record.clone());
        };
        if record.points_earned <= existing.points_earned
            && (existing.completed || !record.completed)
        {
            return None;
        }
        Some(ProgressRecord {
            completed: existing.completed || record.completed,
            points_earned: existing.points_earned.max(record.points_earned),
            ..record.clone()
        })
    }

    pub(crate) fn put_progress(&mut self, record: ProgressRecord) {
        self.progress
            .insert((record.user_id.clone(), record.lesson_id.clone()), record);
    }

    pub(crate) fn has_unlock(&self, unlock: &AchievementUnlock) -> bool {
        self.unlocks
            .contains_key(&(unlock.user_id.clone(), unlock.achievement_id.clone()))
    }

    pub(crate) fn put_unlock(&mut self, unlock: AchievementUnlock) -> bool {
        let key = (unlock.user_id.clone(), unlock.achievement_id.clone());
        if self.unlocks.contains_key(&key) {
            return false;
        }
        self.unlocks.insert(key, unlock);
        true
    }

    pub(crate) fn history(&self, user_id: &str, exercise_id: &str) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| e.submission.user_id == user_id && e.submission.exercise_id == exercise_id)
            .cloned()
            .collect()
    }

    pub(crate) fn user_entries(&self, user_id: &str) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| e.submission.user_id == user_id)
            .cloned()
            .collect()
    }

    pub(crate) fn progress_for(&self, user_id: &str, lesson_id: &str) -> Option<ProgressRecord> {
        self.progress
            .get(&(user_id.to_string(), lesson_id.to_string()))
            .cloned()
    }

    pub(crate) fn progress_records(&self, user_id: &str) -> Vec<ProgressRecord> {
        let mut records: Vec<_> = self
            .progress
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.lesson_id.cmp(&b.lesson_id));
        records
    }

    pub(crate) fn unlocks(&self, user_id: &str) -> Vec<AchievementUnlock> {
        let mut unlocks: Vec<_> = self
            .unlocks
            .values()
            .filter(|u| u.user_id == user_id)
            .cloned()
            .collect();
        unlocks.sort_by(|a, b| {
            a.unlocked_at
                .cmp(&b.unlocked_at)
                .then_with(|| a.achievement_id.cmp(&b.achievement_id))
        });
        unlocks
    }
}

/// Mutex-guarded in-memory store; also the scratch target for replay.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceStore for MemoryStore {
    fn append(&self, entry: &LedgerEntry) -> Result<bool> {
        Ok(self.state.lock().map_err(poisoned)?.insert_entry(entry.clone()))
    }

    fn read_history(&self, user_id: &str, exercise_id: &str) -> Result<Vec<LedgerEntry>> {
        Ok(self.state.lock().map_err(poisoned)?.history(user_id, exercise_id))
    }

    fn read_user_entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        Ok(self.state.lock().map_err(poisoned)?.user_entries(user_id))
    }

    fn upsert_progress(&self, record: &ProgressRecord) -> Result<bool> {
        let mut state = self.state.lock().map_err(poisoned)?;
        match state.merge_progress(record) {
            Some(merged) => {
                state.put_progress(merged);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn progress_for(&self, user_id: &str, lesson_id: &str) -> Result<Option<ProgressRecord>> {
        Ok(self.state.lock().map_err(poisoned)?.progress_for(user_id, lesson_id))
    }

    fn progress_records(&self, user_id: &str) -> Result<Vec<ProgressRecord>> {
        Ok(self.state.lock().map_err(poisoned)?.progress_records(user_id))
    }

    fn upsert_achievement_unlock(&self, unlock: &AchievementUnlock) -> Result<bool> {
        Ok(self.state.lock().map_err(poisoned)?.put_unlock(unlock.clone()))
    }

    fn unlocks(&self, user_id: &str) -> Result<Vec<AchievementUnlock>> {
        Ok(self.state.lock().map_err(poisoned)?.unlocks(user_id))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::types::LanguageId;
    use crate::model::verdict::{SubmissionKind, VerdictStatus};
    use chrono::Utc;

    pub(crate) fn entry(user: &str, exercise: &str, status: VerdictStatus, score: u32) -> LedgerEntry {
        let submission = Submission::new(
            exercise,
            user,
            LanguageId::new("python"),
            "print(1)",
            SubmissionKind::Grade,
        );
        LedgerEntry {
            verdict: Verdict {
                submission_id: submission.id.clone(),
                overall_status: status,
                per_case: Vec::new(),
                score_awarded: score,
                compile_output: None,
            },
            submission,
            lesson_id: Some(format!("lesson-{}", exercise)),
            exercise_points: 10,
        }
    }

    #[test]
    fn test_append_is_idempotent() {
        let store = MemoryStore::new();
        let e = entry("u1", "ex1", VerdictStatus::Pass, 10);
        assert!(store.append(&e).unwrap());
        assert!(!store.append(&e).unwrap());
        assert_eq!(store.read_history("u1", "ex1").unwrap().len(), 1);
        assert!(store.read_history("u2", "ex1").unwrap().is_empty());
    }

    #[test]
    fn test_unlock_created_once() {
        let store = MemoryStore::new();
        let unlock = AchievementUnlock {
            user_id: "u1".to_string(),
            achievement_id: "first-steps".to_string(),
            unlocked_at: Utc::now(),
        };
        assert!(store.upsert_achievement_unlock(&unlock).unwrap());
        assert!(!store.upsert_achievement_unlock(&unlock).unwrap());
        assert_eq!(store.unlocks("u1").unwrap().len(), 1);
    }

    #[test]
    fn test_progress_records_sorted_by_lesson() {
        let store = MemoryStore::new();
        for lesson in ["l2", "l1"] {
            store
                .upsert_progress(&ProgressRecord {
                    user_id: "u1".to_string(),
                    lesson_id: lesson.to_string(),
                    completed: true,
                    points_earned: 10,
                    updated_at: Utc::now(),
                })
                .unwrap();
        }
        let lessons: Vec<_> = store
            .progress_records("u1")
            .unwrap()
            .into_iter()
            .map(|r| r.lesson_id)
            .collect();
        assert_eq!(lessons, vec!["l1", "l2"]);
    }

    #[test]
    fn test_progress_upsert_never_lowers_points() {
        let store = MemoryStore::new();
        let record = |points| ProgressRecord {
            user_id: "u1".to_string(),
            lesson_id: "l1".to_string(),
            completed: true,
            points_earned: points,
            updated_at: Utc::now(),
        };
        assert!(store.upsert_progress(&record(20)).unwrap());
        assert!(!store.upsert_progress(&record(10)).unwrap());
        assert!(!store.upsert_progress(&record(20)).unwrap());
        assert_eq!(
            store.progress_for("u1", "l1").unwrap().map(|r| r.points_earned),
            Some(20)
        );
        assert!(store.upsert_progress(&record(30)).unwrap());
    }
}
