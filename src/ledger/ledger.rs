/// Submission/attempt ledger
///
/// Appends verdicts and drives the derived state: every append folds the
/// verdict into lesson progress and then re-evaluates achievements. Past
/// entries are never edited; a correction is a new entry.
use crate::achievement::evaluator::{AchievementEvaluator, AchievementUnlock};
use crate::config::types::{poisoned, Result};
use crate::ledger::store::{LedgerEntry, MemoryStore, PersistenceStore};
use crate::model::content::ContentCatalog;
use crate::model::verdict::{SubmissionKind, Verdict};
use crate::progress::aggregator::{CourseProgress, ProgressAggregator, ProgressRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Derived state changes caused by one append
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerUpdate {
    /// False when the entry was already present (retry of the same event)
    pub appended: bool,
    pub progress: Option<ProgressRecord>,
    pub progress_changed: bool,
    pub unlocked: Vec<AchievementUnlock>,
}

/// Whether a computed verdict reached the store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Persistence {
    Recorded,
    /// Parked in the outbox after the retry budget ran out
    Queued { reason: String },
}

/// Progress and unlocks for one user
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DerivedState {
    pub progress: Vec<ProgressRecord>,
    pub unlocks: Vec<AchievementUnlock>,
}

/// Stored state compared with state re-derived from verdicts alone
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub user_id: String,
    pub entries_replayed: usize,
    pub consistent: bool,
    pub stored: DerivedState,
    pub replayed: DerivedState,
}

pub struct Ledger {
    store: Arc<dyn PersistenceStore>,
    evaluator: AchievementEvaluator,
    retries: u32,
    outbox: Mutex<VecDeque<LedgerEntry>>,
    /// One write lock per user; derived state is read-modify-write.
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Ledger {
    pub fn new(store: Arc<dyn PersistenceStore>, evaluator: AchievementEvaluator, retries: u32) -> Self {
        Self {
            store,
            evaluator,
            retries,
            outbox: Mutex::new(VecDeque::new()),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    fn user_lock(&self, user_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.user_locks.lock().map_err(poisoned)?;
        Ok(Arc::clone(
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        ))
    }

    fn hold(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
        match lock.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Ledger over a fresh in-memory store with no achievements
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            AchievementEvaluator::default(),
            1,
        )
    }

    pub fn store(&self) -> &dyn PersistenceStore {
        self.store.as_ref()
    }

    pub fn evaluator(&self) -> &AchievementEvaluator {
        &self.evaluator
    }

    /// Append, then update progress, then evaluate achievements.
    ///
    /// Safe to repeat: a duplicate append is skipped but the derived steps
    /// still run, which completes an earlier partially applied record.
    /// Records for the same user are serialized.
    pub fn record(&self, entry: &LedgerEntry) -> Result<LedgerUpdate> {
        let lock = self.user_lock(&entry.submission.user_id)?;
        let _guard = Self::hold(&lock);
        let appended = self.store.append(entry)?;
        let progress = ProgressAggregator::on_verdict(self.store.as_ref(), entry)?;
        let unlocked = self.evaluator.evaluate(
            self.store.as_ref(),
            &entry.submission.user_id,
            entry.submission.timestamp,
        )?;
        Ok(LedgerUpdate {
            appended,
            progress: progress.record,
            progress_changed: progress.changed,
            unlocked,
        })
    }

    /// `record` with the retry budget; on exhaustion the entry is parked
    /// in the outbox and the verdict is still returned to the caller.
    pub fn record_with_retry(&self, entry: &LedgerEntry) -> (Persistence, Option<LedgerUpdate>) {
        let mut attempt = 0;
        let reason = loop {
            match self.record(entry) {
                Ok(update) => return (Persistence::Recorded, Some(update)),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    log::warn!(
                        "Ledger write for submission {} failed (attempt {}): {}",
                        entry.submission.id,
                        attempt,
                        e
                    );
                }
                Err(e) => break e.to_string(),
            }
        };

        match self.outbox.lock() {
            Ok(mut outbox) => outbox.push_back(entry.clone()),
            Err(poison) => poison.into_inner().push_back(entry.clone()),
        }
        log::error!(
            "Ledger write for submission {} queued: {}",
            entry.submission.id,
            reason
        );
        (Persistence::Queued { reason }, None)
    }

    pub fn pending(&self) -> usize {
        match self.outbox.lock() {
            Ok(outbox) => outbox.len(),
            Err(poison) => poison.into_inner().len(),
        }
    }

    /// Drain the outbox in order; stops at the first failure, leaving that
    /// entry and everything after it queued.
    pub fn flush_pending(&self) -> Result<Vec<LedgerUpdate>> {
        let mut outbox = self.outbox.lock().map_err(poisoned)?;
        let mut updates = Vec::new();
        while let Some(entry) = outbox.front() {
            let update = self.record(entry)?;
            outbox.pop_front();
            updates.push(update);
        }
        Ok(updates)
    }

    /// Verdicts for (user, exercise), oldest first
    pub fn history(&self, user_id: &str, exercise_id: &str) -> Result<Vec<Verdict>> {
        Ok(self
            .attempts(user_id, exercise_id)?
            .into_iter()
            .map(|e| e.verdict)
            .collect())
    }

    /// Full entries for (user, exercise), oldest first
    pub fn attempts(&self, user_id: &str, exercise_id: &str) -> Result<Vec<LedgerEntry>> {
        let mut entries = self.store.read_history(user_id, exercise_id)?;
        entries.sort_by_key(|e| e.submission.timestamp);
        Ok(entries)
    }

    /// Highest-scoring pass on the lesson (latest wins a tie), else the
    /// most recent attempt. Editor runs are not attempts.
    pub fn best_verdict(&self, user_id: &str, lesson_id: &str) -> Result<Option<Verdict>> {
        let mut entries: Vec<LedgerEntry> = self
            .store
            .read_user_entries(user_id)?
            .into_iter()
            .filter(|e| {
                e.submission.kind == SubmissionKind::Grade
                    && e.lesson_id.as_deref() == Some(lesson_id)
            })
            .collect();
        entries.sort_by_key(|e| e.submission.timestamp);

        let best_pass = entries
            .iter()
            .filter(|e| e.verdict.passed())
            .max_by_key(|e| (e.verdict.score_awarded, e.submission.timestamp));
        Ok(best_pass
            .or_else(|| entries.last())
            .map(|e| e.verdict.clone()))
    }

    pub fn progress(&self, user_id: &str) -> Result<Vec<ProgressRecord>> {
        self.store.progress_records(user_id)
    }

    pub fn unlocks(&self, user_id: &str) -> Result<Vec<AchievementUnlock>> {
        self.store.unlocks(user_id)
    }

    pub fn total_points(&self, user_id: &str) -> Result<u64> {
        ProgressAggregator::total_points(self.store.as_ref(), user_id)
    }

    pub fn course_progress(
        &self,
        catalog: &ContentCatalog,
        user_id: &str,
        course_id: &str,
    ) -> Result<CourseProgress> {
        ProgressAggregator::course_progress(self.store.as_ref(), catalog, user_id, course_id)
    }

    /// Re-derive progress and unlocks from the user's verdicts alone, in
    /// append order, against a scratch store.
    pub fn replay(&self, user_id: &str) -> Result<DerivedState> {
        Ok(self.replay_entries(user_id)?.0)
    }

    fn replay_entries(&self, user_id: &str) -> Result<(DerivedState, usize)> {
        let entries = self.store.read_user_entries(user_id)?;
        let scratch = MemoryStore::new();
        for entry in &entries {
            scratch.append(entry)?;
            ProgressAggregator::on_verdict(&scratch, entry)?;
            self.evaluator
                .evaluate(&scratch, user_id, entry.submission.timestamp)?;
        }
        Ok((
            DerivedState {
                progress: scratch.progress_records(user_id)?,
                unlocks: scratch.unlocks(user_id)?,
            },
            entries.len(),
        ))
    }

    /// Compare stored derived state with a replay
    pub fn audit(&self, user_id: &str) -> Result<ReplayReport> {
        let lock = self.user_lock(user_id)?;
        let _guard = Self::hold(&lock);
        let (replayed, entries_replayed) = self.replay_entries(user_id)?;
        let stored = DerivedState {
            progress: self.store.progress_records(user_id)?,
            unlocks: self.store.unlocks(user_id)?,
        };
        let consistent = stored == replayed;
        if !consistent {
            log::warn!("Derived state for {} differs from verdict replay", user_id);
        }
        Ok(ReplayReport {
            user_id: user_id.to_string(),
            entries_replayed,
            consistent,
            stored,
            replayed,
        })
    }
}
