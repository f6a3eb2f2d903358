/// Append-only JSON-lines persistence
///
/// Each line is one tagged record. Nothing is rewritten in place: a newer
/// progress line supersedes an older one when the index is rebuilt on open.
use crate::achievement::evaluator::AchievementUnlock;
use crate::config::types::{poisoned, GradeError, Result};
use crate::ledger::store::{LedgerEntry, PersistenceStore, StoreState};
use crate::progress::aggregator::ProgressRecord;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum JournalRecord {
    Verdict { entry: LedgerEntry },
    Progress { progress: ProgressRecord },
    Unlock { unlock: AchievementUnlock },
}

struct Journal {
    file: File,
    state: StoreState,
}

impl Journal {
    fn write(&mut self, record: &JournalRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.file, "{}", line)
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_data())
            .map_err(|e| GradeError::Persistence(format!("journal write: {}", e)))
    }
}

pub struct JournalStore {
    path: PathBuf,
    journal: Mutex<Journal>,
}

impl JournalStore {
    /// Open (or create) a journal and rebuild its index.
    ///
    /// A torn final line from an interrupted write is skipped with a warning;
    /// a malformed line anywhere else is an error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| GradeError::Persistence(format!("create {}: {}", parent.display(), e)))?;
            }
        }

        let persistence = |action: &str, e: std::io::Error| {
            GradeError::Persistence(format!("{} {}: {}", action, path.display(), e))
        };

        let mut state = StoreState::default();
        let mut good_len = 0usize;
        let mut torn = false;
        let mut needs_newline = false;
        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| persistence("read", e))?;
            let segments: Vec<&str> = content.split_inclusive('\n').collect();
            let last = segments.len().saturating_sub(1);
            for (number, segment) in segments.iter().enumerate() {
                let line = segment.trim();
                if line.is_empty() {
                    good_len += segment.len();
                    continue;
                }
                match serde_json::from_str::<JournalRecord>(line) {
                    Ok(record) => {
                        apply(&mut state, record);
                        good_len += segment.len();
                        needs_newline = !segment.ends_with('\n');
                    }
                    Err(e) if number == last => {
                        log::warn!("Dropping torn journal tail in {}: {}", path.display(), e);
                        torn = true;
                    }
                    Err(e) => {
                        return Err(GradeError::Persistence(format!(
                            "{} line {}: {}",
                            path.display(),
                            number + 1,
                            e
                        )))
                    }
                }
            }
        }

        if torn {
            OpenOptions::new()
                .write(true)
                .open(&path)
                .and_then(|f| f.set_len(good_len as u64))
                .map_err(|e| persistence("truncate", e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| persistence("open", e))?;
        if needs_newline {
            writeln!(file).map_err(|e| persistence("repair", e))?;
        }
        log::debug!("Journal {} opened", path.display());

        Ok(Self {
            path,
            journal: Mutex::new(Journal { file, state }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn apply(state: &mut StoreState, record: JournalRecord) {
    match record {
        JournalRecord::Verdict { entry } => {
            state.insert_entry(entry);
        }
        JournalRecord::Progress { progress } => {
            if let Some(merged) = state.merge_progress(&progress) {
                state.put_progress(merged);
            }
        }
        JournalRecord::Unlock { unlock } => {
            state.put_unlock(unlock);
        }
    }
}

impl PersistenceStore for JournalStore {
    fn append(&self, entry: &LedgerEntry) -> Result<bool> {
        let mut journal = self.journal.lock().map_err(poisoned)?;
        if journal.state.contains_submission(&entry.submission.id) {
            return Ok(false);
        }
        journal.write(&JournalRecord::Verdict {
            entry: entry.clone(),
        })?;
        Ok(journal.state.insert_entry(entry.clone()))
    }

    fn read_history(&self, user_id: &str, exercise_id: &str) -> Result<Vec<LedgerEntry>> {
        Ok(self.journal.lock().map_err(poisoned)?.state.history(user_id, exercise_id))
    }

    fn read_user_entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        Ok(self.journal.lock().map_err(poisoned)?.state.user_entries(user_id))
    }

    fn upsert_progress(&self, record: &ProgressRecord) -> Result<bool> {
        let mut journal = self.journal.lock().map_err(poisoned)?;
        let Some(merged) = journal.state.merge_progress(record) else {
            return Ok(false);
        };
        journal.write(&JournalRecord::Progress {
            progress: merged.clone(),
        })?;
        journal.state.put_progress(merged);
        Ok(true)
    }

    fn progress_for(&self, user_id: &str, lesson_id: &str) -> Result<Option<ProgressRecord>> {
        Ok(self
            .journal
            .lock()
            .map_err(poisoned)?
            .state
            .progress_for(user_id, lesson_id))
    }

    fn progress_records(&self, user_id: &str) -> Result<Vec<ProgressRecord>> {
        Ok(self.journal.lock().map_err(poisoned)?.state.progress_records(user_id))
    }

    fn upsert_achievement_unlock(&self, unlock: &AchievementUnlock) -> Result<bool> {
        let mut journal = self.journal.lock().map_err(poisoned)?;
        if journal.state.has_unlock(unlock) {
            return Ok(false);
        }
        journal.write(&JournalRecord::Unlock {
            unlock: unlock.clone(),
        })?;
        Ok(journal.state.put_unlock(unlock.clone()))
    }

    fn unlocks(&self, user_id: &str) -> Result<Vec<AchievementUnlock>> {
        Ok(self.journal.lock().map_err(poisoned)?.state.unlocks(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::tests::entry;
    use crate::model::verdict::VerdictStatus;
    use chrono::Utc;

    fn journal_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("gradebox-journal-{}", uuid::Uuid::new_v4()))
            .join("ledger.jsonl")
    }

    #[test]
    fn test_reopen_rebuilds_index() {
        let path = journal_path();
        let e = entry("u1", "ex1", VerdictStatus::Pass, 10);
        {
            let store = JournalStore::open(&path).unwrap();
            assert!(store.append(&e).unwrap());
            store
                .upsert_progress(&ProgressRecord {
                    user_id: "u1".to_string(),
                    lesson_id: "lesson-ex1".to_string(),
                    completed: true,
                    points_earned: 10,
                    updated_at: Utc::now(),
                })
                .unwrap();
        }

        let reopened = JournalStore::open(&path).unwrap();
        assert_eq!(reopened.read_history("u1", "ex1").unwrap(), vec![e.clone()]);
        assert!(!reopened.append(&e).unwrap());
        assert_eq!(
            reopened
                .progress_for("u1", "lesson-ex1")
                .unwrap()
                .map(|p| p.points_earned),
            Some(10)
        );
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_progress_rewritten_only_when_raised() {
        let path = journal_path();
        let store = JournalStore::open(&path).unwrap();
        let record = ProgressRecord {
            user_id: "u1".to_string(),
            lesson_id: "l1".to_string(),
            completed: true,
            points_earned: 10,
            updated_at: Utc::now(),
        };
        assert!(store.upsert_progress(&record).unwrap());
        assert!(!store.upsert_progress(&record).unwrap());
        let lower = ProgressRecord {
            points_earned: 5,
            ..record.clone()
        };
        assert!(!store.upsert_progress(&lower).unwrap());
        let lines = std::fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(lines, 1);
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_torn_tail_skipped_but_corrupt_middle_rejected() {
        let path = journal_path();
        {
            let store = JournalStore::open(&path).unwrap();
            store
                .append(&entry("u1", "ex1", VerdictStatus::Fail, 0))
                .unwrap();
        }
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"record\":\"verdict\",\"entr");
        std::fs::write(&path, &content).unwrap();
        let store = JournalStore::open(&path).unwrap();
        assert_eq!(store.read_user_entries("u1").unwrap().len(), 1);
        store
            .append(&entry("u1", "ex2", VerdictStatus::Pass, 10))
            .unwrap();
        drop(store);
        assert_eq!(
            JournalStore::open(&path)
                .unwrap()
                .read_user_entries("u1")
                .unwrap()
                .len(),
            2
        );

        std::fs::write(&path, format!("garbage\n{}", content)).unwrap();
        assert!(matches!(
            JournalStore::open(&path),
            Err(GradeError::Persistence(_))
        ));
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}
