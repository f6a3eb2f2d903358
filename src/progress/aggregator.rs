/// Per-lesson and per-course progress derived from the verdict stream
use crate::config::types::Result;
use crate::ledger::store::{LedgerEntry, PersistenceStore};
use crate::model::content::ContentCatalog;
use crate::model::verdict::SubmissionKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress of one user on one lesson; points never decrease.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub user_id: String,
    pub lesson_id: String,
    pub completed: bool,
    pub points_earned: u32,
    /// Timestamp of the submission that last raised this record
    pub updated_at: DateTime<Utc>,
}

/// Result of folding one verdict into progress
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressOutcome {
    /// Record after the verdict; None if the user has no progress on the lesson
    pub record: Option<ProgressRecord>,
    pub changed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub course_id: String,
    pub lessons_total: usize,
    pub lessons_completed: usize,
    pub points_earned: u32,
    /// Whole percent, rounded down
    pub completion_percent: u32,
}

pub struct ProgressAggregator;

impl ProgressAggregator {
    /// Fold one ledger entry into the owning lesson's record.
    ///
    /// Only passing `Grade` submissions move progress. Failures and editor
    /// runs leave the record as it was.
    pub fn on_verdict(store: &dyn PersistenceStore, entry: &LedgerEntry) -> Result<ProgressOutcome> {
        let Some(lesson_id) = entry.lesson_id.as_deref() else {
            return Ok(ProgressOutcome {
                record: None,
                changed: false,
            });
        };
        let user_id = entry.submission.user_id.as_str();
        let existing = store.progress_for(user_id, lesson_id)?;

        if entry.submission.kind != SubmissionKind::Grade || !entry.verdict.passed() {
            return Ok(ProgressOutcome {
                record: existing,
                changed: false,
            });
        }

        if let Some(current) = &existing {
            if current.completed && current.points_earned >= entry.exercise_points {
                return Ok(ProgressOutcome {
                    record: existing,
                    changed: false,
                });
            }
        }

        let points_earned = existing
            .as_ref()
            .map(|r| r.points_earned)
            .unwrap_or(0)
            .max(entry.exercise_points);
        let record = ProgressRecord {
            user_id: user_id.to_string(),
            lesson_id: lesson_id.to_string(),
            completed: true,
            points_earned,
            updated_at: entry.submission.timestamp,
        };
        if !store.upsert_progress(&record)? {
            return Ok(ProgressOutcome {
                record: store.progress_for(user_id, lesson_id)?,
                changed: false,
            });
        }
        log::debug!(
            "Progress for {} on {}: {} points",
            user_id,
            lesson_id,
            points_earned
        );
        Ok(ProgressOutcome {
            record: Some(record),
            changed: true,
        })
    }

    /// Sum of points earned across all lessons
    pub fn total_points(store: &dyn PersistenceStore, user_id: &str) -> Result<u64> {
        Ok(store
            .progress_records(user_id)?
            .iter()
            .map(|r| u64::from(r.points_earned))
            .sum())
    }

    pub fn course_progress(
        store: &dyn PersistenceStore,
        catalog: &ContentCatalog,
        user_id: &str,
        course_id: &str,
    ) -> Result<CourseProgress> {
        let lessons = catalog.lessons_of_course(course_id);
        let mut lessons_completed = 0;
        let mut points_earned = 0u32;
        for lesson in &lessons {
            if let Some(record) = store.progress_for(user_id, &lesson.id)? {
                if record.completed {
                    lessons_completed += 1;
                }
                points_earned = points_earned.saturating_add(record.points_earned);
            }
        }
        let completion_percent = if lessons.is_empty() {
            0
        } else {
            (lessons_completed * 100 / lessons.len()) as u32
        };
        Ok(CourseProgress {
            course_id: course_id.to_string(),
            lessons_total: lessons.len(),
            lessons_completed,
            points_earned,
            completion_percent,
        })
    }
}
