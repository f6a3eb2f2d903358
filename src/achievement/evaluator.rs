/// Point-threshold achievements
use crate::config::types::{GradeError, Result};
use crate::ledger::store::PersistenceStore;
use crate::progress::aggregator::ProgressAggregator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Total lesson points needed to unlock
    pub points_required: u32,
}

/// Created once per (user, achievement); never removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementUnlock {
    pub user_id: String,
    pub achievement_id: String,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AchievementEvaluator {
    achievements: Vec<Achievement>,
}

impl AchievementEvaluator {
    pub fn new(mut achievements: Vec<Achievement>) -> Result<Self> {
        let mut seen = HashSet::new();
        for achievement in &achievements {
            if !seen.insert(achievement.id.as_str()) {
                return Err(GradeError::Configuration(format!(
                    "duplicate achievement id '{}'",
                    achievement.id
                )));
            }
        }
        achievements.sort_by(|a, b| {
            a.points_required
                .cmp(&b.points_required)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(Self { achievements })
    }

    /// Load a JSON array of achievements
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GradeError::Configuration(format!(
                "read achievements {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::new(serde_json::from_str(&content)?)
    }

    pub fn achievements(&self) -> &[Achievement] {
        &self.achievements
    }

    pub fn get(&self, id: &str) -> Option<&Achievement> {
        self.achievements.iter().find(|a| a.id == id)
    }

    /// Unlock every achievement whose threshold the user's total now meets.
    ///
    /// Returns only the unlocks created by this call, so a second call with
    /// no new points returns nothing.
    pub fn evaluate(
        &self,
        store: &dyn PersistenceStore,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<AchievementUnlock>> {
        if self.achievements.is_empty() {
            return Ok(Vec::new());
        }
        let total = ProgressAggregator::total_points(store, user_id)?;
        let already: HashSet<String> = store
            .unlocks(user_id)?
            .into_iter()
            .map(|u| u.achievement_id)
            .collect();

        let mut unlocked = Vec::new();
        for achievement in &self.achievements {
            if u64::from(achievement.points_required) > total {
                break;
            }
            if already.contains(&achievement.id) {
                continue;
            }
            let unlock = AchievementUnlock {
                user_id: user_id.to_string(),
                achievement_id: achievement.id.clone(),
                unlocked_at: at,
            };
            if store.upsert_achievement_unlock(&unlock)? {
                log::info!("User {} unlocked achievement '{}'", user_id, achievement.id);
                unlocked.push(unlock);
            }
        }
        Ok(unlocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::MemoryStore;
    use crate::progress::aggregator::ProgressRecord;

    fn achievement(id: &str, points: u32) -> Achievement {
        Achievement {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            image_url: None,
            points_required: points,
        }
    }

    fn give_points(store: &MemoryStore, lesson: &str, points: u32) {
        store
            .upsert_progress(&ProgressRecord {
                user_id: "u1".to_string(),
                lesson_id: lesson.to_string(),
                completed: true,
                points_earned: points,
                updated_at: Utc::now(),
            })
            .unwrap();
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = AchievementEvaluator::new(vec![achievement("a", 1), achievement("a", 2)]);
        assert!(matches!(result, Err(GradeError::Configuration(_))));
    }

    #[test]
    fn test_threshold_crossing_unlocks_once() {
        let evaluator =
            AchievementEvaluator::new(vec![achievement("twenty", 20), achievement("ten", 10)])
                .unwrap();
        let store = MemoryStore::new();

        give_points(&store, "l1", 10);
        let first = evaluator.evaluate(&store, "u1", Utc::now()).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].achievement_id, "ten");

        assert!(evaluator.evaluate(&store, "u1", Utc::now()).unwrap().is_empty());

        give_points(&store, "l2", 10);
        let second = evaluator.evaluate(&store, "u1", Utc::now()).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].achievement_id, "twenty");
        assert_eq!(store.unlocks("u1").unwrap().len(), 2);
    }

    #[test]
    fn test_zero_threshold_unlocks_without_points() {
        let evaluator = AchievementEvaluator::new(vec![achievement("welcome", 0)]).unwrap();
        let store = MemoryStore::new();
        assert_eq!(evaluator.evaluate(&store, "u1", Utc::now()).unwrap().len(), 1);
    }

    #[test]
    fn test_load_from_json() {
        let path = std::env::temp_dir().join(format!("gradebox-ach-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"[{"id":"first","title":"First Steps","points_required":10,"image_url":"/img/first.png"}]"#,
        )
        .unwrap();
        let evaluator = AchievementEvaluator::load_from_file(&path).unwrap();
        assert_eq!(evaluator.get("first").unwrap().points_required, 10);
        std::fs::remove_file(&path).unwrap();
    }
}
