//! Read-only course content
//!
//! Course → module → lesson → exercise hierarchy supplied by the content
//! collaborator. The engine never mutates it.

use crate::config::types::{GradeError, LanguageId, Result};
use crate::model::exercise::Exercise;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub programming_language: LanguageId,
    #[serde(default)]
    pub difficulty_level: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CourseModule {
    pub id: String,
    pub course_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub order_index: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub module_id: String,
    pub title: String,
    pub order_index: i32,
}

/// Lookup surface the engine needs from the content collaborator.
pub trait ContentSource: Send + Sync {
    fn exercise(&self, exercise_id: &str) -> Option<Arc<Exercise>>;
}

/// On-disk catalogue document
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogDocument {
    pub courses: Vec<Course>,
    pub modules: Vec<CourseModule>,
    pub lessons: Vec<Lesson>,
    pub exercises: Vec<Exercise>,
}

/// In-memory catalogue with ordered traversal
#[derive(Debug, Default)]
pub struct ContentCatalog {
    courses: HashMap<String, Course>,
    modules: HashMap<String, CourseModule>,
    lessons: HashMap<String, Lesson>,
    exercises: HashMap<String, Arc<Exercise>>,
}

impl ContentCatalog {
    /// Build a catalogue, resolving exercise languages from their course.
    pub fn from_document(doc: CatalogDocument) -> Result<Self> {
        let mut catalog = ContentCatalog {
            courses: doc.courses.into_iter().map(|c| (c.id.clone(), c)).collect(),
            modules: doc.modules.into_iter().map(|m| (m.id.clone(), m)).collect(),
            lessons: doc.lessons.into_iter().map(|l| (l.id.clone(), l)).collect(),
            exercises: HashMap::new(),
        };

        for module in catalog.modules.values() {
            if !catalog.courses.contains_key(&module.course_id) {
                return Err(GradeError::Configuration(format!(
                    "module {} references unknown course {}",
                    module.id, module.course_id
                )));
            }
        }
        for lesson in catalog.lessons.values() {
            if !catalog.modules.contains_key(&lesson.module_id) {
                return Err(GradeError::Configuration(format!(
                    "lesson {} references unknown module {}",
                    lesson.id, lesson.module_id
                )));
            }
        }

        for mut exercise in doc.exercises {
            if exercise.language.is_none() {
                exercise.language = exercise
                    .lesson_id
                    .as_deref()
                    .and_then(|lesson_id| catalog.course_of_lesson(lesson_id))
                    .map(|course| course.programming_language.clone());
            }
            catalog
                .exercises
                .insert(exercise.id.clone(), Arc::new(exercise));
        }

        Ok(catalog)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GradeError::Configuration(format!(
                "Failed to read catalog {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let doc: CatalogDocument = serde_json::from_str(&content)?;
        Self::from_document(doc)
    }

    pub fn course(&self, course_id: &str) -> Option<&Course> {
        self.courses.get(course_id)
    }

    pub fn lesson(&self, lesson_id: &str) -> Option<&Lesson> {
        self.lessons.get(lesson_id)
    }

    pub fn course_of_lesson(&self, lesson_id: &str) -> Option<&Course> {
        let lesson = self.lessons.get(lesson_id)?;
        let module = self.modules.get(&lesson.module_id)?;
        self.courses.get(&module.course_id)
    }

    /// Modules of a course in authored order
    pub fn modules_of_course(&self, course_id: &str) -> Vec<&CourseModule> {
        let mut modules: Vec<&CourseModule> = self
            .modules
            .values()
            .filter(|m| m.course_id == course_id)
            .collect();
        modules.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));
        modules
    }

    /// Lessons of a module in authored order
    pub fn lessons_of_module(&self, module_id: &str) -> Vec<&Lesson> {
        let mut lessons: Vec<&Lesson> = self
            .lessons
            .values()
            .filter(|l| l.module_id == module_id)
            .collect();
        lessons.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));
        lessons
    }

    /// All lessons of a course, module order first, then lesson order
    pub fn lessons_of_course(&self, course_id: &str) -> Vec<&Lesson> {
        self.modules_of_course(course_id)
            .into_iter()
            .flat_map(|m| self.lessons_of_module(&m.id))
            .collect()
    }

    pub fn exercises_of_lesson(&self, lesson_id: &str) -> Vec<Arc<Exercise>> {
        let mut exercises: Vec<Arc<Exercise>> = self
            .exercises
            .values()
            .filter(|e| e.lesson_id.as_deref() == Some(lesson_id))
            .cloned()
            .collect();
        exercises.sort_by(|a, b| a.id.cmp(&b.id));
        exercises
    }
}

impl ContentSource for ContentCatalog {
    fn exercise(&self, exercise_id: &str) -> Option<Arc<Exercise>> {
        self.exercises.get(exercise_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> CatalogDocument {
        serde_json::from_value(serde_json::json!({
            "courses": [
                { "id": "c1", "title": "Python basics", "programming_language": "Python", "difficulty_level": "beginner" }
            ],
            "modules": [
                { "id": "m2", "course_id": "c1", "title": "Loops", "order_index": 2 },
                { "id": "m1", "course_id": "c1", "title": "Intro", "order_index": 1 }
            ],
            "lessons": [
                { "id": "l3", "module_id": "m2", "title": "for", "order_index": 1 },
                { "id": "l2", "module_id": "m1", "title": "input", "order_index": 2 },
                { "id": "l1", "module_id": "m1", "title": "print", "order_index": 1 }
            ],
            "exercises": [
                { "id": "e1", "lesson_id": "l1", "solution_code": "print(1)",
                  "test_cases": [ { "input": "", "expected_output": "1" } ] }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_lessons_follow_authored_order() {
        let catalog = ContentCatalog::from_document(document()).unwrap();
        let ids: Vec<&str> = catalog
            .lessons_of_course("c1")
            .iter()
            .map(|l| l.id.as_str())
            .collect();
        assert_eq!(ids, vec!["l1", "l2", "l3"]);
    }

    #[test]
    fn test_exercise_language_inherited_from_course() {
        let catalog = ContentCatalog::from_document(document()).unwrap();
        let exercise = catalog.exercise("e1").unwrap();
        assert_eq!(exercise.language, Some(LanguageId::new("python")));
        assert_eq!(catalog.exercises_of_lesson("l1").len(), 1);
    }

    #[test]
    fn test_dangling_lesson_rejected() {
        let mut doc = document();
        doc.lessons.push(Lesson {
            id: "orphan".into(),
            module_id: "missing".into(),
            title: "x".into(),
            order_index: 0,
        });
        assert!(ContentCatalog::from_document(doc).is_err());
    }
}
