pub mod evaluator;

pub use evaluator::{Achievement, AchievementEvaluator, AchievementUnlock};
