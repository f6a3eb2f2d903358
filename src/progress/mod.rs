pub mod aggregator;

pub use aggregator::{CourseProgress, ProgressAggregator, ProgressRecord};
