//! 目标层：任务类型识别与跨轮次目标追踪

pub mod classifier;
pub mod tracker;

pub use classifier::{TaskClassifier, TaskProfile};
pub use tracker::{
    Attempt, CompletedObjective, ContinuationContext, Objective, ObjectiveStats, ObjectiveTracker,
};
