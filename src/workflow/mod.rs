//! 工作流：数据模型、Run 构建器、置信度聚合、审计日志与阶段驱动引擎

pub mod audit;
pub mod builder;
pub mod confidence;
pub mod engine;
pub mod types;

pub use audit::{AuditLog, RetentionPolicy};
pub use builder::{RunBuilder, StageFailure, StageOutcome, WorkflowContext};
pub use confidence::{ConfidenceAggregator, ConfidenceWeights};
pub use engine::WorkflowEngine;
pub use types::*;
