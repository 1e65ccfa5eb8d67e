//! Millwright - 可解释的分阶段 CNC 加工工作流编排器
//!
//! 模块划分：
//! - **capabilities**: provider 契约、注册表与带超时/取消的调用器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、失败兜底、运行状态机与取消监管
//! - **observability**: tracing 订阅器初始化
//! - **providers**: 每个 capability 的内置参考实现
//! - **stages**: 八个阶段执行器
//! - **workflow**: 阶段驱动、不可变运行构建器、置信度聚合与审计日志

pub mod capabilities;
pub mod config;
pub mod core;
pub mod observability;
pub mod providers;
pub mod stages;
pub mod workflow;

pub use crate::core::{create_orchestrator_builder, Orchestrator, OrchestratorBuilder};
pub use crate::workflow::{Run, WorkflowOptions, WorkflowRequest};
