//! 核心编排层：错误、运行状态机、取消监管、失败兜底、编排器与构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use builder::{create_orchestrator_builder, OrchestratorBuilder};
pub use error::{ProviderError, WorkflowError};
pub use orchestrator::Orchestrator;
pub use recovery::FailsafeRecovery;
pub use session_supervisor::RunSupervisor;
pub use state::RunPhase;
