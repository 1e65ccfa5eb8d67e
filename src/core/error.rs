//! 工作流错误类型
//!
//! - ProviderError：provider 自身报告的失败（「未命中」不是错误，用 Ok(None) 表示）
//! - WorkflowError：逃逸出某个阶段的致命错误，只在顶层由 FailsafeRecovery 接住

use thiserror::Error;

use crate::capabilities::Capability;

/// Provider 调用失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("provider failed: {0}")]
    Failed(String),

    #[error("invalid provider input: {0}")]
    InvalidInput(String),

    #[error("unsupported by provider: {0}")]
    Unsupported(String),
}

/// 运行过程中不可在阶段内恢复的错误（FatalWorkflowError）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("{capability} provider error: {source}")]
    Provider {
        capability: Capability,
        #[source]
        source: ProviderError,
    },

    #[error("{capability} provider timed out after {secs}s")]
    Timeout { capability: Capability, secs: u64 },

    #[error("workflow run cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal workflow error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// 失败涉及的 capability（如有）
    pub fn capability(&self) -> Option<Capability> {
        match self {
            WorkflowError::Provider { capability, .. } | WorkflowError::Timeout { capability, .. } => {
                Some(*capability)
            }
            _ => None,
        }
    }
}
