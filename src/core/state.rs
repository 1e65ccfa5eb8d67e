//! 运行状态机
//!
//! Stage1 … Stage8 → Finalized；任一阶段 → Failed。初始状态为 Stage(InputAnalysis)。

use serde::{Deserialize, Serialize};

use crate::core::WorkflowError;
use crate::workflow::StageName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunPhase {
    /// 正在执行（或即将执行）该阶段
    Stage(StageName),
    Finalized,
    Failed,
}

impl Default for RunPhase {
    fn default() -> Self {
        RunPhase::Stage(StageName::InputAnalysis)
    }
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Finalized | RunPhase::Failed)
    }

    pub fn current_stage(&self) -> Option<StageName> {
        match self {
            RunPhase::Stage(stage) => Some(*stage),
            _ => None,
        }
    }

    /// 当前阶段成功完成后的下一个状态
    pub fn advance(self, completed: StageName) -> Result<RunPhase, WorkflowError> {
        match self {
            RunPhase::Stage(current) if current == completed => Ok(match completed.next() {
                Some(next) => RunPhase::Stage(next),
                None => RunPhase::Finalized,
            }),
            other => Err(WorkflowError::Internal(format!(
                "stage {completed} completed out of order (phase {other:?})"
            ))),
        }
    }

    pub fn fail(self) -> RunPhase {
        RunPhase::Failed
    }
}
