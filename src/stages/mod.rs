//! 阶段执行器
//!
//! 八个阶段共享同一形状：从请求与前序输出构造输入 → 解析所需 capability →
//! 存在则走主路径、缺席则走文档化的降级路径 → 给出置信度与推理记录。
//! 每个 provider 调用只尝试一次，经 ProviderCaller 施加超时与取消。

mod input;
mod material;
mod output;
mod parameters;
mod strategy;
mod tooling;
mod toolpath;
mod validation;

use async_trait::async_trait;
use chrono::Utc;

use crate::capabilities::{CapabilityRegistry, ProviderCaller};
use crate::config::AppConfig;
use crate::core::WorkflowError;
use crate::workflow::{
    ReasoningEntry, Severity, StageName, StageOutcome, StageResult, WorkflowContext,
    WorkflowOptions, WorkflowRequest,
};

pub use input::InputAnalysis;
pub use material::MaterialResolution;
pub use output::{generic_program, OutputGeneration};
pub use parameters::{closed_form_parameters, ParameterCalculation};
pub use strategy::{default_strategy, StrategySelection};
pub use tooling::ToolSelection;
pub use toolpath::ToolpathGeneration;
pub use validation::Validation;

/// 阶段可见的只读输入
#[derive(Clone, Copy)]
pub struct StageInput<'a> {
    pub request: &'a WorkflowRequest,
    pub options: &'a WorkflowOptions,
    pub context: &'a WorkflowContext,
    pub registry: &'a CapabilityRegistry,
    pub caller: &'a ProviderCaller,
    pub config: &'a AppConfig,
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> StageName;

    async fn execute(&self, input: StageInput<'_>) -> Result<StageOutcome, WorkflowError>;
}

/// 按固定顺序排列的八个阶段
pub fn standard_pipeline() -> Vec<Box<dyn StageExecutor>> {
    vec![
        Box::new(InputAnalysis),
        Box::new(MaterialResolution),
        Box::new(ToolSelection),
        Box::new(ParameterCalculation),
        Box::new(StrategySelection),
        Box::new(ToolpathGeneration),
        Box::new(Validation),
        Box::new(OutputGeneration),
    ]
}

/// 阶段内的推理记录器：条目只追加，step 自动编号
pub struct StageRecorder {
    stage: StageName,
    started_at: chrono::DateTime<Utc>,
    reasoning: Vec<ReasoningEntry>,
    warnings: Vec<String>,
    fallback: bool,
}

impl StageRecorder {
    pub fn start(stage: StageName) -> Self {
        tracing::debug!(stage = %stage, "stage started");
        Self {
            stage,
            started_at: Utc::now(),
            reasoning: Vec::new(),
            warnings: Vec::new(),
            fallback: false,
        }
    }

    fn push(
        &mut self,
        action: String,
        why: String,
        data: Option<serde_json::Value>,
        severity: Option<Severity>,
    ) {
        self.reasoning.push(ReasoningEntry {
            step: self.reasoning.len() as u32 + 1,
            action,
            why,
            data,
            severity,
        });
    }

    pub fn note(&mut self, action: impl Into<String>, why: impl Into<String>) {
        self.push(action.into(), why.into(), None, None);
    }

    pub fn note_data(
        &mut self,
        action: impl Into<String>,
        why: impl Into<String>,
        data: serde_json::Value,
    ) {
        self.push(action.into(), why.into(), Some(data), None);
    }

    /// 记录一条降级路径；action 以 "fallback:" 开头以便检索
    pub fn fallback(&mut self, path: impl Into<String>, why: impl Into<String>) {
        let path = path.into();
        let why = why.into();
        tracing::info!(stage = %self.stage, path = %path, "{}", why);
        self.fallback = true;
        self.push(format!("fallback: {path}"), why, None, Some(Severity::Warning));
    }

    /// 同时写入运行级警告与一条推理记录
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.push(
            "warning".to_string(),
            message.clone(),
            None,
            Some(Severity::Warning),
        );
        self.warnings.push(message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.push("error".to_string(), message.clone(), None, Some(Severity::Error));
        self.warnings.push(format!("validation error: {message}"));
    }

    pub fn finish(self, confidence: u8, result: StageResult) -> StageOutcome {
        debug_assert_eq!(result.stage(), self.stage);
        tracing::debug!(stage = %self.stage, confidence, fallback = self.fallback, "stage finished");
        StageOutcome {
            started_at: self.started_at,
            finished_at: Utc::now(),
            reasoning: self.reasoning,
            confidence: confidence.min(100),
            fallback: self.fallback,
            warnings: self.warnings,
            result,
        }
    }
}

/// 整数置信度均值；空集合返回 default
pub(crate) fn mean_confidence(values: impl IntoIterator<Item = u8>, default: u8) -> u8 {
    let (sum, count) = values
        .into_iter()
        .fold((0u32, 0u32), |(s, c), v| (s + u32::from(v.min(100)), c + 1));
    if count == 0 {
        default
    } else {
        ((f64::from(sum) / f64::from(count)).round() as u32).min(100) as u8
    }
}
