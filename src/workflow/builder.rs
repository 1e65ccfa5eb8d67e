//! Run 构建器
//!
//! 执行期间由控制器独占；每个阶段返回一个 StageOutcome（增量），通过 apply 以值语义合并，
//! 得到新的构建器。finalize / fail 消费构建器，产出不可变的 Run。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::capabilities::{ChosenStrategy, Feature, PlannedParameters, SelectedTool};
use crate::core::{RunPhase, WorkflowError};
use crate::workflow::confidence::ConfidenceAggregator;
use crate::workflow::types::*;

/// 阶段增量：一个阶段的完整产出
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reasoning: Vec<ReasoningEntry>,
    pub confidence: u8,
    pub fallback: bool,
    pub warnings: Vec<String>,
    pub result: StageResult,
}

impl StageOutcome {
    pub fn stage(&self) -> StageName {
        self.result.stage()
    }
}

/// 阶段执行失败：携带失败位置与失败前已完成的部分运行，交给 FailsafeRecovery
#[derive(Debug)]
pub struct StageFailure {
    pub failed_at: StageName,
    pub error: WorkflowError,
    pub partial: RunBuilder,
}

/// 阶段之间传递的累积上下文
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowContext {
    pub features: Vec<Feature>,
    pub material: Option<ResolvedMaterial>,
    pub tools: Vec<SelectedTool>,
    pub parameters: Vec<PlannedParameters>,
    pub strategies: Vec<ChosenStrategy>,
    pub toolpaths: Vec<ToolpathPlan>,
    pub validation: Option<ValidationSummary>,
    pub program: Option<EmittedProgram>,
}

impl WorkflowContext {
    fn absorb(&mut self, result: &StageResult) {
        match result {
            StageResult::InputAnalysis { features, .. } => self.features = features.clone(),
            StageResult::MaterialResolution(material) => self.material = Some(material.clone()),
            StageResult::ToolSelection { tools } => self.tools = tools.clone(),
            StageResult::ParameterCalculation { parameters } => self.parameters = parameters.clone(),
            StageResult::StrategySelection { strategies } => self.strategies = strategies.clone(),
            StageResult::ToolpathGeneration { toolpaths } => self.toolpaths = toolpaths.clone(),
            StageResult::Validation(summary) => {
                self.toolpaths = summary.toolpaths.clone();
                self.validation = Some(summary.clone());
            }
            StageResult::OutputGeneration(program) => self.program = Some(program.clone()),
        }
    }

    pub fn feature(&self, id: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }

    pub fn tool_for(&self, feature_id: &str) -> Option<&SelectedTool> {
        self.tools.iter().find(|t| t.feature_id == feature_id)
    }

    pub fn parameters_for(&self, feature_id: &str) -> Option<&PlannedParameters> {
        self.parameters.iter().find(|p| p.feature_id == feature_id)
    }

    pub fn strategy_for(&self, feature_id: &str) -> Option<&ChosenStrategy> {
        self.strategies.iter().find(|s| s.feature_id == feature_id)
    }
}

/// 进行中的 Run
#[derive(Debug, Clone)]
pub struct RunBuilder {
    id: RunId,
    started_at: DateTime<Utc>,
    phase: RunPhase,
    stages: Vec<Stage>,
    warnings: Vec<String>,
    context: WorkflowContext,
}

impl RunBuilder {
    pub fn new() -> Self {
        Self {
            id: format!("run_{}", uuid::Uuid::new_v4()),
            started_at: Utc::now(),
            phase: RunPhase::default(),
            stages: Vec::new(),
            warnings: Vec::new(),
            context: WorkflowContext::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.context
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// 追加一条运行级警告（只追加）
    pub fn warn(mut self, message: impl Into<String>) -> Self {
        self.warnings.push(message.into());
        self
    }

    /// 合并一个阶段增量；阶段必须与状态机当前阶段一致，否则连同构建器一起退回
    pub fn apply(mut self, outcome: StageOutcome) -> Result<Self, StageFailure> {
        let stage = outcome.stage();
        self.phase = match self.phase.advance(stage) {
            Ok(next) => next,
            Err(error) => {
                return Err(StageFailure {
                    failed_at: self.phase.current_stage().unwrap_or(stage),
                    error,
                    partial: self,
                })
            }
        };
        self.context.absorb(&outcome.result);
        self.warnings.extend(outcome.warnings);
        self.stages.push(Stage {
            name: stage,
            ordinal: stage.ordinal(),
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
            reasoning: outcome.reasoning,
            confidence: outcome.confidence.min(100),
            fallback: outcome.fallback,
            result: outcome.result,
        });
        Ok(self)
    }

    fn by_stage(&self) -> BTreeMap<StageName, u8> {
        self.stages.iter().map(|s| (s.name, s.confidence)).collect()
    }

    /// 成功结束：计算总体置信度并汇总结果
    pub fn finalize(self, aggregator: &ConfidenceAggregator) -> Result<Run, StageFailure> {
        if self.phase != RunPhase::Finalized {
            let error = WorkflowError::Internal(format!(
                "cannot finalize run in phase {:?}",
                self.phase
            ));
            return Err(StageFailure {
                failed_at: self.phase.current_stage().unwrap_or(StageName::OutputGeneration),
                error,
                partial: self,
            });
        }
        let confidence = aggregator.report(self.by_stage());
        let context = self.context;
        let compiled = CompiledResult {
            features: context.features,
            material: context.material,
            tools: context.tools,
            parameters: context.parameters,
            strategies: context.strategies,
            toolpaths: context.toolpaths,
            program: context.program,
            warnings: self.warnings.clone(),
            reasoning: reasoning_trace(&self.stages),
        };
        let finished_at = Utc::now();
        Ok(Run {
            id: self.id,
            started_at: self.started_at,
            finished_at,
            duration_ms: (finished_at - self.started_at).num_milliseconds(),
            phase: RunPhase::Finalized,
            stages: self.stages,
            confidence,
            warnings: self.warnings,
            result: Some(RunOutput::Compiled(Box::new(compiled))),
            success: true,
            error: None,
        })
    }

    /// 失败结束：保留失败前已完成的阶段，未执行阶段按中性值计入总体置信度
    pub fn fail(
        self,
        error: RunError,
        result: Option<RunOutput>,
        aggregator: &ConfidenceAggregator,
    ) -> Run {
        let confidence = aggregator.report(self.by_stage());
        let finished_at = Utc::now();
        Run {
            id: self.id,
            started_at: self.started_at,
            finished_at,
            duration_ms: (finished_at - self.started_at).num_milliseconds(),
            phase: self.phase.fail(),
            stages: self.stages,
            confidence,
            warnings: self.warnings,
            result,
            success: false,
            error: Some(error),
        }
    }
}

impl Default for RunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{Dimensions, FeatureKind};

    fn outcome(result: StageResult, confidence: u8) -> StageOutcome {
        StageOutcome {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            reasoning: vec![ReasoningEntry {
                step: 1,
                action: "test".to_string(),
                why: "test".to_string(),
                data: None,
                severity: None,
            }],
            confidence,
            fallback: false,
            warnings: vec![],
            result,
        }
    }

    fn input_outcome() -> StageOutcome {
        let feature = Feature::new("f1", FeatureKind::Pocket, Dimensions::new(10.0, 10.0, 2.0));
        outcome(
            StageResult::InputAnalysis { features: vec![feature], inferred: false },
            100,
        )
    }

    #[test]
    fn test_apply_threads_context() {
        let builder = RunBuilder::new().apply(input_outcome()).unwrap();
        assert_eq!(builder.context().features.len(), 1);
        assert_eq!(builder.stages()[0].ordinal, 1);
        assert_eq!(builder.phase(), RunPhase::Stage(StageName::MaterialResolution));
    }

    #[test]
    fn test_apply_rejects_out_of_order_stage() {
        let result = RunBuilder::new().apply(outcome(
            StageResult::ToolSelection { tools: vec![] },
            100,
        ));
        let failure = result.unwrap_err();
        assert!(matches!(failure.error, WorkflowError::Internal(_)));
        assert_eq!(failure.failed_at, StageName::InputAnalysis);
        assert!(failure.partial.stages().is_empty());
    }

    #[test]
    fn test_finalize_requires_all_stages() {
        let builder = RunBuilder::new().apply(input_outcome()).unwrap();
        let failure = builder.finalize(&ConfidenceAggregator::default()).unwrap_err();
        assert_eq!(failure.failed_at, StageName::MaterialResolution);
        assert_eq!(failure.partial.stages().len(), 1);
    }

    #[test]
    fn test_fail_keeps_completed_stages() {
        let builder = RunBuilder::new().apply(input_outcome()).unwrap().warn("careful");
        let run = builder.fail(
            RunError {
                message: "boom".to_string(),
                failed_at: StageName::MaterialResolution,
                at: Utc::now(),
            },
            None,
            &ConfidenceAggregator::default(),
        );
        assert!(!run.success);
        assert_eq!(run.stages.len(), 1);
        assert_eq!(run.phase, RunPhase::Failed);
        assert_eq!(run.warnings, vec!["careful".to_string()]);
        // 0.10*100 + 0.90*50
        assert_eq!(run.confidence.overall, 55);
        assert_eq!(run.confidence.by_stage.len(), 1);
    }
}
