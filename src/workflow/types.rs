//! 工作流类型定义
//!
//! 定义请求、运行记录（Run）、阶段记录（Stage）、推理条目与置信度报告等核心数据类型。
//! Run 一经 finalize 即不可变，以 Arc<Run> 的形式交给调用方与审计日志。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capabilities::{
    BudgetTier, ChosenStrategy, Feature, MaterialHints, MaterialProfile, PlannedParameters,
    SafeResult, SelectedTool, Stock, Toolpath,
};
use crate::core::RunPhase;

pub type RunId = String;

/// 八个固定阶段，按执行顺序声明
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    InputAnalysis,
    MaterialResolution,
    ToolSelection,
    ParameterCalculation,
    StrategySelection,
    ToolpathGeneration,
    Validation,
    OutputGeneration,
}

impl StageName {
    pub const ALL: [StageName; 8] = [
        StageName::InputAnalysis,
        StageName::MaterialResolution,
        StageName::ToolSelection,
        StageName::ParameterCalculation,
        StageName::StrategySelection,
        StageName::ToolpathGeneration,
        StageName::Validation,
        StageName::OutputGeneration,
    ];

    /// 序号 1-8
    pub fn ordinal(self) -> u8 {
        match self {
            StageName::InputAnalysis => 1,
            StageName::MaterialResolution => 2,
            StageName::ToolSelection => 3,
            StageName::ParameterCalculation => 4,
            StageName::StrategySelection => 5,
            StageName::ToolpathGeneration => 6,
            StageName::Validation => 7,
            StageName::OutputGeneration => 8,
        }
    }

    pub fn next(self) -> Option<StageName> {
        StageName::ALL.get(self.ordinal() as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::InputAnalysis => "input_analysis",
            StageName::MaterialResolution => "material_resolution",
            StageName::ToolSelection => "tool_selection",
            StageName::ParameterCalculation => "parameter_calculation",
            StageName::StrategySelection => "strategy_selection",
            StageName::ToolpathGeneration => "toolpath_generation",
            StageName::Validation => "validation",
            StageName::OutputGeneration => "output_generation",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 调用方提交的加工请求，提交后不可变
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowRequest {
    /// 自由文本描述，如 "2x2x0.5in pocket"
    pub text: Option<String>,
    /// 结构化特征列表
    pub features: Vec<Feature>,
    pub material: Option<String>,
    pub material_hints: Option<MaterialHints>,
    pub machine: Option<String>,
    pub budget: BudgetTier,
    pub stock: Option<Stock>,
}

impl WorkflowRequest {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn from_features(features: Vec<Feature>) -> Self {
        Self {
            features,
            ..Self::default()
        }
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }

    pub fn with_machine(mut self, machine: impl Into<String>) -> Self {
        self.machine = Some(machine.into());
        self
    }

    pub fn with_stock(mut self, stock: Stock) -> Self {
        self.stock = Some(stock);
        self
    }

    pub fn with_budget(mut self, budget: BudgetTier) -> Self {
        self.budget = budget;
        self
    }

    /// 去掉首尾空白后非空的材料名
    pub fn material_name(&self) -> Option<&str> {
        self.material.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn machine_name(&self) -> Option<&str> {
        self.machine.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn description(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// 单次运行的选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowOptions {
    /// 目标控制器方言；为空时使用配置中的 default_controller
    pub controller: Option<String>,
    /// 允许包容校验器自动修正越界刀路
    pub auto_adjust_containment: bool,
    pub program_name: Option<String>,
    pub coolant: bool,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            controller: None,
            auto_adjust_containment: true,
            program_name: None,
            coolant: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// 可解释记录：阶段内只追加，写入后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningEntry {
    pub step: u32,
    pub action: String,
    pub why: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// 材料来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MaterialSource {
    Database,
    Interpolated { based_on: Vec<String> },
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMaterial {
    pub profile: MaterialProfile,
    pub source: MaterialSource,
    pub confidence: u8,
    /// 使用了保守默认材料
    pub fallback: bool,
}

/// 刀路规划结果：生成或明确标注未生成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolpathPlan {
    Generated(Toolpath),
    NotGenerated { feature_id: String, reason: String },
}

impl ToolpathPlan {
    pub fn feature_id(&self) -> &str {
        match self {
            ToolpathPlan::Generated(path) => &path.feature_id,
            ToolpathPlan::NotGenerated { feature_id, .. } => feature_id,
        }
    }

    pub fn generated(&self) -> Option<&Toolpath> {
        match self {
            ToolpathPlan::Generated(path) => Some(path),
            ToolpathPlan::NotGenerated { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// 刀路被自动修正的特征 ID
    pub adjusted: Vec<String>,
    /// 修正后的刀路（替换后续阶段看到的刀路）
    pub toolpaths: Vec<ToolpathPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedProgram {
    pub controller: String,
    pub gcode: Vec<String>,
    pub confidence: u8,
    /// 通用最小指令集（后处理器缺席或不支持该方言）
    pub reduced_fidelity: bool,
}

/// 各阶段的结果载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data", rename_all = "snake_case")]
pub enum StageResult {
    InputAnalysis { features: Vec<Feature>, inferred: bool },
    MaterialResolution(ResolvedMaterial),
    ToolSelection { tools: Vec<SelectedTool> },
    ParameterCalculation { parameters: Vec<PlannedParameters> },
    StrategySelection { strategies: Vec<ChosenStrategy> },
    ToolpathGeneration { toolpaths: Vec<ToolpathPlan> },
    Validation(ValidationSummary),
    OutputGeneration(EmittedProgram),
}

impl StageResult {
    pub fn stage(&self) -> StageName {
        match self {
            StageResult::InputAnalysis { .. } => StageName::InputAnalysis,
            StageResult::MaterialResolution(_) => StageName::MaterialResolution,
            StageResult::ToolSelection { .. } => StageName::ToolSelection,
            StageResult::ParameterCalculation { .. } => StageName::ParameterCalculation,
            StageResult::StrategySelection { .. } => StageName::StrategySelection,
            StageResult::ToolpathGeneration { .. } => StageName::ToolpathGeneration,
            StageResult::Validation(_) => StageName::Validation,
            StageResult::OutputGeneration(_) => StageName::OutputGeneration,
        }
    }
}

/// 单个阶段的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: StageName,
    pub ordinal: u8,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reasoning: Vec<ReasoningEntry>,
    pub confidence: u8,
    /// 该阶段走了至少一条降级路径
    pub fallback: bool,
    pub result: StageResult,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub overall: u8,
    pub by_stage: BTreeMap<StageName, u8>,
}

/// 一个阶段的推理轨迹
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReasoning {
    pub stage: StageName,
    pub entries: Vec<ReasoningEntry>,
}

/// 成功运行的汇总结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledResult {
    pub features: Vec<Feature>,
    pub material: Option<ResolvedMaterial>,
    pub tools: Vec<SelectedTool>,
    pub parameters: Vec<PlannedParameters>,
    pub strategies: Vec<ChosenStrategy>,
    pub toolpaths: Vec<ToolpathPlan>,
    pub program: Option<EmittedProgram>,
    pub warnings: Vec<String>,
    pub reasoning: Vec<StageReasoning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RunOutput {
    Compiled(Box<CompiledResult>),
    SafeDefault(SafeResult),
}

/// 失败详情
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub message: String,
    pub failed_at: StageName,
    pub at: DateTime<Utc>,
}

/// 一次工作流调用的完整记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub phase: RunPhase,
    pub stages: Vec<Stage>,
    pub confidence: ConfidenceReport,
    pub warnings: Vec<String>,
    pub result: Option<RunOutput>,
    pub success: bool,
    pub error: Option<RunError>,
}

impl Run {
    pub fn stage(&self, name: StageName) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn compiled(&self) -> Option<&CompiledResult> {
        match &self.result {
            Some(RunOutput::Compiled(result)) => Some(result),
            _ => None,
        }
    }

    pub fn safe_default(&self) -> Option<&SafeResult> {
        match &self.result {
            Some(RunOutput::SafeDefault(result)) => Some(result),
            _ => None,
        }
    }

    /// 按阶段顺序的完整推理轨迹
    pub fn reasoning(&self) -> Vec<StageReasoning> {
        reasoning_trace(&self.stages)
    }
}

pub(crate) fn reasoning_trace(stages: &[Stage]) -> Vec<StageReasoning> {
    stages
        .iter()
        .map(|s| StageReasoning {
            stage: s.name,
            entries: s.reasoning.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordinals_are_contiguous() {
        for (i, stage) in StageName::ALL.iter().enumerate() {
            assert_eq!(stage.ordinal() as usize, i + 1);
        }
        assert_eq!(StageName::InputAnalysis.next(), Some(StageName::MaterialResolution));
        assert_eq!(StageName::OutputGeneration.next(), None);
    }

    #[test]
    fn test_request_normalizes_blank_fields() {
        let request = WorkflowRequest::from_text("  ").with_material("   ").with_machine(" vf2 ");
        assert_eq!(request.description(), None);
        assert_eq!(request.material_name(), None);
        assert_eq!(request.machine_name(), Some("vf2"));
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: WorkflowRequest =
            serde_json::from_str(r#"{"text": "2x2x0.5in pocket"}"#).unwrap();
        assert_eq!(request.budget, BudgetTier::Standard);
        assert!(request.features.is_empty());
        assert!(request.stock.is_none());
    }

    #[test]
    fn test_confidence_report_serializes_stage_keys() {
        let mut report = ConfidenceReport::default();
        report.by_stage.insert(StageName::Validation, 60);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["by_stage"]["validation"], 60);
    }
}
