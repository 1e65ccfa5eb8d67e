//! 置信度聚合
//!
//! 用八个固定权重（可配置）对各阶段置信度加权平均，得到 0-100 的总体置信度。
//! 未执行的阶段按中性默认值计入，因此对任意已完成阶段子集都有定义。
//! 权重按其总和归一化；总和非正或非有限时退回默认权重。

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::workflow::{ConfidenceReport, StageName};

/// 各阶段权重，偏向参数计算、刀路生成与校验等高风险阶段
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub input_analysis: f64,
    pub material_resolution: f64,
    pub tool_selection: f64,
    pub parameter_calculation: f64,
    pub strategy_selection: f64,
    pub toolpath_generation: f64,
    pub validation: f64,
    pub output_generation: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            input_analysis: 0.10,
            material_resolution: 0.12,
            tool_selection: 0.12,
            parameter_calculation: 0.18,
            strategy_selection: 0.08,
            toolpath_generation: 0.15,
            validation: 0.15,
            output_generation: 0.10,
        }
    }
}

impl ConfidenceWeights {
    pub fn weight(&self, stage: StageName) -> f64 {
        match stage {
            StageName::InputAnalysis => self.input_analysis,
            StageName::MaterialResolution => self.material_resolution,
            StageName::ToolSelection => self.tool_selection,
            StageName::ParameterCalculation => self.parameter_calculation,
            StageName::StrategySelection => self.strategy_selection,
            StageName::ToolpathGeneration => self.toolpath_generation,
            StageName::Validation => self.validation,
            StageName::OutputGeneration => self.output_generation,
        }
    }

    /// 负值与非有限值按 0 计
    pub fn total(&self) -> f64 {
        StageName::ALL
            .iter()
            .map(|s| sanitize(self.weight(*s)))
            .sum()
    }
}

fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// 纯函数式聚合器：相同输入恒得相同输出
#[derive(Debug, Clone)]
pub struct ConfidenceAggregator {
    weights: ConfidenceWeights,
    neutral: u8,
}

impl ConfidenceAggregator {
    pub fn new(weights: ConfidenceWeights, neutral: u8) -> Self {
        let weights = if weights.total() > 0.0 {
            weights
        } else {
            tracing::warn!("confidence weights sum to zero, using defaults");
            ConfidenceWeights::default()
        };
        Self {
            weights,
            neutral: neutral.min(100),
        }
    }

    pub fn weights(&self) -> &ConfidenceWeights {
        &self.weights
    }

    pub fn aggregate(&self, by_stage: &BTreeMap<StageName, u8>) -> u8 {
        let total = self.weights.total();
        let weighted: f64 = StageName::ALL
            .iter()
            .map(|stage| {
                let score = by_stage.get(stage).copied().unwrap_or(self.neutral).min(100);
                sanitize(self.weights.weight(*stage)) * f64::from(score)
            })
            .sum();
        (weighted / total).round().clamp(0.0, 100.0) as u8
    }

    pub fn report(&self, by_stage: BTreeMap<StageName, u8>) -> ConfidenceReport {
        ConfidenceReport {
            overall: self.aggregate(&by_stage),
            by_stage,
        }
    }
}

impl Default for ConfidenceAggregator {
    fn default() -> Self {
        Self::new(ConfidenceWeights::default(), 50)
    }
}
