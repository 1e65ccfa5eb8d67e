//! 阶段 6：刀路生成
//!
//! 几何 provider 缺席时每个特征给出明确的 NotGenerated 占位：这不是错误也不是警告，
//! 置信度 100 表示「缺席被正确检测到」。

use async_trait::async_trait;

use super::{mean_confidence, StageExecutor, StageInput, StageRecorder};
use crate::capabilities::{Bounds, Capability, Toolpath, ToolpathGeometry, ToolpathRequest};
use crate::core::WorkflowError;
use crate::workflow::{StageName, StageOutcome, StageResult, ToolpathPlan};

const EMPTY_PATH_CONFIDENCE: u8 = 80;

pub struct ToolpathGeneration;

#[async_trait]
impl StageExecutor for ToolpathGeneration {
    fn stage(&self) -> StageName {
        StageName::ToolpathGeneration
    }

    async fn execute(&self, input: StageInput<'_>) -> Result<StageOutcome, WorkflowError> {
        let mut rec = StageRecorder::start(self.stage());
        let ctx = input.context;

        let Some(geometry) = input.registry.resolve::<dyn ToolpathGeometry>() else {
            rec.fallback(
                "toolpaths not generated",
                "ToolpathGeometry absent; each feature carries an explicit not-generated placeholder",
            );
            let toolpaths = ctx
                .features
                .iter()
                .map(|f| ToolpathPlan::NotGenerated {
                    feature_id: f.id.clone(),
                    reason: "ToolpathGeometry capability absent".to_string(),
                })
                .collect();
            return Ok(rec.finish(100, StageResult::ToolpathGeneration { toolpaths }));
        };

        let mut toolpaths = Vec::with_capacity(ctx.features.len());
        let mut confidences = Vec::with_capacity(ctx.features.len());
        for feature in &ctx.features {
            let (Some(selected), Some(planned)) =
                (ctx.tool_for(&feature.id), ctx.parameters_for(&feature.id))
            else {
                rec.warn(format!(
                    "feature {} has no tool or cutting parameters; toolpath skipped",
                    feature.id
                ));
                toolpaths.push(ToolpathPlan::NotGenerated {
                    feature_id: feature.id.clone(),
                    reason: "missing tool or cutting parameters".to_string(),
                });
                confidences.push(EMPTY_PATH_CONFIDENCE);
                continue;
            };
            let strategy = ctx
                .strategy_for(&feature.id)
                .map(|s| s.strategy.clone())
                .unwrap_or_else(|| super::default_strategy(feature.kind).to_string());

            let request = ToolpathRequest {
                feature: feature.clone(),
                strategy: strategy.clone(),
                bounds: Bounds::for_feature(feature),
                tool: selected.tool.clone(),
                rpm: planned.parameters.rpm,
                feed_mm_min: planned.parameters.feed_mm_min,
                depth_mm: planned.parameters.axial_depth_mm,
                stepover_mm: planned.parameters.radial_stepover_mm,
            };
            let path = input
                .caller
                .call(Capability::ToolpathGeometry, geometry.generate(&request))
                .await?;

            if path.moves.is_empty() {
                rec.warn(format!(
                    "geometry produced no moves for feature {} ({strategy})",
                    feature.id
                ));
                confidences.push(EMPTY_PATH_CONFIDENCE);
            } else {
                rec.note_data(
                    format!("generate toolpath for {}", feature.id),
                    format!("{strategy} with {}", selected.tool.id),
                    serde_json::json!({
                        "moves": path.moves.len(),
                        "estimated_time_s": path.estimated_time_s,
                    }),
                );
                confidences.push(100);
            }

            toolpaths.push(ToolpathPlan::Generated(Toolpath {
                feature_id: feature.id.clone(),
                tool_id: selected.tool.id.clone(),
                strategy,
                rpm: planned.parameters.rpm,
                moves: path.moves,
                estimated_time_s: path.estimated_time_s,
            }));
        }

        let confidence = mean_confidence(confidences, 100);
        Ok(rec.finish(confidence, StageResult::ToolpathGeneration { toolpaths }))
    }
}
