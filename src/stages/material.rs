//! 阶段 2：材料解析
//!
//! 精确查表 → 近邻插值 → 保守默认材料。默认材料的置信度记为 100，但以 fallback 标记并附带警告。

use async_trait::async_trait;

use super::{StageExecutor, StageInput, StageRecorder};
use crate::capabilities::{Capability, MaterialInterpolation, MaterialLookup};
use crate::core::WorkflowError;
use crate::workflow::{
    MaterialSource, ResolvedMaterial, StageName, StageOutcome, StageResult,
};

pub struct MaterialResolution;

#[async_trait]
impl StageExecutor for MaterialResolution {
    fn stage(&self) -> StageName {
        StageName::MaterialResolution
    }

    async fn execute(&self, input: StageInput<'_>) -> Result<StageOutcome, WorkflowError> {
        let mut rec = StageRecorder::start(self.stage());

        let Some(name) = input.request.material_name() else {
            rec.warn("no material specified; using conservative default material profile");
            return Ok(finish_default(rec, &input));
        };

        match input.registry.resolve::<dyn MaterialLookup>() {
            Some(lookup) => {
                let found = input
                    .caller
                    .call(Capability::MaterialLookup, lookup.lookup(name))
                    .await?;
                if let Some(profile) = found {
                    rec.note_data(
                        "lookup material",
                        format!("exact match for \"{name}\""),
                        serde_json::json!({
                            "category": profile.category,
                            "surface_speed_m_min": profile.surface_speed_m_min,
                        }),
                    );
                    let resolved = ResolvedMaterial {
                        profile,
                        source: MaterialSource::Database,
                        confidence: 100,
                        fallback: false,
                    };
                    return Ok(rec.finish(100, StageResult::MaterialResolution(resolved)));
                }
                rec.note("lookup material", format!("\"{name}\" not found in material database"));
            }
            None => rec.fallback(
                "material interpolation",
                "MaterialLookup absent; trying nearest-neighbour interpolation",
            ),
        }

        match input.registry.resolve::<dyn MaterialInterpolation>() {
            Some(interpolation) => {
                let hints = input.request.material_hints.clone().unwrap_or_default();
                let estimate = input
                    .caller
                    .call(
                        Capability::MaterialInterpolation,
                        interpolation.interpolate(name, &hints),
                    )
                    .await?;
                if let Some(estimate) = estimate {
                    let confidence = estimate.confidence.min(100);
                    rec.note_data(
                        "interpolate material",
                        format!(
                            "\"{name}\" interpolated from {}",
                            estimate.based_on.join(", ")
                        ),
                        serde_json::json!({ "confidence": confidence }),
                    );
                    let resolved = ResolvedMaterial {
                        profile: estimate.profile,
                        source: MaterialSource::Interpolated { based_on: estimate.based_on },
                        confidence,
                        fallback: false,
                    };
                    return Ok(rec.finish(confidence, StageResult::MaterialResolution(resolved)));
                }
                rec.note(
                    "interpolate material",
                    format!("no neighbour close enough to \"{name}\""),
                );
            }
            None => rec.fallback(
                "skip interpolation",
                "MaterialInterpolation absent; no estimate possible",
            ),
        }

        rec.warn(format!(
            "material \"{name}\" could not be resolved; using conservative default material profile"
        ));
        Ok(finish_default(rec, &input))
    }
}

fn finish_default(mut rec: StageRecorder, input: &StageInput<'_>) -> StageOutcome {
    let profile = input.config.material_default.profile();
    rec.fallback(
        "default material",
        format!(
            "conservative profile \"{}\" (Vc {} m/min)",
            profile.name, profile.surface_speed_m_min
        ),
    );
    let resolved = ResolvedMaterial {
        profile,
        source: MaterialSource::Default,
        confidence: 100,
        fallback: true,
    };
    rec.finish(100, StageResult::MaterialResolution(resolved))
}
