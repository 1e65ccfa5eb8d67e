//! 阶段 4：切削参数计算
//!
//! 决策引擎缺席时按闭式公式计算：rpm = k·Vc/D（k = 1000/π），feed = rpm·fz·z。
//! 之后若有物理一致性 provider，检查挠度与颤振；颤振高风险时把主轴转速钳制到建议值，
//! 这是编排器唯一会改写前序计算结果的地方。

use async_trait::async_trait;

use super::{mean_confidence, StageExecutor, StageInput, StageRecorder};
use crate::capabilities::{
    Capability, ChatterRisk, CuttingParameters, Feature, FeatureKind, MaterialProfile,
    ParameterDecisionEngine, ParameterQuery, PhysicsConsistency, PlannedParameters, ToolSpec,
};
use crate::config::FallbackSection;
use crate::core::WorkflowError;
use crate::workflow::{StageName, StageOutcome, StageResult};

const CLOSED_FORM_CONFIDENCE: u8 = 70;

pub struct ParameterCalculation;

#[async_trait]
impl StageExecutor for ParameterCalculation {
    fn stage(&self) -> StageName {
        StageName::ParameterCalculation
    }

    async fn execute(&self, input: StageInput<'_>) -> Result<StageOutcome, WorkflowError> {
        let mut rec = StageRecorder::start(self.stage());
        let material = input
            .context
            .material
            .as_ref()
            .map(|m| m.profile.clone())
            .unwrap_or_else(|| input.config.material_default.profile());

        let engine = input.registry.resolve::<dyn ParameterDecisionEngine>();
        let physics = input.registry.resolve::<dyn PhysicsConsistency>();
        if engine.is_none() {
            rec.fallback(
                "closed-form parameters",
                format!(
                    "ParameterDecision absent; rpm = {:.1}*Vc/D capped at {}, feed = rpm*chip load*flutes",
                    input.config.fallback.spindle_constant, input.config.fallback.max_rpm
                ),
            );
        }
        if physics.is_none() {
            rec.fallback(
                "skip physics checks",
                "PhysicsConsistency absent; deflection and chatter not checked",
            );
        }

        let mut planned = Vec::with_capacity(input.context.tools.len());
        for selected in &input.context.tools {
            let feature = input.context.feature(&selected.feature_id).ok_or_else(|| {
                WorkflowError::Internal(format!(
                    "tool selected for unknown feature {}",
                    selected.feature_id
                ))
            })?;
            let tool = &selected.tool;

            let mut entry = match &engine {
                Some(engine) => {
                    let query = ParameterQuery {
                        tool: tool.clone(),
                        material: material.clone(),
                        operation: feature.kind,
                        feature: feature.clone(),
                        budget: input.request.budget,
                    };
                    let decision = input
                        .caller
                        .call(Capability::ParameterDecision, engine.decide(&query))
                        .await?;
                    rec.note_data(
                        format!("decide parameters for {}", feature.id),
                        format!(
                            "{:.0} rpm, {:.1} mm/min with {}",
                            decision.parameters.rpm, decision.parameters.feed_mm_min, tool.id
                        ),
                        serde_json::json!({ "steps": decision.reasoning_steps }),
                    );
                    PlannedParameters {
                        feature_id: feature.id.clone(),
                        tool_id: tool.id.clone(),
                        parameters: decision.parameters,
                        confidence: decision.confidence.min(100),
                        fallback: false,
                        adjusted_for_chatter: false,
                    }
                }
                None => {
                    let parameters =
                        closed_form_parameters(tool, &material, feature, &input.config.fallback);
                    rec.note(
                        format!("compute parameters for {}", feature.id),
                        format!(
                            "{:.0} rpm, {:.1} mm/min from Vc {} m/min on Ø{} mm",
                            parameters.rpm,
                            parameters.feed_mm_min,
                            material.surface_speed_m_min,
                            tool.diameter_mm
                        ),
                    );
                    PlannedParameters {
                        feature_id: feature.id.clone(),
                        tool_id: tool.id.clone(),
                        parameters,
                        confidence: CLOSED_FORM_CONFIDENCE,
                        fallback: true,
                        adjusted_for_chatter: false,
                    }
                }
            };

            if let Some(physics) = &physics {
                let deflection = input
                    .caller
                    .call(
                        Capability::PhysicsConsistency,
                        physics.check_deflection(tool, &entry.parameters, &material),
                    )
                    .await?;
                if !deflection.acceptable {
                    let advice = deflection
                        .recommendation
                        .as_deref()
                        .unwrap_or("reduce depth of cut");
                    rec.warn(format!(
                        "tool {} deflection {:.3} mm on {} is too high; {}",
                        tool.id, deflection.deflection_mm, feature.id, advice
                    ));
                }

                let chatter = input
                    .caller
                    .call(
                        Capability::PhysicsConsistency,
                        physics.check_chatter(tool, &entry.parameters, &material),
                    )
                    .await?;
                match (chatter.risk, chatter.suggested_rpm) {
                    (ChatterRisk::High, Some(safe)) if safe.is_finite() && safe > 0.0 => {
                        let from = entry.parameters.rpm;
                        let ceiling = safe.min(input.config.fallback.max_rpm);
                        if !clamp_spindle(&mut entry.parameters, tool, ceiling) {
                            rec.note(
                                format!("check chatter for {}", feature.id),
                                format!(
                                    "high chatter risk; suggested {safe:.0} rpm is not below {from:.0} rpm, spindle unchanged"
                                ),
                            );
                            planned.push(entry);
                            continue;
                        }
                        entry.adjusted_for_chatter = true;
                        rec.note_data(
                            format!("clamp spindle for {}", feature.id),
                            "high chatter risk; spindle speed lowered to the suggested safe value",
                            serde_json::json!({
                                "from_rpm": from,
                                "to_rpm": entry.parameters.rpm,
                                "feed_mm_min": entry.parameters.feed_mm_min,
                            }),
                        );
                    }
                    (ChatterRisk::High, _) => rec.warn(format!(
                        "high chatter risk on {} with no suggested spindle speed",
                        feature.id
                    )),
                    (risk, _) => rec.note(
                        format!("check chatter for {}", feature.id),
                        format!("{risk:?} chatter risk"),
                    ),
                }
            }

            planned.push(entry);
        }

        let confidence = mean_confidence(
            planned.iter().map(|p| p.confidence),
            CLOSED_FORM_CONFIDENCE,
        );
        Ok(rec.finish(
            confidence,
            StageResult::ParameterCalculation { parameters: planned },
        ))
    }
}

/// 闭式公式参数
pub fn closed_form_parameters(
    tool: &ToolSpec,
    material: &MaterialProfile,
    feature: &Feature,
    fallback: &FallbackSection,
) -> CuttingParameters {
    let diameter = if tool.diameter_mm.is_finite() && tool.diameter_mm > 0.0 {
        tool.diameter_mm
    } else {
        6.0
    };
    let flutes = if tool.flute_count > 0 {
        tool.flute_count
    } else {
        fallback.default_flute_count.max(1)
    };
    let rpm = (fallback.spindle_constant * material.surface_speed_m_min / diameter)
        .min(fallback.max_rpm)
        .max(0.0)
        .round();
    let feed = round1(rpm * material.chip_load_mm * f64::from(flutes));

    let feature_depth = feature.dimensions.depth;
    let axial_depth = match feature.kind {
        FeatureKind::Hole | FeatureKind::Thread if feature_depth > 0.0 => feature_depth,
        _ if feature_depth > 0.0 => feature_depth.min(0.5 * diameter),
        _ => 0.5 * diameter,
    };

    CuttingParameters {
        rpm,
        feed_mm_min: feed,
        chip_load_mm: material.chip_load_mm,
        axial_depth_mm: round3(axial_depth),
        radial_stepover_mm: round3(0.4 * diameter),
        surface_speed_m_min: material.surface_speed_m_min,
    }
}

/// 把主轴转速钳制到上限以内并按每齿进给同步重算进给与线速度；转速未降低时不改动，返回 false
fn clamp_spindle(parameters: &mut CuttingParameters, tool: &ToolSpec, ceiling_rpm: f64) -> bool {
    let rpm = parameters.rpm.min(ceiling_rpm).round();
    if rpm >= parameters.rpm {
        return false;
    }
    let flutes = f64::from(tool.flute_count.max(1));
    parameters.rpm = rpm;
    parameters.feed_mm_min = round1(parameters.rpm * parameters.chip_load_mm * flutes);
    parameters.surface_speed_m_min =
        round1(std::f64::consts::PI * tool.diameter_mm * parameters.rpm / 1000.0);
    true
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::capabilities::{
        ChatterCheck, DeflectionCheck, Dimensions, ParameterDecision, SelectedTool, ToolArchetype,
        ToolSource,
    };
    use crate::core::ProviderError;
    use crate::stages::test_support::Harness;
    use crate::workflow::{MaterialSource, ResolvedMaterial, WorkflowRequest};

    fn steel() -> MaterialProfile {
        MaterialProfile {
            name: "1018".to_string(),
            category: "steel".to_string(),
            hardness_hb: Some(126.0),
            surface_speed_m_min: 120.0,
            chip_load_mm: 0.04,
            machinability: 0.7,
        }
    }

    fn harness() -> Harness {
        let mut h = Harness::new(WorkflowRequest::default());
        h.context.features = vec![Feature::new(
            "p",
            FeatureKind::Pocket,
            Dimensions::new(30.0, 30.0, 8.0),
        )];
        h.context.material = Some(ResolvedMaterial {
            profile: steel(),
            source: MaterialSource::Database,
            confidence: 100,
            fallback: false,
        });
        h.context.tools = vec![SelectedTool {
            feature_id: "p".to_string(),
            tool: ToolSpec::nominal(ToolArchetype::EndMill, 10.0),
            alternatives: vec![],
            source: ToolSource::Catalog,
            confidence: None,
        }];
        h
    }

    struct Throwing;

    #[async_trait]
    impl ParameterDecisionEngine for Throwing {
        async fn decide(&self, _query: &ParameterQuery) -> Result<ParameterDecision, ProviderError> {
            Err(ProviderError::Failed("solver diverged".to_string()))
        }
    }

    struct Chattery(f64);

    #[async_trait]
    impl PhysicsConsistency for Chattery {
        async fn check_deflection(
            &self,
            _tool: &ToolSpec,
            _parameters: &CuttingParameters,
            _material: &MaterialProfile,
        ) -> Result<DeflectionCheck, ProviderError> {
            Ok(DeflectionCheck {
                acceptable: false,
                deflection_mm: 0.08,
                recommendation: Some("shorten stickout".to_string()),
            })
        }

        async fn check_chatter(
            &self,
            _tool: &ToolSpec,
            _parameters: &CuttingParameters,
            _material: &MaterialProfile,
        ) -> Result<ChatterCheck, ProviderError> {
            Ok(ChatterCheck { risk: ChatterRisk::High, suggested_rpm: Some(self.0) })
        }
    }

    #[test]
    fn test_closed_form_formula() {
        let tool = ToolSpec::nominal(ToolArchetype::EndMill, 10.0);
        let feature = Feature::new("p", FeatureKind::Pocket, Dimensions::new(30.0, 30.0, 8.0));
        let params = closed_form_parameters(&tool, &steel(), &feature, &FallbackSection::default());
        // 1000/π * 120 / 10 ≈ 3819.7
        assert_eq!(params.rpm, 3820.0);
        // 3820 * 0.04 * 3
        assert!((params.feed_mm_min - 458.4).abs() < 1e-9);
        assert_eq!(params.axial_depth_mm, 5.0);
        assert_eq!(params.radial_stepover_mm, 4.0);
    }

    #[test]
    fn test_closed_form_caps_rpm() {
        let tool = ToolSpec::nominal(ToolArchetype::EndMill, 1.0);
        let feature = Feature::new("p", FeatureKind::Pocket, Dimensions::new(3.0, 3.0, 1.0));
        let params = closed_form_parameters(&tool, &steel(), &feature, &FallbackSection::default());
        assert_eq!(params.rpm, 12000.0);
    }

    #[tokio::test]
    async fn test_engine_absent_flags_fallback() {
        let h = harness();
        let outcome = ParameterCalculation.execute(h.input()).await.unwrap();
        assert_eq!(outcome.confidence, 70);
        assert!(outcome
            .reasoning
            .iter()
            .any(|r| r.action == "fallback: closed-form parameters"));
        match outcome.result {
            StageResult::ParameterCalculation { parameters } => {
                assert!(parameters[0].fallback);
                assert_eq!(parameters[0].tool_id, "nominal-end_mill-10.0");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_engine_error_is_fatal() {
        let h = harness();
        h.registry.register::<dyn ParameterDecisionEngine>(Arc::new(Throwing));
        let err = ParameterCalculation.execute(h.input()).await.unwrap_err();
        assert_eq!(err.capability(), Some(Capability::ParameterDecision));
    }

    #[tokio::test]
    async fn test_high_chatter_clamps_spindle() {
        let h = harness();
        h.registry.register::<dyn PhysicsConsistency>(Arc::new(Chattery(2500.0)));
        let outcome = ParameterCalculation.execute(h.input()).await.unwrap();
        match &outcome.result {
            StageResult::ParameterCalculation { parameters } => {
                assert!(parameters[0].adjusted_for_chatter);
                assert_eq!(parameters[0].parameters.rpm, 2500.0);
                assert!((parameters[0].parameters.feed_mm_min - 300.0).abs() < 1e-9);
            }
            other => panic!("unexpected result {other:?}"),
        }
        let clamp = outcome
            .reasoning
            .iter()
            .find(|r| r.action.starts_with("clamp spindle"))
            .unwrap();
        assert_eq!(clamp.data.as_ref().unwrap()["from_rpm"], 3820.0);
        assert!(outcome.warnings[0].contains("shorten stickout"));
    }

    #[tokio::test]
    async fn test_chatter_suggestion_never_raises_spindle() {
        let h = harness();
        h.registry.register::<dyn PhysicsConsistency>(Arc::new(Chattery(50000.0)));
        let outcome = ParameterCalculation.execute(h.input()).await.unwrap();
        match &outcome.result {
            StageResult::ParameterCalculation { parameters } => {
                assert!(!parameters[0].adjusted_for_chatter);
                assert_eq!(parameters[0].parameters.rpm, 3820.0);
                assert!((parameters[0].parameters.feed_mm_min - 458.4).abs() < 1e-9);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(!outcome
            .reasoning
            .iter()
            .any(|r| r.action.starts_with("clamp spindle")));
        assert!(outcome
            .reasoning
            .iter()
            .any(|r| r.why.contains("spindle unchanged")));
    }

    #[test]
    fn test_clamp_respects_ceiling() {
        let tool = ToolSpec::nominal(ToolArchetype::EndMill, 10.0);
        let feature = Feature::new("p", FeatureKind::Pocket, Dimensions::new(30.0, 30.0, 8.0));
        let mut params = closed_form_parameters(&tool, &steel(), &feature, &FallbackSection::default());
        assert!(!clamp_spindle(&mut params, &tool, 50000.0));
        assert_eq!(params.rpm, 3820.0);
        assert!(clamp_spindle(&mut params, &tool, 2000.4));
        assert_eq!(params.rpm, 2000.0);
    }
}
