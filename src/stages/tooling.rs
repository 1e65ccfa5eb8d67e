//! 阶段 3：刀具选择

use async_trait::async_trait;

use super::{mean_confidence, StageExecutor, StageInput, StageRecorder};
use crate::capabilities::{
    Capability, Feature, SelectedTool, ToolArchetype, ToolCatalogSearch, ToolCriteria,
    ToolOptimalSelection, ToolSource, ToolSpec,
};
use crate::core::WorkflowError;
use crate::workflow::{StageName, StageOutcome, StageResult};

/// 刀具未给出置信度时按此计入
const UNRATED_TOOL_CONFIDENCE: u8 = 60;
const SYNTHESIZED_TOOL_CONFIDENCE: u8 = 40;

const STANDARD_DIAMETERS_MM: [f64; 13] = [
    1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 8.0, 10.0, 12.0, 16.0, 20.0, 25.0, 50.0,
];

pub struct ToolSelection;

#[async_trait]
impl StageExecutor for ToolSelection {
    fn stage(&self) -> StageName {
        StageName::ToolSelection
    }

    async fn execute(&self, input: StageInput<'_>) -> Result<StageOutcome, WorkflowError> {
        let mut rec = StageRecorder::start(self.stage());
        let material_category = input
            .context
            .material
            .as_ref()
            .map(|m| m.profile.category.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let optimal = input.registry.resolve::<dyn ToolOptimalSelection>();
        let catalog = input.registry.resolve::<dyn ToolCatalogSearch>();
        if optimal.is_none() {
            rec.fallback(
                "catalog search",
                "ToolOptimalSelection absent; searching the tool catalog instead",
            );
        }
        if optimal.is_none() && catalog.is_none() {
            rec.fallback(
                "nominal tools",
                "no tool provider available; synthesizing nominal tools per archetype",
            );
        }

        let mut tools = Vec::with_capacity(input.context.features.len());
        for feature in &input.context.features {
            let criteria = criteria_for(feature, &material_category);

            if let Some(selector) = &optimal {
                let selection = input
                    .caller
                    .call(
                        Capability::ToolOptimalSelection,
                        selector.select(&criteria, input.request.budget),
                    )
                    .await?;
                if let Some(selection) = selection {
                    rec.note_data(
                        format!("select tool for {}", feature.id),
                        format!(
                            "{} recommended for {} ({:?} budget)",
                            selection.recommendation.id, feature.kind, input.request.budget
                        ),
                        serde_json::json!({
                            "alternatives": selection.alternatives.iter().map(|t| &t.id).collect::<Vec<_>>(),
                            "comparison": selection.comparison,
                        }),
                    );
                    tools.push(SelectedTool {
                        feature_id: feature.id.clone(),
                        tool: selection.recommendation,
                        alternatives: selection.alternatives,
                        source: ToolSource::Optimal,
                        confidence: Some(selection.confidence.min(100)),
                    });
                    continue;
                }
                rec.note(
                    format!("select tool for {}", feature.id),
                    "optimal selection found no candidate; trying catalog",
                );
            }

            if let Some(catalog) = &catalog {
                let found = input
                    .caller
                    .call(Capability::ToolCatalogSearch, catalog.search(&criteria))
                    .await?;
                if let Some(tool) = found {
                    rec.note(
                        format!("select tool for {}", feature.id),
                        format!("catalog match {} (Ø{} mm)", tool.id, tool.diameter_mm),
                    );
                    let confidence = tool.confidence.map(|c| c.min(100));
                    tools.push(SelectedTool {
                        feature_id: feature.id.clone(),
                        tool,
                        alternatives: Vec::new(),
                        source: ToolSource::Catalog,
                        confidence,
                    });
                    continue;
                }
            }

            let tool = nominal_tool(&criteria);
            rec.warn(format!(
                "no tool found for feature {}; synthesized nominal {} Ø{} mm",
                feature.id, tool.archetype, tool.diameter_mm
            ));
            tools.push(SelectedTool {
                feature_id: feature.id.clone(),
                tool,
                alternatives: Vec::new(),
                source: ToolSource::Synthesized,
                confidence: Some(SYNTHESIZED_TOOL_CONFIDENCE),
            });
        }

        let confidence = mean_confidence(
            tools
                .iter()
                .map(|t| t.confidence.unwrap_or(UNRATED_TOOL_CONFIDENCE)),
            UNRATED_TOOL_CONFIDENCE,
        );
        Ok(rec.finish(confidence, StageResult::ToolSelection { tools }))
    }
}

fn criteria_for(feature: &Feature, material_category: &str) -> ToolCriteria {
    ToolCriteria {
        feature_id: feature.id.clone(),
        feature_kind: feature.kind,
        archetype: feature.kind.archetype(),
        max_diameter_mm: feature.max_tool_diameter(),
        min_reach_mm: feature.dimensions.depth.max(0.0),
        material_category: material_category.to_string(),
    }
}

/// 按原型与直径上限合成名义刀具：取不超过上限的最大标准直径
fn nominal_tool(criteria: &ToolCriteria) -> ToolSpec {
    let preferred = if criteria.archetype == ToolArchetype::FaceMill {
        50.0
    } else {
        10.0
    };
    let diameter = match criteria.max_diameter_mm {
        Some(max) => STANDARD_DIAMETERS_MM
            .iter()
            .copied()
            .filter(|d| *d <= max)
            .last()
            .unwrap_or(max),
        None => preferred,
    };
    let mut tool = ToolSpec::nominal(criteria.archetype, diameter);
    tool.flute_length_mm = tool.flute_length_mm.max(criteria.min_reach_mm);
    tool
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::capabilities::{BudgetTier, Dimensions, FeatureKind, OptimalSelection};
    use crate::core::ProviderError;
    use crate::stages::test_support::Harness;
    use crate::workflow::WorkflowRequest;

    struct Premium;

    #[async_trait]
    impl ToolOptimalSelection for Premium {
        async fn select(
            &self,
            criteria: &ToolCriteria,
            budget: BudgetTier,
        ) -> Result<Option<OptimalSelection>, ProviderError> {
            assert_eq!(budget, BudgetTier::Premium);
            Ok(Some(OptimalSelection {
                recommendation: ToolSpec::nominal(criteria.archetype, 6.0),
                alternatives: vec![ToolSpec::nominal(criteria.archetype, 4.0)],
                comparison: vec!["6mm is stiffer".to_string()],
                confidence: 90,
            }))
        }
    }

    struct UnratedCatalog;

    #[async_trait]
    impl ToolCatalogSearch for UnratedCatalog {
        async fn search(&self, criteria: &ToolCriteria) -> Result<Option<ToolSpec>, ProviderError> {
            Ok(Some(ToolSpec::nominal(criteria.archetype, 8.0)))
        }
    }

    fn features() -> Vec<Feature> {
        vec![
            Feature::new("p", FeatureKind::Pocket, Dimensions::new(20.0, 20.0, 5.0)),
            Feature::new("h", FeatureKind::Hole, Dimensions::round(6.8, 12.0)),
        ]
    }

    fn harness(request: WorkflowRequest) -> Harness {
        let mut h = Harness::new(request);
        h.context.features = features();
        h
    }

    #[tokio::test]
    async fn test_optimal_selection_per_feature() {
        let h = harness(WorkflowRequest::default().with_budget(BudgetTier::Premium));
        h.registry.register::<dyn ToolOptimalSelection>(Arc::new(Premium));
        let outcome = ToolSelection.execute(h.input()).await.unwrap();
        assert_eq!(outcome.confidence, 90);
        match outcome.result {
            StageResult::ToolSelection { tools } => {
                assert_eq!(tools.len(), 2);
                assert_eq!(tools[1].tool.archetype, ToolArchetype::Drill);
                assert_eq!(tools[0].source, ToolSource::Optimal);
                assert_eq!(tools[0].alternatives.len(), 1);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_catalog_fallback_uses_default_confidence() {
        let h = harness(WorkflowRequest::default());
        h.registry.register::<dyn ToolCatalogSearch>(Arc::new(UnratedCatalog));
        let outcome = ToolSelection.execute(h.input()).await.unwrap();
        assert_eq!(outcome.confidence, 60);
        assert!(outcome
            .reasoning
            .iter()
            .any(|r| r.action == "fallback: catalog search"));
    }

    #[tokio::test]
    async fn test_no_providers_synthesizes_tools() {
        let h = harness(WorkflowRequest::default());
        let outcome = ToolSelection.execute(h.input()).await.unwrap();
        assert_eq!(outcome.confidence, 40);
        assert_eq!(outcome.warnings.len(), 2);
        match outcome.result {
            StageResult::ToolSelection { tools } => {
                // 20x20 型腔 → 直径上限 10
                assert_eq!(tools[0].tool.diameter_mm, 10.0);
                // Ø6.8 孔 → 6
                assert_eq!(tools[1].tool.diameter_mm, 6.0);
                assert!(tools.iter().all(|t| t.source == ToolSource::Synthesized));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
