//! 阶段 5：加工策略选择

use async_trait::async_trait;

use super::{StageExecutor, StageInput, StageRecorder};
use crate::capabilities::{
    Capability, ChosenStrategy, FeatureKind, Strategy, StrategyCatalog, StrategySource,
};
use crate::core::WorkflowError;
use crate::workflow::{StageName, StageOutcome, StageResult};

const KIND_MATCH: u32 = 10;
const MATERIAL_MATCH: u32 = 5;
const GENERAL_PURPOSE: u32 = 1;

pub struct StrategySelection;

#[async_trait]
impl StageExecutor for StrategySelection {
    fn stage(&self) -> StageName {
        StageName::StrategySelection
    }

    async fn execute(&self, input: StageInput<'_>) -> Result<StageOutcome, WorkflowError> {
        let mut rec = StageRecorder::start(self.stage());
        let category = input
            .context
            .material
            .as_ref()
            .map(|m| m.profile.category.as_str())
            .unwrap_or("unknown");

        let catalog = input.registry.resolve::<dyn StrategyCatalog>();
        if catalog.is_none() {
            rec.fallback(
                "default strategies",
                "StrategyCatalog absent; using the fixed per-feature-kind defaults",
            );
        }

        let mut chosen = Vec::with_capacity(input.context.features.len());
        for feature in &input.context.features {
            let candidates = match &catalog {
                Some(catalog) => {
                    input
                        .caller
                        .call(Capability::StrategyCatalog, catalog.strategies_for(feature.kind))
                        .await?
                }
                None => Vec::new(),
            };

            let best = candidates
                .iter()
                .map(|s| (score(s, feature.kind, category), s))
                .fold(None::<(u32, &Strategy)>, |best, (score, s)| match best {
                    Some((top, _)) if top >= score => best,
                    _ => Some((score, s)),
                });

            let choice = match best {
                Some((score, strategy)) => {
                    rec.note_data(
                        format!("choose strategy for {}", feature.id),
                        format!(
                            "{} scored highest of {} candidate(s)",
                            strategy.name,
                            candidates.len()
                        ),
                        serde_json::json!({ "score": score, "material_category": category }),
                    );
                    ChosenStrategy {
                        feature_id: feature.id.clone(),
                        strategy: strategy.name.clone(),
                        score,
                        source: StrategySource::Catalog,
                    }
                }
                None => {
                    let name = default_strategy(feature.kind);
                    if catalog.is_some() {
                        rec.note(
                            format!("choose strategy for {}", feature.id),
                            format!("catalog has no {} strategy; default {name}", feature.kind),
                        );
                    } else {
                        rec.note(
                            format!("choose strategy for {}", feature.id),
                            format!("default {name} for {}", feature.kind),
                        );
                    }
                    ChosenStrategy {
                        feature_id: feature.id.clone(),
                        strategy: name.to_string(),
                        score: 0,
                        source: StrategySource::Default,
                    }
                }
            };
            chosen.push(choice);
        }

        Ok(rec.finish(100, StageResult::StrategySelection { strategies: chosen }))
    }
}

fn score(strategy: &Strategy, kind: FeatureKind, category: &str) -> u32 {
    let mut score = 0;
    if strategy.feature_kinds.contains(&kind) {
        score += KIND_MATCH;
    }
    if strategy
        .material_categories
        .iter()
        .any(|c| c.eq_ignore_ascii_case(category))
    {
        score += MATERIAL_MATCH;
    }
    if strategy
        .material_categories
        .iter()
        .any(|c| c.eq_ignore_ascii_case("any"))
    {
        score += GENERAL_PURPOSE;
    }
    score
}

/// 每种特征类型的固定默认策略
pub fn default_strategy(kind: FeatureKind) -> &'static str {
    match kind {
        FeatureKind::Pocket => "offset-pocket",
        FeatureKind::Slot => "trochoidal-slot",
        FeatureKind::Boss => "contour-outside",
        FeatureKind::Contour => "contour",
        FeatureKind::Hole => "peck-drill",
        FeatureKind::Thread => "rigid-tap",
        FeatureKind::Face => "face-raster",
        FeatureKind::Chamfer => "chamfer-contour",
        FeatureKind::Generic => "raster",
    }
}
