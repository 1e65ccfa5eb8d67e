//! 刀具库存与按预算择优

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;

use crate::capabilities::{
    BudgetTier, OptimalSelection, ToolArchetype, ToolCatalogSearch, ToolCriteria,
    ToolOptimalSelection, ToolSpec,
};
use crate::core::ProviderError;

/// 内置刀具库存
pub struct ToolCatalog {
    tools: Vec<ToolSpec>,
}

#[allow(clippy::too_many_arguments)]
fn tool(
    id: &str,
    archetype: ToolArchetype,
    diameter: f64,
    flutes: u32,
    flute_len: f64,
    stickout: f64,
    material: &str,
    cost: f64,
) -> ToolSpec {
    ToolSpec {
        id: id.to_string(),
        archetype,
        diameter_mm: diameter,
        flute_count: flutes,
        flute_length_mm: flute_len,
        stickout_mm: stickout,
        material: material.to_string(),
        unit_cost: cost,
        confidence: None,
    }
}

impl ToolCatalog {
    pub fn new() -> Self {
        use ToolArchetype::*;
        let mut tools = Vec::new();

        for d in [2.0, 3.0, 4.0, 6.0, 8.0, 10.0, 12.0, 16.0, 20.0] {
            tools.push(tool(&format!("EM-C3-{d}"), EndMill, d, 3, d * 3.0, d * 4.0, "carbide", 8.0 + d * 2.0));
        }
        for d in [6.0, 10.0, 12.0] {
            tools.push(tool(&format!("EM-H2-{d}"), EndMill, d, 2, d * 3.0, d * 4.0, "hss", 4.0 + d * 0.8));
            tools.push(tool(&format!("EM-X4-{d}"), EndMill, d, 4, d * 3.0, d * 3.5, "coated_carbide", 20.0 + d * 3.5));
        }
        for d in [3.0, 4.0, 5.0, 6.0, 6.8, 8.0, 8.5, 10.0, 12.0] {
            tools.push(tool(&format!("DR-C-{d}"), Drill, d, 2, d * 5.0, d * 6.0, "carbide", 10.0 + d * 2.5));
        }
        for d in [3.0, 4.0, 5.0, 6.0, 8.0, 10.0, 12.0] {
            tools.push(tool(&format!("TAP-M{d}"), Tap, d, 3, d * 2.5, d * 6.0, "hss", 12.0 + d * 2.0));
        }
        tools.push(tool("FM-50", FaceMill, 50.0, 5, 6.0, 40.0, "carbide", 180.0));
        tools.push(tool("FM-63", FaceMill, 63.0, 6, 6.0, 45.0, "carbide", 240.0));
        tools.push(tool("CH-10", ChamferMill, 10.0, 2, 5.0, 30.0, "carbide", 25.0));
        tools.push(tool("CH-12", ChamferMill, 12.0, 4, 6.0, 35.0, "coated_carbide", 42.0));

        Self { tools }
    }

    pub fn with_tools(tools: Vec<ToolSpec>) -> Self {
        Self { tools }
    }

    /// 满足原型、直径上限与切深要求的刀具
    pub fn candidates<'a>(&'a self, criteria: &'a ToolCriteria) -> impl Iterator<Item = &'a ToolSpec> {
        self.tools.iter().filter(move |t| {
            t.archetype == criteria.archetype
                && criteria
                    .max_diameter_mm
                    .map(|max| t.diameter_mm <= max + 1e-9)
                    .unwrap_or(true)
                && t.flute_length_mm + 1e-9 >= criteria.min_reach_mm
        })
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// 直径大者优先；同直径时硬质合金优先，再比成本
fn largest_first(a: &ToolSpec, b: &ToolSpec) -> Ordering {
    b.diameter_mm
        .total_cmp(&a.diameter_mm)
        .then_with(|| (b.material == "carbide").cmp(&(a.material == "carbide")))
        .then_with(|| a.unit_cost.total_cmp(&b.unit_cost))
}

#[async_trait]
impl ToolCatalogSearch for ToolCatalog {
    async fn search(&self, criteria: &ToolCriteria) -> Result<Option<ToolSpec>, ProviderError> {
        Ok(self.candidates(criteria).min_by(|a, b| largest_first(a, b)).cloned())
    }
}

/// 预算档位偏好的刀具材质
fn preferred_material(budget: BudgetTier, material_category: &str) -> &'static str {
    let hard = matches!(material_category, "stainless" | "titanium");
    match budget {
        BudgetTier::Economy if !hard => "hss",
        BudgetTier::Economy | BudgetTier::Standard => "carbide",
        BudgetTier::Premium => "coated_carbide",
    }
}

/// 在库存中按预算取舍：直径优先，其次材质匹配，最后成本
pub struct BudgetToolSelector {
    catalog: Arc<ToolCatalog>,
}

impl BudgetToolSelector {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl ToolOptimalSelection for BudgetToolSelector {
    async fn select(
        &self,
        criteria: &ToolCriteria,
        budget: BudgetTier,
    ) -> Result<Option<OptimalSelection>, ProviderError> {
        let preferred = preferred_material(budget, &criteria.material_category);
        let mut ranked: Vec<&ToolSpec> = self.catalog.candidates(criteria).collect();
        ranked.sort_by(|a, b| {
            b.diameter_mm
                .total_cmp(&a.diameter_mm)
                .then_with(|| (b.material == preferred).cmp(&(a.material == preferred)))
                .then_with(|| a.unit_cost.total_cmp(&b.unit_cost))
        });

        let Some((best, rest)) = ranked.split_first() else {
            return Ok(None);
        };
        let recommendation = (*best).clone();
        let matched = recommendation.material == preferred;
        let confidence = if matched { 90 } else { 75 };
        let comparison = ranked
            .iter()
            .take(3)
            .map(|t| {
                format!(
                    "{}: Ø{} {} {}F cost {:.2}",
                    t.id, t.diameter_mm, t.material, t.flute_count, t.unit_cost
                )
            })
            .collect();

        Ok(Some(OptimalSelection {
            alternatives: rest.iter().take(2).map(|t| (*t).clone()).collect(),
            recommendation: ToolSpec {
                confidence: Some(confidence),
                ..recommendation
            },
            comparison,
            confidence,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::FeatureKind;

    fn criteria(archetype: ToolArchetype, max: Option<f64>, reach: f64, category: &str) -> ToolCriteria {
        ToolCriteria {
            feature_id: "f".to_string(),
            feature_kind: FeatureKind::Pocket,
            archetype,
            max_diameter_mm: max,
            min_reach_mm: reach,
            material_category: category.to_string(),
        }
    }

    #[tokio::test]
    async fn test_search_largest_fitting() {
        let catalog = ToolCatalog::new();
        let t = catalog
            .search(&criteria(ToolArchetype::EndMill, Some(11.0), 12.0, "aluminum"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(t.id, "EM-C3-10");

        let drill = catalog
            .search(&criteria(ToolArchetype::Drill, Some(6.8), 20.0, "steel"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(drill.diameter_mm, 6.8);
    }

    #[tokio::test]
    async fn test_search_miss() {
        let catalog = ToolCatalog::new();
        let miss = catalog
            .search(&criteria(ToolArchetype::EndMill, Some(1.0), 5.0, "steel"))
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_budget_preference() {
        let selector = BudgetToolSelector::new(Arc::new(ToolCatalog::new()));
        let c = criteria(ToolArchetype::EndMill, Some(10.0), 10.0, "aluminum");

        let economy = selector.select(&c, BudgetTier::Economy).await.unwrap().unwrap();
        assert_eq!(economy.recommendation.material, "hss");
        assert_eq!(economy.confidence, 90);

        let premium = selector.select(&c, BudgetTier::Premium).await.unwrap().unwrap();
        assert_eq!(premium.recommendation.id, "EM-X4-10");
        assert_eq!(premium.recommendation.confidence, Some(90));
        assert_eq!(premium.alternatives.len(), 2);
        assert!(!premium.comparison.is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_material_lowers_confidence() {
        let selector = BudgetToolSelector::new(Arc::new(ToolCatalog::new()));
        let c = criteria(ToolArchetype::EndMill, Some(4.0), 5.0, "aluminum");
        let out = selector.select(&c, BudgetTier::Premium).await.unwrap().unwrap();
        assert_eq!(out.recommendation.id, "EM-C3-4");
        assert_eq!(out.confidence, 75);
    }

    #[tokio::test]
    async fn test_selector_miss_returns_none() {
        let selector = BudgetToolSelector::new(Arc::new(ToolCatalog::new()));
        let c = criteria(ToolArchetype::EndMill, Some(1.0), 5.0, "steel");
        assert!(selector.select(&c, BudgetTier::Standard).await.unwrap().is_none());
    }
}
