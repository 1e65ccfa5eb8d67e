//! 内置加工策略表

use async_trait::async_trait;

use crate::capabilities::{FeatureKind, Strategy, StrategyCatalog};
use crate::core::ProviderError;

pub struct StrategyTable {
    strategies: Vec<Strategy>,
}

fn strategy(name: &str, kinds: &[FeatureKind], materials: &[&str], description: &str) -> Strategy {
    Strategy {
        name: name.to_string(),
        feature_kinds: kinds.to_vec(),
        material_categories: materials.iter().map(|m| m.to_string()).collect(),
        description: description.to_string(),
    }
}

impl StrategyTable {
    pub fn new() -> Self {
        use FeatureKind::*;
        let strategies = vec![
            strategy(
                "adaptive-clearing",
                &[Pocket, Slot, Generic],
                &["steel", "stainless", "titanium"],
                "constant-engagement roughing for tough materials",
            ),
            strategy("offset-pocket", &[Pocket], &["any"], "concentric offsets from the wall inward"),
            strategy(
                "zigzag-pocket",
                &[Pocket, Generic],
                &["aluminum", "plastic", "brass"],
                "bidirectional raster clearing",
            ),
            strategy("trochoidal-slot", &[Slot], &["any"], "circular-arc slotting at low engagement"),
            strategy("plunge-slot", &[Slot], &["aluminum", "plastic"], "full-width ramped slotting"),
            strategy("contour", &[Contour, Boss], &["any"], "single profile pass per level"),
            strategy("contour-outside", &[Boss], &["any"], "profile offset outside the boss wall"),
            strategy("peck-drill", &[Hole], &["any"], "G83-style pecking with chip breaks"),
            strategy(
                "spot-and-drill",
                &[Hole],
                &["aluminum", "brass", "plastic"],
                "spot then drill to depth in one feed",
            ),
            strategy("rigid-tap", &[Thread], &["any"], "synchronised tapping"),
            strategy("face-raster", &[Face, Generic], &["any"], "parallel facing passes"),
            strategy("chamfer-contour", &[Chamfer], &["any"], "chamfer mill following the edge"),
        ];
        Self { strategies }
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StrategyCatalog for StrategyTable {
    async fn strategies_for(&self, kind: FeatureKind) -> Result<Vec<Strategy>, ProviderError> {
        Ok(self
            .strategies
            .iter()
            .filter(|s| s.feature_kinds.contains(&kind))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filters_by_kind() {
        let table = StrategyTable::new();
        let pocket: Vec<String> = table
            .strategies_for(FeatureKind::Pocket)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(pocket, vec!["adaptive-clearing", "offset-pocket", "zigzag-pocket"]);
        assert_eq!(table.strategies_for(FeatureKind::Thread).await.unwrap().len(), 1);
    }
}
