//! 内置参考 provider
//!
//! 每个 capability 一个确定性实现，使编排器开箱即可跑通完整流程。
//! 注册时只补齐注册表中缺席的 capability，调用方预先注册的 provider 保持不变。

pub mod cutting;
pub mod features;
pub mod geometry;
pub mod materials;
pub mod post;
pub mod safe;
pub mod strategies;
pub mod tooling;
pub mod validation;

use std::sync::Arc;

pub use cutting::{CantileverPhysics, HandbookParameterEngine};
pub use features::{ProximityInteractionAnalyzer, StockContextInference, TextFeatureRecognizer};
pub use geometry::RasterGeometry;
pub use materials::{CategoryInterpolator, MaterialTable};
pub use post::DialectPostProcessor;
pub use safe::ConservativeSafeDefault;
pub use strategies::StrategyTable;
pub use tooling::{BudgetToolSelector, ToolCatalog};
pub use validation::{MachineLimitValidator, StockBoundsValidator};

use crate::capabilities::*;
use crate::config::AppConfig;

/// 仅当 capability 缺席时注册，返回是否注册
fn fill<P>(registry: &CapabilityRegistry, provider: Arc<P>) -> bool
where
    P: ?Sized + CapabilityContract,
{
    if registry.is_present(P::CAPABILITY) {
        tracing::debug!(capability = %P::CAPABILITY, "keeping caller-supplied provider");
        return false;
    }
    registry.register::<P>(provider);
    true
}

/// 注册全部内置 provider，返回新增的绑定数
pub fn register_builtin(registry: &CapabilityRegistry, config: &AppConfig) -> usize {
    let materials = Arc::new(MaterialTable::new());
    let catalog = Arc::new(ToolCatalog::new());

    let mut added = 0;
    match TextFeatureRecognizer::new() {
        Ok(recognizer) => {
            added += usize::from(fill::<dyn FeatureRecognition>(registry, Arc::new(recognizer)));
        }
        Err(e) => tracing::warn!(error = %e, "text feature recognizer unavailable"),
    }

    let bound = [
        fill::<dyn ContextInference>(registry, Arc::new(StockContextInference)),
        fill::<dyn FeatureInteraction>(registry, Arc::new(ProximityInteractionAnalyzer)),
        fill::<dyn MaterialLookup>(registry, materials.clone()),
        fill::<dyn MaterialInterpolation>(registry, Arc::new(CategoryInterpolator::new(materials))),
        fill::<dyn ToolOptimalSelection>(registry, Arc::new(BudgetToolSelector::new(catalog.clone()))),
        fill::<dyn ToolCatalogSearch>(registry, catalog),
        fill::<dyn ParameterDecisionEngine>(
            registry,
            Arc::new(HandbookParameterEngine::new(config.fallback.clone())),
        ),
        fill::<dyn PhysicsConsistency>(registry, Arc::new(CantileverPhysics::default())),
        fill::<dyn StrategyCatalog>(registry, Arc::new(StrategyTable::new())),
        fill::<dyn ToolpathGeometry>(registry, Arc::new(RasterGeometry::default())),
        fill::<dyn ConstraintsValidator>(registry, Arc::new(MachineLimitValidator::new())),
        fill::<dyn ContainmentValidator>(registry, Arc::new(StockBoundsValidator)),
        fill::<dyn PostProcessor>(registry, Arc::new(DialectPostProcessor)),
        fill::<dyn SafeDefaultStrategy>(registry, Arc::new(ConservativeSafeDefault::new(config))),
    ];
    added + bound.iter().filter(|b| **b).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_every_capability() {
        let registry = CapabilityRegistry::new();
        let added = register_builtin(&registry, &AppConfig::default());
        assert_eq!(added, Capability::ALL.len());
        assert_eq!(registry.present(), Capability::ALL.to_vec());
        assert_eq!(register_builtin(&registry, &AppConfig::default()), 0);
    }
}
