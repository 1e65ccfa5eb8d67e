//! Capability 注册表
//!
//! 启动时按名绑定 provider（每个 capability 至多一个），各阶段在调用时通过 resolve 查询是否存在。
//! 缺席是正常状态而非错误：resolve 永不失败，只返回 Option。
//!
//! 绑定分两种：
//! - Owned：注册表持有 Arc，直到 unregister
//! - Observed：只持有 Weak，provider 的所有者释放后即视为缺席

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde::{Deserialize, Serialize};

use crate::capabilities::traits::*;

/// 命名的 capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    FeatureRecognition,
    ContextInference,
    FeatureInteraction,
    MaterialLookup,
    MaterialInterpolation,
    ToolOptimalSelection,
    ToolCatalogSearch,
    ParameterDecision,
    PhysicsConsistency,
    StrategyCatalog,
    ToolpathGeometry,
    ConstraintsValidator,
    ContainmentValidator,
    PostProcessor,
    SafeDefaultStrategy,
}

impl Capability {
    pub const ALL: [Capability; 15] = [
        Capability::FeatureRecognition,
        Capability::ContextInference,
        Capability::FeatureInteraction,
        Capability::MaterialLookup,
        Capability::MaterialInterpolation,
        Capability::ToolOptimalSelection,
        Capability::ToolCatalogSearch,
        Capability::ParameterDecision,
        Capability::PhysicsConsistency,
        Capability::StrategyCatalog,
        Capability::ToolpathGeometry,
        Capability::ConstraintsValidator,
        Capability::ContainmentValidator,
        Capability::PostProcessor,
        Capability::SafeDefaultStrategy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::FeatureRecognition => "FeatureRecognition",
            Capability::ContextInference => "ContextInference",
            Capability::FeatureInteraction => "FeatureInteraction",
            Capability::MaterialLookup => "MaterialLookup",
            Capability::MaterialInterpolation => "MaterialInterpolation",
            Capability::ToolOptimalSelection => "ToolOptimalSelection",
            Capability::ToolCatalogSearch => "ToolCatalogSearch",
            Capability::ParameterDecision => "ParameterDecision",
            Capability::PhysicsConsistency => "PhysicsConsistency",
            Capability::StrategyCatalog => "StrategyCatalog",
            Capability::ToolpathGeometry => "ToolpathGeometry",
            Capability::ConstraintsValidator => "ConstraintsValidator",
            Capability::ContainmentValidator => "ContainmentValidator",
            Capability::PostProcessor => "PostProcessor",
            Capability::SafeDefaultStrategy => "SafeDefaultStrategy",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 将 trait object 类型与 capability 名称、契约版本关联
pub trait CapabilityContract: Send + Sync + 'static {
    const CAPABILITY: Capability;
    const VERSION: u32 = 1;
}

macro_rules! contracts {
    ($($contract:ident => $capability:ident),* $(,)?) => {
        $(
            impl CapabilityContract for dyn $contract {
                const CAPABILITY: Capability = Capability::$capability;
            }
        )*
    };
}

contracts! {
    FeatureRecognition => FeatureRecognition,
    ContextInference => ContextInference,
    FeatureInteraction => FeatureInteraction,
    MaterialLookup => MaterialLookup,
    MaterialInterpolation => MaterialInterpolation,
    ToolOptimalSelection => ToolOptimalSelection,
    ToolCatalogSearch => ToolCatalogSearch,
    ParameterDecisionEngine => ParameterDecision,
    PhysicsConsistency => PhysicsConsistency,
    StrategyCatalog => StrategyCatalog,
    ToolpathGeometry => ToolpathGeometry,
    ConstraintsValidator => ConstraintsValidator,
    ContainmentValidator => ContainmentValidator,
    PostProcessor => PostProcessor,
    SafeDefaultStrategy => SafeDefaultStrategy,
}

struct Binding {
    /// Arc<P> 或 Weak<P>，P 为契约的 trait object 类型
    slot: Box<dyn Any + Send + Sync>,
    version: u32,
    observed: bool,
    alive: Box<dyn Fn() -> bool + Send + Sync>,
}

/// Capability 注册表：name → provider 的显式映射
#[derive(Default)]
pub struct CapabilityRegistry {
    bindings: RwLock<HashMap<Capability, Binding>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定 provider（替换已有绑定），注册表持有其引用
    pub fn register<P>(&self, provider: Arc<P>)
    where
        P: ?Sized + CapabilityContract,
    {
        self.insert(
            P::CAPABILITY,
            Binding {
                slot: Box::new(provider),
                version: P::VERSION,
                observed: false,
                alive: Box::new(|| true),
            },
        );
    }

    /// 只观察 provider 的存在：所有者释放后 resolve 返回 None
    pub fn register_weak<P>(&self, provider: &Arc<P>)
    where
        P: ?Sized + CapabilityContract,
    {
        let weak = Arc::downgrade(provider);
        let probe = weak.clone();
        self.insert(
            P::CAPABILITY,
            Binding {
                slot: Box::new(weak),
                version: P::VERSION,
                observed: true,
                alive: Box::new(move || probe.strong_count() > 0),
            },
        );
    }

    /// 链式注册
    pub fn with<P>(self, provider: Arc<P>) -> Self
    where
        P: ?Sized + CapabilityContract,
    {
        self.register(provider);
        self
    }

    /// 解除绑定，返回之前是否存在
    pub fn unregister(&self, capability: Capability) -> bool {
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&capability)
            .is_some()
    }

    /// 查询 provider；缺席或已释放时返回 None，永不失败
    pub fn resolve<P>(&self) -> Option<Arc<P>>
    where
        P: ?Sized + CapabilityContract,
    {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        let binding = bindings.get(&P::CAPABILITY)?;
        if binding.version != P::VERSION {
            tracing::warn!(
                capability = %P::CAPABILITY,
                bound = binding.version,
                expected = P::VERSION,
                "capability contract version mismatch, treating as absent"
            );
            return None;
        }
        if binding.observed {
            binding
                .slot
                .downcast_ref::<Weak<P>>()
                .and_then(Weak::upgrade)
        } else {
            binding.slot.downcast_ref::<Arc<P>>().cloned()
        }
    }

    pub fn is_present(&self, capability: Capability) -> bool {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&capability)
            .map(|b| (b.alive)())
            .unwrap_or(false)
    }

    /// 当前可用的 capability 列表（有序）
    pub fn present(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.is_present(*c))
            .collect()
    }

    fn insert(&self, capability: Capability, binding: Binding) {
        tracing::debug!(capability = %capability, observed = binding.observed, "capability bound");
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(capability, binding);
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("present", &self.present())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::types::MaterialProfile;
    use crate::core::ProviderError;
    use async_trait::async_trait;

    struct FixedLookup;

    #[async_trait]
    impl MaterialLookup for FixedLookup {
        async fn lookup(&self, name: &str) -> Result<Option<MaterialProfile>, ProviderError> {
            Ok(Some(MaterialProfile {
                name: name.to_string(),
                category: "aluminum".to_string(),
                hardness_hb: None,
                surface_speed_m_min: 300.0,
                chip_load_mm: 0.05,
                machinability: 0.9,
            }))
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = CapabilityRegistry::new();
        assert!(registry.resolve::<dyn MaterialLookup>().is_none());
        assert!(!registry.is_present(Capability::MaterialLookup));

        registry.register::<dyn MaterialLookup>(Arc::new(FixedLookup));
        let lookup = registry.resolve::<dyn MaterialLookup>().unwrap();
        let profile = lookup.lookup("6061").await.unwrap().unwrap();
        assert_eq!(profile.name, "6061");
        assert_eq!(registry.present(), vec![Capability::MaterialLookup]);
    }

    #[test]
    fn test_unregister() {
        let registry = CapabilityRegistry::new().with::<dyn MaterialLookup>(Arc::new(FixedLookup));
        assert!(registry.unregister(Capability::MaterialLookup));
        assert!(!registry.unregister(Capability::MaterialLookup));
        assert!(registry.resolve::<dyn MaterialLookup>().is_none());
    }

    #[test]
    fn test_weak_binding_disappears_with_owner() {
        let registry = CapabilityRegistry::new();
        let owner: Arc<dyn MaterialLookup> = Arc::new(FixedLookup);
        registry.register_weak(&owner);
        assert!(registry.is_present(Capability::MaterialLookup));
        assert!(registry.resolve::<dyn MaterialLookup>().is_some());

        drop(owner);
        assert!(!registry.is_present(Capability::MaterialLookup));
        assert!(registry.resolve::<dyn MaterialLookup>().is_none());
    }

    #[test]
    fn test_capability_names_round_trip() {
        for capability in Capability::ALL {
            assert_eq!(Capability::from_name(capability.name()), Some(capability));
        }
        assert_eq!(Capability::from_name("nope"), None);
    }
}
