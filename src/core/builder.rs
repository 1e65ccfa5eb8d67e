//! 编排器构建器：统一的初始化逻辑
//!
//! CLI 与测试共用同一条装配路径：配置 → 注册表 → 内置参考 provider（可关闭）→ Orchestrator。

use std::path::PathBuf;
use std::sync::Arc;

use crate::capabilities::CapabilityRegistry;
use crate::config::AppConfig;
use crate::core::Orchestrator;

pub struct OrchestratorBuilder {
    config: AppConfig,
    registry: Option<Arc<CapabilityRegistry>>,
    builtin: Option<bool>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            registry: None,
            builtin: None,
        }
    }

    /// 使用调用方预先填充的注册表；内置 provider 只补齐其中缺席的 capability
    pub fn with_registry(mut self, registry: Arc<CapabilityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 覆盖配置中的 [providers].builtin
    pub fn with_builtin_providers(mut self, enable: bool) -> Self {
        self.builtin = Some(enable);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build(self) -> Orchestrator {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(CapabilityRegistry::new()));
        if self.builtin.unwrap_or(self.config.providers.builtin) {
            let added = crate::providers::register_builtin(&registry, &self.config);
            tracing::info!(added, "reference providers registered");
        }
        tracing::debug!(capabilities = ?registry.present(), "capability registry ready");
        Orchestrator::new(Arc::new(self.config), registry)
    }
}

/// 便捷函数：从默认路径加载配置并创建构建器
pub fn create_orchestrator_builder(config_path: Option<PathBuf>) -> OrchestratorBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    OrchestratorBuilder::new(config)
}
