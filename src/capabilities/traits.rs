//! Provider 契约
//!
//! 每个 capability 对应一个 async trait；核心编排器只依赖这些契约，不关心 provider 如何得出答案。
//! 「未命中」一律用 Ok(None) / 空列表表示，Err 只用于 provider 自身失败。

use async_trait::async_trait;

use crate::capabilities::types::*;
use crate::core::ProviderError;
use crate::workflow::WorkflowRequest;

/// 自由文本 → 特征列表
#[async_trait]
pub trait FeatureRecognition: Send + Sync {
    async fn recognize(&self, text: &str) -> Result<RecognizedFeatures, ProviderError>;
}

/// 部分请求 → 推断出的通用特征
#[async_trait]
pub trait ContextInference: Send + Sync {
    async fn infer(&self, request: &WorkflowRequest) -> Result<InferredContext, ProviderError>;
}

/// 多特征之间的相互影响分析，返回需要提示给用户的说明
#[async_trait]
pub trait FeatureInteraction: Send + Sync {
    async fn analyze(&self, features: &[Feature]) -> Result<Vec<String>, ProviderError>;
}

#[async_trait]
pub trait MaterialLookup: Send + Sync {
    async fn lookup(&self, name: &str) -> Result<Option<MaterialProfile>, ProviderError>;
}

#[async_trait]
pub trait MaterialInterpolation: Send + Sync {
    async fn interpolate(
        &self,
        name: &str,
        hints: &MaterialHints,
    ) -> Result<Option<Interpolation>, ProviderError>;
}

#[async_trait]
pub trait ToolOptimalSelection: Send + Sync {
    async fn select(
        &self,
        criteria: &ToolCriteria,
        budget: BudgetTier,
    ) -> Result<Option<OptimalSelection>, ProviderError>;
}

#[async_trait]
pub trait ToolCatalogSearch: Send + Sync {
    async fn search(&self, criteria: &ToolCriteria) -> Result<Option<ToolSpec>, ProviderError>;
}

#[async_trait]
pub trait ParameterDecisionEngine: Send + Sync {
    async fn decide(&self, query: &ParameterQuery) -> Result<ParameterDecision, ProviderError>;
}

/// 物理一致性：刀具挠度与颤振风险
#[async_trait]
pub trait PhysicsConsistency: Send + Sync {
    async fn check_deflection(
        &self,
        tool: &ToolSpec,
        parameters: &CuttingParameters,
        material: &MaterialProfile,
    ) -> Result<DeflectionCheck, ProviderError>;

    async fn check_chatter(
        &self,
        tool: &ToolSpec,
        parameters: &CuttingParameters,
        material: &MaterialProfile,
    ) -> Result<ChatterCheck, ProviderError>;
}

#[async_trait]
pub trait StrategyCatalog: Send + Sync {
    async fn strategies_for(&self, kind: FeatureKind) -> Result<Vec<Strategy>, ProviderError>;
}

#[async_trait]
pub trait ToolpathGeometry: Send + Sync {
    async fn generate(&self, request: &ToolpathRequest) -> Result<GeneratedPath, ProviderError>;
}

/// 机床限制与参数检查
#[async_trait]
pub trait ConstraintsValidator: Send + Sync {
    async fn validate(&self, input: &ConstraintsInput) -> Result<ConstraintReport, ProviderError>;
}

/// 毛坯包容检查；支持自动修正的实现应覆盖 supports_auto_adjust
#[async_trait]
pub trait ContainmentValidator: Send + Sync {
    fn supports_auto_adjust(&self) -> bool {
        false
    }

    async fn validate(
        &self,
        path: &Toolpath,
        stock: &Stock,
        options: &ContainmentOptions,
    ) -> Result<ContainmentReport, ProviderError>;
}

/// 后处理器：按控制器方言输出 G 代码
#[async_trait]
pub trait PostProcessor: Send + Sync {
    fn supports(&self, controller: &str) -> bool;

    async fn emit(
        &self,
        toolpaths: &[Toolpath],
        controller: &str,
        options: &PostOptions,
    ) -> Result<PostOutput, ProviderError>;
}

/// 失败兜底：从原始请求给出最小可用的保守方案
#[async_trait]
pub trait SafeDefaultStrategy: Send + Sync {
    async fn safe_default(&self, request: &WorkflowRequest) -> Result<SafeResult, ProviderError>;
}
