//! 工作流引擎
//!
//! 严格按顺序执行八个阶段：每个阶段看到的上下文是前序阶段增量合并后的结果，
//! 阶段 N+1 不会在阶段 N 结束前开始。任何阶段返回错误即停止，连同已完成的部分运行
//! 一起以 StageFailure 交给上层恢复，引擎本身不做逐阶段恢复。

use std::sync::Arc;

use crate::capabilities::{CapabilityRegistry, ProviderCaller};
use crate::config::AppConfig;
use crate::core::WorkflowError;
use crate::stages::{standard_pipeline, StageExecutor, StageInput};
use crate::workflow::confidence::ConfidenceAggregator;
use crate::workflow::{Run, RunBuilder, StageFailure, WorkflowOptions, WorkflowRequest};

/// 阶段驱动器
pub struct WorkflowEngine {
    stages: Vec<Box<dyn StageExecutor>>,
    aggregator: ConfidenceAggregator,
    config: Arc<AppConfig>,
}

impl WorkflowEngine {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self::with_stages(config, standard_pipeline())
    }

    /// 使用自定义阶段列表（阶段顺序必须与 StageName::ALL 一致，否则 apply 拒绝）
    pub fn with_stages(config: Arc<AppConfig>, stages: Vec<Box<dyn StageExecutor>>) -> Self {
        let aggregator = ConfidenceAggregator::new(
            config.workflow.weights.clone(),
            config.workflow.neutral_confidence,
        );
        Self {
            stages,
            aggregator,
            config,
        }
    }

    pub fn aggregator(&self) -> &ConfidenceAggregator {
        &self.aggregator
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn run(
        &self,
        request: &WorkflowRequest,
        options: &WorkflowOptions,
        registry: &CapabilityRegistry,
        caller: &ProviderCaller,
    ) -> Result<Run, StageFailure> {
        let mut builder = RunBuilder::new();

        for stage in &self.stages {
            let name = stage.stage();
            if caller.cancel_token().is_cancelled() {
                return Err(StageFailure {
                    failed_at: name,
                    error: WorkflowError::Cancelled,
                    partial: builder,
                });
            }
            tracing::debug!(run_id = %builder.id(), stage = %name, ordinal = name.ordinal(), "entering stage");

            let result = stage
                .execute(StageInput {
                    request,
                    options,
                    context: builder.context(),
                    registry,
                    caller,
                    config: &self.config,
                })
                .await;

            match result {
                Ok(outcome) => {
                    tracing::debug!(
                        run_id = %builder.id(),
                        stage = %name,
                        confidence = outcome.confidence,
                        fallback = outcome.fallback,
                        "stage completed"
                    );
                    builder = builder.apply(outcome)?;
                }
                Err(error) => {
                    tracing::warn!(run_id = %builder.id(), stage = %name, error = %error, "stage failed");
                    return Err(StageFailure {
                        failed_at: name,
                        error,
                        partial: builder,
                    });
                }
            }
        }

        builder.finalize(&self.aggregator)
    }
}
