//! 编排器：对外 API
//!
//! execute_workflow 总是返回一个 Run（成功或经 FailsafeRecovery 兜底），从不向调用方抛错；
//! 每次调用恰好向审计日志追加一条记录。多个运行可并发提交，各自持有独立状态，
//! 只有审计日志是共享的。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::capabilities::{CapabilityRegistry, ProviderCaller};
use crate::config::AppConfig;
use crate::core::{FailsafeRecovery, RunSupervisor};
use crate::workflow::{
    AuditLog, ConfidenceReport, RetentionPolicy, Run, StageReasoning, WorkflowEngine,
    WorkflowOptions, WorkflowRequest,
};

pub struct Orchestrator {
    config: Arc<AppConfig>,
    registry: Arc<CapabilityRegistry>,
    engine: WorkflowEngine,
    recovery: FailsafeRecovery,
    audit: Arc<AuditLog>,
    supervisor: RunSupervisor,
}

impl Orchestrator {
    pub fn new(config: Arc<AppConfig>, registry: Arc<CapabilityRegistry>) -> Self {
        let audit = AuditLog::new(RetentionPolicy::from_max_runs(config.audit.max_runs));
        Self {
            engine: WorkflowEngine::new(Arc::clone(&config)),
            recovery: FailsafeRecovery::new(config.workflow.provider_timeout_secs),
            audit: Arc::new(audit),
            supervisor: RunSupervisor::new(),
            registry,
            config,
        }
    }

    pub async fn execute_workflow(&self, request: WorkflowRequest, options: WorkflowOptions) -> Arc<Run> {
        self.run_with_token(request, options, self.supervisor.child_token())
            .await
    }

    /// 调用方 token 与 cancel_all 任一触发都会取消本次运行
    pub async fn execute_workflow_with_cancel(
        &self,
        request: WorkflowRequest,
        options: WorkflowOptions,
        cancel: CancellationToken,
    ) -> Arc<Run> {
        let token = self.supervisor.child_token();
        if cancel.is_cancelled() {
            token.cancel();
        }
        let link = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => token.cancel(),
                    _ = token.cancelled() => {}
                }
            })
        };
        let run = self.run_with_token(request, options, token).await;
        link.abort();
        run
    }

    /// execute_workflow 的简写，使用默认选项
    pub async fn process(&self, request: WorkflowRequest) -> Arc<Run> {
        self.execute_workflow(request, WorkflowOptions::default()).await
    }

    async fn run_with_token(
        &self,
        request: WorkflowRequest,
        options: WorkflowOptions,
        token: CancellationToken,
    ) -> Arc<Run> {
        let caller = ProviderCaller::new(self.config.workflow.provider_timeout_secs, token);
        tracing::info!(
            description = request.description().unwrap_or("<structured>"),
            features = request.features.len(),
            capabilities = self.registry.present().len(),
            "workflow started"
        );

        let run = match self
            .engine
            .run(&request, &options, &self.registry, &caller)
            .await
        {
            Ok(run) => run,
            Err(failure) => {
                self.recovery
                    .recover(failure, &request, &self.registry, self.engine.aggregator())
                    .await
            }
        };

        let run = Arc::new(run);
        self.audit.append(Arc::clone(&run)).await;
        tracing::info!(
            run_id = %run.id,
            success = run.success,
            confidence = run.confidence.overall,
            duration_ms = run.duration_ms,
            warnings = run.warnings.len(),
            "workflow finished"
        );
        run
    }

    /// 最近一次运行的推理轨迹
    pub async fn last_reasoning(&self) -> Option<Vec<StageReasoning>> {
        self.audit.most_recent_reasoning().await
    }

    pub async fn last_confidence(&self) -> Option<ConfidenceReport> {
        self.audit.most_recent_confidence().await
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 取消所有进行中的运行（被取消的运行走兜底并以 success=false 结束）
    pub fn cancel_all(&self) {
        tracing::warn!("cancelling all in-flight runs");
        self.supervisor.cancel_all();
    }
}
