//! 失败兜底
//!
//! 把 StageFailure 转成 success=false 的最终 Run：记录 {message, failed_at, at}，
//! 若注册了 SafeDefaultStrategy 则用原始请求求一个最小可用方案，并附带说明替换的警告。
//! 恢复本身从不失败，也不向调用方抛错。

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::capabilities::{Capability, CapabilityRegistry, ProviderCaller, SafeDefaultStrategy};
use crate::workflow::{ConfidenceAggregator, Run, RunError, RunOutput, StageFailure, WorkflowRequest};

#[derive(Debug, Clone)]
pub struct FailsafeRecovery {
    timeout_secs: u64,
}

impl FailsafeRecovery {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    pub async fn recover(
        &self,
        failure: StageFailure,
        request: &WorkflowRequest,
        registry: &CapabilityRegistry,
        aggregator: &ConfidenceAggregator,
    ) -> Run {
        let StageFailure {
            failed_at,
            error,
            partial,
        } = failure;
        let run_error = RunError {
            message: error.to_string(),
            failed_at,
            at: Utc::now(),
        };
        tracing::error!(
            run_id = %partial.id(),
            stage = %failed_at,
            error = %run_error.message,
            "workflow failed, entering failsafe"
        );

        let mut partial = partial.warn(format!(
            "workflow failed at {failed_at}: {}",
            run_error.message
        ));

        let result = match registry.resolve::<dyn SafeDefaultStrategy>() {
            Some(provider) => {
                // 运行的令牌可能已取消，兜底调用使用独立令牌
                let caller = ProviderCaller::new(self.timeout_secs, CancellationToken::new());
                match caller
                    .call(Capability::SafeDefaultStrategy, provider.safe_default(request))
                    .await
                {
                    Ok(safe) => {
                        partial = partial.warn(format!(
                            "substituted safe default result ({}) from SafeDefaultStrategy",
                            safe.strategy
                        ));
                        Some(RunOutput::SafeDefault(safe))
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "safe default strategy failed");
                        partial = partial.warn(format!(
                            "SafeDefaultStrategy failed ({e}); no result available"
                        ));
                        None
                    }
                }
            }
            None => {
                partial = partial
                    .warn("no SafeDefaultStrategy registered; no result available".to_string());
                None
            }
        };

        partial.fail(run_error, result, aggregator)
    }
}

impl Default for FailsafeRecovery {
    fn default() -> Self {
        Self::new(30)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::capabilities::SafeResult;
    use crate::core::{ProviderError, RunPhase, WorkflowError};
    use crate::workflow::{RunBuilder, StageName};

    struct Light;

    #[async_trait]
    impl SafeDefaultStrategy for Light {
        async fn safe_default(&self, _request: &WorkflowRequest) -> Result<SafeResult, ProviderError> {
            Ok(SafeResult {
                strategy: "light-raster".to_string(),
                tool: None,
                rpm: 3000.0,
                feed_mm_min: 300.0,
                depth_of_cut_mm: 0.5,
                notes: vec![],
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl SafeDefaultStrategy for Broken {
        async fn safe_default(&self, _request: &WorkflowRequest) -> Result<SafeResult, ProviderError> {
            Err(ProviderError::Failed("nope".to_string()))
        }
    }

    fn failure() -> StageFailure {
        StageFailure {
            failed_at: StageName::ParameterCalculation,
            error: WorkflowError::Provider {
                capability: Capability::ParameterDecision,
                source: ProviderError::Failed("solver diverged".to_string()),
            },
            partial: RunBuilder::new(),
        }
    }

    #[tokio::test]
    async fn test_recover_with_safe_default() {
        let registry = CapabilityRegistry::new();
        registry.register::<dyn SafeDefaultStrategy>(Arc::new(Light));
        let run = FailsafeRecovery::default()
            .recover(failure(), &WorkflowRequest::default(), &registry, &ConfidenceAggregator::default())
            .await;
        assert!(!run.success);
        assert_eq!(run.phase, RunPhase::Failed);
        let error = run.error.as_ref().unwrap();
        assert_eq!(error.failed_at, StageName::ParameterCalculation);
        assert!(error.message.contains("solver diverged"));
        assert_eq!(run.safe_default().unwrap().strategy, "light-raster");
        assert!(run.warnings.iter().any(|w| w.contains("SafeDefaultStrategy")));
    }

    #[tokio::test]
    async fn test_recover_without_provider() {
        let run = FailsafeRecovery::default()
            .recover(
                failure(),
                &WorkflowRequest::default(),
                &CapabilityRegistry::new(),
                &ConfidenceAggregator::default(),
            )
            .await;
        assert!(!run.success);
        assert!(run.result.is_none());
        assert_eq!(run.confidence.overall, 50);
    }

    #[tokio::test]
    async fn test_failing_safe_default_still_returns_run() {
        let registry = CapabilityRegistry::new();
        registry.register::<dyn SafeDefaultStrategy>(Arc::new(Broken));
        let run = FailsafeRecovery::default()
            .recover(failure(), &WorkflowRequest::default(), &registry, &ConfidenceAggregator::default())
            .await;
        assert!(run.result.is_none());
        assert!(run.error.is_some());
        assert!(run.warnings.iter().any(|w| w.contains("nope")));
    }
}
