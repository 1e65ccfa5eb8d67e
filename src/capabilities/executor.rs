//! Provider 调用器
//!
//! 对每次 provider 调用施加超时并监听运行的取消令牌；provider 返回 Err、超时、取消或 panic
//! 统一转为 WorkflowError；每次调用输出一条结构化审计日志（JSON）。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::capabilities::Capability;
use crate::core::{ProviderError, WorkflowError};

/// 单次运行内共享的 provider 调用器（一次尝试，不重试）
#[derive(Debug, Clone)]
pub struct ProviderCaller {
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl ProviderCaller {
    /// timeout_secs 为 0 时不设超时
    pub fn new(timeout_secs: u64, cancel: CancellationToken) -> Self {
        Self {
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn call<T, F>(&self, capability: Capability, fut: F) -> Result<T, WorkflowError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let start = Instant::now();
        let guarded = AssertUnwindSafe(fut).catch_unwind();

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(WorkflowError::Cancelled),
            res = bounded(self.timeout, guarded) => match res {
                Some(Ok(Ok(value))) => Ok(value),
                Some(Ok(Err(source))) => Err(WorkflowError::Provider { capability, source }),
                Some(Err(_panic)) => Err(WorkflowError::Provider {
                    capability,
                    source: ProviderError::Failed("provider panicked".to_string()),
                }),
                None => Err(WorkflowError::Timeout {
                    capability,
                    secs: self.timeout.map(|d| d.as_secs()).unwrap_or(0),
                }),
            },
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(WorkflowError::Timeout { .. }) => "timeout",
            Err(WorkflowError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "provider_audit",
            "capability": capability.name(),
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "provider");

        result
    }
}

/// 超时返回 None
async fn bounded<F: Future>(timeout: Option<Duration>, fut: F) -> Option<F::Output> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_ok() {
        let caller = ProviderCaller::new(5, CancellationToken::new());
        let value = caller
            .call(Capability::MaterialLookup, async { Ok::<_, ProviderError>(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_provider_error_is_wrapped() {
        let caller = ProviderCaller::new(5, CancellationToken::new());
        let err = caller
            .call(Capability::ParameterDecision, async {
                Err::<(), _>(ProviderError::Failed("boom".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Provider { capability: Capability::ParameterDecision, .. }
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let caller = ProviderCaller::new(1, CancellationToken::new());
        let err = caller
            .call(Capability::ToolpathGeometry, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ProviderError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Timeout { capability: Capability::ToolpathGeometry, secs: 1 }
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let token = CancellationToken::new();
        token.cancel();
        let caller = ProviderCaller::new(0, token);
        let err = caller
            .call(Capability::PostProcessor, async { Ok::<_, ProviderError>(1) })
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::Cancelled);
    }

    #[tokio::test]
    async fn test_panic_becomes_provider_error() {
        let caller = ProviderCaller::new(5, CancellationToken::new());
        let err = caller
            .call(Capability::StrategyCatalog, async {
                if true {
                    panic!("provider bug");
                }
                Ok::<u8, ProviderError>(0)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Provider { .. }));
    }
}
