//! 审计日志
//!
//! 进程生命周期内按追加顺序保存已 finalize 的 Run，供事后查看最近一次运行的推理与置信度。
//! 并发运行的追加经 RwLock 串行化；「最近一次」定义为最后一次成功追加的记录。
//! 保留策略显式可调：Unbounded 或 Capped(n)（环形缓冲，淘汰最旧记录）。

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::workflow::{ConfidenceReport, Run, RunId, StageReasoning};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// 无界增长
    Unbounded,
    /// 最多保留 n 条
    Capped(usize),
}

impl RetentionPolicy {
    /// 0 表示不限
    pub fn from_max_runs(max_runs: usize) -> Self {
        if max_runs == 0 {
            RetentionPolicy::Unbounded
        } else {
            RetentionPolicy::Capped(max_runs)
        }
    }
}

#[derive(Debug, Default)]
struct Entries {
    runs: VecDeque<Arc<Run>>,
    ids: HashSet<RunId>,
}

#[derive(Debug)]
pub struct AuditLog {
    entries: RwLock<Entries>,
    policy: RetentionPolicy,
    appended: AtomicU64,
}

impl AuditLog {
    pub fn new(policy: RetentionPolicy) -> Self {
        if policy == RetentionPolicy::Unbounded {
            tracing::info!("audit log retention is unbounded");
        }
        Self {
            entries: RwLock::new(Entries::default()),
            policy,
            appended: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// 追加一条已 finalize 的运行；同一 run id 重复追加会被拒绝并返回 false
    pub async fn append(&self, run: Arc<Run>) -> bool {
        let mut entries = self.entries.write().await;
        if !entries.ids.insert(run.id.clone()) {
            tracing::warn!(run_id = %run.id, "duplicate audit entry rejected");
            return false;
        }
        entries.runs.push_back(run);
        if let RetentionPolicy::Capped(max) = self.policy {
            while entries.runs.len() > max {
                if let Some(evicted) = entries.runs.pop_front() {
                    entries.ids.remove(&evicted.id);
                    tracing::debug!(run_id = %evicted.id, "audit entry evicted");
                }
            }
        }
        self.appended.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub async fn most_recent(&self) -> Option<Arc<Run>> {
        self.entries.read().await.runs.back().cloned()
    }

    pub async fn most_recent_reasoning(&self) -> Option<Vec<StageReasoning>> {
        self.most_recent().await.map(|run| run.reasoning())
    }

    pub async fn most_recent_confidence(&self) -> Option<ConfidenceReport> {
        self.most_recent().await.map(|run| run.confidence.clone())
    }

    pub async fn get(&self, run_id: &str) -> Option<Arc<Run>> {
        self.entries
            .read()
            .await
            .runs
            .iter()
            .find(|r| r.id == run_id)
            .cloned()
    }

    /// 当前保留的记录（按追加顺序）
    pub async fn snapshot(&self) -> Vec<Arc<Run>> {
        self.entries.read().await.runs.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.runs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 进程内累计成功追加次数（含已淘汰的记录）
    pub fn total_appended(&self) -> u64 {
        self.appended.load(Ordering::SeqCst)
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(RetentionPolicy::Capped(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{RunBuilder, RunError, StageName};
    use crate::workflow::confidence::ConfidenceAggregator;

    fn failed_run() -> Arc<Run> {
        Arc::new(RunBuilder::new().fail(
            RunError {
                message: "test".to_string(),
                failed_at: StageName::InputAnalysis,
                at: chrono::Utc::now(),
            },
            None,
            &ConfidenceAggregator::default(),
        ))
    }

    #[tokio::test]
    async fn test_append_and_most_recent() {
        let log = AuditLog::new(RetentionPolicy::Unbounded);
        assert!(log.most_recent().await.is_none());

        let first = failed_run();
        let second = failed_run();
        assert!(log.append(first.clone()).await);
        assert!(log.append(second.clone()).await);

        assert_eq!(log.len().await, 2);
        assert_eq!(log.most_recent().await.unwrap().id, second.id);
        assert_eq!(log.most_recent_confidence().await.unwrap().overall, 50);
        assert!(log.get(&first.id).await.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let log = AuditLog::new(RetentionPolicy::Unbounded);
        let run = failed_run();
        assert!(log.append(run.clone()).await);
        assert!(!log.append(run).await);
        assert_eq!(log.len().await, 1);
        assert_eq!(log.total_appended(), 1);
    }

    #[tokio::test]
    async fn test_capped_evicts_oldest() {
        let log = AuditLog::new(RetentionPolicy::Capped(2));
        let runs: Vec<_> = (0..3).map(|_| failed_run()).collect();
        for run in &runs {
            log.append(run.clone()).await;
        }
        let kept: Vec<_> = log.snapshot().await.iter().map(|r| r.id.clone()).collect();
        assert_eq!(kept, vec![runs[1].id.clone(), runs[2].id.clone()]);
        assert_eq!(log.total_appended(), 3);
        assert!(log.get(&runs[0].id).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let log = Arc::new(AuditLog::new(RetentionPolicy::Unbounded));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let log = Arc::clone(&log);
                tokio::spawn(async move { log.append(failed_run()).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(log.len().await, 32);
    }

    #[test]
    fn test_policy_from_max_runs() {
        assert_eq!(RetentionPolicy::from_max_runs(0), RetentionPolicy::Unbounded);
        assert_eq!(RetentionPolicy::from_max_runs(5), RetentionPolicy::Capped(5));
    }
}
