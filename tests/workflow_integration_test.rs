//! 工作流集成测试：完整流程、失败兜底、审计与降级行为

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;

use millwright::capabilities::{
    CapabilityRegistry, ContainmentOptions, ContainmentValidator, Dimensions, Feature, FeatureKind,
    Move, ParameterDecision, ParameterDecisionEngine, ParameterQuery, Stock, Toolpath,
};
use millwright::config::AppConfig;
use millwright::core::{OrchestratorBuilder, ProviderError};
use millwright::providers::StockBoundsValidator;
use millwright::workflow::{
    ConfidenceAggregator, RunOutput, StageName, StageResult, WorkflowOptions, WorkflowRequest,
};
use millwright::Orchestrator;

fn with_builtin() -> Orchestrator {
    OrchestratorBuilder::new(AppConfig::default()).build()
}

fn bare() -> Orchestrator {
    OrchestratorBuilder::new(AppConfig::default())
        .with_builtin_providers(false)
        .build()
}

#[tokio::test]
async fn test_scenario_text_pocket_without_material() {
    let orch = with_builtin();
    let run = orch.process(WorkflowRequest::from_text("2x2x0.5in pocket")).await;

    assert!(run.success, "{:?}", run.error);
    assert_eq!(run.stages.len(), 8);
    let compiled = run.compiled().unwrap();
    assert!(!compiled.features.is_empty());
    assert!(!compiled.tools.is_empty());

    let material = compiled.material.as_ref().unwrap();
    assert!(material.fallback);
    assert!(run.warnings.iter().any(|w| w.contains("default material")));

    assert!((50..=100).contains(&run.confidence.overall));
    let program = compiled.program.as_ref().unwrap();
    assert_eq!(program.controller, "fanuc");
    assert!(!program.reduced_fidelity);
}

struct ExplodingEngine;

#[async_trait]
impl ParameterDecisionEngine for ExplodingEngine {
    async fn decide(&self, _query: &ParameterQuery) -> Result<ParameterDecision, ProviderError> {
        Err(ProviderError::Failed("solver diverged".to_string()))
    }
}

#[tokio::test]
async fn test_scenario_throwing_parameter_provider() {
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register::<dyn ParameterDecisionEngine>(Arc::new(ExplodingEngine));
    let orch = OrchestratorBuilder::new(AppConfig::default())
        .with_registry(registry)
        .build();

    let run = orch
        .process(WorkflowRequest::from_text("40x20x6mm pocket").with_material("6061"))
        .await;

    assert!(!run.success);
    let error = run.error.as_ref().unwrap();
    assert_eq!(error.failed_at, StageName::ParameterCalculation);
    assert!(error.message.contains("solver diverged"));
    // 已完成的三个阶段保留在部分运行中
    assert_eq!(run.stages.len(), 3);

    let safe = run.safe_default().unwrap();
    assert!(safe.rpm > 0.0);
    assert!(safe.feed_mm_min > 0.0);
    assert!(safe.depth_of_cut_mm > 0.0);
    assert!(matches!(run.result, Some(RunOutput::SafeDefault(_))));
    assert_eq!(orch.audit_log().len().await, 1);
}

#[tokio::test]
async fn test_audit_grows_once_per_call() {
    let orch = with_builtin();
    let requests = [
        WorkflowRequest::from_text("M8 thread"),
        WorkflowRequest::default(),
        WorkflowRequest::from_text("Ø6 hole 10mm deep").with_material("unobtainium"),
    ];
    let mut ids = HashSet::new();
    for (i, request) in requests.into_iter().enumerate() {
        let run = orch.process(request).await;
        assert!(ids.insert(run.id.clone()));
        assert_eq!(orch.audit_log().len().await, i + 1);
        assert_eq!(orch.audit_log().most_recent().await.unwrap().id, run.id);
    }
    assert_eq!(orch.audit_log().total_appended(), 3);
}

#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
    let orch = Arc::new(with_builtin());
    let texts = [
        "2x2x0.5in pocket",
        "10x60x5mm slot",
        "Ø6.8 hole 15mm deep",
        "M6 thread",
        "face 100x80",
        "boss 20x20x4mm",
    ];
    let runs = join_all(texts.iter().map(|text| {
        let orch = Arc::clone(&orch);
        async move {
            orch.execute_workflow(WorkflowRequest::from_text(*text), WorkflowOptions::default())
                .await
        }
    }))
    .await;

    let ids: HashSet<_> = runs.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids.len(), texts.len());
    assert_eq!(orch.audit_log().len().await, texts.len());
    for run in &runs {
        assert!(run.success, "{:?}", run.error);
        assert_eq!(run.stages.len(), 8);
        assert!(run.confidence.overall <= 100);
    }
}

#[tokio::test]
async fn test_containment_adjustment_round_trip() {
    let stock = Stock::new(30.0, 30.0, 10.0);
    let path = Toolpath {
        feature_id: "feature_1".to_string(),
        tool_id: "EM-C3-10".to_string(),
        strategy: "offset-pocket".to_string(),
        rpm: 8000.0,
        moves: vec![
            Move::rapid(5.0, 5.0, 5.0),
            Move::feed(5.0, 5.0, -15.0, 300.0),
            Move::feed(45.8, 45.8, -15.0, 900.0),
        ],
        estimated_time_s: 10.0,
    };
    let validator = StockBoundsValidator;
    let options = ContainmentOptions { auto_adjust: true };
    let report = validator.validate(&path, &stock, &options).await.unwrap();
    assert!(!report.valid);
    let adjusted = report.adjusted_path.unwrap();
    assert!(validator.validate(&adjusted, &stock, &options).await.unwrap().valid);
}

#[tokio::test]
async fn test_oversized_feature_is_adjusted_into_stock() {
    let orch = with_builtin();
    let request = WorkflowRequest::from_text("2x2x0.5in pocket")
        .with_material("6061")
        .with_stock(Stock::new(30.0, 30.0, 20.0));
    let run = orch.process(request).await;
    assert!(run.success, "{:?}", run.error);

    match &run.stage(StageName::Validation).unwrap().result {
        StageResult::Validation(summary) => {
            assert_eq!(summary.adjusted, vec!["feature_1".to_string()]);
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(run.warnings.iter().any(|w| w.contains("adjusted to fit stock")));
}

#[tokio::test]
async fn test_runaway_hole_depth_fails_safely() {
    let orch = with_builtin();
    let requests = [
        WorkflowRequest::from_text("Ø6 hole 1000000mm deep").with_material("6061"),
        WorkflowRequest::from_features(vec![Feature::new(
            "deep",
            FeatureKind::Hole,
            Dimensions::round(6.0, 5000.0),
        )]),
    ];
    for (i, request) in requests.into_iter().enumerate() {
        let run = tokio::time::timeout(
            Duration::from_secs(10),
            orch.execute_workflow(request, WorkflowOptions::default()),
        )
        .await
        .expect("run must finish");

        assert!(!run.success);
        let error = run.error.as_ref().unwrap();
        assert_eq!(error.failed_at, StageName::ToolpathGeneration);
        assert!(error.message.contains("depth"), "{}", error.message);
        assert!(matches!(run.result, Some(RunOutput::SafeDefault(_))));
        assert_eq!(orch.audit_log().len().await, i + 1);
    }
}

#[tokio::test]
async fn test_deep_hole_within_limit_stays_bounded() {
    let orch = with_builtin();
    let request = WorkflowRequest::from_features(vec![Feature::new(
        "deep",
        FeatureKind::Hole,
        Dimensions::round(2.0, 900.0),
    )]);
    let run = orch.process(request).await;
    assert!(run.success, "{:?}", run.error);
    let compiled = run.compiled().unwrap();
    let moves: usize = compiled
        .toolpaths
        .iter()
        .filter_map(|p| p.generated())
        .map(|p| p.moves.len())
        .sum();
    assert!(moves > 0 && moves < 1000, "{moves} moves");
}

#[tokio::test]
async fn test_absent_capabilities_never_beat_present_ones() {
    let request = WorkflowRequest::from_text("40x20x6mm pocket").with_material("6061");
    let present = with_builtin().process(request.clone()).await;
    let absent = bare().process(request).await;
    assert!(present.success && absent.success);

    for stage in [
        StageName::InputAnalysis,
        StageName::MaterialResolution,
        StageName::ToolSelection,
        StageName::ParameterCalculation,
        StageName::OutputGeneration,
    ] {
        let with = present.stage(stage).unwrap();
        let without = absent.stage(stage).unwrap();
        assert!(
            without.confidence <= with.confidence,
            "{stage}: {} > {}",
            without.confidence,
            with.confidence
        );
    }

    for stage in &absent.stages {
        if stage.fallback {
            assert!(
                stage.reasoning.iter().any(|r| r.action.starts_with("fallback:")),
                "{} has no named fallback",
                stage.name
            );
        }
    }
    let output = absent.stage(StageName::OutputGeneration).unwrap();
    assert!(output.fallback);
}

#[test]
fn test_all_full_confidence_aggregates_to_full() {
    let aggregator = ConfidenceAggregator::default();
    let by_stage: BTreeMap<StageName, u8> = StageName::ALL.iter().map(|s| (*s, 100)).collect();
    assert_eq!(aggregator.aggregate(&by_stage), 100);
    assert_eq!(aggregator.aggregate(&by_stage), aggregator.aggregate(&by_stage.clone()));
}
