//! 阶段 1：输入分析

use async_trait::async_trait;

use super::{StageExecutor, StageInput, StageRecorder};
use crate::capabilities::{
    Capability, ContextInference, Dimensions, Feature, FeatureInteraction, FeatureKind,
    FeatureRecognition,
};
use crate::core::WorkflowError;
use crate::workflow::{StageName, StageOutcome, StageResult};

/// 识别器缺席时走降级路径的置信度上限
const RECOGNIZER_ABSENT_CAP: u8 = 60;
/// 识别器未识别出任何特征时推断结果的置信度
const EMPTY_RECOGNITION_CONFIDENCE: u8 = 50;
/// 本地合成通用特征（推断 provider 缺席）
const LOCAL_SYNTHESIS_CONFIDENCE: u8 = 90;

pub struct InputAnalysis;

#[async_trait]
impl StageExecutor for InputAnalysis {
    fn stage(&self) -> StageName {
        StageName::InputAnalysis
    }

    async fn execute(&self, input: StageInput<'_>) -> Result<StageOutcome, WorkflowError> {
        let mut rec = StageRecorder::start(self.stage());
        let request = input.request;

        if let Some(stock) = &request.stock {
            if !stock.is_valid() {
                rec.warn(format!(
                    "stock dimensions {}x{}x{} are not positive and finite; stock ignored",
                    stock.x, stock.y, stock.z
                ));
            }
        }

        let (features, inferred, confidence) = if let Some(text) = request.description() {
            match input.registry.resolve::<dyn FeatureRecognition>() {
                Some(recognizer) => {
                    let recognized = input
                        .caller
                        .call(Capability::FeatureRecognition, recognizer.recognize(text))
                        .await?;
                    if recognized.features.is_empty() {
                        rec.note(
                            "recognize features",
                            format!("no features recognized in \"{text}\""),
                        );
                        let (feature, conf) = infer_feature(&input, &mut rec).await?;
                        (vec![feature], true, conf.min(EMPTY_RECOGNITION_CONFIDENCE))
                    } else {
                        let features = normalize_ids(recognized.features, Some(text));
                        rec.note_data(
                            "recognize features",
                            format!("recognized {} feature(s) from text", features.len()),
                            serde_json::json!({
                                "kinds": features.iter().map(|f| f.kind.as_str()).collect::<Vec<_>>(),
                            }),
                        );
                        (features, false, recognized.confidence.min(100))
                    }
                }
                None if !request.features.is_empty() => {
                    rec.fallback(
                        "structured features",
                        "FeatureRecognition absent; using the structured features supplied with the text",
                    );
                    let features = normalize_ids(request.features.clone(), None);
                    (features, false, RECOGNIZER_ABSENT_CAP)
                }
                None => {
                    rec.fallback(
                        "context inference",
                        "FeatureRecognition absent; inferring a generic feature instead of parsing the text",
                    );
                    let (feature, conf) = infer_feature(&input, &mut rec).await?;
                    (vec![feature], true, conf.min(RECOGNIZER_ABSENT_CAP))
                }
            }
        } else if !request.features.is_empty() {
            let features = normalize_ids(request.features.clone(), None);
            rec.note(
                "accept structured features",
                format!("{} structured feature(s) accepted verbatim", features.len()),
            );
            (features, false, 100)
        } else {
            rec.note(
                "infer feature",
                "no description and no structured features supplied",
            );
            let (feature, conf) = infer_feature(&input, &mut rec).await?;
            (vec![feature], true, conf)
        };

        if features.len() > 1 {
            match input.registry.resolve::<dyn FeatureInteraction>() {
                Some(analyzer) => {
                    let notes = input
                        .caller
                        .call(Capability::FeatureInteraction, analyzer.analyze(&features))
                        .await?;
                    if notes.is_empty() {
                        rec.note("analyze interactions", "no cross-feature interactions found");
                    }
                    for note in notes {
                        rec.warn(note);
                    }
                }
                None => rec.fallback(
                    "skip interaction analysis",
                    "FeatureInteraction absent; features treated independently",
                ),
            }
        }

        Ok(rec.finish(confidence, StageResult::InputAnalysis { features, inferred }))
    }
}

/// 通过 ContextInference 推断一个通用特征；provider 缺席时在本地按毛坯合成
async fn infer_feature(
    input: &StageInput<'_>,
    rec: &mut StageRecorder,
) -> Result<(Feature, u8), WorkflowError> {
    if let Some(inference) = input.registry.resolve::<dyn ContextInference>() {
        let context = input
            .caller
            .call(Capability::ContextInference, inference.infer(input.request))
            .await?;
        let mut feature = context.feature;
        if feature.id.is_empty() {
            feature.id = "feature_1".to_string();
        }
        feature.inferred = true;
        rec.note_data(
            "infer feature",
            format!("context inference produced a {} feature", feature.kind),
            serde_json::json!({ "notes": context.notes }),
        );
        return Ok((feature, 100));
    }

    rec.fallback(
        "local generic feature",
        "ContextInference absent; synthesizing a generic feature from stock size",
    );
    let dimensions = match input.request.stock.as_ref().filter(|s| s.is_valid()) {
        Some(stock) => Dimensions::new(stock.x, stock.y, stock.z.min(5.0)),
        None => Dimensions::new(50.0, 50.0, 5.0),
    };
    let mut feature = Feature::new("feature_1", FeatureKind::Generic, dimensions);
    feature.inferred = true;
    feature.confidence = Some(LOCAL_SYNTHESIS_CONFIDENCE);
    Ok((feature, LOCAL_SYNTHESIS_CONFIDENCE))
}

/// 补齐空 ID 并保证唯一
fn normalize_ids(features: Vec<Feature>, source: Option<&str>) -> Vec<Feature> {
    let mut seen = std::collections::HashSet::new();
    features
        .into_iter()
        .enumerate()
        .map(|(i, mut feature)| {
            if feature.id.trim().is_empty() || !seen.insert(feature.id.clone()) {
                feature.id = format!("feature_{}", i + 1);
                seen.insert(feature.id.clone());
            }
            if feature.source_text.is_none() {
                feature.source_text = source.map(str::to_string);
            }
            feature
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::capabilities::{InferredContext, RecognizedFeatures, Stock};
    use crate::core::ProviderError;
    use crate::stages::test_support::Harness;
    use crate::workflow::WorkflowRequest;

    struct FixedRecognizer(Vec<Feature>);

    #[async_trait]
    impl FeatureRecognition for FixedRecognizer {
        async fn recognize(&self, _text: &str) -> Result<RecognizedFeatures, ProviderError> {
            Ok(RecognizedFeatures { features: self.0.clone(), confidence: 85 })
        }
    }

    struct BrokenRecognizer;

    #[async_trait]
    impl FeatureRecognition for BrokenRecognizer {
        async fn recognize(&self, _text: &str) -> Result<RecognizedFeatures, ProviderError> {
            Err(ProviderError::Failed("model offline".to_string()))
        }
    }

    struct SlotInference;

    #[async_trait]
    impl ContextInference for SlotInference {
        async fn infer(&self, _request: &WorkflowRequest) -> Result<InferredContext, ProviderError> {
            Ok(InferredContext {
                feature: Feature::new("", FeatureKind::Slot, Dimensions::new(30.0, 6.0, 3.0)),
                notes: vec!["guessed".to_string()],
            })
        }
    }

    struct Overlap;

    #[async_trait]
    impl FeatureInteraction for Overlap {
        async fn analyze(&self, _features: &[Feature]) -> Result<Vec<String>, ProviderError> {
            Ok(vec!["features overlap".to_string()])
        }
    }

    fn pocket(id: &str) -> Feature {
        Feature::new(id, FeatureKind::Pocket, Dimensions::new(20.0, 20.0, 4.0))
    }

    #[tokio::test]
    async fn test_structured_features_accepted_verbatim() {
        let h = Harness::new(WorkflowRequest::from_features(vec![pocket("p1")]));
        let outcome = InputAnalysis.execute(h.input()).await.unwrap();
        assert_eq!(outcome.confidence, 100);
        assert!(!outcome.fallback);
        match outcome.result {
            StageResult::InputAnalysis { features, inferred } => {
                assert_eq!(features, vec![pocket("p1")]);
                assert!(!inferred);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_request_infers_generic_feature() {
        let h = Harness::new(WorkflowRequest::default());
        h.registry.register::<dyn ContextInference>(Arc::new(SlotInference));
        let outcome = InputAnalysis.execute(h.input()).await.unwrap();
        assert_eq!(outcome.confidence, 100);
        match outcome.result {
            StageResult::InputAnalysis { features, inferred } => {
                assert!(inferred);
                assert_eq!(features[0].id, "feature_1");
                assert!(features[0].inferred);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_local_synthesis_uses_stock() {
        let h = Harness::new(WorkflowRequest::default().with_stock(Stock::new(80.0, 40.0, 20.0)));
        let outcome = InputAnalysis.execute(h.input()).await.unwrap();
        assert!(outcome.fallback);
        assert!(outcome.confidence <= 100);
        match outcome.result {
            StageResult::InputAnalysis { features, .. } => {
                assert_eq!(features[0].kind, FeatureKind::Generic);
                assert_eq!(features[0].dimensions.length, 80.0);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recognizer_absent_is_capped_and_named() {
        let request = WorkflowRequest {
            text: Some("a pocket".to_string()),
            features: vec![pocket("p1")],
            ..WorkflowRequest::default()
        };
        let absent = Harness::new(request.clone());
        let degraded = InputAnalysis.execute(absent.input()).await.unwrap();

        let present = Harness::new(request);
        present
            .registry
            .register::<dyn FeatureRecognition>(Arc::new(FixedRecognizer(vec![pocket("p1")])));
        let primary = InputAnalysis.execute(present.input()).await.unwrap();

        assert_eq!(degraded.confidence, 60);
        assert!(degraded.confidence <= primary.confidence);
        assert!(degraded
            .reasoning
            .iter()
            .any(|r| r.action == "fallback: structured features"));
    }

    #[tokio::test]
    async fn test_recognizer_error_is_fatal() {
        let h = Harness::new(WorkflowRequest::from_text("pocket"));
        h.registry.register::<dyn FeatureRecognition>(Arc::new(BrokenRecognizer));
        let err = InputAnalysis.execute(h.input()).await.unwrap_err();
        assert_eq!(err.capability(), Some(Capability::FeatureRecognition));
    }

    #[tokio::test]
    async fn test_interaction_notes_become_warnings() {
        let h = Harness::new(WorkflowRequest::from_features(vec![pocket("a"), pocket("a")]));
        h.registry.register::<dyn FeatureInteraction>(Arc::new(Overlap));
        let outcome = InputAnalysis.execute(h.input()).await.unwrap();
        assert_eq!(outcome.warnings, vec!["features overlap".to_string()]);
        match outcome.result {
            StageResult::InputAnalysis { features, .. } => {
                assert_eq!(features[0].id, "a");
                assert_eq!(features[1].id, "feature_2");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_stock_warns() {
        let h = Harness::new(
            WorkflowRequest::from_features(vec![pocket("p")]).with_stock(Stock::new(0.0, 1.0, 1.0)),
        );
        let outcome = InputAnalysis.execute(h.input()).await.unwrap();
        assert!(outcome.warnings[0].contains("stock"));
    }
}
