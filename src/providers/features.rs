//! 特征识别、上下文推断与特征交互分析

use async_trait::async_trait;
use regex::{Captures, Regex};

use crate::capabilities::{
    ContextInference, Dimensions, Feature, FeatureInteraction, FeatureKind, FeatureRecognition,
    InferredContext, RecognizedFeatures,
};
use crate::core::ProviderError;
use crate::workflow::WorkflowRequest;

const MM_PER_INCH: f64 = 25.4;

/// 关键字 → 特征类型；按顺序匹配，靠前的优先
const KEYWORDS: &[(&str, FeatureKind)] = &[
    ("thread", FeatureKind::Thread),
    ("tapped", FeatureKind::Thread),
    ("tap", FeatureKind::Thread),
    ("pocket", FeatureKind::Pocket),
    ("slot", FeatureKind::Slot),
    ("groove", FeatureKind::Slot),
    ("boss", FeatureKind::Boss),
    ("contour", FeatureKind::Contour),
    ("profile", FeatureKind::Contour),
    ("hole", FeatureKind::Hole),
    ("drill", FeatureKind::Hole),
    ("bore", FeatureKind::Hole),
    ("chamfer", FeatureKind::Chamfer),
    ("face", FeatureKind::Face),
    ("facing", FeatureKind::Face),
];

/// 文本中出现的第一个特征关键字
pub fn keyword_kind(text: &str) -> Option<FeatureKind> {
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .find_map(|word| {
            KEYWORDS
                .iter()
                .find(|(k, _)| word == *k || word.strip_suffix('s') == Some(*k))
                .map(|(_, kind)| *kind)
        })
}

/// 基于正则的自由文本识别器，如 "2x2x0.5in pocket"、"Ø6.8 hole 12mm deep"、"M8 thread"
pub struct TextFeatureRecognizer {
    block: Regex,
    diameter: Regex,
    metric_thread: Regex,
    depth: Regex,
}

impl TextFeatureRecognizer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            block: Regex::new(
                r#"(\d+(?:\.\d+)?)\s*(?:x|×|by)\s*(\d+(?:\.\d+)?)(?:\s*(?:x|×|by)\s*(\d+(?:\.\d+)?))?\s*(mm|in|inch|inches|")?"#,
            )?,
            diameter: Regex::new(
                r#"(?:ø|⌀|dia(?:meter)?\.?\s*)\s*(\d+(?:\.\d+)?)\s*(mm|in|inch|inches|")?|(\d+(?:\.\d+)?)\s*(mm|in|inch|inches|")?\s*(?:diameter\s+|dia\.?\s+|drilled\s+|through\s+)?hole"#,
            )?,
            metric_thread: Regex::new(r"\bm(\d+(?:\.\d+)?)\b")?,
            depth: Regex::new(r#"(\d+(?:\.\d+)?)\s*(mm|in|inch|inches|")?\s*deep"#)?,
        })
    }

    fn clause(&self, clause: &str, index: usize) -> Option<Feature> {
        let kind = keyword_kind(clause);
        let block = self.block.captures(clause);

        let mut dimensions = match &block {
            Some(caps) => {
                let unit = caps.get(4).map(|m| m.as_str());
                let a = to_mm(number(caps, 1), unit);
                let b = to_mm(number(caps, 2), unit);
                let c = caps.get(3).map(|_| to_mm(number(caps, 3), unit));
                Dimensions::new(a, b, c.unwrap_or(0.0))
            }
            None => Dimensions::default(),
        };

        let round_kind = matches!(kind, Some(FeatureKind::Hole) | Some(FeatureKind::Thread));
        if round_kind {
            let diameter = self
                .metric_thread
                .captures(clause)
                .map(|caps| number(&caps, 1))
                .or_else(|| {
                    self.diameter.captures(clause).map(|caps| {
                        if caps.get(1).is_some() {
                            to_mm(number(&caps, 1), caps.get(2).map(|m| m.as_str()))
                        } else {
                            to_mm(number(&caps, 3), caps.get(4).map(|m| m.as_str()))
                        }
                    })
                });
            if let Some(d) = diameter.filter(|d| *d > 0.0) {
                dimensions = Dimensions::round(d, dimensions.depth);
            }
        }
        if let Some(caps) = self.depth.captures(clause) {
            dimensions.depth = to_mm(number(&caps, 1), caps.get(2).map(|m| m.as_str()));
        }

        let measured = dimensions.smallest_span() > 0.0;
        let (kind, confidence) = match (kind, measured) {
            (Some(kind), true) => (kind, 90),
            (Some(kind), false) => {
                dimensions = default_dimensions(kind);
                (kind, 60)
            }
            (None, true) => (FeatureKind::Generic, 50),
            (None, false) => return None,
        };
        if dimensions.depth <= 0.0 {
            dimensions.depth = default_dimensions(kind).depth;
        }

        let mut feature = Feature::new(format!("feature_{}", index + 1), kind, dimensions);
        feature.confidence = Some(confidence);
        feature.source_text = Some(clause.trim().to_string());
        Some(feature)
    }
}

fn number(caps: &Captures<'_>, group: usize) -> f64 {
    caps.get(group)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn to_mm(value: f64, unit: Option<&str>) -> f64 {
    match unit {
        Some("in") | Some("inch") | Some("inches") | Some("\"") => value * MM_PER_INCH,
        _ => value,
    }
}

fn default_dimensions(kind: FeatureKind) -> Dimensions {
    match kind {
        FeatureKind::Hole => Dimensions::round(6.0, 10.0),
        FeatureKind::Thread => Dimensions::round(6.0, 12.0),
        FeatureKind::Face => Dimensions::new(100.0, 100.0, 1.0),
        FeatureKind::Chamfer => Dimensions::new(50.0, 50.0, 1.0),
        _ => Dimensions::new(20.0, 20.0, 5.0),
    }
}

#[async_trait]
impl FeatureRecognition for TextFeatureRecognizer {
    async fn recognize(&self, text: &str) -> Result<RecognizedFeatures, ProviderError> {
        let lower = text.to_lowercase();
        let features: Vec<Feature> = lower
            .split([',', ';', '\n'])
            .flat_map(|part| part.split(" and "))
            .filter(|clause| !clause.trim().is_empty())
            .enumerate()
            .filter_map(|(i, clause)| self.clause(clause, i))
            .collect();

        let confidence = if features.is_empty() {
            0
        } else {
            let sum: u32 = features
                .iter()
                .map(|f| u32::from(f.confidence.unwrap_or(0)))
                .sum();
            (sum / features.len() as u32) as u8
        };
        Ok(RecognizedFeatures { features, confidence })
    }
}

/// 根据毛坯与文本关键字推断一个通用特征
#[derive(Debug, Default)]
pub struct StockContextInference;

#[async_trait]
impl ContextInference for StockContextInference {
    async fn infer(&self, request: &WorkflowRequest) -> Result<InferredContext, ProviderError> {
        let mut notes = Vec::new();
        let kind = request
            .description()
            .and_then(keyword_kind)
            .unwrap_or(FeatureKind::Generic);

        let dimensions = match request.stock.as_ref().filter(|s| s.is_valid()) {
            Some(stock) if kind == FeatureKind::Generic || kind == FeatureKind::Face => {
                notes.push(format!(
                    "facing pass over {}x{} mm stock top",
                    stock.x, stock.y
                ));
                Dimensions::new(stock.x, stock.y, (stock.z * 0.05).clamp(0.5, 2.0))
            }
            Some(stock) => {
                notes.push(format!("{kind} sized to half of the stock footprint"));
                let mut d = default_dimensions(kind);
                if d.diameter.is_none() {
                    d.length = stock.x / 2.0;
                    d.width = stock.y / 2.0;
                }
                d.depth = d.depth.min(stock.z);
                d
            }
            None => {
                notes.push(format!("no stock supplied; assumed nominal {kind} envelope"));
                default_dimensions(kind)
            }
        };

        let mut feature = Feature::new("feature_1", kind, dimensions);
        feature.inferred = true;
        Ok(InferredContext { feature, notes })
    }
}

/// 基于特征类型与尺寸的交互提示
#[derive(Debug, Default)]
pub struct ProximityInteractionAnalyzer;

#[async_trait]
impl FeatureInteraction for ProximityInteractionAnalyzer {
    async fn analyze(&self, features: &[Feature]) -> Result<Vec<String>, ProviderError> {
        let mut notes = Vec::new();

        for (i, a) in features.iter().enumerate() {
            for b in &features[i + 1..] {
                if a.kind == b.kind && a.dimensions == b.dimensions {
                    notes.push(format!(
                        "features {} and {} are identical; consider machining them as a pattern",
                        a.id, b.id
                    ));
                }
            }
        }

        for thread in features.iter().filter(|f| f.kind == FeatureKind::Thread) {
            let major = thread.dimensions.smallest_span();
            let has_pilot = features.iter().any(|h| {
                h.kind == FeatureKind::Hole && {
                    let d = h.dimensions.smallest_span();
                    d < major && d >= major * 0.7
                }
            });
            if !has_pilot {
                notes.push(format!(
                    "thread {} has no pilot hole feature; tap drill must be added",
                    thread.id
                ));
            }
        }

        let deepest_pocket = features
            .iter()
            .filter(|f| f.kind == FeatureKind::Pocket)
            .map(|f| f.dimensions.depth)
            .fold(0.0_f64, f64::max);
        for hole in features.iter().filter(|f| f.kind == FeatureKind::Hole) {
            if deepest_pocket > 0.0 && hole.dimensions.depth < deepest_pocket {
                notes.push(format!(
                    "hole {} is shallower than the deepest pocket; drill after pocketing",
                    hole.id
                ));
            }
        }

        Ok(notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Stock;

    fn recognizer() -> TextFeatureRecognizer {
        TextFeatureRecognizer::new().unwrap()
    }

    #[tokio::test]
    async fn test_inch_pocket() {
        let out = recognizer().recognize("2x2x0.5in pocket").await.unwrap();
        assert_eq!(out.features.len(), 1);
        let f = &out.features[0];
        assert_eq!(f.kind, FeatureKind::Pocket);
        assert!((f.dimensions.length - 50.8).abs() < 1e-9);
        assert!((f.dimensions.depth - 12.7).abs() < 1e-9);
        assert_eq!(out.confidence, 90);
    }

    #[tokio::test]
    async fn test_multiple_clauses() {
        let out = recognizer()
            .recognize("40x20x6mm pocket, Ø6.8 hole 15mm deep and M8 thread")
            .await
            .unwrap();
        let kinds: Vec<FeatureKind> = out.features.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![FeatureKind::Pocket, FeatureKind::Hole, FeatureKind::Thread]
        );
        assert_eq!(out.features[1].dimensions.diameter, Some(6.8));
        assert_eq!(out.features[1].dimensions.depth, 15.0);
        assert_eq!(out.features[2].dimensions.diameter, Some(8.0));
        let ids: Vec<&str> = out.features.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["feature_1", "feature_2", "feature_3"]);
    }

    #[tokio::test]
    async fn test_keyword_without_dimensions_uses_defaults() {
        let out = recognizer().recognize("a slot please").await.unwrap();
        assert_eq!(out.features[0].kind, FeatureKind::Slot);
        assert_eq!(out.confidence, 60);
    }

    #[tokio::test]
    async fn test_nothing_recognized() {
        let out = recognizer().recognize("make it shiny").await.unwrap();
        assert!(out.features.is_empty());
        assert_eq!(out.confidence, 0);
    }

    #[tokio::test]
    async fn test_inference_faces_stock() {
        let request = WorkflowRequest::default().with_stock(Stock::new(100.0, 60.0, 20.0));
        let ctx = StockContextInference.infer(&request).await.unwrap();
        assert_eq!(ctx.feature.kind, FeatureKind::Generic);
        assert_eq!(ctx.feature.dimensions.length, 100.0);
        assert_eq!(ctx.feature.dimensions.depth, 1.0);
        assert!(ctx.feature.inferred);
    }

    #[tokio::test]
    async fn test_inference_uses_keyword() {
        let request = WorkflowRequest::from_text("some pockets");
        let ctx = StockContextInference.infer(&request).await.unwrap();
        assert_eq!(ctx.feature.kind, FeatureKind::Pocket);
    }

    #[tokio::test]
    async fn test_interaction_notes() {
        let features = vec![
            Feature::new("t", FeatureKind::Thread, Dimensions::round(8.0, 12.0)),
            Feature::new("p", FeatureKind::Pocket, Dimensions::new(20.0, 20.0, 10.0)),
            Feature::new("h", FeatureKind::Hole, Dimensions::round(4.0, 5.0)),
        ];
        let notes = ProximityInteractionAnalyzer.analyze(&features).await.unwrap();
        assert!(notes.iter().any(|n| n.contains("thread t has no pilot")));
        assert!(notes.iter().any(|n| n.contains("hole h is shallower")));
    }
}
