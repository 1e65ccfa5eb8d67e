//! 失败兜底时的保守加工方案

use async_trait::async_trait;

use crate::capabilities::{SafeDefaultStrategy, SafeResult, ToolArchetype, ToolSpec};
use crate::config::AppConfig;
use crate::core::ProviderError;
use crate::workflow::WorkflowRequest;

const SAFE_TOOL_DIAMETER_MM: f64 = 6.0;
const SAFE_DEPTH_MM: f64 = 0.5;

/// Ø6 立铣刀、默认材料线速度、两刃每齿 0.02 mm、每层 0.5 mm
pub struct ConservativeSafeDefault {
    spindle_constant: f64,
    max_rpm: f64,
    surface_speed_m_min: f64,
}

impl ConservativeSafeDefault {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            spindle_constant: config.fallback.spindle_constant,
            max_rpm: config.fallback.max_rpm,
            surface_speed_m_min: config.material_default.surface_speed_m_min,
        }
    }
}

#[async_trait]
impl SafeDefaultStrategy for ConservativeSafeDefault {
    async fn safe_default(&self, request: &WorkflowRequest) -> Result<SafeResult, ProviderError> {
        let mut tool = ToolSpec::nominal(ToolArchetype::EndMill, SAFE_TOOL_DIAMETER_MM);
        tool.flute_count = 2;

        let rpm = (self.spindle_constant * self.surface_speed_m_min / SAFE_TOOL_DIAMETER_MM)
            .min(self.max_rpm)
            .round();
        let feed = (rpm * 0.02 * 2.0).round();

        let mut notes = vec![
            "conservative parameters; verify setup before running".to_string(),
            format!(
                "{} rpm / {} mm/min / {} mm per pass with a Ø{} two-flute end mill",
                rpm, feed, SAFE_DEPTH_MM, SAFE_TOOL_DIAMETER_MM
            ),
        ];
        if let Some(material) = request.material_name() {
            notes.push(format!("material {material} not considered; default surface speed used"));
        }
        if let Some(text) = request.description() {
            notes.push(format!("request: {text}"));
        }

        Ok(SafeResult {
            strategy: "light-raster".to_string(),
            tool: Some(tool),
            rpm,
            feed_mm_min: feed,
            depth_of_cut_mm: SAFE_DEPTH_MM,
            notes,
        })
    }
}
