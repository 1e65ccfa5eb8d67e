//! 切削参数决策与物理一致性检查

use std::f64::consts::PI;

use async_trait::async_trait;

use crate::capabilities::{
    BudgetTier, ChatterCheck, ChatterRisk, CuttingParameters, DeflectionCheck, FeatureKind,
    MaterialProfile, ParameterDecision, ParameterDecisionEngine, ParameterQuery,
    PhysicsConsistency, ToolArchetype, ToolSpec,
};
use crate::config::FallbackSection;
use crate::core::ProviderError;

/// 公制粗牙螺距
fn coarse_pitch(major_mm: f64) -> f64 {
    const TABLE: &[(f64, f64)] = &[
        (3.0, 0.5),
        (4.0, 0.7),
        (5.0, 0.8),
        (6.0, 1.0),
        (8.0, 1.25),
        (10.0, 1.5),
        (12.0, 1.75),
    ];
    TABLE
        .iter()
        .find(|(d, _)| (d - major_mm).abs() < 0.05)
        .map(|(_, p)| *p)
        .unwrap_or(major_mm * 0.15)
}

fn tool_material_factor(material: &str) -> f64 {
    match material {
        "hss" => 0.35,
        "coated_carbide" => 1.2,
        _ => 1.0,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// 手册式参数引擎：线速度按刀具材质/工序修正，每齿进给按直径缩放
pub struct HandbookParameterEngine {
    limits: FallbackSection,
}

impl HandbookParameterEngine {
    pub fn new(limits: FallbackSection) -> Self {
        Self { limits }
    }
}

#[async_trait]
impl ParameterDecisionEngine for HandbookParameterEngine {
    async fn decide(&self, query: &ParameterQuery) -> Result<ParameterDecision, ProviderError> {
        let tool = &query.tool;
        let d = tool.diameter_mm;
        if !(d.is_finite() && d > 0.0) {
            return Err(ProviderError::InvalidInput(format!(
                "tool {} has no usable diameter",
                tool.id
            )));
        }
        let material = &query.material;
        let mut steps = Vec::new();

        let op_factor = match query.operation {
            FeatureKind::Hole => 0.8,
            FeatureKind::Thread => 0.3,
            FeatureKind::Slot => 0.9,
            _ => 1.0,
        };
        let budget_factor = match query.budget {
            BudgetTier::Economy => 0.9,
            BudgetTier::Standard => 1.0,
            BudgetTier::Premium => 1.1,
        };
        let vc = material.surface_speed_m_min
            * tool_material_factor(&tool.material)
            * op_factor
            * budget_factor;
        steps.push(format!(
            "Vc {:.0} m/min = {} base x {} tool x {} operation x {} budget",
            vc,
            material.surface_speed_m_min,
            tool_material_factor(&tool.material),
            op_factor,
            budget_factor
        ));

        let rpm = (1000.0 * vc / (PI * d)).min(self.limits.max_rpm).round();
        if rpm >= self.limits.max_rpm {
            steps.push(format!("spindle capped at {} rpm", self.limits.max_rpm));
        }

        let flutes = tool.flute_count.max(1);
        let (chip_load, feed) = if query.operation == FeatureKind::Thread {
            let pitch = coarse_pitch(d);
            steps.push(format!("tapping feed synchronised to {pitch} mm pitch"));
            (pitch, rpm * pitch)
        } else {
            let mut fz = material.chip_load_mm * (d / 10.0).clamp(0.3, 2.0);
            if query.operation == FeatureKind::Slot {
                fz *= 0.8;
            }
            if tool.archetype == ToolArchetype::Drill {
                // 每转进给约 0.02D（按材料每齿进给相对 0.05 缩放），两刃平分
                fz = 0.01 * d * (material.chip_load_mm / 0.05);
            }
            (fz, rpm * fz * f64::from(flutes))
        };
        steps.push(format!(
            "feed {:.1} mm/min from {:.4} mm chip load x {} flutes",
            feed, chip_load, flutes
        ));

        let depth = query.feature.dimensions.depth.max(0.0);
        let axial = match query.operation {
            FeatureKind::Hole | FeatureKind::Thread | FeatureKind::Chamfer => depth,
            FeatureKind::Face => depth.min(2.0),
            FeatureKind::Slot => depth.min(0.5 * d),
            FeatureKind::Contour | FeatureKind::Boss => depth.min(1.5 * d),
            FeatureKind::Pocket | FeatureKind::Generic => depth.min(d),
        };
        let stepover = match query.operation {
            FeatureKind::Slot => d,
            FeatureKind::Face => 0.7 * d,
            FeatureKind::Contour | FeatureKind::Boss => 0.1 * d,
            _ => 0.4 * d,
        };
        steps.push(format!("ap {axial:.2} mm, ae {stepover:.2} mm"));

        Ok(ParameterDecision {
            parameters: CuttingParameters {
                rpm,
                feed_mm_min: round1(feed),
                chip_load_mm: chip_load,
                axial_depth_mm: axial,
                radial_stepover_mm: stepover,
                surface_speed_m_min: round1(PI * d * rpm / 1000.0),
            },
            confidence: 85,
            reasoning_steps: steps,
        })
    }
}

/// 悬臂梁挠度模型与长径比颤振判断
#[derive(Debug, Clone)]
pub struct CantileverPhysics {
    /// 可接受的最大挠度（mm）
    pub max_deflection_mm: f64,
}

impl Default for CantileverPhysics {
    fn default() -> Self {
        Self {
            max_deflection_mm: 0.05,
        }
    }
}

impl CantileverPhysics {
    fn modulus(tool: &ToolSpec) -> f64 {
        // N/mm²
        if tool.material == "hss" {
            210_000.0
        } else {
            600_000.0
        }
    }

    /// 估算切削力（N）
    fn force(parameters: &CuttingParameters, material: &MaterialProfile, diameter: f64) -> f64 {
        let kc = 700.0 + 2000.0 * (1.0 - material.machinability.clamp(0.0, 1.0));
        let engagement = (parameters.radial_stepover_mm / diameter).clamp(0.0, 1.0);
        let chip = parameters.chip_load_mm * engagement.sqrt();
        kc * parameters.axial_depth_mm * chip
    }

    pub fn deflection(&self, tool: &ToolSpec, parameters: &CuttingParameters, material: &MaterialProfile) -> f64 {
        let d = tool.diameter_mm.max(0.1);
        let core = 0.8 * d;
        let inertia = PI * core.powi(4) / 64.0;
        let l = tool.stickout_mm.max(d);
        Self::force(parameters, material, d) * l.powi(3) / (3.0 * Self::modulus(tool) * inertia)
    }
}

#[async_trait]
impl PhysicsConsistency for CantileverPhysics {
    async fn check_deflection(
        &self,
        tool: &ToolSpec,
        parameters: &CuttingParameters,
        material: &MaterialProfile,
    ) -> Result<DeflectionCheck, ProviderError> {
        if matches!(tool.archetype, ToolArchetype::Drill | ToolArchetype::Tap) {
            return Ok(DeflectionCheck {
                acceptable: true,
                deflection_mm: 0.0,
                recommendation: None,
            });
        }
        let deflection = self.deflection(tool, parameters, material);
        let acceptable = deflection <= self.max_deflection_mm;
        let recommendation = (!acceptable).then(|| {
            // δ ∝ ap，按比例给出可接受切深
            let ratio = self.max_deflection_mm / deflection;
            format!(
                "reduce axial depth to {:.2} mm or shorten stickout below {:.1} mm",
                parameters.axial_depth_mm * ratio,
                tool.stickout_mm * ratio.cbrt()
            )
        });
        Ok(DeflectionCheck {
            acceptable,
            deflection_mm: (deflection * 10_000.0).round() / 10_000.0,
            recommendation,
        })
    }

    async fn check_chatter(
        &self,
        tool: &ToolSpec,
        parameters: &CuttingParameters,
        material: &MaterialProfile,
    ) -> Result<ChatterCheck, ProviderError> {
        if matches!(tool.archetype, ToolArchetype::Drill | ToolArchetype::Tap) {
            return Ok(ChatterCheck {
                risk: ChatterRisk::Low,
                suggested_rpm: None,
            });
        }
        let ratio = tool.stickout_mm / tool.diameter_mm.max(0.1);
        let risk = if ratio > 6.0 || (ratio > 4.0 && material.machinability < 0.3) {
            ChatterRisk::High
        } else if ratio > 4.0 {
            ChatterRisk::Moderate
        } else {
            ChatterRisk::Low
        };
        let suggested_rpm = (risk == ChatterRisk::High).then(|| (parameters.rpm * 0.8).round());
        Ok(ChatterCheck { risk, suggested_rpm })
    }
}
