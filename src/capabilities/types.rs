//! Provider 契约的输入输出数据类型
//!
//! 所有长度单位为 mm，速度为 m/min，进给为 mm/min；坐标系以特征左下角顶面为原点，Z 向下为负。

use serde::{Deserialize, Serialize};

/// 加工特征类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Pocket,
    Slot,
    Boss,
    Contour,
    Hole,
    Thread,
    Face,
    Chamfer,
    /// 由上下文推断出的通用特征
    Generic,
}

impl FeatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Pocket => "pocket",
            FeatureKind::Slot => "slot",
            FeatureKind::Boss => "boss",
            FeatureKind::Contour => "contour",
            FeatureKind::Hole => "hole",
            FeatureKind::Thread => "thread",
            FeatureKind::Face => "face",
            FeatureKind::Chamfer => "chamfer",
            FeatureKind::Generic => "generic",
        }
    }

    /// 特征类型 → 刀具原型的固定映射表
    pub fn archetype(&self) -> ToolArchetype {
        match self {
            FeatureKind::Pocket
            | FeatureKind::Slot
            | FeatureKind::Boss
            | FeatureKind::Contour
            | FeatureKind::Generic => ToolArchetype::EndMill,
            FeatureKind::Hole => ToolArchetype::Drill,
            FeatureKind::Thread => ToolArchetype::Tap,
            FeatureKind::Face => ToolArchetype::FaceMill,
            FeatureKind::Chamfer => ToolArchetype::ChamferMill,
        }
    }
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 刀具原型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolArchetype {
    EndMill,
    Drill,
    Tap,
    FaceMill,
    ChamferMill,
}

impl ToolArchetype {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolArchetype::EndMill => "end_mill",
            ToolArchetype::Drill => "drill",
            ToolArchetype::Tap => "tap",
            ToolArchetype::FaceMill => "face_mill",
            ToolArchetype::ChamferMill => "chamfer_mill",
        }
    }
}

impl std::fmt::Display for ToolArchetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 特征尺寸（mm）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    #[serde(default)]
    pub length: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub depth: f64,
    #[serde(default)]
    pub diameter: Option<f64>,
}

impl Dimensions {
    pub fn new(length: f64, width: f64, depth: f64) -> Self {
        Self {
            length,
            width,
            depth,
            diameter: None,
        }
    }

    pub fn round(diameter: f64, depth: f64) -> Self {
        Self {
            length: diameter,
            width: diameter,
            depth,
            diameter: Some(diameter),
        }
    }

    /// 平面投影的最小跨度；孔类取直径
    pub fn smallest_span(&self) -> f64 {
        if let Some(d) = self.diameter.filter(|d| *d > 0.0) {
            return d;
        }
        match (self.length > 0.0, self.width > 0.0) {
            (true, true) => self.length.min(self.width),
            (true, false) => self.length,
            (false, true) => self.width,
            (false, false) => 0.0,
        }
    }

    /// 平面外形尺寸 (x, y)
    pub fn footprint(&self) -> (f64, f64) {
        match self.diameter.filter(|d| *d > 0.0) {
            Some(d) => (d, d),
            None => (self.length.max(0.0), self.width.max(0.0)),
        }
    }
}

/// 识别出的加工特征
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub id: String,
    pub kind: FeatureKind,
    #[serde(default)]
    pub dimensions: Dimensions,
    /// 识别置信度（0-100），结构化输入时为空
    #[serde(default)]
    pub confidence: Option<u8>,
    /// 是否由上下文推断而来
    #[serde(default)]
    pub inferred: bool,
    #[serde(default)]
    pub source_text: Option<String>,
}

impl Feature {
    pub fn new(id: impl Into<String>, kind: FeatureKind, dimensions: Dimensions) -> Self {
        Self {
            id: id.into(),
            kind,
            dimensions,
            confidence: None,
            inferred: false,
            source_text: None,
        }
    }

    /// 可用刀具直径上限；None 表示不受特征几何约束
    pub fn max_tool_diameter(&self) -> Option<f64> {
        let span = self.dimensions.smallest_span();
        if span <= 0.0 {
            return None;
        }
        match self.kind {
            FeatureKind::Pocket | FeatureKind::Generic => Some((span / 2.0).min(25.0)),
            FeatureKind::Slot | FeatureKind::Hole | FeatureKind::Thread => Some(span),
            FeatureKind::Face | FeatureKind::Boss | FeatureKind::Contour | FeatureKind::Chamfer => None,
        }
    }
}

/// FeatureRecognition 输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedFeatures {
    pub features: Vec<Feature>,
    pub confidence: u8,
}

/// ContextInference 输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferredContext {
    pub feature: Feature,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// 材料参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialProfile {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub hardness_hb: Option<f64>,
    /// 推荐切削线速度（硬质合金刀具，m/min）
    pub surface_speed_m_min: f64,
    /// 参考每齿进给（Ø10 刀具，mm/齿）
    pub chip_load_mm: f64,
    /// 可加工性系数 0-1，越大越好加工
    pub machinability: f64,
}

/// 材料插值提示（调用方可选提供）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialHints {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub hardness_hb: Option<f64>,
}

impl MaterialHints {
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.hardness_hb.is_none()
    }
}

/// MaterialInterpolation 输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpolation {
    pub profile: MaterialProfile,
    pub confidence: u8,
    pub based_on: Vec<String>,
}

/// 预算档位：影响刀具与策略的成本/质量取舍
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetTier {
    Economy,
    #[default]
    Standard,
    Premium,
}

/// 刀具规格
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub id: String,
    pub archetype: ToolArchetype,
    pub diameter_mm: f64,
    pub flute_count: u32,
    pub flute_length_mm: f64,
    pub stickout_mm: f64,
    /// 刀具材质：hss / carbide / coated_carbide
    pub material: String,
    #[serde(default)]
    pub unit_cost: f64,
    #[serde(default)]
    pub confidence: Option<u8>,
}

impl ToolSpec {
    /// 按原型和直径合成一把名义刀具（无目录可用时）
    pub fn nominal(archetype: ToolArchetype, diameter_mm: f64) -> Self {
        let diameter_mm = if diameter_mm.is_finite() && diameter_mm > 0.0 {
            diameter_mm
        } else {
            6.0
        };
        let flute_count = match archetype {
            ToolArchetype::EndMill => 3,
            ToolArchetype::Drill => 2,
            ToolArchetype::Tap => 3,
            ToolArchetype::FaceMill => 5,
            ToolArchetype::ChamferMill => 2,
        };
        Self {
            id: format!("nominal-{}-{:.1}", archetype.as_str(), diameter_mm),
            archetype,
            diameter_mm,
            flute_count,
            flute_length_mm: diameter_mm * 3.0,
            stickout_mm: diameter_mm * 4.0,
            material: "carbide".to_string(),
            unit_cost: 0.0,
            confidence: None,
        }
    }
}

/// 刀具选择条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCriteria {
    pub feature_id: String,
    pub feature_kind: FeatureKind,
    pub archetype: ToolArchetype,
    pub max_diameter_mm: Option<f64>,
    pub min_reach_mm: f64,
    pub material_category: String,
}

/// ToolOptimalSelection 输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalSelection {
    pub recommendation: ToolSpec,
    #[serde(default)]
    pub alternatives: Vec<ToolSpec>,
    #[serde(default)]
    pub comparison: Vec<String>,
    pub confidence: u8,
}

/// 选定刀具的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    Optimal,
    Catalog,
    Synthesized,
}

/// 为某个特征选定的刀具
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedTool {
    pub feature_id: String,
    pub tool: ToolSpec,
    #[serde(default)]
    pub alternatives: Vec<ToolSpec>,
    pub source: ToolSource,
    #[serde(default)]
    pub confidence: Option<u8>,
}

/// 切削参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuttingParameters {
    pub rpm: f64,
    pub feed_mm_min: f64,
    pub chip_load_mm: f64,
    pub axial_depth_mm: f64,
    pub radial_stepover_mm: f64,
    pub surface_speed_m_min: f64,
}

/// ParameterDecision 输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterQuery {
    pub tool: ToolSpec,
    pub material: MaterialProfile,
    pub operation: FeatureKind,
    pub feature: Feature,
    pub budget: BudgetTier,
}

/// ParameterDecision 输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecision {
    pub parameters: CuttingParameters,
    pub confidence: u8,
    #[serde(default)]
    pub reasoning_steps: Vec<String>,
}

/// 一组 (特征, 刀具) 的最终切削参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedParameters {
    pub feature_id: String,
    pub tool_id: String,
    pub parameters: CuttingParameters,
    pub confidence: u8,
    /// 由闭式公式计算（决策引擎缺席）
    pub fallback: bool,
    /// 主轴转速因颤振风险被钳制
    pub adjusted_for_chatter: bool,
}

/// 刀具挠度检查
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeflectionCheck {
    pub acceptable: bool,
    pub deflection_mm: f64,
    #[serde(default)]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatterRisk {
    Low,
    Moderate,
    High,
}

/// 颤振风险检查
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatterCheck {
    pub risk: ChatterRisk,
    #[serde(default)]
    pub suggested_rpm: Option<f64>,
}

/// 加工策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    pub feature_kinds: Vec<FeatureKind>,
    /// 适用材料类别，"any" 表示通用
    pub material_categories: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategySource {
    Catalog,
    Default,
}

/// 为某个特征选定的策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChosenStrategy {
    pub feature_id: String,
    pub strategy: String,
    pub score: u32,
    pub source: StrategySource,
}

/// 轴对齐包围盒
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x_min: f64,
    pub y_min: f64,
    pub z_min: f64,
    pub x_max: f64,
    pub y_max: f64,
    pub z_max: f64,
}

impl Bounds {
    /// 特征区域：原点在左下角顶面，向 -Z 切入
    pub fn for_feature(feature: &Feature) -> Self {
        let (x, y) = feature.dimensions.footprint();
        Self {
            x_min: 0.0,
            y_min: 0.0,
            z_min: -feature.dimensions.depth.max(0.0),
            x_max: x,
            y_max: y,
            z_max: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionKind {
    Rapid,
    Feed,
}

/// 单条运动指令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Move {
    pub kind: MotionKind,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub feed: Option<f64>,
}

impl Move {
    pub fn rapid(x: f64, y: f64, z: f64) -> Self {
        Self {
            kind: MotionKind::Rapid,
            x,
            y,
            z,
            feed: None,
        }
    }

    pub fn feed(x: f64, y: f64, z: f64, feed: f64) -> Self {
        Self {
            kind: MotionKind::Feed,
            x,
            y,
            z,
            feed: Some(feed),
        }
    }

    /// 通用 G 代码行（G0 / G1）
    pub fn to_gcode(&self) -> String {
        match (self.kind, self.feed) {
            (MotionKind::Rapid, _) => format!("G0 X{:.3} Y{:.3} Z{:.3}", self.x, self.y, self.z),
            (MotionKind::Feed, Some(f)) => {
                format!("G1 X{:.3} Y{:.3} Z{:.3} F{:.1}", self.x, self.y, self.z, f)
            }
            (MotionKind::Feed, None) => format!("G1 X{:.3} Y{:.3} Z{:.3}", self.x, self.y, self.z),
        }
    }
}

/// ToolpathGeometry 输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolpathRequest {
    pub feature: Feature,
    pub strategy: String,
    pub bounds: Bounds,
    pub tool: ToolSpec,
    pub rpm: f64,
    pub feed_mm_min: f64,
    pub depth_mm: f64,
    pub stepover_mm: f64,
}

/// ToolpathGeometry 输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPath {
    pub moves: Vec<Move>,
    pub estimated_time_s: f64,
}

/// 刀路
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toolpath {
    pub feature_id: String,
    pub tool_id: String,
    pub strategy: String,
    pub rpm: f64,
    pub moves: Vec<Move>,
    pub estimated_time_s: f64,
}

/// 毛坯尺寸（mm），占据 x∈[0,x]、y∈[0,y]、z∈[-z,0]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Stock {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }
}

/// ConstraintsValidator 输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintsInput {
    pub parameters: Vec<PlannedParameters>,
    pub toolpaths: Vec<Toolpath>,
    pub tools: Vec<SelectedTool>,
    pub machine: Option<String>,
}

/// ConstraintsValidator 输出
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintReport {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainmentOptions {
    /// 允许 provider 返回自动修正后的刀路
    pub auto_adjust: bool,
}

/// ContainmentValidator 输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainmentReport {
    pub valid: bool,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default)]
    pub adjusted_path: Option<Toolpath>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostOptions {
    pub program_name: String,
    pub coolant: bool,
}

/// PostProcessor 输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostOutput {
    pub gcode: Vec<String>,
    pub controller: String,
    pub confidence: u8,
    #[serde(default)]
    pub reasoning: Vec<String>,
}

/// SafeDefaultStrategy 输出：最小可用的保守加工方案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeResult {
    pub strategy: String,
    #[serde(default)]
    pub tool: Option<ToolSpec>,
    pub rpm: f64,
    pub feed_mm_min: f64,
    pub depth_of_cut_mm: f64,
    #[serde(default)]
    pub notes: Vec<String>,
}
