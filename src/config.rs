//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MILLWRIGHT__*` 覆盖
//! （双下划线表示嵌套，如 `MILLWRIGHT__WORKFLOW__PROVIDER_TIMEOUT_SECS=10`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::capabilities::MaterialProfile;
use crate::workflow::ConfidenceWeights;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub workflow: WorkflowSection,
    pub audit: AuditSection,
    pub fallback: FallbackSection,
    pub material_default: MaterialDefaultSection,
    pub providers: ProvidersSection,
}

/// [workflow] 段：超时、置信度常量、默认控制器方言
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    /// 单次 provider 调用超时（秒），0 表示不限
    pub provider_timeout_secs: u64,
    /// 未执行阶段在总体置信度中的中性默认值
    pub neutral_confidence: u8,
    /// 存在硬性校验错误时验证阶段置信度的上限
    pub validation_error_confidence: u8,
    pub default_controller: String,
    pub weights: ConfidenceWeights,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            provider_timeout_secs: 30,
            neutral_confidence: 50,
            validation_error_confidence: 60,
            default_controller: "fanuc".to_string(),
            weights: ConfidenceWeights::default(),
        }
    }
}

/// [audit] 段：保留策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    /// 最多保留的运行记录数，0 表示不限（无界增长，需显式选择）
    pub max_runs: usize,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self { max_runs: 1000 }
    }
}

/// [fallback] 段：决策引擎缺席时的闭式公式常量
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackSection {
    /// rpm = spindle_constant * Vc(m/min) / D(mm)
    pub spindle_constant: f64,
    pub max_rpm: f64,
    pub default_flute_count: u32,
}

impl Default for FallbackSection {
    fn default() -> Self {
        Self {
            spindle_constant: 1000.0 / std::f64::consts::PI,
            max_rpm: 12000.0,
            default_flute_count: 2,
        }
    }
}

/// [material_default] 段：材料无法解析时使用的保守默认参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaterialDefaultSection {
    pub name: String,
    pub category: String,
    pub surface_speed_m_min: f64,
    pub chip_load_mm: f64,
    pub machinability: f64,
}

impl Default for MaterialDefaultSection {
    fn default() -> Self {
        Self {
            name: "conservative-default".to_string(),
            category: "unknown".to_string(),
            surface_speed_m_min: 60.0,
            chip_load_mm: 0.03,
            machinability: 0.4,
        }
    }
}

impl MaterialDefaultSection {
    pub fn profile(&self) -> MaterialProfile {
        MaterialProfile {
            name: self.name.clone(),
            category: self.category.clone(),
            hardness_hb: None,
            surface_speed_m_min: self.surface_speed_m_min,
            chip_load_mm: self.chip_load_mm,
            machinability: self.machinability,
        }
    }
}

/// [providers] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvidersSection {
    /// 是否注册内置参考 provider
    pub builtin: bool,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        Self { builtin: true }
    }
}

/// 从 config 目录加载配置，环境变量 MILLWRIGHT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MILLWRIGHT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MILLWRIGHT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
