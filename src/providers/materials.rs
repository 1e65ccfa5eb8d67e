//! 材料库与按类别插值

use std::sync::Arc;

use async_trait::async_trait;

use crate::capabilities::{
    Interpolation, MaterialHints, MaterialInterpolation, MaterialLookup, MaterialProfile,
};
use crate::core::ProviderError;

struct Entry {
    aliases: &'static [&'static str],
    profile: MaterialProfile,
}

/// 内置材料表（硬质合金刀具参考值）
pub struct MaterialTable {
    entries: Vec<Entry>,
}

fn profile(name: &str, category: &str, hb: Option<f64>, vc: f64, fz: f64, m: f64) -> MaterialProfile {
    MaterialProfile {
        name: name.to_string(),
        category: category.to_string(),
        hardness_hb: hb,
        surface_speed_m_min: vc,
        chip_load_mm: fz,
        machinability: m,
    }
}

/// 名称归一化：小写，只保留字母数字
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

impl MaterialTable {
    pub fn new() -> Self {
        let entries = vec![
            Entry {
                aliases: &["6061", "6061t6", "al6061", "aluminum6061", "aluminium6061", "aluminum", "aluminium"],
                profile: profile("6061-T6", "aluminum", Some(95.0), 300.0, 0.05, 0.9),
            },
            Entry {
                aliases: &["7075", "7075t6", "al7075", "aluminum7075", "aluminium7075"],
                profile: profile("7075-T6", "aluminum", Some(150.0), 250.0, 0.045, 0.8),
            },
            Entry {
                aliases: &["1018", "aisi1018", "1018steel", "mildsteel", "steel"],
                profile: profile("1018", "steel", Some(126.0), 120.0, 0.04, 0.7),
            },
            Entry {
                aliases: &["4140", "aisi4140", "4140steel"],
                profile: profile("4140", "steel", Some(197.0), 90.0, 0.035, 0.55),
            },
            Entry {
                aliases: &["304", "ss304", "304stainless", "stainless304", "stainlesssteel", "stainless"],
                profile: profile("304", "stainless", Some(201.0), 70.0, 0.03, 0.45),
            },
            Entry {
                aliases: &["316", "ss316", "316l", "316stainless", "stainless316"],
                profile: profile("316", "stainless", Some(217.0), 60.0, 0.028, 0.4),
            },
            Entry {
                aliases: &["brass", "c360", "360brass", "c360brass"],
                profile: profile("C360 brass", "brass", Some(120.0), 200.0, 0.05, 1.0),
            },
            Entry {
                aliases: &["titanium", "ti64", "ti6al4v", "grade5", "grade5titanium"],
                profile: profile("Ti-6Al-4V", "titanium", Some(334.0), 45.0, 0.025, 0.25),
            },
            Entry {
                aliases: &["delrin", "acetal", "pom"],
                profile: profile("Delrin", "plastic", None, 250.0, 0.1, 1.0),
            },
        ];
        Self { entries }
    }

    pub fn find(&self, name: &str) -> Option<&MaterialProfile> {
        let key = normalize(name);
        if key.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.aliases.contains(&key.as_str()) || normalize(&e.profile.name) == key)
            .map(|e| &e.profile)
    }

    pub fn in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a MaterialProfile> {
        self.entries
            .iter()
            .map(|e| &e.profile)
            .filter(move |p| p.category == category)
    }
}

impl Default for MaterialTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MaterialLookup for MaterialTable {
    async fn lookup(&self, name: &str) -> Result<Option<MaterialProfile>, ProviderError> {
        Ok(self.find(name).cloned())
    }
}

/// 名称关键字 → 材料类别
const CATEGORY_KEYWORDS: &[(&str, &str)] = &[
    ("stainless", "stainless"),
    ("inox", "stainless"),
    ("alum", "aluminum"),
    ("steel", "steel"),
    ("brass", "brass"),
    ("bronze", "brass"),
    ("copper", "brass"),
    ("titan", "titanium"),
    ("plastic", "plastic"),
    ("nylon", "plastic"),
    ("acetal", "plastic"),
    ("abs", "plastic"),
    ("peek", "plastic"),
];

fn category_of(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(k, _)| lower.contains(k))
        .map(|(_, c)| *c)
}

/// 按类别在材料表中插值：有硬度提示时在相邻两种材料间线性插值，否则取类别均值
pub struct CategoryInterpolator {
    table: Arc<MaterialTable>,
}

impl CategoryInterpolator {
    pub fn new(table: Arc<MaterialTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl MaterialInterpolation for CategoryInterpolator {
    async fn interpolate(
        &self,
        name: &str,
        hints: &MaterialHints,
    ) -> Result<Option<Interpolation>, ProviderError> {
        let category = hints
            .category
            .as_deref()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .or_else(|| category_of(name).map(str::to_string));
        let Some(category) = category else {
            return Ok(None);
        };

        let mut candidates: Vec<&MaterialProfile> = self.table.in_category(&category).collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let hardness = hints.hardness_hb.filter(|h| h.is_finite() && *h > 0.0);
        let (vc, fz, m, based_on) = match hardness {
            Some(hb) if candidates.iter().any(|p| p.hardness_hb.is_some()) => {
                candidates.retain(|p| p.hardness_hb.is_some());
                candidates.sort_by(|a, b| {
                    let da = (a.hardness_hb.unwrap_or(0.0) - hb).abs();
                    let db = (b.hardness_hb.unwrap_or(0.0) - hb).abs();
                    da.total_cmp(&db)
                });
                let a = candidates[0];
                match candidates.get(1) {
                    Some(b) => {
                        let (ha, hb_b) = (a.hardness_hb.unwrap_or(hb), b.hardness_hb.unwrap_or(hb));
                        let t = if (hb_b - ha).abs() < f64::EPSILON {
                            0.0
                        } else {
                            ((hb - ha) / (hb_b - ha)).clamp(0.0, 1.0)
                        };
                        let lerp = |x: f64, y: f64| x + (y - x) * t;
                        (
                            lerp(a.surface_speed_m_min, b.surface_speed_m_min),
                            lerp(a.chip_load_mm, b.chip_load_mm),
                            lerp(a.machinability, b.machinability),
                            vec![a.name.clone(), b.name.clone()],
                        )
                    }
                    None => (
                        a.surface_speed_m_min,
                        a.chip_load_mm,
                        a.machinability,
                        vec![a.name.clone()],
                    ),
                }
            }
            _ => {
                let n = candidates.len() as f64;
                (
                    candidates.iter().map(|p| p.surface_speed_m_min).sum::<f64>() / n,
                    candidates.iter().map(|p| p.chip_load_mm).sum::<f64>() / n,
                    candidates.iter().map(|p| p.machinability).sum::<f64>() / n,
                    candidates.iter().map(|p| p.name.clone()).collect(),
                )
            }
        };

        Ok(Some(Interpolation {
            profile: MaterialProfile {
                name: name.trim().to_string(),
                category,
                hardness_hb: hardness,
                surface_speed_m_min: vc,
                chip_load_mm: fz,
                machinability: m,
            },
            confidence: 70,
            based_on,
        }))
    }
}
