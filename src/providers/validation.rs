//! 机床限制校验与毛坯包容校验

use std::collections::HashMap;

use async_trait::async_trait;

use crate::capabilities::{
    ConstraintReport, ConstraintsInput, ConstraintsValidator, ContainmentOptions,
    ContainmentReport, ContainmentValidator, Stock, Toolpath,
};
use crate::core::ProviderError;

const EPS: f64 = 1e-9;
const MAX_REPORTED_VIOLATIONS: usize = 5;

/// 机床能力
#[derive(Debug, Clone, PartialEq)]
pub struct MachineLimits {
    pub name: String,
    pub max_rpm: f64,
    pub max_feed_mm_min: f64,
    pub max_tool_diameter_mm: f64,
    /// 行程 (x, y, z)
    pub travel_mm: (f64, f64, f64),
}

impl MachineLimits {
    pub fn new(name: &str, rpm: f64, feed: f64, tool: f64, travel: (f64, f64, f64)) -> Self {
        Self {
            name: name.to_string(),
            max_rpm: rpm,
            max_feed_mm_min: feed,
            max_tool_diameter_mm: tool,
            travel_mm: travel,
        }
    }
}

fn machine_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

pub struct MachineLimitValidator {
    generic: MachineLimits,
    machines: HashMap<String, MachineLimits>,
}

impl MachineLimitValidator {
    pub fn new() -> Self {
        let mut validator = Self {
            generic: MachineLimits::new("generic VMC", 12000.0, 10000.0, 63.0, (500.0, 400.0, 300.0)),
            machines: HashMap::new(),
        };
        validator.add(MachineLimits::new("Haas VF-2", 8100.0, 16500.0, 63.0, (762.0, 406.0, 508.0)));
        validator.add(MachineLimits::new("Tormach 1100", 5140.0, 2540.0, 50.0, (457.0, 241.0, 413.0)));
        validator.add(MachineLimits::new("GRBL router", 24000.0, 5000.0, 12.7, (800.0, 800.0, 100.0)));
        validator
    }

    pub fn add(&mut self, limits: MachineLimits) {
        self.machines.insert(machine_key(&limits.name), limits);
    }

    fn limits_for(&self, machine: Option<&str>, warnings: &mut Vec<String>) -> &MachineLimits {
        match machine {
            None => {
                warnings.push("no machine specified; checked against generic limits".to_string());
                &self.generic
            }
            Some(name) => match self.machines.get(&machine_key(name)) {
                Some(limits) => limits,
                None => {
                    warnings.push(format!("unknown machine {name}; checked against generic limits"));
                    &self.generic
                }
            },
        }
    }
}

impl Default for MachineLimitValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConstraintsValidator for MachineLimitValidator {
    async fn validate(&self, input: &ConstraintsInput) -> Result<ConstraintReport, ProviderError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let limits = self.limits_for(input.machine.as_deref(), &mut warnings);

        for planned in &input.parameters {
            let p = &planned.parameters;
            let id = &planned.feature_id;
            if !(p.rpm > 0.0) || !(p.feed_mm_min > 0.0) {
                errors.push(format!("{id}: spindle speed and feed must be positive"));
                continue;
            }
            if p.rpm > limits.max_rpm + EPS {
                errors.push(format!(
                    "{id}: spindle {:.0} rpm exceeds {} maximum {:.0} rpm",
                    p.rpm, limits.name, limits.max_rpm
                ));
            }
            if p.feed_mm_min > limits.max_feed_mm_min + EPS {
                errors.push(format!(
                    "{id}: feed {:.1} mm/min exceeds {} maximum {:.0} mm/min",
                    p.feed_mm_min, limits.name, limits.max_feed_mm_min
                ));
            }
            if p.chip_load_mm > 0.3 {
                warnings.push(format!("{id}: chip load {:.3} mm is unusually heavy", p.chip_load_mm));
            }
        }

        for selected in &input.tools {
            if selected.tool.diameter_mm > limits.max_tool_diameter_mm + EPS {
                errors.push(format!(
                    "{}: tool {} (Ø{}) exceeds {} spindle capacity Ø{}",
                    selected.feature_id,
                    selected.tool.id,
                    selected.tool.diameter_mm,
                    limits.name,
                    limits.max_tool_diameter_mm
                ));
            }
        }

        let (tx, ty, tz) = limits.travel_mm;
        for path in &input.toolpaths {
            let over = path.moves.iter().any(|m| {
                m.x.abs() > tx + EPS || m.y.abs() > ty + EPS || m.z.abs() > tz + EPS
            });
            if over {
                errors.push(format!(
                    "{}: toolpath exceeds {} travel {}x{}x{} mm",
                    path.feature_id, limits.name, tx, ty, tz
                ));
            }
        }

        Ok(ConstraintReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        })
    }
}

/// 毛坯包容：切削高度（z ≤ 0）的点必须落在毛坯内；允许时把越界点钳回毛坯
#[derive(Debug, Default)]
pub struct StockBoundsValidator;

impl StockBoundsValidator {
    fn violations(path: &Toolpath, stock: &Stock) -> Vec<String> {
        path.moves
            .iter()
            .enumerate()
            .filter(|(_, m)| m.z <= EPS)
            .filter(|(_, m)| {
                m.x < -EPS
                    || m.x > stock.x + EPS
                    || m.y < -EPS
                    || m.y > stock.y + EPS
                    || m.z < -stock.z - EPS
            })
            .map(|(i, m)| {
                format!(
                    "move {i} at ({:.3}, {:.3}, {:.3}) leaves stock {}x{}x{}",
                    m.x, m.y, m.z, stock.x, stock.y, stock.z
                )
            })
            .collect()
    }

    fn clamp(path: &Toolpath, stock: &Stock) -> Toolpath {
        let mut adjusted = path.clone();
        for m in adjusted.moves.iter_mut().filter(|m| m.z <= EPS) {
            m.x = m.x.clamp(0.0, stock.x);
            m.y = m.y.clamp(0.0, stock.y);
            m.z = m.z.max(-stock.z);
        }
        adjusted
    }
}

#[async_trait]
impl ContainmentValidator for StockBoundsValidator {
    fn supports_auto_adjust(&self) -> bool {
        true
    }

    async fn validate(
        &self,
        path: &Toolpath,
        stock: &Stock,
        options: &ContainmentOptions,
    ) -> Result<ContainmentReport, ProviderError> {
        if !stock.is_valid() {
            return Err(ProviderError::InvalidInput(format!(
                "stock {}x{}x{} is not a positive volume",
                stock.x, stock.y, stock.z
            )));
        }
        let all = Self::violations(path, stock);
        if all.is_empty() {
            return Ok(ContainmentReport {
                valid: true,
                violations: vec![],
                adjusted_path: None,
            });
        }

        let total = all.len();
        let mut violations: Vec<String> = all.into_iter().take(MAX_REPORTED_VIOLATIONS).collect();
        if total > MAX_REPORTED_VIOLATIONS {
            violations.push(format!("{} more moves outside stock", total - MAX_REPORTED_VIOLATIONS));
        }
        Ok(ContainmentReport {
            valid: false,
            violations,
            adjusted_path: options.auto_adjust.then(|| Self::clamp(path, stock)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CuttingParameters, Move, PlannedParameters};

    fn planned(rpm: f64, feed: f64) -> PlannedParameters {
        PlannedParameters {
            feature_id: "f1".to_string(),
            tool_id: "t".to_string(),
            parameters: CuttingParameters {
                rpm,
                feed_mm_min: feed,
                chip_load_mm: 0.05,
                axial_depth_mm: 2.0,
                radial_stepover_mm: 4.0,
                surface_speed_m_min: 200.0,
            },
            confidence: 85,
            fallback: false,
            adjusted_for_chatter: false,
        }
    }

    fn input(rpm: f64, machine: Option<&str>) -> ConstraintsInput {
        ConstraintsInput {
            parameters: vec![planned(rpm, 1000.0)],
            toolpaths: vec![],
            tools: vec![],
            machine: machine.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_machine_rpm_limit() {
        let v = MachineLimitValidator::new();
        let report = v.validate(&input(9000.0, Some("haas vf2"))).await.unwrap();
        assert!(!report.valid);
        assert!(report.errors[0].contains("Haas VF-2 maximum 8100 rpm"));

        let ok = v.validate(&input(9000.0, Some("GRBL Router"))).await.unwrap();
        assert!(ok.valid);
        assert!(ok.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_machine_uses_generic() {
        let report = MachineLimitValidator::new()
            .validate(&input(5000.0, Some("mystery mill")))
            .await
            .unwrap();
        assert!(report.valid);
        assert!(report.warnings[0].contains("unknown machine mystery mill"));
    }

    fn path(moves: Vec<Move>) -> Toolpath {
        Toolpath {
            feature_id: "f1".to_string(),
            tool_id: "t".to_string(),
            strategy: "offset-pocket".to_string(),
            rpm: 8000.0,
            moves,
            estimated_time_s: 1.0,
        }
    }

    #[tokio::test]
    async fn test_containment_adjusted_path_revalidates() {
        let stock = Stock::new(30.0, 30.0, 10.0);
        let p = path(vec![
            Move::rapid(-10.0, 0.0, 5.0),
            Move::feed(0.0, 0.0, -2.0, 500.0),
            Move::feed(45.0, 10.0, -2.0, 500.0),
            Move::feed(45.0, 10.0, -12.0, 500.0),
        ]);
        let v = StockBoundsValidator;
        let report = v
            .validate(&p, &stock, &ContainmentOptions { auto_adjust: true })
            .await
            .unwrap();
        assert!(!report.valid);
        assert_eq!(report.violations.len(), 2);

        let adjusted = report.adjusted_path.unwrap();
        // 安全高度上的快移不受约束
        assert_eq!(adjusted.moves[0].x, -10.0);
        assert_eq!(adjusted.moves[3].z, -10.0);
        let again = v
            .validate(&adjusted, &stock, &ContainmentOptions { auto_adjust: true })
            .await
            .unwrap();
        assert!(again.valid);
        assert!(again.adjusted_path.is_none());
    }

    #[tokio::test]
    async fn test_containment_without_adjust() {
        let stock = Stock::new(10.0, 10.0, 5.0);
        let p = path(vec![Move::feed(20.0, 0.0, -1.0, 500.0)]);
        let report = StockBoundsValidator
            .validate(&p, &stock, &ContainmentOptions { auto_adjust: false })
            .await
            .unwrap();
        assert!(!report.valid);
        assert!(report.adjusted_path.is_none());
    }
}
